//! Ordering rules applied to a batch of observations before dispatch.

use crate::event::{FeedEvent, Observation};
use tracing::debug;

/// True when an error observed at `err_rv` predates a pod add observed at `add_rv`.
/// Unknown versions are treated as older: a pod is announced before its errors.
fn error_predates(err_rv: Option<u64>, add_rv: Option<u64>) -> bool {
    match (err_rv, add_rv) {
        (Some(e), Some(a)) => e < a,
        _ => true,
    }
}

/// Keep watch order, except that a `PodAdded` for pod P is moved in front of
/// the first earlier `PodError` for P that reflects an older resource version.
pub fn order_batch(batch: Vec<Observation>) -> Vec<Observation> {
    let mut out: Vec<Observation> = Vec::with_capacity(batch.len());
    for obs in batch {
        if let FeedEvent::PodAdded(pod) = &obs.event {
            let pos = out.iter().position(|prev| match &prev.event {
                FeedEvent::PodError(e) => e.pod_name == pod.name && error_predates(prev.resource_version, obs.resource_version),
                _ => false,
            });
            if let Some(i) = pos {
                debug!(pod = %pod.name, at = i, "pod added hoisted before older pod error");
                out.insert(i, obs);
                continue;
            }
        }
        out.push(obs);
    }
    out
}
