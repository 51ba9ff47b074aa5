//! Turns raw controller, pod and cluster-event updates into lifecycle observations.

use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::{Event as CoreEvent, Pod};
use kubetrack_core::{parse_resource_version, FeedEvent, Observation, PodRef};
use tracing::debug;

use crate::controller::{ControllerKind, ControllerStatus, PodRevision};
use crate::pods::container_failures;

/// Per-session classification state. Readiness is monotonic: once ready,
/// no further readiness events are produced.
pub struct Classifier {
    kind: ControllerKind,
    added: bool,
    ready: bool,
    failures: HashSet<String>,
    /// Last seen state of every live pod, kept to re-check failures when the
    /// current revision changes.
    pods: HashMap<String, Pod>,
    pod_errors: HashSet<(String, String, String)>,
    revision: PodRevision,
}

impl Classifier {
    pub fn new(kind: ControllerKind) -> Self {
        Self {
            kind,
            added: false,
            ready: false,
            failures: HashSet::new(),
            pods: HashMap::new(),
            pod_errors: HashSet::new(),
            revision: PodRevision::Any,
        }
    }

    fn fail_once(&mut self, reason: String, rv: Option<u64>, out: &mut Vec<Observation>) {
        if self.failures.insert(reason.clone()) {
            out.push(Observation::new(FeedEvent::Failed { reason }, rv));
        }
    }

    pub fn observe_controller(&mut self, status: &ControllerStatus, rv: Option<u64>) -> Vec<Observation> {
        let mut out = Vec::new();
        if !self.added {
            self.added = true;
            self.ready = status.ready;
            out.push(Observation::new(FeedEvent::Added { ready: status.ready }, rv));
        } else if status.ready && !self.ready {
            self.ready = true;
            out.push(Observation::new(FeedEvent::Ready, rv));
        }
        if let Some(reason) = &status.failure {
            self.fail_once(reason.clone(), rv, &mut out);
        }
        out
    }

    pub fn controller_deleted(&mut self, rv: Option<u64>) -> Vec<Observation> {
        let mut out = Vec::new();
        self.fail_once(format!("{} deleted", self.kind.kind()), rv, &mut out);
        out
    }

    /// Narrow container failures to pods of `revision`. Failures of already
    /// seen pods that now fall in scope are returned.
    pub fn set_revision(&mut self, revision: PodRevision) -> Vec<Observation> {
        if revision == self.revision {
            return Vec::new();
        }
        debug!(kind = self.kind.kind(), revision = ?revision, "pod revision changed");
        self.revision = revision;
        let mut names: Vec<String> = self.pods.keys().cloned().collect();
        names.sort();
        let mut out = Vec::new();
        for name in names {
            if let Some(pod) = self.pods.get(&name).cloned() {
                self.pod_failures(&pod, &mut out);
            }
        }
        out
    }

    fn pod_failures(&mut self, pod: &Pod, out: &mut Vec<Observation>) {
        if !self.revision.matches(pod) {
            return;
        }
        let rv = parse_resource_version(pod.metadata.resource_version.as_deref());
        for err in container_failures(pod) {
            let key = (err.pod_name.clone(), err.container_name.clone(), err.message.clone());
            if self.pod_errors.insert(key) {
                out.push(Observation::new(FeedEvent::PodError(err), rv));
            }
        }
    }

    /// `PodAdded` on first sight, then each new container failure once for
    /// pods of the current revision.
    pub fn observe_pod(&mut self, pod: &Pod) -> Vec<Observation> {
        let Some(name) = pod.metadata.name.clone() else { return Vec::new(); };
        let rv = parse_resource_version(pod.metadata.resource_version.as_deref());
        let mut out = Vec::new();
        if self.pods.insert(name.clone(), pod.clone()).is_none() {
            out.push(Observation::new(FeedEvent::PodAdded(PodRef::new(name)), rv));
        }
        self.pod_failures(pod, &mut out);
        out
    }

    pub fn pod_deleted(&mut self, name: &str) {
        debug!(pod = %name, "pod deleted; forgetting");
        self.pods.remove(name);
        self.pod_errors.retain(|(p, _, _)| p != name);
    }

    /// Cluster event about the controller, rendered as `reason: message`.
    pub fn observe_event(&mut self, ev: &CoreEvent) -> Vec<Observation> {
        let rv = parse_resource_version(ev.metadata.resource_version.as_deref());
        let text = match (ev.reason.as_deref(), ev.message.as_deref()) {
            (Some(r), Some(m)) => format!("{}: {}", r, m),
            (None, Some(m)) => m.to_string(),
            (Some(r), None) => r.to_string(),
            (None, None) => return Vec::new(),
        };
        vec![Observation::new(FeedEvent::Message(text), rv)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(ready: bool, failure: Option<&str>) -> ControllerStatus {
        ControllerStatus { ready, failure: failure.map(|s| s.to_string()) }
    }

    fn events(obs: Vec<Observation>) -> Vec<FeedEvent> { obs.into_iter().map(|o| o.event).collect() }

    #[test]
    fn added_then_ready_once() {
        let mut c = Classifier::new(ControllerKind::StatefulSet);
        assert_eq!(events(c.observe_controller(&status(false, None), Some(1))), vec![FeedEvent::Added { ready: false }]);
        assert!(c.observe_controller(&status(false, None), Some(2)).is_empty());
        assert_eq!(events(c.observe_controller(&status(true, None), Some(3))), vec![FeedEvent::Ready]);
        // monotonic: flapping back and forth yields nothing new
        assert!(c.observe_controller(&status(false, None), Some(4)).is_empty());
        assert!(c.observe_controller(&status(true, None), Some(5)).is_empty());
    }

    #[test]
    fn ready_at_first_sight_is_added_ready() {
        let mut c = Classifier::new(ControllerKind::Deployment);
        assert_eq!(events(c.observe_controller(&status(true, None), None)), vec![FeedEvent::Added { ready: true }]);
        assert!(c.observe_controller(&status(true, None), None).is_empty());
    }

    #[test]
    fn failure_reported_once_per_reason() {
        let mut c = Classifier::new(ControllerKind::Job);
        let first = events(c.observe_controller(&status(false, Some("BackoffLimitExceeded")), None));
        assert_eq!(first, vec![FeedEvent::Added { ready: false }, FeedEvent::Failed { reason: "BackoffLimitExceeded".into() }]);
        assert!(c.observe_controller(&status(false, Some("BackoffLimitExceeded")), None).is_empty());
        assert_eq!(events(c.controller_deleted(None)), vec![FeedEvent::Failed { reason: "Job deleted".into() }]);
    }

    fn crashing_pod(name: &str, rv: &str) -> Pod { crashing_pod_at(name, rv, "r1") }

    fn crashing_pod_at(name: &str, rv: &str, revision: &str) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": name, "resourceVersion": rv, "labels": {"controller-revision-hash": revision}},
            "status": {"containerStatuses": [
                {"name": "app", "image": "x", "imageID": "", "ready": false, "restartCount": 2,
                 "state": {"waiting": {"reason": "CrashLoopBackOff"}}}
            ]}
        }))
        .expect("valid pod")
    }

    #[test]
    fn pod_added_before_its_errors_and_errors_deduped() {
        let mut c = Classifier::new(ControllerKind::ReplicaSet);
        let obs = c.observe_pod(&crashing_pod("rs-a", "10"));
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].event, FeedEvent::PodAdded(PodRef::new("rs-a")));
        assert!(matches!(&obs[1].event, FeedEvent::PodError(e) if e.container_name == "app"));
        assert_eq!(obs[1].resource_version, Some(10));
        assert!(c.observe_pod(&crashing_pod("rs-a", "11")).is_empty());

        c.pod_deleted("rs-a");
        assert_eq!(c.observe_pod(&crashing_pod("rs-a", "12")).len(), 2);
    }

    fn at(revision: &str) -> PodRevision {
        PodRevision::Label { key: "controller-revision-hash".into(), value: revision.into() }
    }

    #[test]
    fn old_revision_failures_are_not_reported() {
        let mut c = Classifier::new(ControllerKind::StatefulSet);
        assert!(c.set_revision(at("r2")).is_empty());
        let obs = events(c.observe_pod(&crashing_pod_at("web-1", "20", "r1")));
        assert_eq!(obs, vec![FeedEvent::PodAdded(PodRef::new("web-1"))]);
        let obs = events(c.observe_pod(&crashing_pod_at("web-0", "21", "r2")));
        assert_eq!(obs.len(), 2);
        assert!(matches!(&obs[1], FeedEvent::PodError(e) if e.pod_name == "web-0"));
    }

    #[test]
    fn revision_change_rechecks_known_pods() {
        let mut c = Classifier::new(ControllerKind::Deployment);
        assert!(c.set_revision(PodRevision::Unknown).is_empty());
        assert_eq!(c.observe_pod(&crashing_pod_at("api-1", "5", "r3")).len(), 1);
        assert_eq!(c.observe_pod(&crashing_pod_at("api-0", "6", "r2")).len(), 1);
        let obs = events(c.set_revision(at("r3")));
        assert_eq!(obs.len(), 1);
        assert!(matches!(&obs[0], FeedEvent::PodError(e) if e.pod_name == "api-1"));
        // same scope again: nothing new
        assert!(c.set_revision(at("r3")).is_empty());
    }

    #[test]
    fn cluster_event_message() {
        let mut c = Classifier::new(ControllerKind::DaemonSet);
        let ev: CoreEvent = serde_json::from_value(json!({
            "metadata": {"name": "agent.1", "resourceVersion": "7"},
            "involvedObject": {"kind": "DaemonSet", "name": "agent"},
            "reason": "SuccessfulCreate",
            "message": "Created pod: agent-xyz"
        }))
        .expect("valid event");
        assert_eq!(events(c.observe_event(&ev)), vec![FeedEvent::Message("SuccessfulCreate: Created pod: agent-xyz".into())]);
    }
}
