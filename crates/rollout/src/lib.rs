//! kubetrack rollout mode.
//!
//! One entry point per controller kind. Each prints progress for a single
//! resource and returns once it is ready (`Ok`), has failed (a resource
//! error), or tracking itself broke (any other error).

#![forbid(unsafe_code)]

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use kube::Client;
use kubetrack_core::{TrackError, TrackOptions};
use kubetrack_kubehub::{ControllerKind, TrackedController};
use tokio_util::sync::CancellationToken;
use tracing::error;

pub mod display;
pub mod feed;

pub use display::{Sinks, StdoutDisplay, StdoutText};
pub use feed::RolloutFeed;

/// What every session of one invocation shares.
#[derive(Clone)]
pub struct TrackContext {
    pub client: Client,
    pub options: TrackOptions,
    pub sinks: Sinks,
    pub cancel: CancellationToken,
}

/// Track `name` in `namespace` until ready, failed or canceled.
pub async fn track_till_ready<K: TrackedController>(name: &str, namespace: &str, ctx: &TrackContext) -> Result<(), TrackError> {
    let mut feed = RolloutFeed::new(K::KIND, name, namespace, ctx.sinks.clone());
    let res = kubetrack_kubehub::track::<K, _>(name, namespace, ctx.client.clone(), &mut feed, &ctx.options, &ctx.cancel).await;
    if let Err(err) = &res {
        report_tracking_error(K::KIND, name, namespace, err);
    }
    res
}

/// Resource errors are the rollout's own verdict and are already printed by
/// the feed; everything else is logged here.
fn report_tracking_error(kind: ControllerKind, name: &str, namespace: &str, err: &TrackError) {
    if err.is_resource() {
        return;
    }
    error!(kind = kind.kind(), name, ns = namespace, error = %err, "error tracking {} `{}` in namespace `{}`", kind.kind(), name, namespace);
}

pub async fn track_statefulset_till_ready(name: &str, namespace: &str, ctx: &TrackContext) -> Result<(), TrackError> {
    track_till_ready::<StatefulSet>(name, namespace, ctx).await
}

pub async fn track_deployment_till_ready(name: &str, namespace: &str, ctx: &TrackContext) -> Result<(), TrackError> {
    track_till_ready::<Deployment>(name, namespace, ctx).await
}

pub async fn track_daemonset_till_ready(name: &str, namespace: &str, ctx: &TrackContext) -> Result<(), TrackError> {
    track_till_ready::<DaemonSet>(name, namespace, ctx).await
}

pub async fn track_job_till_ready(name: &str, namespace: &str, ctx: &TrackContext) -> Result<(), TrackError> {
    track_till_ready::<Job>(name, namespace, ctx).await
}

pub async fn track_replicaset_till_ready(name: &str, namespace: &str, ctx: &TrackContext) -> Result<(), TrackError> {
    track_till_ready::<ReplicaSet>(name, namespace, ctx).await
}

/// Runtime dispatch for callers that parse the kind from user input.
pub async fn track_kind_till_ready(kind: ControllerKind, name: &str, namespace: &str, ctx: &TrackContext) -> Result<(), TrackError> {
    match kind {
        ControllerKind::StatefulSet => track_statefulset_till_ready(name, namespace, ctx).await,
        ControllerKind::Deployment => track_deployment_till_ready(name, namespace, ctx).await,
        ControllerKind::DaemonSet => track_daemonset_till_ready(name, namespace, ctx).await,
        ControllerKind::Job => track_job_till_ready(name, namespace, ctx).await,
        ControllerKind::ReplicaSet => track_replicaset_till_ready(name, namespace, ctx).await,
    }
}
