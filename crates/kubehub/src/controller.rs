//! Per-kind readiness predicates for the tracked controllers.

use std::fmt::Debug;
use std::str::FromStr;

use anyhow::anyhow;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    StatefulSet,
    Deployment,
    DaemonSet,
    Job,
    ReplicaSet,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 5] = [
        ControllerKind::StatefulSet,
        ControllerKind::Deployment,
        ControllerKind::DaemonSet,
        ControllerKind::Job,
        ControllerKind::ReplicaSet,
    ];

    /// kubectl-style short name used in output prefixes (`sts/web`).
    pub fn short(&self) -> &'static str {
        match self {
            ControllerKind::StatefulSet => "sts",
            ControllerKind::Deployment => "deploy",
            ControllerKind::DaemonSet => "ds",
            ControllerKind::Job => "job",
            ControllerKind::ReplicaSet => "rs",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControllerKind::StatefulSet => "StatefulSet",
            ControllerKind::Deployment => "Deployment",
            ControllerKind::DaemonSet => "DaemonSet",
            ControllerKind::Job => "Job",
            ControllerKind::ReplicaSet => "ReplicaSet",
        }
    }
}

impl FromStr for ControllerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ControllerKind::ALL
            .into_iter()
            .find(|k| k.short() == lower || k.kind().to_ascii_lowercase() == lower || format!("{}s", k.kind().to_ascii_lowercase()) == lower)
            .ok_or_else(|| anyhow!("unsupported kind: {} (expect sts, deploy, ds, job or rs)", s))
    }
}

/// Readiness verdict for one observed controller object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStatus {
    pub ready: bool,
    pub failure: Option<String>,
}

impl ControllerStatus {
    fn pending() -> Self { Self::default() }
}

/// A workload kind whose rollout can be tracked.
pub trait TrackedController:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    const KIND: ControllerKind;

    fn status(&self) -> ControllerStatus;

    fn selector(&self) -> Option<&LabelSelector>;

    /// Label selector string for the controller's pods, if it selects anything.
    fn pod_selector(&self) -> Option<String> {
        self.selector().map(selector_string).filter(|s| !s.is_empty())
    }

    /// Whether the watch pump also follows the ReplicaSets under the selector.
    const WATCHES_REPLICA_SETS: bool = false;

    /// Which selected pods belong to the rollout in progress. `replica_sets`
    /// holds the ReplicaSets seen under the selector when
    /// [`Self::WATCHES_REPLICA_SETS`] is set.
    fn pod_revision(&self, replica_sets: &[ReplicaSet]) -> PodRevision {
        let _ = replica_sets;
        PodRevision::Any
    }
}

/// Scope of pods whose container failures count against the rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodRevision {
    /// Every selected pod.
    Any,
    /// Only pods labelled `key=value`.
    Label { key: String, value: String },
    /// The current revision is not known yet; no pod counts.
    Unknown,
}

impl PodRevision {
    fn label(key: &str, value: &str) -> Self { PodRevision::Label { key: key.to_string(), value: value.to_string() } }

    pub fn matches(&self, pod: &Pod) -> bool {
        match self {
            PodRevision::Any => true,
            PodRevision::Unknown => false,
            PodRevision::Label { key, value } => {
                pod.metadata.labels.as_ref().and_then(|l| l.get(key)) == Some(value)
            }
        }
    }
}

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

fn generation_observed(meta: &ObjectMeta, observed: Option<i64>) -> bool {
    match (meta.generation, observed) {
        (Some(g), Some(o)) => o >= g,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

/// Render a label selector in the list/watch query syntax.
pub fn selector_string(sel: &LabelSelector) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(ml) = &sel.match_labels {
        for (k, v) in ml {
            parts.push(format!("{}={}", k, v));
        }
    }
    if let Some(exprs) = &sel.match_expressions {
        for e in exprs {
            let values = e.values.clone().unwrap_or_default().join(",");
            match e.operator.as_str() {
                "In" => parts.push(format!("{} in ({})", e.key, values)),
                "NotIn" => parts.push(format!("{} notin ({})", e.key, values)),
                "Exists" => parts.push(e.key.clone()),
                "DoesNotExist" => parts.push(format!("!{}", e.key)),
                _ => {}
            }
        }
    }
    parts.join(",")
}

impl TrackedController for StatefulSet {
    const KIND: ControllerKind = ControllerKind::StatefulSet;

    fn status(&self) -> ControllerStatus {
        let (Some(spec), Some(st)) = (&self.spec, &self.status) else { return ControllerStatus::pending(); };
        if !generation_observed(&self.metadata, st.observed_generation) {
            return ControllerStatus::pending();
        }
        let desired = spec.replicas.unwrap_or(1);
        let rolling = spec
            .update_strategy
            .as_ref()
            .and_then(|s| s.type_.as_deref())
            .map_or(true, |t| t == "RollingUpdate");
        let updated = !rolling
            || (st.updated_replicas.unwrap_or(0) >= desired && st.current_revision == st.update_revision);
        ControllerStatus { ready: st.ready_replicas.unwrap_or(0) >= desired && updated, failure: None }
    }

    fn selector(&self) -> Option<&LabelSelector> { self.spec.as_ref().map(|s| &s.selector) }

    fn pod_revision(&self, _: &[ReplicaSet]) -> PodRevision {
        let Some(st) = &self.status else { return PodRevision::Unknown; };
        if !generation_observed(&self.metadata, st.observed_generation) {
            return PodRevision::Unknown;
        }
        match st.update_revision.as_deref() {
            Some(rev) => PodRevision::label("controller-revision-hash", rev),
            None => PodRevision::Unknown,
        }
    }
}

impl TrackedController for Deployment {
    const KIND: ControllerKind = ControllerKind::Deployment;

    fn status(&self) -> ControllerStatus {
        let (Some(spec), Some(st)) = (&self.spec, &self.status) else { return ControllerStatus::pending(); };
        // Conditions describe the previous generation until it is observed.
        if !generation_observed(&self.metadata, st.observed_generation) {
            return ControllerStatus::pending();
        }
        let failure = st.conditions.as_ref().and_then(|cs| {
            cs.iter()
                .find(|c| c.type_ == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded"))
                .map(|c| c.message.clone().unwrap_or_else(|| "progress deadline exceeded".to_string()))
        });
        let desired = spec.replicas.unwrap_or(1);
        let updated = st.updated_replicas.unwrap_or(0);
        let ready = updated >= desired
            && st.available_replicas.unwrap_or(0) >= desired
            && st.replicas.unwrap_or(0) <= updated;
        ControllerStatus { ready, failure }
    }

    fn selector(&self) -> Option<&LabelSelector> { self.spec.as_ref().map(|s| &s.selector) }

    const WATCHES_REPLICA_SETS: bool = true;

    /// Pods of the new ReplicaSet: the owned one carrying the deployment's
    /// revision annotation, matched by its `pod-template-hash`.
    fn pod_revision(&self, replica_sets: &[ReplicaSet]) -> PodRevision {
        let observed = self.status.as_ref().is_some_and(|st| generation_observed(&self.metadata, st.observed_generation));
        let revision = self.metadata.annotations.as_ref().and_then(|a| a.get(REVISION_ANNOTATION));
        let (true, Some(revision), Some(name)) = (observed, revision, self.metadata.name.as_deref()) else {
            return PodRevision::Unknown;
        };
        replica_sets
            .iter()
            .filter(|rs| rs.metadata.owner_references.iter().flatten().any(|o| o.kind == "Deployment" && o.name == name))
            .find(|rs| rs.metadata.annotations.as_ref().and_then(|a| a.get(REVISION_ANNOTATION)) == Some(revision))
            .and_then(|rs| rs.metadata.labels.as_ref().and_then(|l| l.get("pod-template-hash")))
            .map(|hash| PodRevision::label("pod-template-hash", hash))
            .unwrap_or(PodRevision::Unknown)
    }
}

impl TrackedController for DaemonSet {
    const KIND: ControllerKind = ControllerKind::DaemonSet;

    fn status(&self) -> ControllerStatus {
        let Some(st) = &self.status else { return ControllerStatus::pending(); };
        if !generation_observed(&self.metadata, st.observed_generation) {
            return ControllerStatus::pending();
        }
        let desired = st.desired_number_scheduled;
        let ready = st.updated_number_scheduled.unwrap_or(0) >= desired && st.number_available.unwrap_or(0) >= desired;
        ControllerStatus { ready, failure: None }
    }

    fn selector(&self) -> Option<&LabelSelector> { self.spec.as_ref().map(|s| &s.selector) }
}

impl TrackedController for ReplicaSet {
    const KIND: ControllerKind = ControllerKind::ReplicaSet;

    fn status(&self) -> ControllerStatus {
        let (Some(spec), Some(st)) = (&self.spec, &self.status) else { return ControllerStatus::pending(); };
        if !generation_observed(&self.metadata, st.observed_generation) {
            return ControllerStatus::pending();
        }
        let failure = st.conditions.as_ref().and_then(|cs| {
            cs.iter()
                .find(|c| c.type_ == "ReplicaFailure" && c.status == "True")
                .map(|c| c.message.clone().or_else(|| c.reason.clone()).unwrap_or_else(|| "replica failure".to_string()))
        });
        let desired = spec.replicas.unwrap_or(1);
        let ready = st.ready_replicas.unwrap_or(0) >= desired && st.available_replicas.unwrap_or(0) >= desired;
        ControllerStatus { ready, failure }
    }

    fn selector(&self) -> Option<&LabelSelector> { self.spec.as_ref().map(|s| &s.selector) }
}

impl TrackedController for Job {
    const KIND: ControllerKind = ControllerKind::Job;

    fn status(&self) -> ControllerStatus {
        let Some(conds) = self.status.as_ref().and_then(|s| s.conditions.as_ref()) else { return ControllerStatus::pending(); };
        let is_true = |t: &str| conds.iter().find(|c| c.type_ == t && c.status == "True");
        if let Some(c) = is_true("Failed") {
            let reason = c.reason.clone().unwrap_or_else(|| "Failed".to_string());
            let failure = match &c.message {
                Some(m) => format!("{}: {}", reason, m),
                None => reason,
            };
            return ControllerStatus { ready: false, failure: Some(failure) };
        }
        ControllerStatus { ready: is_true("Complete").is_some(), failure: None }
    }

    fn selector(&self) -> Option<&LabelSelector> { self.spec.as_ref().and_then(|s| s.selector.as_ref()) }
}
