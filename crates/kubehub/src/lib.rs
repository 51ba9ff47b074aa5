//! kubetrack kubehub: the cluster side of a tracking session.
//!
//! Watches a controller, its pods and its cluster events, decides readiness
//! per kind, follows container logs, and feeds the resulting observations
//! into a `kubetrack_core::Session`.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::Client;
use tracing::info;

pub mod classify;
pub mod controller;
pub mod logs;
pub mod pods;
pub mod track;

pub use classify::Classifier;
pub use controller::{selector_string, ControllerKind, ControllerStatus, PodRevision, TrackedController};
pub use logs::{follow_container_logs, pump_log_chunks, ByteStream, KubePodLogs, LogTarget, PodLogs};
pub use pods::{container_failures, container_names, container_restarts};
pub use track::{run_pump, track, PodWatchFactory, Raw, RawStream, WatchPump};

/// Client for the current kubeconfig context (or in-cluster config).
pub async fn get_kube_client() -> Result<Client> {
    let client = Client::try_default().await.context("building kube client from default config")?;
    info!(ns = %client.default_namespace(), "kube client ready");
    Ok(client)
}
