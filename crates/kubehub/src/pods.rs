//! Container-level failure detection for pods of a tracked controller.

use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kubetrack_core::PodError;

/// Waiting reasons that mean the container will not start without intervention.
pub const WAITING_FAILURES: &[&str] = &[
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "CreateContainerConfigError",
    "CreateContainerError",
    "InvalidImageName",
];

/// Terminated reasons reported as failures when the exit code is non-zero.
pub const TERMINATED_FAILURES: &[&str] = &["OOMKilled", "Error", "ContainerCannotRun", "DeadlineExceeded"];

fn status_failure(cs: &ContainerStatus) -> Option<String> {
    let state = cs.state.as_ref()?;
    if let Some(w) = &state.waiting {
        let reason = w.reason.as_deref()?;
        if WAITING_FAILURES.contains(&reason) {
            return Some(match &w.message {
                Some(m) if !m.is_empty() => format!("{}: {}", reason, m),
                _ => reason.to_string(),
            });
        }
    }
    if let Some(t) = &state.terminated {
        let reason = t.reason.as_deref()?;
        if t.exit_code != 0 && TERMINATED_FAILURES.contains(&reason) {
            return Some(match &t.message {
                Some(m) if !m.is_empty() => format!("{} (exit code {}): {}", reason, t.exit_code, m),
                _ => format!("{} (exit code {})", reason, t.exit_code),
            });
        }
    }
    None
}

/// Failures of init and regular containers, init containers first.
pub fn container_failures(pod: &Pod) -> Vec<PodError> {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let Some(status) = &pod.status else { return Vec::new(); };
    let init = status.init_container_statuses.iter().flatten();
    let main = status.container_statuses.iter().flatten();
    init.chain(main)
        .filter_map(|cs| {
            status_failure(cs).map(|message| PodError {
                pod_name: pod_name.clone(),
                container_name: cs.name.clone(),
                message,
            })
        })
        .collect()
}

/// Names of init and regular containers from the pod spec.
pub fn container_names(pod: &Pod) -> Vec<String> {
    let Some(spec) = &pod.spec else { return Vec::new(); };
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|c| c.name.clone())
        .collect()
}

/// Restart count of every container with a status, init containers first.
pub fn container_restarts(pod: &Pod) -> Vec<(String, i32)> {
    let Some(status) = &pod.status else { return Vec::new(); };
    let init = status.init_container_statuses.iter().flatten();
    let main = status.container_statuses.iter().flatten();
    init.chain(main).map(|cs| (cs.name.clone(), cs.restart_count)).collect()
}
