//! Session configuration.

use serde::{Deserialize, Serialize};

/// What the loop does when a readiness event is answered with `Continue`
/// (or has no handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadyPolicy {
    /// End the session successfully.
    #[default]
    StopWhenReady,
    /// Keep observing, e.g. to keep streaming logs.
    FollowAfterReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackOptions {
    /// Stream container logs of the controller's pods.
    pub follow_logs: bool,
    /// Only these containers are followed; empty means all.
    pub containers: Vec<String>,
    /// Start each log stream with the last n lines.
    pub tail_lines: Option<i64>,
    pub ready_policy: ReadyPolicy,
    /// Capacity of the channel between the watch pump and the session.
    pub queue_cap: usize,
    /// Wait between attempts to open a container log stream.
    pub log_retry_ms: u64,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            follow_logs: true,
            containers: Vec::new(),
            tail_lines: None,
            ready_policy: ReadyPolicy::default(),
            queue_cap: 1024,
            log_retry_ms: 1000,
        }
    }
}

impl TrackOptions {
    /// Defaults overlaid with `KUBETRACK_QUEUE_CAP`, `KUBETRACK_LOG_RETRY_MS`
    /// and `KUBETRACK_FOLLOW_LOGS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut opts = Self::default();
        if let Some(cap) = lookup("KUBETRACK_QUEUE_CAP").and_then(|s| s.parse::<usize>().ok()) {
            opts.queue_cap = cap.max(1);
        }
        if let Some(ms) = lookup("KUBETRACK_LOG_RETRY_MS").and_then(|s| s.parse::<u64>().ok()) {
            opts.log_retry_ms = ms;
        }
        if let Some(v) = lookup("KUBETRACK_FOLLOW_LOGS") {
            opts.follow_logs = !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
        }
        opts
    }

    /// Whether the log of `container` should be followed.
    pub fn selects_container(&self, container: &str) -> bool {
        self.follow_logs && (self.containers.is_empty() || self.containers.iter().any(|c| c == container))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overlay_parses_known_keys() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KUBETRACK_QUEUE_CAP", "0"),
            ("KUBETRACK_LOG_RETRY_MS", "250"),
            ("KUBETRACK_FOLLOW_LOGS", "off"),
        ]);
        let opts = TrackOptions::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(opts.queue_cap, 1);
        assert_eq!(opts.log_retry_ms, 250);
        assert!(!opts.follow_logs);
    }

    #[test]
    fn garbage_values_keep_defaults() {
        let opts = TrackOptions::from_lookup(|k| (k == "KUBETRACK_QUEUE_CAP").then(|| "lots".to_string()));
        assert_eq!(opts, TrackOptions::default());
    }

    #[test]
    fn container_selection() {
        let mut opts = TrackOptions::default();
        assert!(opts.selects_container("app"));
        opts.containers = vec!["sidecar".into()];
        assert!(!opts.selects_container("app"));
        assert!(opts.selects_container("sidecar"));
        opts.follow_logs = false;
        assert!(!opts.selects_container("sidecar"));
    }
}
