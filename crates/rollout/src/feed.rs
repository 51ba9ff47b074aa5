use kubetrack_core::{resource_error, ControllerFeed, LogChunk, PodError, PodRef, Signal};
use kubetrack_kubehub::ControllerKind;
use tracing::{info, warn};

use crate::display::Sinks;

/// Rollout-mode handlers: print progress, stop on readiness, fail on any
/// controller or pod failure.
pub struct RolloutFeed {
    kind: ControllerKind,
    name: String,
    namespace: String,
    sinks: Sinks,
}

impl RolloutFeed {
    pub fn new(kind: ControllerKind, name: impl Into<String>, namespace: impl Into<String>, sinks: Sinks) -> Self {
        Self { kind, name: name.into(), namespace: namespace.into(), sinks }
    }

    /// `sts/web` style reference used in every line.
    fn target(&self) -> String { format!("{}/{}", self.kind.short(), self.name) }

    /// `sts/web in namespace prod`, the subject of every resource error.
    fn subject(&self) -> String { format!("{} in namespace {}", self.target(), self.namespace) }

    fn say(&self, rest: &str) { self.sinks.text.line(&format!("# {} {}", self.target(), rest)); }
}

impl ControllerFeed for RolloutFeed {
    fn added(&mut self, ready: bool) -> Signal {
        if ready {
            self.say("appears to be ready");
            info!(kind = self.kind.kind(), name = %self.name, ns = %self.namespace, "already ready");
            return Signal::Stop;
        }
        self.say("added");
        Signal::Continue
    }

    fn ready(&mut self) -> Signal {
        self.say("become READY");
        info!(kind = self.kind.kind(), name = %self.name, ns = %self.namespace, "ready");
        Signal::Stop
    }

    fn failed(&mut self, reason: &str) -> Signal {
        self.say(&format!("FAIL: {}", reason));
        warn!(kind = self.kind.kind(), name = %self.name, ns = %self.namespace, reason, "rollout failed");
        resource_error!("{} failed: {}", self.subject(), reason).into()
    }

    fn event_msg(&mut self, msg: &str) -> Signal {
        self.say(&format!("event: {}", msg));
        Signal::Continue
    }

    fn pod_added(&mut self, pod: &PodRef) -> Signal {
        self.say(&format!("po/{} added", pod.name));
        Signal::Continue
    }

    fn pod_error(&mut self, err: &PodError) -> Signal {
        self.say(&format!("{} {} error: {}", err.pod_name, err.container_name, err.message));
        warn!(
            kind = self.kind.kind(),
            name = %self.name,
            ns = %self.namespace,
            pod = %err.pod_name,
            container = %err.container_name,
            "container failed: {}",
            err.message
        );
        resource_error!("{} {} {} failed: {}", self.subject(), err.pod_name, err.container_name, err.message).into()
    }

    fn pod_log_chunk(&mut self, chunk: &LogChunk) -> Signal {
        let header = format!("po/{} {}", chunk.pod_name, chunk.container_name);
        self.sinks.display.output_log_lines(&header, &chunk.lines);
        Signal::Continue
    }
}
