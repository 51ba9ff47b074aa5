//! Lifecycle event vocabulary emitted by a tracking loop.

use serde::{Deserialize, Serialize};

/// Pod belonging to the tracked controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRef {
    pub name: String,
}

impl PodRef {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }
}

/// Failure attributable to one container of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodError {
    pub pod_name: String,
    pub container_name: String,
    pub message: String,
}

/// Batch of log lines read from one container, in read order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub pod_name: String,
    pub container_name: String,
    pub lines: Vec<String>,
}

/// Closed set of event kinds. Every `ControllerFeed` has one slot per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Ready,
    Failed,
    Message,
    PodAdded,
    PodError,
    LogChunk,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Ready => "ready",
            EventKind::Failed => "failed",
            EventKind::Message => "message",
            EventKind::PodAdded => "pod_added",
            EventKind::PodError => "pod_error",
            EventKind::LogChunk => "log_chunk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedEvent {
    /// First sight of the resource, with its readiness at that moment.
    Added { ready: bool },
    /// The resource became ready after having been seen not ready.
    Ready,
    Failed { reason: String },
    Message(String),
    PodAdded(PodRef),
    PodError(PodError),
    LogChunk(LogChunk),
}

impl FeedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FeedEvent::Added { .. } => EventKind::Added,
            FeedEvent::Ready => EventKind::Ready,
            FeedEvent::Failed { .. } => EventKind::Failed,
            FeedEvent::Message(_) => EventKind::Message,
            FeedEvent::PodAdded(_) => EventKind::PodAdded,
            FeedEvent::PodError(_) => EventKind::PodError,
            FeedEvent::LogChunk(_) => EventKind::LogChunk,
        }
    }

    /// Pod the event is about, if it is a pod-level event.
    pub fn pod_name(&self) -> Option<&str> {
        match self {
            FeedEvent::PodAdded(p) => Some(&p.name),
            FeedEvent::PodError(e) => Some(&e.pod_name),
            FeedEvent::LogChunk(c) => Some(&c.pod_name),
            _ => None,
        }
    }

    /// True for events that mean "the resource is rolled out".
    pub fn is_readiness(&self) -> bool {
        matches!(self, FeedEvent::Added { ready: true } | FeedEvent::Ready)
    }
}

/// A classified event together with the resource version of the raw update
/// it was derived from. Log chunks carry no resource version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub event: FeedEvent,
    pub resource_version: Option<u64>,
}

impl Observation {
    pub fn new(event: FeedEvent, resource_version: Option<u64>) -> Self {
        Self { event, resource_version }
    }

    pub fn unversioned(event: FeedEvent) -> Self { Self { event, resource_version: None } }
}

/// Parse a metadata.resourceVersion into a comparable number.
/// Non-numeric versions are treated as unknown.
pub fn parse_resource_version(rv: Option<&str>) -> Option<u64> {
    rv.and_then(|s| s.parse::<u64>().ok())
}
