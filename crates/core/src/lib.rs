//! kubetrack core: the rollout tracking protocol.
//!
//! Event vocabulary, handler results, the `ControllerFeed` handler set and
//! the session loop that dispatches watch observations to it. No cluster or
//! console I/O lives here.

#![forbid(unsafe_code)]

pub mod event;
pub mod feed;
pub mod options;
pub mod sequence;
pub mod session;
pub mod signal;
pub mod sink;

pub use event::{parse_resource_version, EventKind, FeedEvent, LogChunk, Observation, PodError, PodRef};
pub use feed::{deliver, ControllerFeed, FeedProto};
pub use options::{ReadyPolicy, TrackOptions};
pub use sequence::order_batch;
pub use session::{Dispatcher, Session, SourceItem};
pub use signal::{ResourceError, Signal, TrackError};
pub use sink::{DisplaySink, TextSink};

pub mod prelude {
    pub use super::{ControllerFeed, FeedEvent, LogChunk, PodError, PodRef, ResourceError, Signal, TrackError, TrackOptions};
}
