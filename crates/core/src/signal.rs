//! Handler results and the session error taxonomy.

/// Rollout-level failure. Always means "the tracked resource failed",
/// never "the watch broke".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ResourceError {
    message: String,
}

impl ResourceError {
    pub fn new(message: impl Into<String>) -> Self { Self { message: message.into() } }

    pub fn message(&self) -> &str { &self.message }
}

/// Build a [`ResourceError`] from format arguments.
#[macro_export]
macro_rules! resource_error {
    ($($arg:tt)*) => {
        $crate::ResourceError::new(format!($($arg)*))
    };
}

/// Terminal error of a tracking session.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The rollout itself failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// Any other error a handler chose to return.
    #[error("handler: {0:#}")]
    Handler(anyhow::Error),
    /// The watch or a cluster call broke.
    #[error("watch: {0:#}")]
    Watch(anyhow::Error),
    #[error("watch source closed before a terminal state was reached")]
    SourceClosed,
    #[error("tracking canceled")]
    Canceled,
}

impl TrackError {
    pub fn is_resource(&self) -> bool { matches!(self, TrackError::Resource(_)) }

    pub fn watch(err: impl Into<anyhow::Error>) -> Self { TrackError::Watch(err.into()) }

    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TrackError::Resource(_) => "resource",
            TrackError::Handler(_) => "handler",
            TrackError::Watch(_) => "watch",
            TrackError::SourceClosed => "closed",
            TrackError::Canceled => "canceled",
        }
    }
}

/// What a handler tells the loop after seeing an event.
#[derive(Debug)]
pub enum Signal {
    Continue,
    /// End the session successfully.
    Stop,
    /// End the session with this error.
    Fail(TrackError),
}

impl Signal {
    pub fn resource(err: ResourceError) -> Self { Signal::Fail(TrackError::Resource(err)) }

    pub fn handler(err: impl Into<anyhow::Error>) -> Self { Signal::Fail(TrackError::Handler(err.into())) }

    pub fn is_terminal(&self) -> bool { !matches!(self, Signal::Continue) }
}

impl From<ResourceError> for Signal {
    fn from(err: ResourceError) -> Self { Signal::resource(err) }
}
