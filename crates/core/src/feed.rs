//! Handler set: one optional slot per event kind.
//!
//! Two shapes are offered. `ControllerFeed` is a trait whose methods default
//! to `Signal::Continue`, for adapters that are naturally a struct.
//! `FeedProto` is a bag of optional closures for ad-hoc callers and tests.

use crate::event::{FeedEvent, LogChunk, PodError, PodRef};
use crate::signal::Signal;

/// Caller behavior for one tracking session. Unimplemented slots are no-ops.
pub trait ControllerFeed: Send {
    fn added(&mut self, ready: bool) -> Signal {
        let _ = ready;
        Signal::Continue
    }
    fn ready(&mut self) -> Signal { Signal::Continue }
    fn failed(&mut self, reason: &str) -> Signal {
        let _ = reason;
        Signal::Continue
    }
    fn event_msg(&mut self, msg: &str) -> Signal {
        let _ = msg;
        Signal::Continue
    }
    fn pod_added(&mut self, pod: &PodRef) -> Signal {
        let _ = pod;
        Signal::Continue
    }
    fn pod_error(&mut self, err: &PodError) -> Signal {
        let _ = err;
        Signal::Continue
    }
    fn pod_log_chunk(&mut self, chunk: &LogChunk) -> Signal {
        let _ = chunk;
        Signal::Continue
    }
}

/// Route an event to its slot.
pub fn deliver<F: ControllerFeed + ?Sized>(feed: &mut F, event: &FeedEvent) -> Signal {
    match event {
        FeedEvent::Added { ready } => feed.added(*ready),
        FeedEvent::Ready => feed.ready(),
        FeedEvent::Failed { reason } => feed.failed(reason),
        FeedEvent::Message(msg) => feed.event_msg(msg),
        FeedEvent::PodAdded(pod) => feed.pod_added(pod),
        FeedEvent::PodError(err) => feed.pod_error(err),
        FeedEvent::LogChunk(chunk) => feed.pod_log_chunk(chunk),
    }
}

type RefSlot<T> = Option<Box<dyn FnMut(&T) -> Signal + Send>>;

/// Closure-based handler set.
#[derive(Default)]
pub struct FeedProto {
    added: Option<Box<dyn FnMut(bool) -> Signal + Send>>,
    ready: Option<Box<dyn FnMut() -> Signal + Send>>,
    failed: RefSlot<str>,
    event_msg: RefSlot<str>,
    pod_added: RefSlot<PodRef>,
    pod_error: RefSlot<PodError>,
    pod_log_chunk: RefSlot<LogChunk>,
}

impl FeedProto {
    pub fn new() -> Self { Self::default() }

    pub fn on_added(mut self, f: impl FnMut(bool) -> Signal + Send + 'static) -> Self {
        self.added = Some(Box::new(f));
        self
    }

    pub fn on_ready(mut self, f: impl FnMut() -> Signal + Send + 'static) -> Self {
        self.ready = Some(Box::new(f));
        self
    }

    pub fn on_failed(mut self, f: impl FnMut(&str) -> Signal + Send + 'static) -> Self {
        self.failed = Some(Box::new(f));
        self
    }

    pub fn on_event_msg(mut self, f: impl FnMut(&str) -> Signal + Send + 'static) -> Self {
        self.event_msg = Some(Box::new(f));
        self
    }

    pub fn on_pod_added(mut self, f: impl FnMut(&PodRef) -> Signal + Send + 'static) -> Self {
        self.pod_added = Some(Box::new(f));
        self
    }

    pub fn on_pod_error(mut self, f: impl FnMut(&PodError) -> Signal + Send + 'static) -> Self {
        self.pod_error = Some(Box::new(f));
        self
    }

    pub fn on_pod_log_chunk(mut self, f: impl FnMut(&LogChunk) -> Signal + Send + 'static) -> Self {
        self.pod_log_chunk = Some(Box::new(f));
        self
    }
}

fn call<T: ?Sized>(slot: &mut RefSlot<T>, arg: &T) -> Signal {
    match slot {
        Some(f) => f(arg),
        None => Signal::Continue,
    }
}

impl ControllerFeed for FeedProto {
    fn added(&mut self, ready: bool) -> Signal {
        match &mut self.added { Some(f) => f(ready), None => Signal::Continue }
    }
    fn ready(&mut self) -> Signal {
        match &mut self.ready { Some(f) => f(), None => Signal::Continue }
    }
    fn failed(&mut self, reason: &str) -> Signal { call(&mut self.failed, reason) }
    fn event_msg(&mut self, msg: &str) -> Signal { call(&mut self.event_msg, msg) }
    fn pod_added(&mut self, pod: &PodRef) -> Signal { call(&mut self.pod_added, pod) }
    fn pod_error(&mut self, err: &PodError) -> Signal { call(&mut self.pod_error, err) }
    fn pod_log_chunk(&mut self, chunk: &LogChunk) -> Signal { call(&mut self.pod_log_chunk, chunk) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ResourceError;

    fn all_events() -> Vec<FeedEvent> {
        vec![
            FeedEvent::Added { ready: false },
            FeedEvent::Ready,
            FeedEvent::Failed { reason: "r".into() },
            FeedEvent::Message("m".into()),
            FeedEvent::PodAdded(PodRef::new("p")),
            FeedEvent::PodError(PodError { pod_name: "p".into(), container_name: "c".into(), message: "m".into() }),
            FeedEvent::LogChunk(LogChunk { pod_name: "p".into(), container_name: "c".into(), lines: vec!["l".into()] }),
        ]
    }

    #[test]
    fn empty_proto_continues_on_every_kind() {
        let mut feed = FeedProto::new();
        for ev in all_events() {
            assert!(matches!(deliver(&mut feed, &ev), Signal::Continue), "{:?}", ev.kind());
        }
    }

    #[test]
    fn slots_receive_their_payloads() {
        let mut feed = FeedProto::new()
            .on_added(|ready| if ready { Signal::Stop } else { Signal::Continue })
            .on_pod_error(|e| Signal::from(ResourceError::new(format!("{} {} {}", e.pod_name, e.container_name, e.message))));
        assert!(matches!(feed.added(false), Signal::Continue));
        assert!(matches!(feed.added(true), Signal::Stop));
        let err = PodError { pod_name: "p1".into(), container_name: "app".into(), message: "OOMKilled".into() };
        match deliver(&mut feed, &FeedEvent::PodError(err)) {
            Signal::Fail(e) => assert_eq!(e.to_string(), "p1 app OOMKilled"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[derive(Default)]
    struct OnlyReady;
    impl ControllerFeed for OnlyReady {
        fn ready(&mut self) -> Signal { Signal::Stop }
    }

    #[test]
    fn trait_defaults_are_no_ops() {
        let mut feed = OnlyReady;
        assert!(matches!(feed.failed("x"), Signal::Continue));
        assert!(matches!(feed.pod_added(&PodRef::new("p")), Signal::Continue));
        assert!(matches!(deliver(&mut feed, &FeedEvent::Ready), Signal::Stop));
    }
}
