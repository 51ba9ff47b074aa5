//! Dispatch loop for one tracking session.
//!
//! A session consumes batches of observations from a bounded channel, orders
//! each batch, and hands events one at a time to the caller's feed. The
//! first terminal result wins; nothing is dispatched after it.

use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{FeedEvent, Observation};
use crate::feed::{deliver, ControllerFeed};
use crate::options::ReadyPolicy;
use crate::sequence::order_batch;
use crate::signal::{Signal, TrackError};

/// One message from a watch source: a batch in watch order, or a transport failure.
pub type SourceItem = anyhow::Result<Vec<Observation>>;

/// Sends events to a feed and records the session's single terminal outcome.
pub struct Dispatcher<'a, F: ControllerFeed + ?Sized> {
    feed: &'a mut F,
    policy: ReadyPolicy,
    outcome: Option<Result<(), TrackError>>,
    dispatched: u64,
}

impl<'a, F: ControllerFeed + ?Sized> Dispatcher<'a, F> {
    pub fn new(feed: &'a mut F, policy: ReadyPolicy) -> Self {
        Self { feed, policy, outcome: None, dispatched: 0 }
    }

    pub fn is_finished(&self) -> bool { self.outcome.is_some() }

    pub fn dispatched(&self) -> u64 { self.dispatched }

    /// Deliver one event. Returns false once the session has a terminal outcome;
    /// after that the feed is never called again.
    pub fn dispatch(&mut self, event: &FeedEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.dispatched += 1;
        counter!("kubetrack_events_dispatched_total", 1, "kind" => event.kind().as_str());
        match deliver(&mut *self.feed, event) {
            Signal::Continue => {
                if event.is_readiness() && self.policy == ReadyPolicy::StopWhenReady {
                    debug!(kind = event.kind().as_str(), "readiness answered with continue; stopping");
                    self.outcome = Some(Ok(()));
                }
            }
            Signal::Stop => self.outcome = Some(Ok(())),
            Signal::Fail(err) => self.outcome = Some(Err(err)),
        }
        self.outcome.is_none()
    }

    /// End the session with `err` unless a terminal outcome already exists.
    pub fn close(&mut self, err: TrackError) {
        if self.outcome.is_none() {
            self.outcome = Some(Err(err));
        }
    }

    /// Take the outcome. A dispatcher that never reached one reports `SourceClosed`.
    pub fn into_outcome(self) -> Result<(), TrackError> {
        self.outcome.unwrap_or(Err(TrackError::SourceClosed))
    }
}

/// A tracking session for one resource.
pub struct Session {
    label: String,
    policy: ReadyPolicy,
    cancel: CancellationToken,
}

impl Session {
    /// `label` names the resource in logs (e.g. `sts/web`). The session is
    /// canceled when `parent` is.
    pub fn new(label: impl Into<String>, policy: ReadyPolicy, parent: &CancellationToken) -> Self {
        Self { label: label.into(), policy, cancel: parent.child_token() }
    }

    pub fn label(&self) -> &str { &self.label }

    /// Token for producers feeding this session (watch pump, log followers).
    /// It is canceled as soon as the session ends.
    pub fn token(&self) -> CancellationToken { self.cancel.child_token() }

    /// Run until the first terminal outcome.
    pub async fn run<F: ControllerFeed + ?Sized>(
        &self,
        feed: &mut F,
        mut source: mpsc::Receiver<SourceItem>,
    ) -> Result<(), TrackError> {
        let started = Instant::now();
        let mut dispatcher = Dispatcher::new(feed, self.policy);
        info!(resource = %self.label, "tracking session started");
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    dispatcher.close(TrackError::Canceled);
                    break;
                }
                item = source.recv() => item,
            };
            match item {
                None => {
                    warn!(resource = %self.label, "watch source closed");
                    dispatcher.close(TrackError::SourceClosed);
                    break;
                }
                Some(Err(e)) => {
                    warn!(resource = %self.label, error = %e, "watch source failed");
                    dispatcher.close(TrackError::Watch(e));
                    break;
                }
                Some(Ok(batch)) => {
                    for obs in order_batch(batch) {
                        if self.cancel.is_cancelled() {
                            dispatcher.close(TrackError::Canceled);
                            break;
                        }
                        if !dispatcher.dispatch(&obs.event) {
                            break;
                        }
                    }
                    if dispatcher.is_finished() {
                        break;
                    }
                }
            }
        }
        let dispatched = dispatcher.dispatched();
        let outcome = dispatcher.into_outcome();
        // Stops the watch pump and log followers.
        self.cancel.cancel();

        let label = match &outcome { Ok(()) => "stopped", Err(e) => e.label() };
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        counter!("kubetrack_sessions_finished_total", 1, "outcome" => label);
        histogram!("kubetrack_session_duration_ms", ms);
        info!(resource = %self.label, outcome = label, dispatched, took_ms = ms as u64, "tracking session ended");
        outcome
    }
}
