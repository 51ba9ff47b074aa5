use std::time::Duration;

use kubetrack_core::prelude::*;
use kubetrack_core::{FeedProto, Observation, ReadyPolicy, Session, SourceItem};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Counts calls and stops on the n-th event.
struct StopAfter {
    calls: usize,
    stop_at: usize,
}

impl StopAfter {
    fn tick(&mut self) -> Signal {
        self.calls += 1;
        if self.calls == self.stop_at { Signal::Stop } else { Signal::Continue }
    }
}

impl ControllerFeed for StopAfter {
    fn added(&mut self, _ready: bool) -> Signal { self.tick() }
    fn event_msg(&mut self, _msg: &str) -> Signal { self.tick() }
    fn pod_added(&mut self, _pod: &PodRef) -> Signal { self.tick() }
}

fn msgs(n: usize) -> Vec<Observation> {
    (0..n).map(|i| Observation::unversioned(FeedEvent::Message(format!("m{}", i)))).collect()
}

#[tokio::test]
async fn stop_is_final_even_with_queued_batches() {
    let (tx, rx) = mpsc::channel::<SourceItem>(8);
    for _ in 0..3 {
        tx.send(Ok(msgs(2))).await.unwrap();
    }
    let mut feed = StopAfter { calls: 0, stop_at: 3 };
    let session = Session::new("deploy/api", ReadyPolicy::StopWhenReady, &CancellationToken::new());
    let res = session.run(&mut feed, rx).await;
    assert!(res.is_ok());
    assert_eq!(feed.calls, 3);
    // Producers see the session end through the closed channel.
    assert!(tx.send(Ok(msgs(1))).await.is_err());
}

#[tokio::test]
async fn trait_object_feed_gets_unregistered_defaults() {
    let (tx, rx) = mpsc::channel::<SourceItem>(8);
    let every_kind = vec![
        FeedEvent::Added { ready: false },
        FeedEvent::Failed { reason: "ignored".into() },
        FeedEvent::Message("hello".into()),
        FeedEvent::PodAdded(PodRef::new("p")),
        FeedEvent::LogChunk(LogChunk { pod_name: "p".into(), container_name: "c".into(), lines: vec!["x".into()] }),
        FeedEvent::Ready,
    ];
    tx.send(Ok(every_kind.into_iter().map(Observation::unversioned).collect())).await.unwrap();
    let mut feed: Box<dyn ControllerFeed> = Box::new(FeedProto::new());
    let session = Session::new("ds/agent", ReadyPolicy::StopWhenReady, &CancellationToken::new());
    // Unregistered Failed continues; unregistered Ready ends the session.
    assert!(session.run(feed.as_mut(), rx).await.is_ok());
}

#[tokio::test]
async fn parent_cancel_reaches_session_and_producer_tokens() {
    let parent = CancellationToken::new();
    let session = Session::new("job/migrate", ReadyPolicy::StopWhenReady, &parent);
    let producer = session.token();
    let (tx, rx) = mpsc::channel::<SourceItem>(8);
    tx.send(Ok(msgs(1))).await.unwrap();
    let stopper = {
        let parent = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            parent.cancel();
        })
    };
    let mut feed = StopAfter { calls: 0, stop_at: usize::MAX };
    let err = session.run(&mut feed, rx).await.unwrap_err();
    stopper.await.unwrap();
    assert!(matches!(err, TrackError::Canceled));
    assert!(!err.is_resource());
    assert_eq!(feed.calls, 1);
    assert!(producer.is_cancelled());
    drop(tx);
}

#[tokio::test]
async fn session_end_cancels_producers_but_not_parent() {
    let parent = CancellationToken::new();
    let session = Session::new("rs/api-7d9", ReadyPolicy::StopWhenReady, &parent);
    let producer = session.token();
    let (tx, rx) = mpsc::channel::<SourceItem>(1);
    tx.send(Ok(vec![Observation::unversioned(FeedEvent::Added { ready: true })])).await.unwrap();
    let res = session.run(&mut FeedProto::new(), rx).await;
    assert!(res.is_ok());
    assert!(producer.is_cancelled());
    assert!(!parent.is_cancelled());
}
