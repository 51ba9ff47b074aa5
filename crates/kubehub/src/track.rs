//! Watch pump and session entry point for one tracked controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, SelectAll};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Event as CoreEvent, Pod};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, Resource};
use kubetrack_core::{parse_resource_version, ControllerFeed, FeedEvent, Observation, Session, SourceItem, TrackError, TrackOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::controller::TrackedController;
use crate::logs::{follow_container_logs, KubePodLogs, LogTarget, PodLogs};
use crate::pods::{container_names, container_restarts};

/// One raw update from any of the session's watchers.
#[derive(Debug)]
pub enum Raw<K> {
    Controller(Event<K>),
    Pod(Event<Pod>),
    /// ReplicaSets under the selector, for kinds that roll out through them.
    ReplicaSet(Event<ReplicaSet>),
    ClusterEvent(Event<CoreEvent>),
}

pub type RawStream<K> = BoxStream<'static, anyhow::Result<Raw<K>>>;

/// Builds the pod watch (and ReplicaSet watch, when the kind needs one) once
/// the controller's label selector is known.
pub type PodWatchFactory<K> = Box<dyn Fn(&str) -> RawStream<K> + Send + Sync>;

/// A log follower to start once the batch that announced its pod is sent.
#[derive(Debug)]
struct FollowerStart {
    pod: String,
    container: String,
    restarts: i32,
    tail_lines: Option<i64>,
}

struct Follower {
    restarts: i32,
    cancel: CancellationToken,
}

/// Merges watcher streams, classifies updates and feeds the session channel.
pub struct WatchPump<K: TrackedController> {
    label: String,
    options: TrackOptions,
    logs: Arc<dyn PodLogs>,
    classifier: Classifier,
    streams: SelectAll<RawStream<K>>,
    pod_watch: PodWatchFactory<K>,
    pods_started: bool,
    controller: Option<K>,
    replica_sets: Vec<ReplicaSet>,
    followers: HashMap<(String, String), Follower>,
}

fn rv_of<R: Resource>(obj: &R) -> Option<u64> { parse_resource_version(obj.meta().resource_version.as_deref()) }

impl<K: TrackedController> WatchPump<K> {
    pub fn from_streams(
        name: &str,
        options: TrackOptions,
        logs: Arc<dyn PodLogs>,
        initial: Vec<RawStream<K>>,
        pod_watch: PodWatchFactory<K>,
    ) -> Self {
        let mut streams = SelectAll::new();
        for s in initial {
            streams.push(s);
        }
        Self {
            label: format!("{}/{}", K::KIND.short(), name),
            options,
            logs,
            classifier: Classifier::new(K::KIND),
            streams,
            pod_watch,
            pods_started: false,
            controller: None,
            replica_sets: Vec::new(),
            followers: HashMap::new(),
        }
    }

    /// Watchers on the controller (by name), its cluster events, and later its pods.
    pub fn for_cluster(client: Client, name: &str, namespace: &str, options: TrackOptions) -> Self {
        let ctrl_api: Api<K> = Api::namespaced(client.clone(), namespace);
        let ctrl_cfg = watcher::Config::default().fields(&format!("metadata.name={}", name));
        let ctrl = watcher::watcher(ctrl_api, ctrl_cfg).map_ok(Raw::Controller).map_err(anyhow::Error::from).boxed();

        let ev_api: Api<CoreEvent> = Api::namespaced(client.clone(), namespace);
        let ev_cfg = watcher::Config::default()
            .fields(&format!("involvedObject.name={},involvedObject.kind={}", name, K::KIND.kind()));
        let events = watcher::watcher(ev_api, ev_cfg).map_ok(Raw::ClusterEvent).map_err(anyhow::Error::from).boxed();

        let pod_api: Api<Pod> = Api::namespaced(client.clone(), namespace);
        let rs_api: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
        let pod_watch: PodWatchFactory<K> = Box::new(move |selector: &str| -> RawStream<K> {
            let pods = watcher::watcher(pod_api.clone(), watcher::Config::default().labels(selector))
                .map_ok(Raw::Pod)
                .map_err(anyhow::Error::from)
                .boxed();
            if !K::WATCHES_REPLICA_SETS {
                return pods;
            }
            let rs = watcher::watcher(rs_api.clone(), watcher::Config::default().labels(selector))
                .map_ok(Raw::ReplicaSet)
                .map_err(anyhow::Error::from)
                .boxed();
            futures::stream::select(pods, rs).boxed()
        });
        let logs: Arc<dyn PodLogs> = Arc::new(KubePodLogs::new(client, namespace));
        Self::from_streams(name, options, logs, vec![ctrl, events], pod_watch)
    }

    fn on_controller(&mut self, obj: &K, batch: &mut Vec<Observation>) {
        batch.extend(self.classifier.observe_controller(&obj.status(), rv_of(obj)));
        self.controller = Some(obj.clone());
        self.refresh_revision(batch);
        if self.pods_started {
            return;
        }
        if let Some(selector) = obj.pod_selector() {
            info!(resource = %self.label, selector = %selector, "pod watch started");
            self.streams.push((self.pod_watch)(&selector));
            self.pods_started = true;
        }
    }

    /// Re-derive which pods belong to the rollout in progress.
    fn refresh_revision(&mut self, batch: &mut Vec<Observation>) {
        if let Some(obj) = &self.controller {
            let revision = obj.pod_revision(&self.replica_sets);
            batch.extend(self.classifier.set_revision(revision));
        }
    }

    fn on_replica_set(&mut self, rs: ReplicaSet) {
        self.replica_sets.retain(|known| known.metadata.name != rs.metadata.name);
        self.replica_sets.push(rs);
    }

    fn on_pod(&mut self, pod: &Pod, batch: &mut Vec<Observation>, starts: &mut Vec<FollowerStart>) {
        let obs = self.classifier.observe_pod(pod);
        let added = obs.iter().any(|o| matches!(o.event, FeedEvent::PodAdded(_)));
        batch.extend(obs);
        let Some(name) = pod.metadata.name.as_deref() else { return; };
        let restarts = container_restarts(pod);
        let restarts_of = |c: &str| restarts.iter().find(|(n, _)| n == c).map_or(0, |(_, r)| *r);
        if added {
            for container in container_names(pod) {
                let restarts = restarts_of(&container);
                starts.push(FollowerStart { pod: name.to_string(), container, restarts, tail_lines: self.options.tail_lines });
            }
            return;
        }
        // A restarted container serves a fresh log; follow it from the start.
        for (container, count) in &restarts {
            let key = (name.to_string(), container.clone());
            if self.followers.get(&key).is_some_and(|f| *count > f.restarts) {
                debug!(resource = %self.label, pod = %name, container = %container, restarts = count, "container restarted");
                starts.push(FollowerStart { pod: name.to_string(), container: container.clone(), restarts: *count, tail_lines: None });
            }
        }
    }

    fn on_pod_deleted(&mut self, name: &str) {
        self.classifier.pod_deleted(name);
        self.followers.retain(|(pod, _), f| {
            if pod == name {
                f.cancel.cancel();
            }
            pod != name
        });
    }

    /// Classify one raw update. Returns the batch and the log followers to start after it.
    fn classify(&mut self, raw: Raw<K>) -> (Vec<Observation>, Vec<FollowerStart>) {
        let mut batch = Vec::new();
        let mut starts = Vec::new();
        match raw {
            Raw::Controller(Event::Applied(obj)) => self.on_controller(&obj, &mut batch),
            Raw::Controller(Event::Restarted(objs)) => {
                for obj in objs.iter() {
                    self.on_controller(obj, &mut batch);
                }
            }
            Raw::Controller(Event::Deleted(obj)) => batch.extend(self.classifier.controller_deleted(rv_of(&obj))),
            Raw::Pod(Event::Applied(pod)) => self.on_pod(&pod, &mut batch, &mut starts),
            Raw::Pod(Event::Restarted(pods)) => {
                for pod in pods.iter() {
                    self.on_pod(pod, &mut batch, &mut starts);
                }
            }
            Raw::Pod(Event::Deleted(pod)) => {
                if let Some(name) = pod.metadata.name.as_deref() {
                    self.on_pod_deleted(name);
                }
            }
            Raw::ReplicaSet(Event::Applied(rs)) => {
                self.on_replica_set(rs);
                self.refresh_revision(&mut batch);
            }
            Raw::ReplicaSet(Event::Restarted(all)) => {
                self.replica_sets = all;
                self.refresh_revision(&mut batch);
            }
            Raw::ReplicaSet(Event::Deleted(rs)) => {
                self.replica_sets.retain(|known| known.metadata.name != rs.metadata.name);
                self.refresh_revision(&mut batch);
            }
            Raw::ClusterEvent(Event::Applied(ev)) => batch.extend(self.classifier.observe_event(&ev)),
            // initial lists and deletions of cluster events are history, not news
            Raw::ClusterEvent(_) => {}
        }
        (batch, starts)
    }

    fn start_follower(&mut self, start: FollowerStart, tx: &mpsc::Sender<SourceItem>, parent: &CancellationToken) {
        if !self.options.selects_container(&start.container) {
            return;
        }
        debug!(resource = %self.label, pod = %start.pod, container = %start.container, "starting log follower");
        let cancel = parent.child_token();
        let key = (start.pod.clone(), start.container.clone());
        if let Some(previous) = self.followers.insert(key, Follower { restarts: start.restarts, cancel: cancel.clone() }) {
            previous.cancel.cancel();
        }
        let target = LogTarget { pod: start.pod, container: start.container, tx: tx.clone() };
        tokio::spawn(follow_container_logs(
            self.logs.clone(),
            target,
            start.tail_lines,
            Duration::from_millis(self.options.log_retry_ms),
            cancel,
        ));
    }

    /// Run until cancelled, the streams end, the session hangs up, or a watcher fails.
    /// Log followers never outlive the pump, so the session sees the channel close.
    pub async fn run(mut self, tx: mpsc::Sender<SourceItem>, cancel: CancellationToken) {
        let followers = cancel.child_token();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.streams.next() => next,
            };
            let raw = match next {
                None => {
                    warn!(resource = %self.label, "watch streams ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!(resource = %self.label, error = %e, "watcher failed");
                    let e = e.context(format!("watching {}", self.label));
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tx.send(Err(e)) => {}
                    }
                    break;
                }
                Some(Ok(raw)) => raw,
            };
            let (batch, starts) = self.classify(raw);
            if !batch.is_empty() {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    res = tx.send(Ok(batch)) => res.is_ok(),
                };
                if !sent {
                    break;
                }
            }
            for start in starts {
                self.start_follower(start, &tx, &followers);
            }
        }
        followers.cancel();
        debug!(resource = %self.label, "watch pump stopped");
    }
}

/// Track one controller until the feed stops or fails the session, the
/// watch breaks, or `cancel` fires.
pub async fn track<K, F>(
    name: &str,
    namespace: &str,
    client: Client,
    feed: &mut F,
    options: &TrackOptions,
    cancel: &CancellationToken,
) -> Result<(), TrackError>
where
    K: TrackedController,
    F: ControllerFeed + ?Sized,
{
    let pump = WatchPump::<K>::for_cluster(client, name, namespace, options.clone());
    run_pump(pump, feed, options, cancel).await
}

/// Drive a session from an already built pump.
pub async fn run_pump<K, F>(
    pump: WatchPump<K>,
    feed: &mut F,
    options: &TrackOptions,
    cancel: &CancellationToken,
) -> Result<(), TrackError>
where
    K: TrackedController,
    F: ControllerFeed + ?Sized,
{
    let session = Session::new(pump.label.clone(), options.ready_policy, cancel);
    let (tx, rx) = mpsc::channel(options.queue_cap.max(1));
    let handle = tokio::spawn(pump.run(tx, session.token()));
    let res = session.run(feed, rx).await;
    handle.abort();
    res
}
