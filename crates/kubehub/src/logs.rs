//! Container log following: open a log stream, split it into lines and hand
//! every read's complete lines to the session as one `LogChunk`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use kube::Client;
use kubetrack_core::{FeedEvent, LogChunk, Observation, SourceItem};
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Source of container log byte streams.
#[async_trait::async_trait]
pub trait PodLogs: Send + Sync {
    /// Open a following log stream for one container.
    async fn open(&self, pod: &str, container: &str, tail_lines: Option<i64>) -> Result<ByteStream>;
}

/// `PodLogs` backed by the pods/log subresource.
pub struct KubePodLogs {
    api: Api<Pod>,
}

impl KubePodLogs {
    pub fn new(client: Client, namespace: &str) -> Self { Self { api: Api::namespaced(client, namespace) } }
}

#[async_trait::async_trait]
impl PodLogs for KubePodLogs {
    async fn open(&self, pod: &str, container: &str, tail_lines: Option<i64>) -> Result<ByteStream> {
        use tokio_util::{compat::FuturesAsyncReadCompatExt, io::ReaderStream};
        let lp = LogParams { follow: true, container: Some(container.to_string()), tail_lines, ..LogParams::default() };
        let api = self.api.clone();
        let pod = pod.to_string();
        let (opened_tx, opened_rx) = oneshot::channel::<Result<()>>();
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(64);
        // The log reader is not 'static: a task owns it and forwards bytes
        // until the consumer drops the stream.
        tokio::spawn(async move {
            let reader = match api.log_stream(&pod, &lp).await {
                Ok(r) => {
                    let _ = opened_tx.send(Ok(()));
                    r
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e.into()));
                    return;
                }
            };
            let stream = ReaderStream::new(reader.compat());
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = stream.next() => match next {
                        Some(item) => { if tx.send(item).await.is_err() { break; } }
                        None => break,
                    },
                }
            }
        });
        opened_rx.await.map_err(|_| anyhow!("log stream task ended before opening"))??;
        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        Ok(stream.boxed())
    }
}

/// Where a follower sends its chunks.
#[derive(Clone)]
pub struct LogTarget {
    pub pod: String,
    pub container: String,
    pub tx: mpsc::Sender<SourceItem>,
}

impl LogTarget {
    fn chunk(&self, lines: Vec<String>) -> SourceItem {
        Ok(vec![Observation::unversioned(FeedEvent::LogChunk(LogChunk {
            pod_name: self.pod.clone(),
            container_name: self.container.clone(),
            lines,
        }))])
    }
}

/// Open the container's log stream, retrying every `retry` until the
/// container can serve logs, then pump it until it ends or `cancel` fires.
pub async fn follow_container_logs(
    logs: std::sync::Arc<dyn PodLogs>,
    target: LogTarget,
    tail_lines: Option<i64>,
    retry: Duration,
    cancel: CancellationToken,
) {
    let stream = loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            res = logs.open(&target.pod, &target.container, tail_lines) => res,
        };
        match opened {
            Ok(s) => break s,
            Err(e) => debug!(pod = %target.pod, container = %target.container, error = %e, "log stream not available yet"),
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(retry) => {}
        }
    };
    info!(pod = %target.pod, container = %target.container, "log stream open");
    pump_log_chunks(stream, &target, cancel).await;
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(line).into_owned()
}

/// Split a byte stream into lines and send each read's complete lines as one
/// chunk. Flushes the last partial line at end of stream.
pub async fn pump_log_chunks<S, E>(stream: S, target: &LogTarget, cancel: CancellationToken)
where
    S: futures::Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let stream = stream.fuse();
    futures::pin_mut!(stream);
    let mut buf = BytesMut::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => { debug!(pod = %target.pod, container = %target.container, "log pump cancelled"); return; }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(bytes)) => {
                buf.extend_from_slice(&bytes);
                let mut lines = Vec::new();
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(pos);
                    let _ = buf.split_to(1); // drop '\n'
                    lines.push(decode_line(&line));
                }
                if lines.is_empty() {
                    continue;
                }
                if !send_chunk(target, lines, &cancel).await {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(pod = %target.pod, container = %target.container, error = %e, "log stream error");
                break;
            }
            None => break,
        }
    }
    if !buf.is_empty() {
        let tail = vec![decode_line(&buf)];
        send_chunk(target, tail, &cancel).await;
    }
    info!(pod = %target.pod, container = %target.container, "log pump ended");
}

async fn send_chunk(target: &LogTarget, lines: Vec<String>, cancel: &CancellationToken) -> bool {
    let n = lines.len() as u64;
    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = target.tx.send(target.chunk(lines)) => res.is_ok(),
    };
    if sent {
        counter!("kubetrack_log_lines_total", n);
    }
    sent
}
