use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use kubetrack_core::{ReadyPolicy, TrackError, TrackOptions};
use kubetrack_kubehub::ControllerKind;
use kubetrack_rollout::{track_kind_till_ready, Sinks, TrackContext};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kubetrack", version, about = "Follow Kubernetes rollouts until ready")]
struct Cli {
    /// Kubernetes namespace (default: current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Track resources until they are ready or fail
    Rollout {
        /// Targets as kind/name, e.g. "sts/web" or "deployment/api"
        #[arg(required = true)]
        targets: Vec<Target>,
        /// Do not stream container logs
        #[arg(long = "no-logs", action = ArgAction::SetTrue)]
        no_logs: bool,
        /// Only stream logs of these containers
        #[arg(short = 'c', long = "container")]
        containers: Vec<String>,
        /// Start each log stream with the last N lines
        #[arg(long = "tail")]
        tail: Option<i64>,
        /// Give up after this many seconds
        #[arg(long = "timeout")]
        timeout: Option<u64>,
        /// Keep following after readiness (until failure, timeout or Ctrl-C)
        #[arg(long = "follow-after-ready", action = ArgAction::SetTrue)]
        follow_after_ready: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Target {
    kind: ControllerKind,
    name: String,
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, name) = s.split_once('/').ok_or_else(|| anyhow!("expected kind/name, got {:?}", s))?;
        if name.is_empty() || name.contains('/') {
            return Err(anyhow!("invalid resource name in {:?}", s));
        }
        Ok(Target { kind: kind.parse()?, name: name.to_string() })
    }
}

fn init_tracing() {
    let env = std::env::var("KUBETRACK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBETRACK_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KUBETRACK_METRICS_ADDR; expected host:port");
        }
    }
}

/// 0 when every session succeeded, 1 when any rollout failed, 2 otherwise.
fn exit_code(results: &[Result<(), TrackError>]) -> u8 {
    let mut code = 0;
    for r in results {
        match r {
            Ok(()) => {}
            Err(e) if e.is_resource() => code = code.max(1),
            Err(_) => code = 2,
        }
    }
    code
}

fn rollout_options(no_logs: bool, containers: Vec<String>, tail: Option<i64>, follow_after_ready: bool) -> TrackOptions {
    let mut opts = TrackOptions::from_env();
    if no_logs {
        opts.follow_logs = false;
    }
    opts.containers = containers;
    opts.tail_lines = tail.or(opts.tail_lines);
    if follow_after_ready {
        opts.ready_policy = ReadyPolicy::FollowAfterReady;
    }
    opts
}

/// Cancel everything on Ctrl-C or when the deadline passes.
fn spawn_cancel_triggers(cancel: &CancellationToken, timeout: Option<Duration>) {
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                res = signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!(error = %e, "ctrl-c handler failed");
                        return;
                    }
                    info!("interrupted; canceling tracking");
                    cancel.cancel();
                }
            }
        }
    });
    if let Some(limit) = timeout {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    warn!(secs = limit.as_secs(), "timeout reached; canceling tracking");
                    cancel.cancel();
                }
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Rollout { targets, no_logs, containers, tail, timeout, follow_after_ready } => {
            let options = rollout_options(no_logs, containers, tail, follow_after_ready);
            let client = kubetrack_kubehub::get_kube_client().await?;
            let ns = cli.namespace.unwrap_or_else(|| client.default_namespace().to_string());
            info!(ns = %ns, targets = targets.len(), follow_logs = options.follow_logs, "rollout invoked");

            let cancel = CancellationToken::new();
            spawn_cancel_triggers(&cancel, timeout.map(Duration::from_secs));
            let ctx = TrackContext { client, options, sinks: Sinks::stdout(), cancel: cancel.clone() };
            let sessions = targets.iter().map(|t| track_kind_till_ready(t.kind, &t.name, &ns, &ctx));
            let results = futures::future::join_all(sessions).await;
            cancel.cancel();

            for (t, r) in targets.iter().zip(&results) {
                match r {
                    Ok(()) => info!(kind = t.kind.kind(), name = %t.name, "done"),
                    Err(e) => warn!(kind = t.kind.kind(), name = %t.name, outcome = e.label(), "{}", e),
                }
            }
            Ok(ExitCode::from(exit_code(&results)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetrack_core::ResourceError;

    #[test]
    fn targets_parse_kind_and_name() {
        let t: Target = "sts/web".parse().unwrap();
        assert_eq!(t, Target { kind: ControllerKind::StatefulSet, name: "web".into() });
        let t: Target = "Deployment/api".parse().unwrap();
        assert_eq!(t.kind, ControllerKind::Deployment);
        assert!("web".parse::<Target>().is_err());
        assert!("sts/".parse::<Target>().is_err());
        assert!("pod/web".parse::<Target>().is_err());
        assert!("sts/a/b".parse::<Target>().is_err());
    }

    #[test]
    fn exit_code_prefers_non_resource_errors() {
        assert_eq!(exit_code(&[Ok(()), Ok(())]), 0);
        assert_eq!(exit_code(&[Ok(()), Err(ResourceError::new("sts/web failed").into())]), 1);
        assert_eq!(exit_code(&[Err(TrackError::Canceled), Err(ResourceError::new("x").into())]), 2);
        assert_eq!(exit_code(&[Err(ResourceError::new("x").into()), Err(TrackError::SourceClosed)]), 2);
    }

    #[test]
    fn cli_parses_rollout_flags() {
        let cli = Cli::try_parse_from([
            "kubetrack", "--ns", "prod", "rollout", "sts/web", "ds/agent", "--no-logs", "-c", "app", "--tail", "10",
            "--timeout", "300", "--follow-after-ready",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("prod"));
        let Commands::Rollout { targets, no_logs, containers, tail, timeout, follow_after_ready } = cli.command;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].kind, ControllerKind::DaemonSet);
        assert!(no_logs && follow_after_ready);
        assert_eq!(containers, vec!["app"]);
        assert_eq!((tail, timeout), (Some(10), Some(300)));
    }

    #[test]
    fn flags_override_env_defaults() {
        let opts = rollout_options(true, vec!["app".into()], Some(5), true);
        assert!(!opts.follow_logs);
        assert_eq!(opts.containers, vec!["app"]);
        assert_eq!(opts.tail_lines, Some(5));
        assert_eq!(opts.ready_policy, ReadyPolicy::FollowAfterReady);
    }
}
