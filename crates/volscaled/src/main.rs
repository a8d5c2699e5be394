//! volscaled — block-volume auto-scaling daemon.
//!
//! Single binary that assembles the pipeline end to end:
//! - State store (redb)
//! - Discovery (lsblk + ebsnvme-id) and usage sampling (statvfs)
//! - Cloud resize client (AWS CLI)
//! - Filesystem grower (growpart, resize2fs, xfs_growfs)
//! - Notifier (SES)
//! - Tick scheduler
//!
//! # Usage
//!
//! ```text
//! volscaled --config /etc/volscale/config.toml --daemon
//! ```
//!
//! Without `--daemon`, one evaluation pass runs and the process exits —
//! useful for cron-driven setups and for dry-running a config.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{info, warn};

use volscale_cloud::AwsCliVolumes;
use volscale_core::exec::tool_on_path;
use volscale_core::{CommandRunner, Config, SystemRunner};
use volscale_discover::{StatvfsSampler, SystemDiscovery};
use volscale_engine::{Pipeline, Scheduler};
use volscale_grow::Grower;
use volscale_notify::{Notifier, SesCliTransport};
use volscale_state::StateStore;

/// Tools every run needs; checked up front so a missing package fails at
/// startup, not mid-resize.
const REQUIRED_TOOLS: &[&str] = &[
    "lsblk",
    "ebsnvme-id",
    "blockdev",
    "growpart",
    "resize2fs",
    "xfs_growfs",
    "aws",
];

const IMDS_TIMEOUT: Duration = Duration::from_secs(5);
const CLOUD_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "volscaled", about = "Auto-scales cloud block volumes as they fill up")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/volscale/config.toml")]
    config: PathBuf,

    /// Run the evaluation loop forever. Without this flag a single pass
    /// runs and the process exits.
    #[arg(long)]
    daemon: bool,

    /// Data directory for persistent state.
    #[arg(long, default_value = "/var/lib/volscale")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,volscaled=debug,volscale=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;
    config.validate()?;
    info!(config = %cli.config.display(), "configuration loaded");

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    preflight(runner.as_ref(), config.cloud.region.as_deref(), cli.daemon).await?;

    // An unreadable store means decisions would be made against forgotten
    // in-flight operations; refuse to run.
    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating data dir {}", cli.data_dir.display()))?;
    let db_path = cli.data_dir.join("volscale.redb");
    let store = StateStore::open(&db_path)
        .with_context(|| format!("opening state store {}", db_path.display()))?;
    info!(path = %db_path.display(), "state store opened");

    // ── Assemble the pipeline ──────────────────────────────────

    let region = config.cloud.region.clone();
    let cloud = Arc::new(AwsCliVolumes::new(runner.clone(), region.clone()));
    let grower = Arc::new(Grower::new(runner.clone(), config.grow.clone()));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        cloud,
        grower,
        config.clone(),
    ));

    let sampler = Arc::new(StatvfsSampler);
    let discovery = Arc::new(SystemDiscovery::new(runner.clone(), sampler.clone()));

    let transport = Arc::new(SesCliTransport::new(runner.clone(), region));
    let notifier = Arc::new(Notifier::new(transport, config.notification.clone()));

    let instance_id = if config.notification.enabled {
        volscale_notify::imds::instance_id(IMDS_TIMEOUT).await
    } else {
        "unknown".to_string()
    };

    let scheduler = Scheduler::new(
        discovery,
        sampler,
        pipeline,
        notifier,
        store,
        config,
        instance_id,
    );

    // Resume whatever a previous run left mid-flight before evaluating
    // anything new.
    scheduler.reconcile().await?;

    if cli.daemon {
        run_daemon(scheduler).await
    } else {
        let scaled = scheduler.run_once().await?;
        info!(scaled, "single evaluation pass complete");
        Ok(())
    }
}

async fn run_daemon(scheduler: Scheduler) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await?;
    info!("volscaled stopped");
    Ok(())
}

/// Verify every host tool is reachable and the provider credentials are
/// usable. Fatal in daemon mode; a single pass only warns so a partial
/// setup can still be exercised.
async fn preflight(
    runner: &dyn CommandRunner,
    region: Option<&str>,
    daemon: bool,
) -> anyhow::Result<()> {
    let mut problems = Vec::new();

    let mut missing = Vec::new();
    for tool in REQUIRED_TOOLS {
        if !tool_on_path(runner, tool).await {
            missing.push(*tool);
        }
    }
    if !missing.is_empty() {
        problems.push(format!(
            "required tools missing from PATH: {}",
            missing.join(", ")
        ));
    }

    // Without the CLI there is nothing to ask for credentials.
    if !missing.contains(&"aws")
        && let Err(detail) = check_cloud_access(runner, region).await
    {
        problems.push(format!("cloud API access check failed: {detail}"));
    }

    if problems.is_empty() {
        info!("preflight passed: tools present, cloud API reachable");
        return Ok(());
    }
    if daemon {
        bail!("preflight failed: {}", problems.join("; "));
    }
    for problem in &problems {
        warn!(%problem, "preflight check failed");
    }
    Ok(())
}

/// One cheap read-only API call. Catches a missing instance role or
/// broken credentials at startup instead of on the first resize.
async fn check_cloud_access(
    runner: &dyn CommandRunner,
    region: Option<&str>,
) -> Result<(), String> {
    let mut args = vec![
        "ec2",
        "describe-volumes",
        "--max-results",
        "10",
        "--output",
        "json",
    ];
    if let Some(region) = region {
        args.extend_from_slice(&["--region", region]);
    }
    match runner.run("aws", &args, CLOUD_CHECK_TIMEOUT).await {
        Ok(out) if out.success() => Ok(()),
        Ok(out) => Err(out.stderr.trim().to_string()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use volscale_core::{CmdError, CmdOutput};

    /// Host where every tool resolves; the provider API call is scripted.
    struct HostStub {
        api_ok: bool,
        api_calls: Mutex<Vec<Vec<String>>>,
    }

    impl HostStub {
        fn new(api_ok: bool) -> Self {
            Self {
                api_ok,
                api_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for HostStub {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<CmdOutput, CmdError> {
            match program {
                "which" => Ok(CmdOutput {
                    status_code: Some(0),
                    stdout: format!("/usr/bin/{}", args[0]),
                    stderr: String::new(),
                }),
                "aws" => {
                    self.api_calls
                        .lock()
                        .unwrap()
                        .push(args.iter().map(|s| s.to_string()).collect());
                    if self.api_ok {
                        Ok(CmdOutput {
                            status_code: Some(0),
                            stdout: r#"{"Volumes": []}"#.to_string(),
                            stderr: String::new(),
                        })
                    } else {
                        Ok(CmdOutput {
                            status_code: Some(255),
                            stdout: String::new(),
                            stderr: "Unable to locate credentials".to_string(),
                        })
                    }
                }
                other => panic!("unexpected program {other}"),
            }
        }
    }

    /// Host with no tools installed at all.
    struct BareHost;

    #[async_trait]
    impl CommandRunner for BareHost {
        async fn run(
            &self,
            _program: &str,
            _args: &[&str],
            _timeout: Duration,
        ) -> Result<CmdOutput, CmdError> {
            Ok(CmdOutput {
                status_code: Some(1),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn preflight_passes_with_tools_and_credentials() {
        let host = HostStub::new(true);
        preflight(&host, Some("eu-west-1"), true).await.unwrap();

        let calls = host.api_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&"describe-volumes".to_string()));
        assert!(calls[0].contains(&"--region".to_string()));
    }

    #[tokio::test]
    async fn unusable_credentials_are_fatal_in_daemon_mode() {
        let host = HostStub::new(false);
        let err = preflight(&host, None, true).await.unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[tokio::test]
    async fn unusable_credentials_only_warn_in_single_pass_mode() {
        let host = HostStub::new(false);
        preflight(&host, None, false).await.unwrap();
    }

    #[tokio::test]
    async fn missing_tools_are_fatal_in_daemon_mode() {
        let err = preflight(&BareHost, None, true).await.unwrap_err();
        assert!(err.to_string().contains("missing from PATH"));
    }
}
