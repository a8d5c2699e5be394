//! volscale.toml configuration parser.
//!
//! Every component receives an explicit `Config` (or a section of it) —
//! there is no ambient/global configuration access anywhere in the tree.

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub exclude: ExcludeConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub grow: GrowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Seconds between evaluation ticks.
    pub interval: u64,
    /// Usage percentage that triggers a scale decision (0–100).
    pub threshold: f64,
    /// Fixed increment added to the provisioned size per scale action.
    pub increase_gb: u64,
    /// Optional hard cap on provisioned size. Off by default.
    #[serde(default)]
    pub max_size_gb: Option<u64>,
    /// Minimum wait between resizes of the same volume.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Maximum volumes processed concurrently per tick.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeConfig {
    /// Volume identities the engine never acts on.
    #[serde(default)]
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Provider region. `None` defers to the CLI's own configuration.
    #[serde(default)]
    pub region: Option<String>,
    /// Seconds between modification-status polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Overall deadline for a single modification to complete.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Retries allowed when the provider throttles a call.
    #[serde(default = "default_throttle_retries")]
    pub throttle_retries: u32,
    /// Initial backoff after a throttled call.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Backoff ceiling.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowConfig {
    /// How long to wait for the kernel to see the new block size.
    #[serde(default = "default_settle_timeout_secs")]
    pub settle_timeout_secs: u64,
    /// Interval between device-size checks while settling.
    #[serde(default = "default_settle_interval_secs")]
    pub settle_interval_secs: u64,
    /// Timeout for a single partition/filesystem tool invocation.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    // Providers rate-limit volume modifications; AWS allows one per 6h.
    6 * 60 * 60
}
fn default_concurrency() -> usize {
    4
}
fn default_poll_interval_secs() -> u64 {
    60
}
fn default_poll_timeout_secs() -> u64 {
    30 * 60
}
fn default_throttle_retries() -> u32 {
    5
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_backoff_max_secs() -> u64 {
    60
}
fn default_settle_timeout_secs() -> u64 {
    60
}
fn default_settle_interval_secs() -> u64 {
    5
}
fn default_tool_timeout_secs() -> u64 {
    120
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: None,
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            throttle_retries: default_throttle_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

impl Default for GrowConfig {
    fn default() -> Self {
        Self {
            settle_timeout_secs: default_settle_timeout_secs(),
            settle_interval_secs: default_settle_interval_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot be acted on safely.
    pub fn validate(&self) -> anyhow::Result<()> {
        let g = &self.general;
        if g.interval == 0 {
            bail!("general.interval must be positive");
        }
        if !(g.threshold > 0.0 && g.threshold <= 100.0) {
            bail!("general.threshold must be in (0, 100], got {}", g.threshold);
        }
        if g.increase_gb == 0 {
            bail!("general.increase_gb must be positive");
        }
        if let Some(cap) = g.max_size_gb
            && cap == 0
        {
            bail!("general.max_size_gb must be positive when set");
        }
        if g.concurrency == 0 {
            bail!("general.concurrency must be positive");
        }
        if self.notification.enabled {
            if self.notification.sender.is_empty() {
                bail!("notification.sender is required when notification is enabled");
            }
            if self.notification.recipients.is_empty() {
                bail!("notification.recipients is required when notification is enabled");
            }
        }
        Ok(())
    }

    pub fn is_excluded(&self, volume_id: &str) -> bool {
        self.exclude.volumes.iter().any(|v| v == volume_id)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.general.interval)
    }
}
