//! `CloudVolumes` trait and the AWS-CLI-backed implementation.
//!
//! The provider speaks whole GiB; callers pass bytes and the conversion
//! rounds up so a requested increment is never shrunk. Raw API bindings
//! stay behind this trait — nothing else in the tree knows how the
//! provider is reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use volscale_core::units::bytes_to_gib_ceil;
use volscale_core::units::gib_to_bytes;
use volscale_core::{CmdOutput, CommandRunner};

use crate::{CloudError, CloudResult};

const API_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider view of a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescription {
    pub size_bytes: u64,
    /// Provider lifecycle string (e.g. `in-use`).
    pub state: String,
}

/// Where an in-flight capacity modification stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModificationPhase {
    Modifying,
    Optimizing,
    Completed,
    Failed { reason: String },
    /// The provider reports no modification for this volume.
    NoModification,
}

/// A modification's phase plus the size it is working toward. The target
/// lets callers tell their own request apart from a stale modification
/// left over from an earlier resize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationStatus {
    pub phase: ModificationPhase,
    /// Size the modification targets, when the provider reports one.
    pub target_bytes: Option<u64>,
}

impl ModificationStatus {
    pub fn none() -> Self {
        Self {
            phase: ModificationPhase::NoModification,
            target_bytes: None,
        }
    }
}

/// Cloud storage API surface consumed by the resize pipeline.
#[async_trait]
pub trait CloudVolumes: Send + Sync {
    async fn describe_volume(&self, volume_id: &str) -> CloudResult<VolumeDescription>;
    async fn modify_volume(&self, volume_id: &str, target_bytes: u64) -> CloudResult<()>;
    async fn modification_status(&self, volume_id: &str) -> CloudResult<ModificationStatus>;
}

/// Production client shelling out to `aws ec2 ...` with JSON output.
pub struct AwsCliVolumes {
    runner: Arc<dyn CommandRunner>,
    region: Option<String>,
}

impl AwsCliVolumes {
    pub fn new(runner: Arc<dyn CommandRunner>, region: Option<String>) -> Self {
        Self { runner, region }
    }

    async fn invoke(&self, args: &[&str]) -> CloudResult<CmdOutput> {
        let mut full: Vec<&str> = vec!["ec2"];
        full.extend_from_slice(args);
        full.extend_from_slice(&["--output", "json"]);
        if let Some(region) = &self.region {
            full.extend_from_slice(&["--region", region]);
        }

        let out = self.runner.run("aws", &full, API_TIMEOUT).await?;
        if out.success() {
            return Ok(out);
        }
        Err(classify_cli_error(&out.stderr))
    }

    fn parse_json(out: &CmdOutput) -> CloudResult<serde_json::Value> {
        serde_json::from_str(&out.stdout).map_err(|e| CloudError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl CloudVolumes for AwsCliVolumes {
    async fn describe_volume(&self, volume_id: &str) -> CloudResult<VolumeDescription> {
        let out = self
            .invoke(&["describe-volumes", "--volume-ids", volume_id])
            .await?;
        let body = Self::parse_json(&out)?;

        let volume = body["Volumes"]
            .get(0)
            .ok_or_else(|| CloudError::NotFound(volume_id.to_string()))?;
        let size_gib = volume["Size"]
            .as_u64()
            .ok_or_else(|| CloudError::Malformed("Volumes[0].Size missing".to_string()))?;
        let state = volume["State"].as_str().unwrap_or("unknown").to_string();

        debug!(volume = %volume_id, size_gib, %state, "described volume");
        Ok(VolumeDescription {
            size_bytes: gib_to_bytes(size_gib),
            state,
        })
    }

    async fn modify_volume(&self, volume_id: &str, target_bytes: u64) -> CloudResult<()> {
        let size_gib = bytes_to_gib_ceil(target_bytes).to_string();
        info!(volume = %volume_id, %size_gib, "requesting capacity change");
        self.invoke(&[
            "modify-volume",
            "--volume-id",
            volume_id,
            "--size",
            &size_gib,
        ])
        .await?;
        Ok(())
    }

    async fn modification_status(&self, volume_id: &str) -> CloudResult<ModificationStatus> {
        let out = self
            .invoke(&["describe-volumes-modifications", "--volume-ids", volume_id])
            .await;
        let out = match out {
            Ok(out) => out,
            // The provider answers with an error when no modification exists.
            Err(CloudError::Api(detail))
                if detail.contains("InvalidVolumeModification.NotFound") =>
            {
                return Ok(ModificationStatus::none());
            }
            Err(e) => return Err(e),
        };
        let body = Self::parse_json(&out)?;

        let Some(modification) = body["VolumesModifications"].get(0) else {
            return Ok(ModificationStatus::none());
        };
        let state = modification["ModificationState"].as_str().unwrap_or("");
        let phase = match state {
            "modifying" => ModificationPhase::Modifying,
            "optimizing" => ModificationPhase::Optimizing,
            "completed" => ModificationPhase::Completed,
            "failed" => ModificationPhase::Failed {
                reason: modification["StatusMessage"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            other => {
                return Err(CloudError::Malformed(format!(
                    "unexpected ModificationState {other:?}"
                )));
            }
        };
        let target_bytes = modification["TargetSize"].as_u64().map(gib_to_bytes);
        debug!(volume = %volume_id, ?phase, ?target_bytes, "modification status");
        Ok(ModificationStatus {
            phase,
            target_bytes,
        })
    }
}

/// Map a CLI failure to the error taxonomy. Rate-limit responses are the
/// transient class; everything else is a plain API error.
fn classify_cli_error(stderr: &str) -> CloudError {
    let detail = stderr.trim().to_string();
    if detail.contains("RequestLimitExceeded") || detail.contains("Throttling") {
        CloudError::Throttled(detail)
    } else {
        CloudError::Api(detail)
    }
}
