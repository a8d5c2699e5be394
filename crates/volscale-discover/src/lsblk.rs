//! Mount-table scan via `lsblk` and provider-identity resolution.
//!
//! `lsblk -b -J` gives the device tree with byte sizes; `ebsnvme-id`
//! resolves a device to its provider volume id from NVMe vital data, which
//! is stable across the device renames that can follow a resize. Errors on
//! a single device are logged and that device is skipped — one bad mount
//! never fails the whole scan.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use volscale_core::CommandRunner;

use crate::usage::UsageSampler;
use crate::{DiscoverError, DiscoverResult};

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// One mounted, provider-resolvable volume found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredVolume {
    pub volume_id: String,
    /// Whole-device path (e.g. `/dev/nvme1n1`).
    pub device: String,
    /// Mounted partition path, absent on unpartitioned devices.
    pub partition: Option<String>,
    pub partition_number: Option<u32>,
    pub mount_point: String,
    pub fs_type: String,
    /// Block-device size as reported by the kernel.
    pub device_size_bytes: u64,
}

/// Enumerates resizable volumes. Seam for scheduler tests.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> DiscoverResult<Vec<DiscoveredVolume>>;
}

// ── lsblk JSON model ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    path: String,
    mountpoint: Option<String>,
    fstype: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// Production discovery backed by `lsblk` + `ebsnvme-id`.
pub struct SystemDiscovery {
    runner: Arc<dyn CommandRunner>,
    sampler: Arc<dyn UsageSampler>,
}

impl SystemDiscovery {
    pub fn new(runner: Arc<dyn CommandRunner>, sampler: Arc<dyn UsageSampler>) -> Self {
        Self { runner, sampler }
    }

    async fn scan(&self) -> DiscoverResult<Vec<DiscoveredVolume>> {
        let out = self
            .runner
            .run(
                "lsblk",
                &["-b", "-o", "NAME,PATH,MOUNTPOINT,FSTYPE,SIZE", "-J"],
                TOOL_TIMEOUT,
            )
            .await?;
        if !out.success() {
            return Err(DiscoverError::Tool {
                tool: "lsblk".to_string(),
                detail: out.stderr.trim().to_string(),
            });
        }

        let tree: LsblkOutput =
            serde_json::from_str(&out.stdout).map_err(|e| DiscoverError::Parse {
                what: "lsblk output".to_string(),
                detail: e.to_string(),
            })?;

        let mut volumes = Vec::new();
        for device in &tree.blockdevices {
            match self.resolve_device(device).await {
                Ok(Some(vol)) => volumes.push(vol),
                Ok(None) => {}
                Err(e) => {
                    warn!(device = %device.path, error = %e, "skipping device");
                }
            }
        }
        Ok(volumes)
    }

    /// Resolve one top-level device to a `DiscoveredVolume`, or `None`
    /// when it carries nothing mounted.
    async fn resolve_device(
        &self,
        device: &LsblkDevice,
    ) -> DiscoverResult<Option<DiscoveredVolume>> {
        let Some(selected) = choose_mounted(device, self.sampler.as_ref()) else {
            debug!(device = %device.path, "nothing mounted, skipping");
            return Ok(None);
        };

        let is_partition = !std::ptr::eq(selected, device);
        let volume_id = self.resolve_volume_id(&selected.path).await?;

        // `mountpoint`/`fstype` are present by construction of `choose_mounted`.
        let mount_point = selected.mountpoint.clone().unwrap_or_default();
        let fs_type = selected.fstype.clone().unwrap_or_default();

        Ok(Some(DiscoveredVolume {
            volume_id,
            device: device.path.clone(),
            partition: is_partition.then(|| selected.path.clone()),
            partition_number: is_partition
                .then(|| partition_number(&selected.name))
                .flatten(),
            mount_point,
            fs_type,
            device_size_bytes: device.size,
        }))
    }

    async fn resolve_volume_id(&self, path: &str) -> DiscoverResult<String> {
        let out = self
            .runner
            .run("ebsnvme-id", &["-v", path], TOOL_TIMEOUT)
            .await?;
        if !out.success() {
            return Err(DiscoverError::Tool {
                tool: "ebsnvme-id".to_string(),
                detail: format!("{path} is not a provider volume: {}", out.stderr.trim()),
            });
        }
        parse_volume_id(&out.stdout).ok_or_else(|| DiscoverError::Parse {
            what: format!("ebsnvme-id output for {path}"),
            detail: out.stdout.trim().to_string(),
        })
    }
}

#[async_trait]
impl Discovery for SystemDiscovery {
    async fn discover(&self) -> DiscoverResult<Vec<DiscoveredVolume>> {
        self.scan().await
    }
}

/// Pick the node to track for a device: the device itself when mounted
/// directly, otherwise the mounted partition with the largest filesystem.
fn choose_mounted<'a>(
    device: &'a LsblkDevice,
    sampler: &dyn UsageSampler,
) -> Option<&'a LsblkDevice> {
    if device.children.is_empty() {
        return device.mountpoint.is_some().then_some(device);
    }

    let mut best: Option<(&LsblkDevice, u64)> = None;
    for child in &device.children {
        let Some(mount) = &child.mountpoint else {
            debug!(partition = %child.path, "partition not mounted, skipping");
            continue;
        };
        let total = match sampler.sample(Path::new(mount)) {
            Ok(sample) => sample.total_bytes,
            Err(e) => {
                warn!(partition = %child.path, error = %e, "usage sample failed, skipping");
                continue;
            }
        };
        if best.is_none_or(|(_, t)| total > t) {
            best = Some((child, total));
        }
    }
    best.map(|(child, _)| child)
}

/// Extract the partition number from a kernel name like `nvme1n1p2` or `xvdf1`.
fn partition_number(name: &str) -> Option<u32> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Parse `ebsnvme-id` output: either `Volume ID: vol-...` (with `-v`) or a
/// bare volume id.
fn parse_volume_id(stdout: &str) -> Option<String> {
    let trimmed = stdout.trim();
    let id = match trimmed.split_once("Volume ID:") {
        Some((_, rest)) => rest.trim(),
        None => trimmed,
    };
    (!id.is_empty() && id.starts_with("vol-")).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::UsageSample;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use volscale_core::{CmdError, CmdOutput};

    const LSBLK_JSON: &str = r#"{
        "blockdevices": [
            {
                "name": "nvme0n1",
                "path": "/dev/nvme0n1",
                "mountpoint": null,
                "fstype": null,
                "size": 107374182400,
                "children": [
                    {
                        "name": "nvme0n1p1",
                        "path": "/dev/nvme0n1p1",
                        "mountpoint": "/",
                        "fstype": "xfs",
                        "size": 107373133824
                    },
                    {
                        "name": "nvme0n1p128",
                        "path": "/dev/nvme0n1p128",
                        "mountpoint": null,
                        "fstype": null,
                        "size": 1048576
                    }
                ]
            },
            {
                "name": "nvme1n1",
                "path": "/dev/nvme1n1",
                "mountpoint": "/data",
                "fstype": "ext4",
                "size": 214748364800
            }
        ]
    }"#;

    /// Scripted runner keyed by program name.
    struct ScriptRunner {
        outputs: Mutex<HashMap<String, Vec<CmdOutput>>>,
    }

    impl ScriptRunner {
        fn new() -> Self {
            Self {
                outputs: Mutex::new(HashMap::new()),
            }
        }

        fn script(self, program: &str, status: i32, stdout: &str) -> Self {
            self.outputs
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push(CmdOutput {
                    status_code: Some(status),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                });
            self
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptRunner {
        async fn run(
            &self,
            program: &str,
            _args: &[&str],
            _timeout: Duration,
        ) -> Result<CmdOutput, CmdError> {
            let mut outputs = self.outputs.lock().unwrap();
            let queue = outputs.get_mut(program).ok_or_else(|| CmdError::Spawn {
                program: program.to_string(),
                detail: "not scripted".to_string(),
            })?;
            if queue.len() > 1 {
                Ok(queue.remove(0))
            } else {
                Ok(queue[0].clone())
            }
        }
    }

    struct FixedSampler;

    impl UsageSampler for FixedSampler {
        fn sample(&self, _mount_point: &Path) -> DiscoverResult<UsageSample> {
            Ok(UsageSample {
                used_bytes: 50 << 30,
                total_bytes: 100 << 30,
            })
        }
    }

    #[test]
    fn partition_number_extraction() {
        assert_eq!(partition_number("nvme0n1p1"), Some(1));
        assert_eq!(partition_number("nvme0n1p128"), Some(128));
        assert_eq!(partition_number("xvdf1"), Some(1));
        assert_eq!(partition_number("xvdf"), None);
    }

    #[test]
    fn parse_volume_id_forms() {
        assert_eq!(
            parse_volume_id("Volume ID: vol-0abc123\n"),
            Some("vol-0abc123".to_string())
        );
        assert_eq!(
            parse_volume_id("vol-0abc123\n"),
            Some("vol-0abc123".to_string())
        );
        assert_eq!(parse_volume_id("garbage"), None);
        assert_eq!(parse_volume_id(""), None);
    }

    #[tokio::test]
    async fn discover_resolves_partitioned_and_bare_devices() {
        let runner = ScriptRunner::new()
            .script("lsblk", 0, LSBLK_JSON)
            .script("ebsnvme-id", 0, "Volume ID: vol-0root\n")
            .script("ebsnvme-id", 0, "Volume ID: vol-0data\n");
        let discovery = SystemDiscovery::new(Arc::new(runner), Arc::new(FixedSampler));

        let volumes = discovery.discover().await.unwrap();
        assert_eq!(volumes.len(), 2);

        let root = &volumes[0];
        assert_eq!(root.volume_id, "vol-0root");
        assert_eq!(root.device, "/dev/nvme0n1");
        assert_eq!(root.partition.as_deref(), Some("/dev/nvme0n1p1"));
        assert_eq!(root.partition_number, Some(1));
        assert_eq!(root.mount_point, "/");
        assert_eq!(root.fs_type, "xfs");
        assert_eq!(root.device_size_bytes, 107374182400);

        let data = &volumes[1];
        assert_eq!(data.volume_id, "vol-0data");
        assert!(data.partition.is_none());
        assert_eq!(data.mount_point, "/data");
        assert_eq!(data.fs_type, "ext4");
    }

    #[tokio::test]
    async fn unresolvable_device_is_skipped_not_fatal() {
        let runner = ScriptRunner::new()
            .script("lsblk", 0, LSBLK_JSON)
            .script("ebsnvme-id", 1, "")
            .script("ebsnvme-id", 0, "Volume ID: vol-0data\n");
        let discovery = SystemDiscovery::new(Arc::new(runner), Arc::new(FixedSampler));

        let volumes = discovery.discover().await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].volume_id, "vol-0data");
    }

    #[tokio::test]
    async fn lsblk_failure_is_fatal_to_the_scan() {
        let runner = ScriptRunner::new().script("lsblk", 1, "");
        let discovery = SystemDiscovery::new(Arc::new(runner), Arc::new(FixedSampler));

        assert!(discovery.discover().await.is_err());
    }

    #[tokio::test]
    async fn device_with_nothing_mounted_is_skipped() {
        let json = r#"{"blockdevices": [
            {"name": "nvme2n1", "path": "/dev/nvme2n1",
             "mountpoint": null, "fstype": null, "size": 1024}
        ]}"#;
        let runner = ScriptRunner::new().script("lsblk", 0, json);
        let discovery = SystemDiscovery::new(Arc::new(runner), Arc::new(FixedSampler));

        assert!(discovery.discover().await.unwrap().is_empty());
    }
}
