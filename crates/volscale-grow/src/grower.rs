//! Growth orchestration: settle wait, `growpart`, filesystem tool.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use volscale_core::CommandRunner;
use volscale_core::config::GrowConfig;

use crate::{GrowError, GrowResult};

/// Filesystem family, selecting the growth tool. Tagged variant rather
/// than a trait object — there are exactly two tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsKind {
    Ext,
    Xfs,
    Unsupported(String),
}

impl FsKind {
    pub fn from_fs_type(fs_type: &str) -> Self {
        match fs_type {
            "ext2" | "ext3" | "ext4" => FsKind::Ext,
            "xfs" => FsKind::Xfs,
            other => FsKind::Unsupported(other.to_string()),
        }
    }
}

/// Everything growth needs to know about one volume.
#[derive(Debug, Clone)]
pub struct GrowPlan {
    /// Whole-device path (e.g. `/dev/nvme1n1`).
    pub device: String,
    /// Mounted partition path, absent on unpartitioned devices.
    pub partition: Option<String>,
    pub partition_number: Option<u32>,
    pub mount_point: String,
    pub fs_type: String,
    /// Block size the provider confirmed; growth fills up to this.
    pub expected_bytes: u64,
}

impl GrowPlan {
    /// The node carrying the filesystem: the partition when there is one.
    fn fs_target(&self) -> &str {
        self.partition.as_deref().unwrap_or(&self.device)
    }
}

/// Grows partition and filesystem to consume newly provisioned capacity.
pub struct Grower {
    runner: Arc<dyn CommandRunner>,
    config: GrowConfig,
}

impl Grower {
    pub fn new(runner: Arc<dyn CommandRunner>, config: GrowConfig) -> Self {
        Self { runner, config }
    }

    fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.config.tool_timeout_secs)
    }

    /// Run the full growth sequence. Safe to re-invoke at any point; a
    /// fully grown volume is a no-op.
    pub async fn grow(&self, plan: &GrowPlan) -> GrowResult<()> {
        // Refuse unsupported filesystems before touching the partition
        // table; the retry path for these is an operator, not a tick.
        let kind = FsKind::from_fs_type(&plan.fs_type);
        if let FsKind::Unsupported(fs_type) = kind {
            return Err(GrowError::UnsupportedFilesystem(fs_type));
        }

        self.wait_for_device(plan).await?;

        if let (Some(partition), Some(number)) = (&plan.partition, plan.partition_number) {
            self.grow_partition(&plan.device, partition, number).await?;
        }

        match kind {
            FsKind::Ext => self.grow_ext(plan.fs_target()).await?,
            FsKind::Xfs => self.grow_xfs(&plan.mount_point).await?,
            FsKind::Unsupported(_) => unreachable!("rejected above"),
        }

        info!(device = %plan.device, mount = %plan.mount_point, "filesystem growth complete");
        Ok(())
    }

    /// Poll the kernel-reported device size until it reaches the expected
    /// block size. The provider can report a modification complete slightly
    /// before the instance sees it.
    async fn wait_for_device(&self, plan: &GrowPlan) -> GrowResult<()> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.settle_timeout_secs);

        loop {
            match self.device_size(&plan.device).await {
                Ok(size) if size >= plan.expected_bytes => {
                    debug!(device = %plan.device, size, "device reflects new size");
                    return Ok(());
                }
                Ok(size) => {
                    debug!(
                        device = %plan.device,
                        size,
                        expected = plan.expected_bytes,
                        "device size not settled yet"
                    );
                }
                Err(e) => {
                    warn!(device = %plan.device, error = %e, "device size check failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(GrowError::DeviceNotSettled {
                    device: plan.device.clone(),
                    expected_bytes: plan.expected_bytes,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_secs(self.config.settle_interval_secs)).await;
        }
    }

    async fn device_size(&self, device: &str) -> GrowResult<u64> {
        let out = self
            .runner
            .run("blockdev", &["--getsize64", device], self.tool_timeout())
            .await?;
        if !out.success() {
            return Err(GrowError::Filesystem {
                tool: "blockdev".to_string(),
                target: device.to_string(),
                detail: out.stderr.trim().to_string(),
            });
        }
        out.stdout
            .trim()
            .parse()
            .map_err(|_| GrowError::Filesystem {
                tool: "blockdev".to_string(),
                target: device.to_string(),
                detail: format!("unparseable size {:?}", out.stdout.trim()),
            })
    }

    /// Grow a partition to fill the device. growpart exits 1 with NOCHANGE
    /// when the partition already fills it — that is success here.
    async fn grow_partition(
        &self,
        device: &str,
        partition: &str,
        number: u32,
    ) -> GrowResult<()> {
        let number = number.to_string();
        let out = self
            .runner
            .run("growpart", &[device, &number], self.tool_timeout())
            .await?;

        if out.success() {
            info!(%partition, "partition grown");
            return Ok(());
        }
        if out.status_code == Some(1)
            && (out.stdout.contains("NOCHANGE") || out.stderr.contains("NOCHANGE"))
        {
            debug!(%partition, "partition already fills device");
            return Ok(());
        }
        Err(GrowError::Partition {
            partition: partition.to_string(),
            detail: format!("{}{}", out.stdout.trim(), out.stderr.trim()),
        })
    }

    /// resize2fs grows to fill the partition; already-grown is a no-op.
    async fn grow_ext(&self, target: &str) -> GrowResult<()> {
        let out = self
            .runner
            .run("resize2fs", &[target], self.tool_timeout())
            .await?;
        if !out.success() {
            return Err(GrowError::Filesystem {
                tool: "resize2fs".to_string(),
                target: target.to_string(),
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    /// xfs_growfs addresses the filesystem by mount point.
    async fn grow_xfs(&self, mount_point: &str) -> GrowResult<()> {
        let out = self
            .runner
            .run("xfs_growfs", &["-d", mount_point], self.tool_timeout())
            .await?;
        if !out.success() {
            return Err(GrowError::Filesystem {
                tool: "xfs_growfs".to_string(),
                target: mount_point.to_string(),
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use volscale_core::{CmdError, CmdOutput};

    /// Records invocations and replays scripted outputs per program.
    struct ToolRunner {
        outputs: Mutex<Vec<(String, CmdOutput)>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ToolRunner {
        fn new(outputs: Vec<(&str, i32, &str, &str)>) -> Self {
            Self {
                outputs: Mutex::new(
                    outputs
                        .into_iter()
                        .map(|(program, status, stdout, stderr)| {
                            (
                                program.to_string(),
                                CmdOutput {
                                    status_code: Some(status),
                                    stdout: stdout.to_string(),
                                    stderr: stderr.to_string(),
                                },
                            )
                        })
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn invocations(&self, program: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c[0] == program)
                .count()
        }
    }

    #[async_trait]
    impl CommandRunner for ToolRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<CmdOutput, CmdError> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|s| s.to_string()));
            self.calls.lock().unwrap().push(call);

            let mut outputs = self.outputs.lock().unwrap();
            let index = outputs
                .iter()
                .position(|(p, _)| p == program)
                .unwrap_or_else(|| panic!("unscripted program {program}"));
            // Keep the last output for a program so repeats replay it.
            if outputs.iter().filter(|(p, _)| p == program).count() > 1 {
                Ok(outputs.remove(index).1)
            } else {
                Ok(outputs[index].1.clone())
            }
        }
    }

    fn fast_config() -> GrowConfig {
        GrowConfig {
            settle_timeout_secs: 0,
            settle_interval_secs: 0,
            tool_timeout_secs: 5,
        }
    }

    fn partitioned_plan() -> GrowPlan {
        GrowPlan {
            device: "/dev/nvme1n1".to_string(),
            partition: Some("/dev/nvme1n1p1".to_string()),
            partition_number: Some(1),
            mount_point: "/data".to_string(),
            fs_type: "ext4".to_string(),
            expected_bytes: 110 << 30,
        }
    }

    #[test]
    fn fs_kind_detection() {
        assert_eq!(FsKind::from_fs_type("ext4"), FsKind::Ext);
        assert_eq!(FsKind::from_fs_type("ext3"), FsKind::Ext);
        assert_eq!(FsKind::from_fs_type("xfs"), FsKind::Xfs);
        assert_eq!(
            FsKind::from_fs_type("btrfs"),
            FsKind::Unsupported("btrfs".to_string())
        );
    }

    #[tokio::test]
    async fn ext4_partitioned_growth_runs_all_steps() {
        let runner = Arc::new(ToolRunner::new(vec![
            ("blockdev", 0, "118111600640", ""), // 110 GiB
            ("growpart", 0, "CHANGED: partition=1", ""),
            ("resize2fs", 0, "", ""),
        ]));
        let grower = Grower::new(runner.clone(), fast_config());

        grower.grow(&partitioned_plan()).await.unwrap();

        assert_eq!(runner.invocations("growpart"), 1);
        assert_eq!(runner.invocations("resize2fs"), 1);
        // resize2fs addresses the partition, not the device.
        let calls = runner.calls.lock().unwrap();
        let resize = calls.iter().find(|c| c[0] == "resize2fs").unwrap();
        assert_eq!(resize[1], "/dev/nvme1n1p1");
    }

    #[tokio::test]
    async fn xfs_growth_uses_mount_point() {
        let runner = Arc::new(ToolRunner::new(vec![
            ("blockdev", 0, "118111600640", ""),
            ("growpart", 0, "CHANGED", ""),
            ("xfs_growfs", 0, "", ""),
        ]));
        let grower = Grower::new(runner.clone(), fast_config());

        let mut plan = partitioned_plan();
        plan.fs_type = "xfs".to_string();
        grower.grow(&plan).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        let growfs = calls.iter().find(|c| c[0] == "xfs_growfs").unwrap();
        assert_eq!(growfs[1], "-d");
        assert_eq!(growfs[2], "/data");
    }

    #[tokio::test]
    async fn unpartitioned_device_skips_growpart() {
        let runner = Arc::new(ToolRunner::new(vec![
            ("blockdev", 0, "118111600640", ""),
            ("resize2fs", 0, "", ""),
        ]));
        let grower = Grower::new(runner.clone(), fast_config());

        let mut plan = partitioned_plan();
        plan.partition = None;
        plan.partition_number = None;
        grower.grow(&plan).await.unwrap();

        assert_eq!(runner.invocations("growpart"), 0);
        let calls = runner.calls.lock().unwrap();
        let resize = calls.iter().find(|c| c[0] == "resize2fs").unwrap();
        assert_eq!(resize[1], "/dev/nvme1n1");
    }

    #[tokio::test]
    async fn growpart_nochange_is_a_noop_not_an_error() {
        let runner = Arc::new(ToolRunner::new(vec![
            ("blockdev", 0, "118111600640", ""),
            (
                "growpart",
                1,
                "NOCHANGE: partition 1 is size 230684750. it cannot be grown",
                "",
            ),
            ("resize2fs", 0, "", ""),
        ]));
        let grower = Grower::new(runner, fast_config());

        // Already-grown re-invocation completes cleanly.
        grower.grow(&partitioned_plan()).await.unwrap();
    }

    #[tokio::test]
    async fn growpart_real_failure_surfaces() {
        let runner = Arc::new(ToolRunner::new(vec![
            ("blockdev", 0, "118111600640", ""),
            ("growpart", 2, "", "FAILED: bad sectors"),
        ]));
        let grower = Grower::new(runner, fast_config());

        let err = grower.grow(&partitioned_plan()).await.unwrap_err();
        assert!(matches!(err, GrowError::Partition { .. }));
    }

    #[tokio::test]
    async fn unsupported_filesystem_fails_before_any_tool_runs() {
        let runner = Arc::new(ToolRunner::new(vec![]));
        let grower = Grower::new(runner.clone(), fast_config());

        let mut plan = partitioned_plan();
        plan.fs_type = "btrfs".to_string();
        let err = grower.grow(&plan).await.unwrap_err();

        assert!(matches!(err, GrowError::UnsupportedFilesystem(_)));
        assert!(err.needs_operator());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_never_settling_times_out() {
        // Kernel keeps reporting the old 100 GiB size.
        let runner = Arc::new(ToolRunner::new(vec![("blockdev", 0, "107374182400", "")]));
        let grower = Grower::new(runner, fast_config());

        let err = grower.grow(&partitioned_plan()).await.unwrap_err();
        assert!(matches!(err, GrowError::DeviceNotSettled { .. }));
    }

    #[tokio::test]
    async fn resize2fs_failure_surfaces() {
        let runner = Arc::new(ToolRunner::new(vec![
            ("blockdev", 0, "118111600640", ""),
            ("growpart", 0, "CHANGED", ""),
            ("resize2fs", 1, "", "resize2fs: device busy"),
        ]));
        let grower = Grower::new(runner, fast_config());

        let err = grower.grow(&partitioned_plan()).await.unwrap_err();
        assert!(matches!(err, GrowError::Filesystem { .. }));
        assert!(!err.needs_operator());
    }
}
