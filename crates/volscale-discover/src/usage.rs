//! Filesystem usage sampling.
//!
//! One `statvfs` call per mount point. Usage percent is computed as
//! `used / total * 100.0` on raw `f64` values and compared un-rounded —
//! deterministic for a given sample. Display rounding (one decimal) is
//! presentation only.

use std::path::Path;

use crate::{DiscoverError, DiscoverResult};

/// A point-in-time usage reading for one mounted filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSample {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl UsageSample {
    /// Usage percentage in `[0, 100]`. Zero-sized filesystems read as 0%.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Samples used/total bytes for a mount point.
pub trait UsageSampler: Send + Sync {
    fn sample(&self, mount_point: &Path) -> DiscoverResult<UsageSample>;
}

/// Production sampler backed by `statvfs(2)`.
pub struct StatvfsSampler;

impl UsageSampler for StatvfsSampler {
    fn sample(&self, mount_point: &Path) -> DiscoverResult<UsageSample> {
        let stat = nix::sys::statvfs::statvfs(mount_point).map_err(|e| DiscoverError::Sample {
            mount_point: mount_point.display().to_string(),
            detail: e.to_string(),
        })?;

        let frsize = stat.fragment_size() as u64;
        let total_bytes = stat.blocks() as u64 * frsize;
        let available_bytes = stat.blocks_available() as u64 * frsize;
        let used_bytes = total_bytes.saturating_sub(available_bytes);

        Ok(UsageSample {
            used_bytes,
            total_bytes,
        })
    }
}
