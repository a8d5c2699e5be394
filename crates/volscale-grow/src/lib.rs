//! volscale-grow — extends partition and filesystem to new block capacity.
//!
//! Growth runs online, against a mounted filesystem, in three steps that
//! are each independently idempotent:
//!
//! 1. wait for the kernel to see the new block-device size,
//! 2. grow the partition (when there is one) to fill the device,
//! 3. grow the filesystem with the tool matching its detected type.
//!
//! Re-invoking against an already-grown volume is a no-op, which is what
//! makes restart-after-partial-growth safe. Unsupported filesystem types
//! are a failed outcome, not a crash: the block resize is irreversible, so
//! the volume stays at the new size un-grown for an operator to finish.

pub mod grower;

pub use grower::{FsKind, GrowPlan, Grower};

use thiserror::Error;

pub type GrowResult<T> = Result<T, GrowError>;

#[derive(Debug, Error)]
pub enum GrowError {
    #[error("device {device} did not reach {expected_bytes} bytes within {waited_secs}s")]
    DeviceNotSettled {
        device: String,
        expected_bytes: u64,
        waited_secs: u64,
    },

    #[error("growpart failed on {partition}: {detail}")]
    Partition { partition: String, detail: String },

    #[error("{tool} failed on {target}: {detail}")]
    Filesystem {
        tool: String,
        target: String,
        detail: String,
    },

    #[error("unsupported filesystem type {0:?}; volume left un-grown")]
    UnsupportedFilesystem(String),

    #[error("command failed: {0}")]
    Exec(#[from] volscale_core::CmdError),
}

impl GrowError {
    /// Growth failures are retried on later ticks except this one, which
    /// needs an operator.
    pub fn needs_operator(&self) -> bool {
        matches!(self, GrowError::UnsupportedFilesystem(_))
    }
}
