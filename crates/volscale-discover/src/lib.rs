//! volscale-discover — finds resizable block volumes on the host.
//!
//! Discovery walks the `lsblk` device tree, picks the mounted filesystem
//! per device, and resolves each device to its provider volume identity.
//! Resolution runs fresh on every tick against stable attributes rather
//! than cached device names, so a rename after a previous resize cannot
//! mis-route an operation.

pub mod lsblk;
pub mod usage;

pub use lsblk::{DiscoveredVolume, Discovery, SystemDiscovery};
pub use usage::{StatvfsSampler, UsageSample, UsageSampler};

use thiserror::Error;

pub type DiscoverResult<T> = Result<T, DiscoverError>;

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("command failed: {0}")]
    Exec(#[from] volscale_core::CmdError),

    #[error("{tool} exited with an error: {detail}")]
    Tool { tool: String, detail: String },

    #[error("failed to parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("usage sample failed for {mount_point}: {detail}")]
    Sample { mount_point: String, detail: String },
}
