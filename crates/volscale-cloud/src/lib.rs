//! volscale-cloud — the provider-facing side of a resize.
//!
//! The daemon talks to the provider through the `CloudVolumes` trait:
//! describe a volume, request a capacity change, poll the modification
//! until the block device reflects the new size. The production
//! implementation shells out to the AWS CLI; tests use scripted mocks.
//!
//! Throttling is the only transient error class: it is retried with
//! bounded exponential backoff, and exhausting the retries is a `Failed`
//! outcome, never a crash.

pub mod client;
pub mod poller;

pub use client::{
    AwsCliVolumes, CloudVolumes, ModificationPhase, ModificationStatus, VolumeDescription,
};
pub use poller::{PollPolicy, ResizeOutcome, await_modification, with_throttle_retry};

use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Error)]
pub enum CloudError {
    /// Provider rate limiting — the only retryable class.
    #[error("provider throttled the request: {0}")]
    Throttled(String),

    #[error("provider API error: {0}")]
    Api(String),

    #[error("volume not found: {0}")]
    NotFound(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("command failed: {0}")]
    Exec(#[from] volscale_core::CmdError),
}

impl CloudError {
    pub fn is_throttle(&self) -> bool {
        matches!(self, CloudError::Throttled(_))
    }
}
