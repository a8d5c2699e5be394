//! volscale-engine — decides, executes, and schedules volume scaling.
//!
//! Three layers:
//!
//! - [`decision`]: a pure function from observed state to a decision,
//! - [`pipeline`]: the per-volume state machine that carries a decision
//!   through provider resize and filesystem growth, persisting every
//!   transition before acting on it,
//! - [`scheduler`]: the periodic tick that fans volumes out over a
//!   bounded pool and batches results into one notification.

pub mod decision;
pub mod pipeline;
pub mod scheduler;

use thiserror::Error;

pub use decision::{Decision, decide};
pub use pipeline::{Pipeline, VolumeReport};
pub use scheduler::Scheduler;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] volscale_state::StateError),

    #[error(transparent)]
    Cloud(#[from] volscale_cloud::CloudError),

    #[error(transparent)]
    Discover(#[from] volscale_discover::DiscoverError),

    #[error(transparent)]
    Grow(#[from] volscale_grow::GrowError),
}

/// Current unix time in seconds. Clock going backwards reads as 0 rather
/// than panicking.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
