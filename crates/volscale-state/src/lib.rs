//! volscale-state — embedded state store for the volscale daemon.
//!
//! Backed by [redb](https://docs.rs/redb). Holds one durable record per
//! tracked volume (lifecycle, provisioned size, cooldown) plus an
//! append-only scaling-event log. redb's transactional writes give the
//! atomicity the daemon relies on: a reader never observes a half-written
//! record, and cooldown/in-flight state survives restarts.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
