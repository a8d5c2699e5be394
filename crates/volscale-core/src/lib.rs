//! volscale-core — shared foundation for the volscale daemon.
//!
//! Holds the TOML configuration model, size-unit arithmetic, and the
//! `CommandRunner` seam that every subsystem uses to invoke OS tools.

pub mod config;
pub mod exec;
pub mod units;

pub use config::Config;
pub use exec::{CmdError, CmdOutput, CommandRunner, SystemRunner};
