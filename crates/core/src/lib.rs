//! droidrig core - shared types
//!
//! Error taxonomy, configuration and the process execution pipeline used by every
//! other droidrig crate.

pub mod config;
pub mod error;
pub mod process;
pub mod retry;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{AdbConfig, HelperConfig, RigConfig, SignerBackend, SigningSettings, ToolchainConfig};
pub use error::{RejectedCandidate, Result, RigError};
pub use process::{
    BackgroundProcess, ExecutionOutcome, ExecutionPipeline, Invocation, ProcessRunner, SystemRunner,
};
pub use retry::{BackoffPolicy, Sleeper, ThreadSleeper};

/// droidrig version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
