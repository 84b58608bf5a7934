//! Android Toolchain Discovery
//!
//! Locates the Android SDK and JDK executables that the rest of droidrig drives:
//! - bounded-depth walking of candidate roots
//! - newest-version selection among matches
//! - ordered candidate sources with provenance
//! - validated tool sets and the environment their children need

pub mod candidates;
pub mod detector;
pub mod env;
pub mod tools;
pub mod version;
pub mod walker;

pub use candidates::{CandidateLocation, HostEnvironment, MonodroidConfig, Platform, SystemHost};
pub use detector::ToolchainLocator;
pub use env::ToolEnvironment;
pub use tools::{AndroidSdkTools, JdkTools, ToolDependencies, ToolRequirement, ToolSet};
pub use version::{compare_versions, pick_latest, pick_latest_by};
pub use walker::{search, WalkerMatch};
