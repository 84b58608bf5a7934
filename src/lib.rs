//! droidrig - Android toolchain discovery and APK lifecycle
//!
//! Finds the Android SDK and JDK on a developer or CI machine and drives an APK
//! through install, signing, verification, instrumentation and uninstall by running
//! the SDK's command-line tools and parsing what they print.
//!
//! ## Architecture
//!
//! droidrig is organized into specialized crates:
//!
//! - `droidrig-core`: error taxonomy, configuration, process execution
//! - `droidrig-android-toolchain`: SDK/JDK discovery and tool sets
//! - `droidrig-device-bridge`: adb command building, retry and output parsing
//! - `droidrig-manifest`: aapt manifest dumps
//! - `droidrig-apk-signing`: signing, verification, zipalign, keystore fingerprints

pub mod commands;
pub mod container;
pub mod lifecycle;

// Re-export main components for library usage
pub use droidrig_android_toolchain as toolchain;
pub use droidrig_apk_signing as signing;
pub use droidrig_core as core;
pub use droidrig_device_bridge as device;
pub use droidrig_manifest as manifest;

pub use container::{JdkToolsProvider, ProcessProvider, SdkToolsProvider, Toolchain};
pub use lifecycle::{LifecycleOrchestrator, LifecycleState};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::container::{JdkToolsProvider, ProcessProvider, SdkToolsProvider, Toolchain};
    pub use crate::lifecycle::{LifecycleOrchestrator, LifecycleState};
    pub use droidrig_android_toolchain::{AndroidSdkTools, JdkTools, ToolSet, ToolchainLocator};
    pub use droidrig_apk_signing::{FingerprintSet, KeyStore};
    pub use droidrig_core::{Result, RigConfig, RigError};
    pub use droidrig_device_bridge::AdbClient;
    pub use droidrig_manifest::PackageManifest;
}
