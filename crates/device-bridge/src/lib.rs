//! Device Bridge
//!
//! Drives devices through adb:
//! - command builders with flag validation
//! - adb client with daemon-startup retry
//! - device, package, property and instrumentation output parsers
//! - background helper launching

pub mod adb;
pub mod command;
pub mod device;
pub mod helper;
pub mod instrumentation;
pub mod packages;

pub use adb::AdbClient;
pub use command::{
    ActivityManager, AdbCommand, AppOps, CommandSpec, Extra, InstallOptions, Instrument, Intent,
    PackageList, PackageManager, ShellCommand,
};
pub use device::{parse_devices, select_device, Device, DeviceState, DeviceType};
pub use helper::{HelperHandle, HelperLauncher};
pub use instrumentation::InstrumentationReport;
pub use packages::{is_listed, parse_packages, parse_sdk_level, InstalledPackage};

/// Minimum API level for runtime permissions (`install -g`, mock location app-op).
pub const RUNTIME_PERMISSIONS_API: u32 = 23;

/// Minimum API level for the all-files access app-op.
pub const SCOPED_STORAGE_API: u32 = 30;
