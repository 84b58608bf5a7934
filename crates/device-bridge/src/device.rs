//! Device Types and State
//!
//! Represents Android devices (physical and emulated) as reported by `adb devices -l`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use droidrig_core::{Result, RigError};

/// Device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Device is online and ready
    Online,
    /// Device is offline
    Offline,
    /// Device is not authorized (need to accept on device)
    Unauthorized,
    /// Host lacks USB permissions for the device
    NoPermissions,
    /// Device is in bootloader mode
    Bootloader,
    /// Device is in recovery mode
    Recovery,
    /// Device is in sideload mode
    Sideload,
    /// Authorization or connection still in progress
    Connecting,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::NoPermissions => "no permissions",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Recovery => "recovery",
            DeviceState::Sideload => "sideload",
            DeviceState::Connecting => "connecting",
        }
    }

    /// The state keyword adb prints, if recognized.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            "no" | "no permissions" => DeviceState::NoPermissions,
            "bootloader" => DeviceState::Bootloader,
            "recovery" => DeviceState::Recovery,
            "sideload" => DeviceState::Sideload,
            "connecting" | "authorizing" => DeviceState::Connecting,
            _ => return None,
        })
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, DeviceState::Online)
    }
}

/// Device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Physical device connected via USB/WiFi
    Physical,
    /// Android emulator
    Emulator,
}

/// Device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device serial number
    pub serial: String,
    /// Device state
    pub state: DeviceState,
    /// Device type
    pub device_type: DeviceType,
    /// Device model (e.g., "Pixel_4")
    pub model: Option<String>,
    /// Device product name
    pub product: Option<String>,
    /// Transport ID
    pub transport_id: Option<u32>,
}

impl Device {
    /// Check if device is online and usable
    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    /// Check if this is an emulator
    pub fn is_emulator(&self) -> bool {
        self.device_type == DeviceType::Emulator
    }

    /// Get display name
    pub fn display_name(&self) -> String {
        if let Some(ref model) = self.model {
            format!("{} ({})", model.replace('_', " "), self.serial)
        } else {
            self.serial.clone()
        }
    }
}

/// Parse `adb devices [-l]` output.
///
/// Daemon chatter (`* daemon ...`), the header and anything whose second column is
/// not a known state are ignored.
pub fn parse_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('*') || line.starts_with("List of devices") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let Some(state) = DeviceState::from_keyword(parts[1]) else {
            debug!("ignoring adb devices line: {}", line);
            continue;
        };

        let serial = parts[0].to_string();
        let mut model = None;
        let mut product = None;
        let mut transport_id = None;

        for part in parts.iter().skip(2) {
            if let Some(value) = part.strip_prefix("model:") {
                model = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("product:") {
                product = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("transport_id:") {
                transport_id = value.parse().ok();
            }
        }

        let device_type = if serial.starts_with("emulator-") {
            DeviceType::Emulator
        } else {
            DeviceType::Physical
        };

        devices.push(Device {
            serial,
            state,
            device_type,
            model,
            product,
            transport_id,
        });
    }

    devices
}

/// Pick the device a command should target.
///
/// With a serial, that device must be listed and online. Without one, exactly one
/// online device must be attached.
pub fn select_device<'a>(devices: &'a [Device], serial: Option<&str>) -> Result<&'a Device> {
    if let Some(serial) = serial {
        let device = devices
            .iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| RigError::DeviceUnavailable(format!("{} is not attached", serial)))?;
        if !device.is_usable() {
            return Err(RigError::DeviceUnavailable(format!(
                "{} is {}",
                serial,
                device.state.as_str()
            )));
        }
        return Ok(device);
    }

    let online: Vec<&Device> = devices.iter().filter(|d| d.is_usable()).collect();
    match online.as_slice() {
        [only] => Ok(only),
        [] => Err(RigError::DeviceUnavailable("no online device is attached".into())),
        many => Err(RigError::DeviceUnavailable(format!(
            "{} devices are online, choose one with --serial: {}",
            many.len(),
            many.iter().map(|d| d.serial.as_str()).collect::<Vec<_>>().join(", ")
        ))),
    }
}
