//! Configuration
//!
//! Settings that shape toolchain discovery and tool execution:
//! - explicit SDK/JDK locations
//! - adb retry and timeout behaviour
//! - background helper launching
//! - signing preferences
//!
//! Values come from `config.toml` in the platform config directory, overlaid with
//! the `DROIDRIG_*` environment hints that a parent process may export.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RigError};
use crate::retry::BackoffPolicy;

/// Environment hint carrying an already-resolved Android SDK root.
pub const ENV_SDK_HINT: &str = "DROIDRIG_ANDROID_SDK";
/// Environment hint carrying an already-resolved JDK root.
pub const ENV_JDK_HINT: &str = "DROIDRIG_JDK";
/// Environment hint selecting the device serial.
pub const ENV_SERIAL_HINT: &str = "DROIDRIG_SERIAL";

/// Toolchain discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Android SDK root that takes priority over every other source
    pub android_sdk: Option<PathBuf>,
    /// JDK root that takes priority over every other source
    pub jdk: Option<PathBuf>,
    /// How many directory levels below a candidate root are searched
    pub search_depth: usize,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            android_sdk: None,
            jdk: None,
            search_depth: 2,
        }
    }
}

/// adb execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    /// Device serial used when none is given on the command line
    pub serial: Option<String>,
    /// Throttled attempts for device enumeration
    pub retry_attempts: u32,
    /// First backoff delay in seconds
    pub backoff_base_secs: u64,
    /// Backoff increment per attempt in seconds
    pub backoff_step_secs: u64,
    /// Kill any single tool invocation after this many seconds (0 disables)
    pub command_timeout_secs: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            serial: None,
            retry_attempts: 3,
            backoff_base_secs: 3,
            backoff_step_secs: 2,
            command_timeout_secs: 0,
        }
    }
}

impl AdbConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_step_secs),
            self.retry_attempts,
        )
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

/// Background helper settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// How long to wait before checking whether the helper is still alive
    pub sample_delay_ms: u64,
    /// How many fresh ports to try after a bind conflict
    pub max_port_retries: u32,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            sample_delay_ms: 1500,
            max_port_retries: 5,
        }
    }
}

impl HelperConfig {
    pub fn sample_delay(&self) -> Duration {
        Duration::from_millis(self.sample_delay_ms)
    }
}

/// Which tool signs APKs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerBackend {
    #[default]
    Apksigner,
    Jarsigner,
}

/// Signing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    pub backend: SignerBackend,
    /// Enable v1 (JAR) signatures
    pub v1: bool,
    /// Enable v2 signatures
    pub v2: bool,
    /// Enable v3 signatures when the signer supports it
    pub v3: bool,
    /// Enable v4 signatures when the signer supports it
    pub v4: bool,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            backend: SignerBackend::Apksigner,
            v1: true,
            v2: true,
            v3: true,
            v4: false,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub toolchain: ToolchainConfig,
    pub adb: AdbConfig,
    pub helper: HelperConfig,
    pub signing: SigningSettings,
}

impl RigConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droidrig", "droidrig").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        match Self::config_file() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                info!("Config file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: RigConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        debug!("Config saved to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.toolchain.search_depth > 8 {
            return Err(RigError::Config(format!(
                "toolchain.search_depth {} is too deep (maximum 8)",
                self.toolchain.search_depth
            )));
        }
        if !(self.signing.v1 || self.signing.v2 || self.signing.v3 || self.signing.v4) {
            return Err(RigError::Config("at least one signature scheme must be enabled".into()));
        }
        Ok(())
    }

    /// Overlay the `DROIDRIG_*` hints using the given lookup.
    pub fn apply_env_hints<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if self.toolchain.android_sdk.is_none() {
            self.toolchain.android_sdk = non_empty(ENV_SDK_HINT).map(PathBuf::from);
        }
        if self.toolchain.jdk.is_none() {
            self.toolchain.jdk = non_empty(ENV_JDK_HINT).map(PathBuf::from);
        }
        if let Some(serial) = non_empty(ENV_SERIAL_HINT) {
            self.adb.serial = Some(serial);
        }
    }

    /// Overlay hints from the process environment.
    pub fn with_process_env(mut self) -> Self {
        self.apply_env_hints(|key| std::env::var(key).ok());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RigConfig::default();
        assert_eq!(config.toolchain.search_depth, 2);
        assert_eq!(config.adb.retry_attempts, 3);
        assert_eq!(config.adb.backoff(), BackoffPolicy::default());
        assert_eq!(config.adb.command_timeout(), None);
        assert_eq!(config.signing.backend, SignerBackend::Apksigner);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RigConfig::from_toml(
            r#"
            [toolchain]
            android_sdk = "/opt/android-sdk"

            [adb]
            retry_attempts = 5
            command_timeout_secs = 120

            [signing]
            backend = "jarsigner"
            "#,
        )
        .unwrap();

        assert_eq!(config.toolchain.android_sdk, Some(PathBuf::from("/opt/android-sdk")));
        assert_eq!(config.toolchain.search_depth, 2);
        assert_eq!(config.adb.retry_attempts, 5);
        assert_eq!(config.adb.backoff_base_secs, 3);
        assert_eq!(config.adb.command_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.signing.backend, SignerBackend::Jarsigner);
        assert_eq!(config.helper, HelperConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(RigConfig::from_toml("[toolchain]\nsearch_depth = 40").is_err());
        assert!(RigConfig::from_toml(
            "[signing]\nv1 = false\nv2 = false\nv3 = false\nv4 = false"
        )
        .is_err());
    }

    #[test]
    fn env_hints_fill_unset_values_only() {
        let mut config = RigConfig::default();
        config.toolchain.jdk = Some(PathBuf::from("/configured/jdk"));
        config.apply_env_hints(|key| match key {
            ENV_SDK_HINT => Some("/hint/sdk".to_string()),
            ENV_JDK_HINT => Some("/hint/jdk".to_string()),
            ENV_SERIAL_HINT => Some("emulator-5554".to_string()),
            _ => None,
        });

        assert_eq!(config.toolchain.android_sdk, Some(PathBuf::from("/hint/sdk")));
        assert_eq!(config.toolchain.jdk, Some(PathBuf::from("/configured/jdk")));
        assert_eq!(config.adb.serial.as_deref(), Some("emulator-5554"));
    }

    #[test]
    fn blank_hints_are_ignored() {
        let mut config = RigConfig::default();
        config.apply_env_hints(|_| Some("  ".to_string()));
        assert_eq!(config.toolchain.android_sdk, None);
        assert_eq!(config.adb.serial, None);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = RigConfig::default();
        config.adb.serial = Some("R58M123ABC".into());
        config.save_to(&path).unwrap();

        let loaded = RigConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
