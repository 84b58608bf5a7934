//! CLI commands for droidrig
//!
//! Each command resolves what it needs from the [`Toolchain`] and prints a short
//! report to stdout. Logging goes to stderr through `tracing`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use droidrig_android_toolchain::ToolSet;
use droidrig_apk_signing::{KeyStore, KeyStoreType};
use droidrig_device_bridge::AdbClient;

use crate::container::{JdkToolsProvider, ProcessProvider, SdkToolsProvider, Toolchain};
use crate::lifecycle::{keystore_or_debug, LifecycleOrchestrator};

/// Keystore selection shared by `sign` and `fingerprint`.
#[derive(Debug, Clone, Default)]
pub struct KeystoreArgs {
    pub path: Option<PathBuf>,
    pub password: Option<String>,
    pub alias: Option<String>,
    pub key_password: Option<String>,
    /// Overrides the type guessed from the file extension
    pub store_type: Option<KeyStoreType>,
}

impl KeystoreArgs {
    /// The named keystore, or `None` for the debug keystore.
    pub fn keystore(&self) -> Result<Option<KeyStore>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let password = self
            .password
            .as_deref()
            .context("--storepass is required with --keystore")?;
        let alias = self
            .alias
            .as_deref()
            .context("--alias is required with --keystore")?;
        let mut keystore = KeyStore::new(path, password, alias);
        keystore.key_password = self.key_password.clone();
        if let Some(store_type) = self.store_type {
            keystore.store_type = store_type;
        }
        Ok(Some(keystore))
    }
}

#[derive(Serialize)]
struct ToolReport {
    kind: &'static str,
    root: PathBuf,
    provenance: String,
    tools: Vec<(&'static str, PathBuf)>,
}

/// Toolchain location report
pub struct LocateCommand {
    pub json: bool,
}

impl LocateCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let sdk = toolchain.sdk_tools()?;
        let jdk = toolchain.jdk_tools()?;
        let reports = [
            ToolReport {
                kind: "sdk",
                root: sdk.root().to_path_buf(),
                provenance: sdk.provenance().to_string(),
                tools: vec![
                    ("adb", sdk.adb().to_path_buf()),
                    ("aapt", sdk.aapt().to_path_buf()),
                    ("zipalign", sdk.zipalign().to_path_buf()),
                    ("apksigner", sdk.apksigner().to_path_buf()),
                ],
            },
            ToolReport {
                kind: "jdk",
                root: jdk.root().to_path_buf(),
                provenance: jdk.provenance().to_string(),
                tools: vec![
                    ("java", jdk.java().to_path_buf()),
                    ("keytool", jdk.keytool().to_path_buf()),
                    ("jarsigner", jdk.jarsigner().to_path_buf()),
                ],
            },
        ];

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
            return Ok(());
        }
        for report in &reports {
            println!("{}: {} ({})", report.kind, report.root.display(), report.provenance);
            for (name, path) in &report.tools {
                println!("  {:<10} {}", name, path.display());
            }
        }
        Ok(())
    }
}

/// Device list command
pub struct DevicesCommand;

impl DevicesCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let sdk = toolchain.sdk_tools()?;
        let adb = AdbClient::new(sdk.adb(), toolchain.pipeline())
            .with_backoff(toolchain.config().adb.backoff(), toolchain.sleeper())
            .with_env(toolchain.child_env());
        let devices = adb.devices()?;

        if devices.is_empty() {
            println!("No devices connected");
        } else {
            println!("Connected devices:");
            for device in devices {
                println!("  {} - {}", device.display_name(), device.state.as_str());
            }
        }
        Ok(())
    }
}

/// Install, then allow the post-install app-ops.
pub struct InstallCommand {
    pub apk: PathBuf,
    pub serial: Option<String>,
    pub skip_permissions: bool,
}

impl InstallCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let mut lifecycle =
            LifecycleOrchestrator::new(toolchain, toolchain.config()).with_serial(self.serial.clone());
        let report = lifecycle.install(&self.apk)?;
        println!(
            "Installed {} on {} (API {})",
            report.manifest.package_name, report.serial, report.sdk_level
        );

        if !self.skip_permissions {
            let applied = lifecycle.grant_post_install_permissions(&report.manifest.package_name)?;
            for op in applied {
                println!("  allowed {}", op);
            }
        }
        Ok(())
    }
}

pub struct UninstallCommand {
    pub package: String,
    pub serial: Option<String>,
}

impl UninstallCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        LifecycleOrchestrator::new(toolchain, toolchain.config())
            .with_serial(self.serial.clone())
            .uninstall(&self.package)?;
        println!("Uninstalled {}", self.package);
        Ok(())
    }
}

pub struct ClearDataCommand {
    pub package: String,
    /// Instrumentation component that clears the data; `pm clear` without one
    pub test_server: Option<String>,
    pub serial: Option<String>,
}

impl ClearDataCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        LifecycleOrchestrator::new(toolchain, toolchain.config())
            .with_serial(self.serial.clone())
            .clear_app_data(&self.package, self.test_server.as_deref())?;
        println!("Cleared data of {}", self.package);
        Ok(())
    }
}

/// Start the test server and keep it running until interrupted.
pub struct StartServerCommand {
    pub package: String,
    pub component: String,
    pub port: Option<u16>,
    pub serial: Option<String>,
}

impl StartServerCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let mut lifecycle =
            LifecycleOrchestrator::new(toolchain, toolchain.config()).with_serial(self.serial.clone());
        let mut server = lifecycle.start_test_server(&self.package, &self.component, self.port)?;
        println!("Test server for {} on port {}", server.package, server.helper.port);

        // the server lives as long as its instrumentation process
        loop {
            if let Some(code) = server.helper.process.try_exit_code()? {
                info!("test server exited with {}", code);
                print!("{}", server.helper.process.output());
                return Ok(());
            }
            toolchain.sleeper().sleep(toolchain.config().helper.sample_delay());
        }
    }
}

pub struct SignCommand {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub keystore: KeystoreArgs,
    pub min_sdk: Option<u32>,
}

impl SignCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let keystore = keystore_or_debug(toolchain, self.keystore.keystore()?)?;
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("signed.apk"));

        let verification = LifecycleOrchestrator::new(toolchain, toolchain.config()).sign(
            &self.input,
            &output,
            &keystore,
            self.min_sdk,
        )?;
        println!("Signed {}", output.display());
        print_schemes(&verification);
        Ok(())
    }
}

pub struct VerifyCommand {
    pub apk: PathBuf,
}

impl VerifyCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let verification = LifecycleOrchestrator::new(toolchain, toolchain.config()).verify(&self.apk)?;
        println!("{} verifies", self.apk.display());
        print_schemes(&verification);
        for cert in &verification.signer_certs {
            println!("  {}", cert);
        }
        Ok(())
    }
}

fn print_schemes(verification: &droidrig_apk_signing::SignatureVerification) {
    let schemes = [
        ("v1", verification.v1_signed),
        ("v2", verification.v2_signed),
        ("v3", verification.v3_signed),
        ("v4", verification.v4_signed),
    ];
    let signed: Vec<&str> = schemes.iter().filter(|(_, on)| *on).map(|(s, _)| *s).collect();
    if !signed.is_empty() {
        println!("  schemes: {}", signed.join(", "));
    }
}

pub struct FingerprintCommand {
    pub keystore: KeystoreArgs,
    pub json: bool,
}

impl FingerprintCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let keystore = match self.keystore.keystore()? {
            Some(keystore) => keystore,
            None => KeyStore::debug()?,
        };
        let set = LifecycleOrchestrator::new(toolchain, toolchain.config()).fingerprint(&keystore)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&set)?);
            return Ok(());
        }
        if let Some(owner) = &set.owner {
            println!("Owner: {}", owner);
        }
        for (label, value) in [("MD5", &set.md5), ("SHA1", &set.sha1), ("SHA256", &set.sha256)] {
            if let Some(value) = value {
                println!("{:<7} {}", label, value);
            }
        }
        Ok(())
    }
}

/// Print an APK's manifest facts as JSON.
pub struct ManifestCommand {
    pub apk: PathBuf,
}

impl ManifestCommand {
    pub fn execute(&self, toolchain: &Toolchain) -> Result<()> {
        let manifest = LifecycleOrchestrator::new(toolchain, toolchain.config()).manifest(&self.apk)?;
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        Ok(())
    }
}

/// Keystore type from a command-line value.
pub fn parse_store_type(value: &str) -> Result<KeyStoreType> {
    match value.to_ascii_lowercase().as_str() {
        "jks" => Ok(KeyStoreType::Jks),
        "pkcs12" | "p12" => Ok(KeyStoreType::Pkcs12),
        other => anyhow::bail!("unknown keystore type '{}'", other),
    }
}
