//! Keystores and keytool

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use droidrig_core::{ExecutionPipeline, Invocation, Result, RigError};

use crate::fingerprint::FingerprintSet;

/// Keystore type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyStoreType {
    #[default]
    Jks,
    Pkcs12,
}

impl KeyStoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStoreType::Jks => "JKS",
            KeyStoreType::Pkcs12 => "PKCS12",
        }
    }

    /// Guess from the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("p12") || ext.eq_ignore_ascii_case("pfx") => {
                KeyStoreType::Pkcs12
            }
            _ => KeyStoreType::Jks,
        }
    }
}

/// Keystore information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStore {
    /// Path to keystore file
    pub path: PathBuf,
    /// Keystore password
    pub password: String,
    /// Key alias
    pub alias: String,
    /// Key password (if different from keystore password)
    pub key_password: Option<String>,
    pub store_type: KeyStoreType,
}

impl KeyStore {
    /// Create a new keystore reference
    pub fn new(path: impl Into<PathBuf>, password: &str, alias: &str) -> Self {
        let path = path.into();
        Self {
            store_type: KeyStoreType::from_path(&path),
            path,
            password: password.to_string(),
            alias: alias.to_string(),
            key_password: None,
        }
    }

    /// The Android SDK debug keystore, `~/.android/debug.keystore`.
    pub fn debug() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| RigError::Config("cannot determine the home directory".into()))?;
        Ok(Self::debug_in(&home))
    }

    pub fn debug_in(home: &Path) -> Self {
        Self::new(
            home.join(".android").join("debug.keystore"),
            "android",
            "androiddebugkey",
        )
    }

    /// Get the effective key password
    pub fn effective_key_password(&self) -> &str {
        self.key_password.as_deref().unwrap_or(&self.password)
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Drives the JDK's `keytool`.
#[derive(Debug, Clone)]
pub struct Keytool {
    program: PathBuf,
    pipeline: ExecutionPipeline,
}

impl Keytool {
    pub fn new(program: impl Into<PathBuf>, pipeline: ExecutionPipeline) -> Self {
        Self {
            program: program.into(),
            pipeline,
        }
    }

    /// Raw `keytool -list -v` output for the keystore's alias.
    pub fn list(&self, keystore: &KeyStore) -> Result<String> {
        if !keystore.exists() {
            return Err(RigError::SigningFailed(format!(
                "keystore {:?} does not exist",
                keystore.path
            )));
        }
        let invocation = Invocation::new(&self.program)
            .args(["-list", "-v", "-keystore"])
            .arg(keystore.path.to_string_lossy())
            .args(["-storetype", keystore.store_type.as_str()])
            .arg("-storepass")
            .arg(&keystore.password)
            .arg("-alias")
            .arg(&keystore.alias);
        Ok(self.pipeline.run(&invocation)?.output)
    }

    pub fn fingerprints(&self, keystore: &KeyStore) -> Result<FingerprintSet> {
        FingerprintSet::parse(&self.list(keystore)?)
    }

    /// Create a keystore with one RSA key, as Android tooling does for debug builds.
    pub fn generate(&self, keystore: &KeyStore, distinguished_name: &str, validity_days: u32) -> Result<()> {
        info!("Generating keystore: {:?}", keystore.path);
        if let Some(parent) = keystore.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let invocation = Invocation::new(&self.program)
            .args(["-genkeypair", "-keystore"])
            .arg(keystore.path.to_string_lossy())
            .args(["-storetype", keystore.store_type.as_str()])
            .arg("-storepass")
            .arg(&keystore.password)
            .arg("-alias")
            .arg(&keystore.alias)
            .arg("-keypass")
            .arg(keystore.effective_key_password())
            .args(["-keyalg", "RSA", "-keysize", "2048", "-validity"])
            .arg(validity_days.to_string())
            .arg("-dname")
            .arg(distinguished_name);
        self.pipeline.run(&invocation)?;
        Ok(())
    }
}
