//! Tool Environment
//!
//! Environment variables handed to child processes so wrapper scripts such as
//! `apksigner` find the same JDK that discovery chose.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use tracing::debug;

use crate::tools::{AndroidSdkTools, JdkTools, ToolSet};

/// Variables and `PATH` additions derived from located tool sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolEnvironment {
    pub android_home: Option<PathBuf>,
    pub java_home: Option<PathBuf>,
    /// Prepended to the inherited `PATH`, in order
    pub path_additions: Vec<PathBuf>,
}

impl ToolEnvironment {
    pub fn from_tools(sdk: Option<&AndroidSdkTools>, jdk: Option<&JdkTools>) -> Self {
        let mut env = Self::default();

        if let Some(jdk) = jdk {
            env.java_home = Some(jdk.root().to_path_buf());
            if let Some(bin) = jdk.java().parent() {
                env.path_additions.push(bin.to_path_buf());
            }
        }

        if let Some(sdk) = sdk {
            env.android_home = Some(sdk.root().to_path_buf());
            if let Some(platform_tools) = sdk.adb().parent() {
                env.add_to_path(platform_tools.to_path_buf());
            }
        }

        env
    }

    pub fn add_to_path(&mut self, path: PathBuf) {
        if !self.path_additions.contains(&path) {
            self.path_additions.push(path);
        }
    }

    /// `PATH` with additions in front of `inherited`.
    pub fn path_value(&self, inherited: Option<OsString>) -> Option<String> {
        let mut entries = self.path_additions.clone();
        if let Some(inherited) = inherited {
            entries.extend(std::env::split_paths(&inherited));
        }
        if entries.is_empty() {
            return None;
        }
        match std::env::join_paths(entries) {
            Ok(joined) => Some(joined.to_string_lossy().to_string()),
            Err(err) => {
                debug!("cannot build PATH for child processes: {}", err);
                None
            }
        }
    }

    /// Variables to set on child processes, sorted by name.
    pub fn vars_with(&self, inherited_path: Option<OsString>) -> Vec<(String, String)> {
        let mut vars = BTreeMap::new();
        if let Some(sdk) = &self.android_home {
            let value = sdk.to_string_lossy().to_string();
            vars.insert("ANDROID_HOME".to_string(), value.clone());
            vars.insert("ANDROID_SDK_ROOT".to_string(), value);
        }
        if let Some(jdk) = &self.java_home {
            vars.insert("JAVA_HOME".to_string(), jdk.to_string_lossy().to_string());
        }
        if !self.path_additions.is_empty() {
            if let Some(path) = self.path_value(inherited_path) {
                let key = if cfg!(windows) { "Path" } else { "PATH" };
                vars.insert(key.to_string(), path);
            }
        }
        vars.into_iter().collect()
    }

    /// Variables to set on child processes of this process.
    pub fn vars(&self) -> Vec<(String, String)> {
        self.vars_with(std::env::var_os("PATH"))
    }
}
