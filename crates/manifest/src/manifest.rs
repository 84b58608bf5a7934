//! Package Manifest Data
//!
//! The parts of an APK's AndroidManifest.xml that installing and testing need.

use serde::{Deserialize, Serialize};

/// Manifest facts read from an APK
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package name (e.g., "com.example.app")
    pub package_name: String,

    /// Version code (integer)
    pub version_code: Option<u64>,

    /// Version name (string, e.g., "1.0.0")
    pub version_name: Option<String>,

    /// Minimum SDK version
    pub min_sdk: Option<u32>,

    /// Target SDK version
    pub target_sdk: Option<u32>,

    /// Requested permissions, in manifest order without duplicates
    pub permissions: Vec<String>,

    /// Fully qualified launcher activity
    pub launchable_activity: Option<String>,
}

impl PackageManifest {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            ..Default::default()
        }
    }

    pub fn add_permission(&mut self, permission: &str) {
        let permission = permission.trim();
        if !permission.is_empty() && !self.requests(permission) {
            self.permissions.push(permission.to_string());
        }
    }

    pub fn requests(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Expand `.Main` or `Main` relative to the package.
    pub fn qualify_class(&self, class: &str) -> String {
        if let Some(relative) = class.strip_prefix('.') {
            format!("{}.{}", self.package_name, relative)
        } else if !class.contains('.') {
            format!("{}.{}", self.package_name, class)
        } else {
            class.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_are_deduplicated() {
        let mut manifest = PackageManifest::new("com.example");
        manifest.add_permission("android.permission.INTERNET");
        manifest.add_permission("android.permission.INTERNET");
        manifest.add_permission(" ");
        assert_eq!(manifest.permissions, vec!["android.permission.INTERNET"]);
        assert!(manifest.requests("android.permission.INTERNET"));
    }

    #[test]
    fn class_names_are_qualified() {
        let manifest = PackageManifest::new("com.example");
        assert_eq!(manifest.qualify_class(".MainActivity"), "com.example.MainActivity");
        assert_eq!(manifest.qualify_class("MainActivity"), "com.example.MainActivity");
        assert_eq!(manifest.qualify_class("org.other.Launcher"), "org.other.Launcher");
    }
}
