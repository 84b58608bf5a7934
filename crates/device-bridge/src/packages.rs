//! Package listing and property parsing

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use droidrig_core::{Result, RigError};

/// One row of `pm list packages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub package_name: String,
    /// Present when listed with `-f`
    pub on_device_path: Option<String>,
    /// Present when listed with `-U`
    pub uid: Option<u32>,
}

fn package_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // The path may itself contain '=', so the name is whatever follows the last one.
        Regex::new(
            r"^package:(?:(?P<path>.+)=)?(?P<name>[A-Za-z][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)(?:\s+uid:(?P<uid>\d+))?\s*$",
        )
        .expect("static regex")
    })
}

/// Parse a package listing. Lines not starting with `package:` are ignored; a
/// `package:` line without a valid package name is an error.
pub fn parse_packages(output: &str) -> Result<Vec<InstalledPackage>> {
    let mut packages = Vec::new();
    for line in output.lines().map(str::trim) {
        if !line.starts_with("package:") {
            continue;
        }
        let caps = package_line()
            .captures(line)
            .ok_or_else(|| RigError::parse("installed package", output))?;
        packages.push(InstalledPackage {
            package_name: caps["name"].to_string(),
            on_device_path: caps.name("path").map(|m| m.as_str().to_string()),
            uid: caps.name("uid").and_then(|m| m.as_str().parse().ok()),
        });
    }
    Ok(packages)
}

/// Whether `package` appears in a listing.
pub fn is_listed(packages: &[InstalledPackage], package: &str) -> bool {
    packages.iter().any(|p| p.package_name == package)
}

/// Parse the API level printed by `getprop ro.build.version.sdk`.
pub fn parse_sdk_level(output: &str) -> Result<u32> {
    let mut levels: Vec<u32> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|l| l.parse().ok())
        .collect();
    levels.dedup();
    match levels.as_slice() {
        [level] => Ok(*level),
        _ => Err(RigError::parse("device SDK level", output)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_name_are_split() {
        let packages = parse_packages("package:/data/app/Foo-1.apk=com.example.foo").unwrap();
        assert_eq!(
            packages,
            vec![InstalledPackage {
                package_name: "com.example.foo".into(),
                on_device_path: Some("/data/app/Foo-1.apk".into()),
                uid: None,
            }]
        );
    }

    #[test]
    fn equals_signs_inside_the_path_are_kept() {
        let packages = parse_packages(
            "package:/data/app/~~Xy9w==/com.example.foo-AbC==/base.apk=com.example.foo\n",
        )
        .unwrap();
        assert_eq!(packages[0].package_name, "com.example.foo");
        assert_eq!(
            packages[0].on_device_path.as_deref(),
            Some("/data/app/~~Xy9w==/com.example.foo-AbC==/base.apk")
        );
    }

    #[test]
    fn plain_and_uid_forms() {
        let packages =
            parse_packages("package:android\r\npackage:com.example.foo uid:10123\nWARNING: linker noise\n")
                .unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].package_name, "android");
        assert_eq!(packages[0].on_device_path, None);
        assert_eq!(packages[1].uid, Some(10123));
        assert!(is_listed(&packages, "com.example.foo"));
        assert!(!is_listed(&packages, "com.example"));
    }

    #[test]
    fn malformed_package_line_fails() {
        let err = parse_packages("package:/data/app/x.apk=").unwrap_err();
        assert!(matches!(err, RigError::ParseFailed { .. }));
    }

    #[test]
    fn sdk_level() {
        assert_eq!(parse_sdk_level("33\r\n").unwrap(), 33);
        assert!(parse_sdk_level("").is_err());
        assert!(parse_sdk_level("error: device offline").is_err());
    }
}
