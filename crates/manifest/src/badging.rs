//! `aapt dump badging` parsing
//!
//! Flat `key: attr='value'` lines. Older aapt releases print permissions as
//! `uses-permission:'name'`, newer ones as `uses-permission: name='name'`.

use std::sync::OnceLock;

use regex::Regex;

use droidrig_core::{Result, RigError};

use crate::manifest::PackageManifest;

struct Patterns {
    package: Regex,
    version_code: Regex,
    version_name: Regex,
    min_sdk: Regex,
    target_sdk: Regex,
    permission: Regex,
    launchable: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("static regex");
        Patterns {
            package: re(r"^package:.*?\bname='(?P<v>[A-Za-z][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)'"),
            version_code: re(r"^package:.*?\bversionCode='(?P<v>\d+)'"),
            version_name: re(r"^package:.*?\bversionName='(?P<v>[^']*)'"),
            min_sdk: re(r"^(?:sdkVersion|minSdkVersion):\s*'(?P<v>\d+)'"),
            target_sdk: re(r"^targetSdkVersion:\s*'(?P<v>\d+)'"),
            permission: re(
                r"^uses-permission(?:-sdk-23|-sdk-m)?:\s*(?:name=)?'(?P<v>[A-Za-z0-9_.]+)'",
            ),
            launchable: re(r"^launchable-activity:.*?\bname='(?P<v>[A-Za-z0-9_.$]+)'"),
        }
    })
}

fn first<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line).and_then(|c| c.name("v")).map(|m| m.as_str())
}

/// Whether text looks like a badging dump.
pub fn looks_like_badging(text: &str) -> bool {
    text.lines().any(|l| l.trim_start().starts_with("package: "))
}

/// Parse a badging dump. Exactly one distinct package name must be present.
pub fn parse_badging(text: &str) -> Result<PackageManifest> {
    let p = patterns();
    let mut names: Vec<&str> = Vec::new();
    let mut manifest = PackageManifest::default();

    for line in text.lines().map(str::trim) {
        if let Some(name) = first(&p.package, line) {
            if !names.contains(&name) {
                names.push(name);
            }
            manifest.version_code = manifest
                .version_code
                .or_else(|| first(&p.version_code, line).and_then(|v| v.parse().ok()));
            if manifest.version_name.is_none() {
                manifest.version_name = first(&p.version_name, line)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
        } else if let Some(v) = first(&p.min_sdk, line) {
            manifest.min_sdk = v.parse().ok();
        } else if let Some(v) = first(&p.target_sdk, line) {
            manifest.target_sdk = v.parse().ok();
        } else if let Some(v) = first(&p.permission, line) {
            manifest.add_permission(v);
        } else if let Some(v) = first(&p.launchable, line) {
            if manifest.launchable_activity.is_none() {
                manifest.launchable_activity = Some(v.to_string());
            }
        }
    }

    match names.as_slice() {
        [name] => {
            manifest.package_name = name.to_string();
            Ok(manifest)
        }
        _ => Err(RigError::parse("package name from badging dump", text)),
    }
}
