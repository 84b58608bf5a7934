//! Tool sets
//!
//! A tool set is the validated result of discovery: one resolved executable per
//! required tool. It can only be built from a [`ToolDependencies`] in which every
//! requirement was satisfied.

use std::path::{Path, PathBuf};

use droidrig_core::{RejectedCandidate, Result, RigError};
use regex::Regex;

use crate::candidates::CandidateLocation;

/// A tool that must be present, and the relative-path pattern that finds it.
///
/// Digit capture groups in the pattern are the tool's version components.
#[derive(Debug, Clone)]
pub struct ToolRequirement {
    pub name: &'static str,
    pub pattern: Regex,
}

impl ToolRequirement {
    pub fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("tool patterns are static"),
        }
    }
}

/// Outcome of validating one candidate location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDependencies {
    pub root: PathBuf,
    pub provenance: String,
    /// Requirement name to resolved path, in requirement order
    pub resolved: Vec<(String, Option<PathBuf>)>,
}

impl ToolDependencies {
    pub fn unresolved(candidate: &CandidateLocation, requirements: &[ToolRequirement]) -> Self {
        Self {
            root: candidate.path.clone(),
            provenance: candidate.provenance.clone(),
            resolved: requirements.iter().map(|r| (r.name.to_string(), None)).collect(),
        }
    }

    pub fn is_satisfied(&self) -> bool {
        !self.root.as_os_str().is_empty()
            && self
                .resolved
                .iter()
                .all(|(_, path)| path.as_ref().is_some_and(|p| !p.as_os_str().is_empty()))
    }

    pub fn path(&self, tool: &str) -> Option<&Path> {
        self.resolved
            .iter()
            .find(|(name, _)| name == tool)
            .and_then(|(_, path)| path.as_deref())
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn missing(&self) -> Vec<String> {
        self.resolved
            .iter()
            .filter(|(name, _)| self.path(name).is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn rejection(&self) -> RejectedCandidate {
        RejectedCandidate {
            path: self.root.clone(),
            provenance: self.provenance.clone(),
            resolved: self
                .resolved
                .iter()
                .filter_map(|(name, path)| path.clone().map(|p| (name.clone(), p)))
                .collect(),
            missing: self.missing(),
        }
    }

    fn require(&self, kind: &str, tool: &str) -> Result<PathBuf> {
        self.path(tool).map(Path::to_path_buf).ok_or_else(|| self.not_found(kind))
    }

    fn not_found(&self, kind: &str) -> RigError {
        RigError::ToolchainNotFound {
            toolchain: kind.to_string(),
            candidates: vec![self.rejection()],
        }
    }
}

/// A validated set of executables from one installation.
pub trait ToolSet: Sized {
    /// Human-readable name used in diagnostics
    const KIND: &'static str;

    fn requirements() -> Vec<ToolRequirement>;

    /// Fails unless every requirement is resolved.
    fn from_dependencies(deps: ToolDependencies) -> Result<Self>;

    fn root(&self) -> &Path;

    fn provenance(&self) -> &str;
}

/// Executables from an Android SDK installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidSdkTools {
    root: PathBuf,
    provenance: String,
    adb: PathBuf,
    aapt: PathBuf,
    zipalign: PathBuf,
    apksigner: PathBuf,
}

impl AndroidSdkTools {
    pub fn adb(&self) -> &Path {
        &self.adb
    }

    pub fn aapt(&self) -> &Path {
        &self.aapt
    }

    pub fn zipalign(&self) -> &Path {
        &self.zipalign
    }

    pub fn apksigner(&self) -> &Path {
        &self.apksigner
    }
}

impl ToolSet for AndroidSdkTools {
    const KIND: &'static str = "Android SDK";

    fn requirements() -> Vec<ToolRequirement> {
        vec![
            ToolRequirement::new("adb", r"^platform-tools/adb(?:\.exe)?$"),
            ToolRequirement::new("aapt", r"^build-tools/(\d+)\.(\d+)\.(\d+)[^/]*/aapt(?:\.exe)?$"),
            ToolRequirement::new(
                "zipalign",
                r"^build-tools/(\d+)\.(\d+)\.(\d+)[^/]*/zipalign(?:\.exe)?$",
            ),
            ToolRequirement::new(
                "apksigner",
                r"^build-tools/(\d+)\.(\d+)\.(\d+)[^/]*/apksigner(?:\.bat)?$",
            ),
        ]
    }

    fn from_dependencies(deps: ToolDependencies) -> Result<Self> {
        if !deps.is_satisfied() {
            return Err(deps.not_found(Self::KIND));
        }
        Ok(Self {
            adb: deps.require(Self::KIND, "adb")?,
            aapt: deps.require(Self::KIND, "aapt")?,
            zipalign: deps.require(Self::KIND, "zipalign")?,
            apksigner: deps.require(Self::KIND, "apksigner")?,
            root: deps.root,
            provenance: deps.provenance,
        })
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn provenance(&self) -> &str {
        &self.provenance
    }
}

/// Executables from a JDK installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JdkTools {
    root: PathBuf,
    provenance: String,
    java: PathBuf,
    keytool: PathBuf,
    jarsigner: PathBuf,
}

impl JdkTools {
    pub fn java(&self) -> &Path {
        &self.java
    }

    pub fn keytool(&self) -> &Path {
        &self.keytool
    }

    pub fn jarsigner(&self) -> &Path {
        &self.jarsigner
    }
}

impl ToolSet for JdkTools {
    const KIND: &'static str = "JDK";

    fn requirements() -> Vec<ToolRequirement> {
        vec![
            ToolRequirement::new("java", r"^bin/java(?:\.exe)?$"),
            ToolRequirement::new("keytool", r"^bin/keytool(?:\.exe)?$"),
            ToolRequirement::new("jarsigner", r"^bin/jarsigner(?:\.exe)?$"),
        ]
    }

    fn from_dependencies(deps: ToolDependencies) -> Result<Self> {
        if !deps.is_satisfied() {
            return Err(deps.not_found(Self::KIND));
        }
        Ok(Self {
            java: deps.require(Self::KIND, "java")?,
            keytool: deps.require(Self::KIND, "keytool")?,
            jarsigner: deps.require(Self::KIND, "jarsigner")?,
            root: deps.root,
            provenance: deps.provenance,
        })
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn provenance(&self) -> &str {
        &self.provenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(resolved: &[(&str, Option<&str>)]) -> ToolDependencies {
        ToolDependencies {
            root: PathBuf::from("/jdk"),
            provenance: "JAVA_HOME environment variable".into(),
            resolved: resolved
                .iter()
                .map(|(n, p)| (n.to_string(), p.map(PathBuf::from)))
                .collect(),
        }
    }

    #[test]
    fn satisfied_dependencies_build_a_tool_set() {
        let tools = JdkTools::from_dependencies(deps(&[
            ("java", Some("/jdk/bin/java")),
            ("keytool", Some("/jdk/bin/keytool")),
            ("jarsigner", Some("/jdk/bin/jarsigner")),
        ]))
        .unwrap();
        assert_eq!(tools.keytool(), Path::new("/jdk/bin/keytool"));
        assert_eq!(tools.root(), Path::new("/jdk"));
        assert_eq!(tools.provenance(), "JAVA_HOME environment variable");
    }

    #[test]
    fn construction_fails_closed() {
        let err = JdkTools::from_dependencies(deps(&[
            ("java", Some("/jdk/bin/java")),
            ("keytool", None),
            ("jarsigner", Some("")),
        ]))
        .unwrap_err();
        match err {
            RigError::ToolchainNotFound { toolchain, candidates } => {
                assert_eq!(toolchain, "JDK");
                assert_eq!(candidates[0].provenance, "JAVA_HOME environment variable");
                assert_eq!(candidates[0].missing, vec!["keytool", "jarsigner"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_root_is_never_satisfied() {
        let mut d = deps(&[("java", Some("/jdk/bin/java"))]);
        d.root = PathBuf::new();
        assert!(!d.is_satisfied());
    }

    #[test]
    fn sdk_patterns_match_expected_layout() {
        let reqs = AndroidSdkTools::requirements();
        let find = |name: &str| reqs.iter().find(|r| r.name == name).unwrap().pattern.clone();
        assert!(find("adb").is_match("platform-tools/adb.exe"));
        assert!(!find("adb").is_match("build-tools/34.0.0/adb"));
        assert!(find("aapt").is_match("build-tools/34.0.0/aapt"));
        assert!(!find("aapt").is_match("build-tools/34.0.0/aapt2"));
        assert!(find("apksigner").is_match("build-tools/30.0.3/apksigner.bat"));
        assert!(!find("zipalign").is_match("build-tools/latest/zipalign"));
    }
}
