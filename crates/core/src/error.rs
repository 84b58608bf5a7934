//! Error types for droidrig
//!
//! Centralized error handling using thiserror. Every failure carries enough of the
//! tool's own output to diagnose it without re-running anything.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A candidate installation that was inspected and rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    /// Root directory that was searched (may be empty when the source yielded nothing)
    pub path: PathBuf,
    /// How the candidate was discovered
    pub provenance: String,
    /// Tools that were found, with the path chosen for each
    pub resolved: Vec<(String, PathBuf)>,
    /// Tools that could not be found
    pub missing: Vec<String>,
}

impl fmt::Display for RejectedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.as_os_str().is_empty() {
            "<not set>".to_string()
        } else {
            self.path.display().to_string()
        };
        write!(f, "  - {} (from {})", path, self.provenance)?;
        for (tool, resolved) in &self.resolved {
            write!(f, "\n      found   {}: {}", tool, resolved.display())?;
        }
        for tool in &self.missing {
            write!(f, "\n      missing {}", tool)?;
        }
        Ok(())
    }
}

fn render_candidates(candidates: &[RejectedCandidate]) -> String {
    if candidates.is_empty() {
        return "  (no candidate locations were found)".to_string();
    }
    candidates
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Main error type for droidrig
#[derive(Error, Debug)]
pub enum RigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Could not find a complete {toolchain} installation. Candidates checked:\n{}", render_candidates(.candidates))]
    ToolchainNotFound {
        toolchain: String,
        candidates: Vec<RejectedCandidate>,
    },

    #[error("Command failed: {tool} {args} exited with {exit_code}\n{output}")]
    CommandFailed {
        tool: String,
        args: String,
        exit_code: i32,
        output: String,
    },

    #[error("Unable to parse {what} from output:\n{raw}")]
    ParseFailed { what: String, raw: String },

    #[error("Incompatible tool versions: {0}")]
    VersionIncompatible(String),

    #[error("{step} completed but {expectation}:\n{observed}")]
    PostConditionFailed {
        step: String,
        expectation: String,
        observed: String,
    },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Signing error: {0}")]
    SigningFailed(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Background helper failed to start: {0}")]
    HelperLaunchFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type alias for droidrig operations
pub type Result<T> = std::result::Result<T, RigError>;

impl RigError {
    /// Shorthand for a parse failure that embeds the raw text.
    pub fn parse(what: impl Into<String>, raw: impl Into<String>) -> Self {
        RigError::ParseFailed {
            what: what.into(),
            raw: raw.into(),
        }
    }

    /// Check if this error is recoverable by retrying later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RigError::Timeout(_) | RigError::DeviceUnavailable(_) | RigError::HelperLaunchFailed(_)
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RigError::Io(e) => format!("File operation failed: {}", e),
            RigError::ToolchainNotFound { toolchain, .. } => format!(
                "{} not found. Set the matching environment variable or configure the path explicitly.\n{}",
                toolchain, self
            ),
            RigError::VersionIncompatible(msg) => format!(
                "{}\nStop the other adb server (adb kill-server) or point every tool at the same SDK.",
                msg
            ),
            RigError::PostConditionFailed { .. } => format!(
                "{}\nCheck that the package name of the built APK matches the one you expect.",
                self
            ),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolchain_not_found_lists_every_candidate() {
        let err = RigError::ToolchainNotFound {
            toolchain: "Android SDK".into(),
            candidates: vec![
                RejectedCandidate {
                    path: PathBuf::new(),
                    provenance: "ANDROID_HOME environment variable".into(),
                    resolved: Vec::new(),
                    missing: vec!["adb".into(), "aapt".into()],
                },
                RejectedCandidate {
                    path: PathBuf::from("/opt/android-sdk"),
                    provenance: "package manager install".into(),
                    resolved: vec![("adb".into(), PathBuf::from("/opt/android-sdk/platform-tools/adb"))],
                    missing: vec!["aapt".into()],
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("<not set> (from ANDROID_HOME environment variable)"));
        assert!(message.contains("/opt/android-sdk (from package manager install)"));
        assert!(message.contains("found   adb: /opt/android-sdk/platform-tools/adb"));
        assert!(message.contains("missing aapt"));
    }

    #[test]
    fn empty_candidate_list_is_explicit() {
        let err = RigError::ToolchainNotFound {
            toolchain: "JDK".into(),
            candidates: Vec::new(),
        };
        assert!(err.to_string().contains("no candidate locations"));
    }

    #[test]
    fn recoverability() {
        assert!(RigError::Timeout("adb".into()).is_recoverable());
        assert!(!RigError::VersionIncompatible("x".into()).is_recoverable());
        assert!(!RigError::parse("package", "garbage").is_recoverable());
    }
}
