//! Instrumentation report parsing
//!
//! `am instrument -r` prints blocks of
//!
//! ```text
//! INSTRUMENTATION_STATUS: key=value
//! INSTRUMENTATION_STATUS_CODE: 1
//! INSTRUMENTATION_RESULT: key=value
//! INSTRUMENTATION_CODE: -1
//! ```
//!
//! Values may continue onto following lines. Repeated keys keep the last value.

use indexmap::IndexMap;
use serde::Serialize;

use droidrig_core::{Result, RigError};

const STATUS: &str = "INSTRUMENTATION_STATUS:";
const STATUS_CODE: &str = "INSTRUMENTATION_STATUS_CODE:";
const RESULT: &str = "INSTRUMENTATION_RESULT:";
const CODE: &str = "INSTRUMENTATION_CODE:";
const FAILED: &str = "INSTRUMENTATION_FAILED:";

/// Flattened instrumentation output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentationReport {
    pub status: IndexMap<String, String>,
    pub status_code: Option<i32>,
    pub results: IndexMap<String, String>,
    pub result_code: Option<i32>,
    /// Set when the runner itself could not start
    pub failure: Option<String>,
}

enum Section {
    None,
    Status(String),
    Result(String),
}

impl InstrumentationReport {
    pub fn parse(output: &str) -> Result<Self> {
        let mut report = Self::default();
        let mut current = Section::None;
        let mut seen = false;

        for line in output.lines().map(|l| l.trim_end_matches('\r')) {
            if let Some(rest) = line.strip_prefix(STATUS_CODE) {
                report.status_code = rest.trim().parse().ok();
                current = Section::None;
            } else if let Some(rest) = line.strip_prefix(STATUS) {
                current = Self::insert(&mut report.status, rest, Section::Status);
            } else if let Some(rest) = line.strip_prefix(RESULT) {
                current = Self::insert(&mut report.results, rest, Section::Result);
            } else if let Some(rest) = line.strip_prefix(CODE) {
                report.result_code = rest.trim().parse().ok();
                current = Section::None;
            } else if let Some(rest) = line.strip_prefix(FAILED) {
                report.failure = Some(rest.trim().to_string());
                current = Section::None;
            } else {
                // continuation of the previous value
                let target = match &current {
                    Section::Status(key) => report.status.get_mut(key),
                    Section::Result(key) => report.results.get_mut(key),
                    Section::None => None,
                };
                if let Some(value) = target {
                    value.push('\n');
                    value.push_str(line);
                }
                continue;
            }
            seen = true;
        }

        if !seen {
            return Err(RigError::parse("instrumentation report", output));
        }
        Ok(report)
    }

    fn insert(
        map: &mut IndexMap<String, String>,
        entry: &str,
        section: fn(String) -> Section,
    ) -> Section {
        let entry = entry.trim_start();
        let (key, value) = entry.split_once('=').unwrap_or((entry, ""));
        let key = key.trim().to_string();
        map.insert(key.clone(), value.to_string());
        section(key)
    }

    /// Look a key up in status lines, then result lines.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.status
            .get(key)
            .or_else(|| self.results.get(key))
            .map(|v| v.trim())
    }

    /// Require `key` to equal `SUCCESSFUL`, failing with the report's message.
    pub fn require_successful(&self, key: &str, step: &str) -> Result<()> {
        if self.value(key) == Some("SUCCESSFUL") {
            return Ok(());
        }
        let message = self
            .value("message")
            .or(self.failure.as_deref())
            .or_else(|| self.value("shortMsg"))
            .or_else(|| self.value("Error"))
            .unwrap_or("no message was reported");
        Err(RigError::PostConditionFailed {
            step: step.to_string(),
            expectation: format!(
                "{} was {} instead of SUCCESSFUL",
                key,
                self.value(key).unwrap_or("<absent>")
            ),
            observed: message.to_string(),
        })
    }
}
