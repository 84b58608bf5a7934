//! Toolchain Location
//!
//! Validates candidate roots in priority order and returns the first complete tool
//! set. When none qualifies, the error lists every candidate with the tools that were
//! and were not found.

use std::collections::HashMap;
use std::path::PathBuf;

use droidrig_core::config::ToolchainConfig;
use droidrig_core::{RejectedCandidate, Result, RigError};
use regex::Regex;
use tracing::{debug, info};

use crate::candidates::{android_sdk_candidates, jdk_candidates, CandidateLocation, HostEnvironment};
use crate::tools::{AndroidSdkTools, JdkTools, ToolDependencies, ToolSet};
use crate::version::pick_latest_by;
use crate::walker::search;

/// Finds complete tool sets below candidate roots.
#[derive(Debug, Clone)]
pub struct ToolchainLocator {
    max_depth: usize,
}

impl Default for ToolchainLocator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl ToolchainLocator {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn from_config(config: &ToolchainConfig) -> Self {
        Self::new(config.search_depth)
    }

    /// Resolve every requirement of `T` below one candidate.
    ///
    /// For each tool the newest match by captured version wins; a tool with several
    /// equal-version matches keeps the first one the walk produced.
    pub fn validate<T: ToolSet>(&self, candidate: &CandidateLocation) -> ToolDependencies {
        let requirements = T::requirements();
        let mut deps = ToolDependencies::unresolved(candidate, &requirements);
        if candidate.is_empty() || !candidate.path.is_dir() {
            return deps;
        }

        let patterns: Vec<Regex> = requirements.iter().map(|r| r.pattern.clone()).collect();
        let matches = search(&candidate.path, self.max_depth, &patterns);

        for (index, requirement) in requirements.iter().enumerate() {
            let found: Vec<&str> = matches
                .iter()
                .filter(|m| m.pattern_index == index)
                .map(|m| m.relative_path.as_str())
                .collect();
            let chosen = pick_latest_by(&requirement.pattern, &found).and_then(|relative| {
                matches
                    .iter()
                    .find(|m| m.pattern_index == index && m.relative_path == *relative)
                    .map(|m| m.absolute_path.clone())
            });
            if let Some(path) = chosen {
                debug!("{} {} -> {:?}", T::KIND, requirement.name, path);
                deps.resolved[index].1 = Some(path);
            }
        }
        deps
    }

    /// First candidate, in order, whose tools are all present.
    pub fn locate<T: ToolSet>(&self, candidates: &[CandidateLocation]) -> Result<T> {
        info!("Locating {}...", T::KIND);
        // a root seen before was rejected; it is reported again under the new source
        let mut seen: HashMap<PathBuf, RejectedCandidate> = HashMap::new();
        let mut rejected = Vec::new();

        for candidate in candidates {
            if !candidate.is_empty() {
                if let Some(earlier) = seen.get(&candidate.path) {
                    debug!("{:?} already checked, not walking it again", candidate.path);
                    rejected.push(RejectedCandidate {
                        provenance: candidate.provenance.clone(),
                        ..earlier.clone()
                    });
                    continue;
                }
            }
            let deps = self.validate::<T>(candidate);
            if deps.is_satisfied() {
                let tools = T::from_dependencies(deps)?;
                info!("Found {} at {:?} ({})", T::KIND, tools.root(), tools.provenance());
                return Ok(tools);
            }
            let rejection = deps.rejection();
            if !candidate.is_empty() {
                seen.insert(candidate.path.clone(), rejection.clone());
            }
            rejected.push(rejection);
        }

        Err(RigError::ToolchainNotFound {
            toolchain: T::KIND.to_string(),
            candidates: rejected,
        })
    }

    pub fn locate_android_sdk(
        &self,
        host: &dyn HostEnvironment,
        config: &ToolchainConfig,
    ) -> Result<AndroidSdkTools> {
        self.locate(&android_sdk_candidates(host, config.android_sdk.as_deref()))
    }

    pub fn locate_jdk(&self, host: &dyn HostEnvironment, config: &ToolchainConfig) -> Result<JdkTools> {
        self.locate(&jdk_candidates(host, config.jdk.as_deref()))
    }
}
