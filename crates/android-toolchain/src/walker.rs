//! Bounded-depth file search
//!
//! Finds files below a root whose `/`-separated relative path matches one of a set of
//! patterns. Subdirectories are visited before the files next to them, walking is
//! iterative and unreadable directories are skipped.

use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// One file that matched a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerMatch {
    /// Path relative to the search root, `/`-separated
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Index into the pattern list that matched
    pub pattern_index: usize,
}

/// Directories sort before files, then by name, so results are deterministic.
fn directories_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type().is_dir();
    let b_dir = b.file_type().is_dir();
    b_dir.cmp(&a_dir).then_with(|| a.file_name().cmp(b.file_name()))
}

fn relative_string(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Search `root` for files matching `patterns`.
///
/// `max_depth` counts directory levels below the root: 0 examines the root's own
/// files only. Each file is reported at most once, for the first pattern it matches.
pub fn search(root: &Path, max_depth: usize, patterns: &[Regex]) -> Vec<WalkerMatch> {
    if root.as_os_str().is_empty() || patterns.is_empty() {
        return Vec::new();
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth + 1)
        .follow_links(true)
        .sort_by(directories_first);

    let mut matches = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable path below {:?}: {}", root, err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_string(root, entry.path()) else {
            continue;
        };
        if let Some(index) = patterns.iter().position(|p| p.is_match(&relative)) {
            matches.push(WalkerMatch {
                relative_path: relative,
                absolute_path: entry.path().to_path_buf(),
                pattern_index: index,
            });
        }
    }
    matches
}
