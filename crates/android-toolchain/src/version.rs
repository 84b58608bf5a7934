//! Version selection
//!
//! Picks the newest candidate among strings that embed numeric versions, such as
//! `build-tools/34.0.0/aapt` or `jdk-17.0.9+9`.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

fn numeric_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

fn parse_component(digits: &str) -> u64 {
    digits.parse().unwrap_or(u64::MAX)
}

/// Every all-digit capture group of `pattern` in `candidate`, or `None` if it does not match.
pub fn version_tuple(pattern: &Regex, candidate: &str) -> Option<Vec<u64>> {
    let captures = pattern.captures(candidate)?;
    Some(
        captures
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .map(parse_component)
            .collect(),
    )
}

/// Every numeric run in `candidate`, or `None` if it has none.
pub fn numeric_tuple(candidate: &str) -> Option<Vec<u64>> {
    let runs: Vec<u64> = numeric_run()
        .find_iter(candidate)
        .map(|m| parse_component(m.as_str()))
        .collect();
    (!runs.is_empty()).then_some(runs)
}

/// Lexicographic comparison where a missing component counts as 0.
pub fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn pick_max<'a, T, F>(candidates: &'a [T], mut extract: F) -> Option<&'a T>
where
    F: FnMut(&T) -> Option<Vec<u64>>,
{
    let mut best: Option<(&'a T, Vec<u64>)> = None;
    for candidate in candidates {
        let Some(tuple) = extract(candidate) else {
            continue;
        };
        // Strictly greater only: on a tie the earlier candidate stays.
        let replace = match &best {
            None => true,
            Some((_, current)) => compare_versions(&tuple, current) == Ordering::Greater,
        };
        if replace {
            best = Some((candidate, tuple));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Newest candidate according to the digit groups captured by `pattern`.
pub fn pick_latest_by<'a, T: AsRef<str>>(pattern: &Regex, candidates: &'a [T]) -> Option<&'a T> {
    pick_max(candidates, |c| version_tuple(pattern, c.as_ref()))
}

/// Newest candidate according to every numeric run it contains.
pub fn pick_latest<'a, T: AsRef<str>>(candidates: &'a [T]) -> Option<&'a T> {
    pick_max(candidates, |c| numeric_tuple(c.as_ref()))
}
