//! Certificate fingerprint extraction
//!
//! `keytool -list -v` output is localized: the owner label and the punctuation
//! around digest labels change with the JVM's locale, while the hex values do not.
//! Labels live in tables checked in a fixed order, so another locale is one more row.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use droidrig_core::{Result, RigError};

/// Digest algorithms keytool prints, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Number of colon-separated hex pairs in a digest.
    pub fn byte_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 16,
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA256",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (locale, algorithm, label pattern), strongest algorithm first within a locale.
const DIGEST_LABELS: &[(&str, DigestAlgorithm, &str)] = &[
    ("en", DigestAlgorithm::Sha256, r"SHA-?256"),
    ("en", DigestAlgorithm::Sha1, r"SHA-?1"),
    ("en", DigestAlgorithm::Md5, r"MD5"),
    ("fr", DigestAlgorithm::Sha256, r"SHA[ -]256"),
    ("fr", DigestAlgorithm::Sha1, r"SHA[ -]1"),
    ("zh", DigestAlgorithm::Sha256, r"SHA-?256\s*指纹"),
    ("zh", DigestAlgorithm::Sha1, r"SHA-?1\s*指纹"),
    ("zh", DigestAlgorithm::Md5, r"MD5\s*指纹"),
];

/// (locale, owner label)
const OWNER_LABELS: &[(&str, &str)] = &[
    ("en", "Owner"),
    ("fr", "Propriétaire"),
    ("zh", "所有者"),
    ("de", "Eigentümer"),
    ("es", "Propietario"),
];

/// Label/value separator: optional (non-breaking) spaces around an ASCII or fullwidth colon.
const SEPARATOR: &str = r"[\s\u{a0}]*[:：][\s\u{a0}]*";

struct DigestPattern {
    locale: &'static str,
    algorithm: DigestAlgorithm,
    regex: Regex,
}

fn digest_patterns() -> &'static [DigestPattern] {
    static PATTERNS: OnceLock<Vec<DigestPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DIGEST_LABELS
            .iter()
            .map(|&(locale, algorithm, label)| {
                let pairs = algorithm.byte_len() - 1;
                let pattern = format!(
                    r"(?m)^[\s\u{{a0}}]*(?:{label}){SEPARATOR}(?P<hex>(?:[0-9A-Fa-f]{{2}}:){{{pairs}}}[0-9A-Fa-f]{{2}})[\s\u{{a0}}]*$"
                );
                DigestPattern {
                    locale,
                    algorithm,
                    regex: Regex::new(&pattern).expect("static fingerprint pattern"),
                }
            })
            .collect()
    })
}

fn owner_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let labels: Vec<&str> = OWNER_LABELS.iter().map(|(_, label)| *label).collect();
        Regex::new(&format!(r"(?m)^\s*(?:{}){}(?P<owner>\S.*?)\s*$", labels.join("|"), SEPARATOR))
            .expect("static owner pattern")
    })
}

/// Digests found in one certificate dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FingerprintSet {
    pub owner: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

impl FingerprintSet {
    /// Parse a `keytool -list -v` (or `-printcert`) dump.
    ///
    /// Fails when no digest is present, or when one algorithm shows two different
    /// values (a keystore with several entries).
    pub fn parse(text: &str) -> Result<Self> {
        let mut set = FingerprintSet {
            owner: owner_pattern()
                .captures(text)
                .map(|c| c["owner"].to_string()),
            ..Default::default()
        };

        for pattern in digest_patterns() {
            for caps in pattern.regex.captures_iter(text) {
                let value = caps["hex"].to_ascii_uppercase();
                let slot = set.slot(pattern.algorithm);
                if let Some(existing) = slot.as_deref() {
                    if existing != value {
                        return Err(RigError::parse(
                            format!(
                                "a unique {} fingerprint ({} label matched two values)",
                                pattern.algorithm, pattern.locale
                            ),
                            text,
                        ));
                    }
                } else {
                    *slot = Some(value);
                }
            }
        }

        if set.md5.is_none() && set.sha1.is_none() && set.sha256.is_none() {
            return Err(RigError::parse("certificate fingerprint", text));
        }
        Ok(set)
    }

    fn slot(&mut self, algorithm: DigestAlgorithm) -> &mut Option<String> {
        match algorithm {
            DigestAlgorithm::Md5 => &mut self.md5,
            DigestAlgorithm::Sha1 => &mut self.sha1,
            DigestAlgorithm::Sha256 => &mut self.sha256,
        }
    }

    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        match algorithm {
            DigestAlgorithm::Md5 => self.md5.as_deref(),
            DigestAlgorithm::Sha1 => self.sha1.as_deref(),
            DigestAlgorithm::Sha256 => self.sha256.as_deref(),
        }
    }

    /// The strongest digest present.
    pub fn strongest(&self) -> Option<(DigestAlgorithm, &str)> {
        [DigestAlgorithm::Sha256, DigestAlgorithm::Sha1, DigestAlgorithm::Md5]
            .into_iter()
            .find_map(|a| self.get(a).map(|v| (a, v)))
    }
}

/// The strongest fingerprint in a certificate dump.
pub fn parse_fingerprint(text: &str) -> Result<(DigestAlgorithm, String)> {
    let set = FingerprintSet::parse(text)?;
    set.strongest()
        .map(|(a, v)| (a, v.to_string()))
        .ok_or_else(|| RigError::parse("certificate fingerprint", text))
}
