//! Android Manifest Reading
//!
//! Reads package facts from an APK through `aapt`. Two dump formats are understood:
//! the flat badging dump and the nested xmltree dump.

pub mod badging;
pub mod manifest;
pub mod xmltree;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use droidrig_core::{ExecutionPipeline, Invocation, Result, RigError};

pub use badging::parse_badging;
pub use manifest::PackageManifest;
pub use xmltree::{parse_tree, parse_xmltree, XmlElement};

/// The two aapt manifest dump formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    Badging,
    XmlTree,
}

impl DumpFormat {
    pub fn detect(text: &str) -> Option<Self> {
        if xmltree::looks_like_xmltree(text) {
            Some(DumpFormat::XmlTree)
        } else if badging::looks_like_badging(text) {
            Some(DumpFormat::Badging)
        } else {
            None
        }
    }
}

/// Parse either dump format.
pub fn parse_manifest_dump(text: &str) -> Result<PackageManifest> {
    match DumpFormat::detect(text) {
        Some(DumpFormat::Badging) => parse_badging(text),
        Some(DumpFormat::XmlTree) => parse_xmltree(text),
        None => Err(RigError::parse("manifest dump", text)),
    }
}

/// Reads manifests with the SDK's `aapt`.
#[derive(Debug, Clone)]
pub struct ManifestReader {
    aapt: PathBuf,
    pipeline: ExecutionPipeline,
}

impl ManifestReader {
    pub fn new(aapt: impl Into<PathBuf>, pipeline: ExecutionPipeline) -> Self {
        Self {
            aapt: aapt.into(),
            pipeline,
        }
    }

    pub fn badging(&self, apk: &Path) -> Result<PackageManifest> {
        let invocation = Invocation::new(&self.aapt)
            .args(["dump", "badging"])
            .arg(apk.to_string_lossy());
        let outcome = self.pipeline.run(&invocation)?;
        parse_badging(&outcome.output)
    }

    pub fn xmltree(&self, apk: &Path) -> Result<PackageManifest> {
        let invocation = Invocation::new(&self.aapt)
            .args(["dump", "xmltree"])
            .arg(apk.to_string_lossy())
            .arg("AndroidManifest.xml");
        let outcome = self.pipeline.run(&invocation)?;
        parse_xmltree(&outcome.output)
    }

    /// Badging first; the xmltree dump when badging fails or is unparseable.
    pub fn read(&self, apk: &Path) -> Result<PackageManifest> {
        let manifest = match self.badging(apk) {
            Ok(manifest) => manifest,
            Err(err) => {
                debug!("badging dump unusable ({}), trying xmltree", err);
                self.xmltree(apk)?
            }
        };
        info!("{:?} is package {}", apk, manifest.package_name);
        Ok(manifest)
    }
}
