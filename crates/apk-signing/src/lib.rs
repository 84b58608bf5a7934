//! APK Signing
//!
//! Signs and verifies APKs with `apksigner` or `jarsigner`, aligns them with
//! `zipalign` and reads certificate fingerprints from `keytool`.

pub mod fingerprint;
pub mod keystore;
pub mod signing;

pub use fingerprint::{parse_fingerprint, DigestAlgorithm, FingerprintSet};
pub use keystore::{KeyStore, KeyStoreType, Keytool};
pub use signing::{SignRequest, SignatureVerification, Signer, SignerCapabilities, Zipalign};
