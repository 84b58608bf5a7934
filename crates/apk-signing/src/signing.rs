//! APK Signing
//!
//! Sign and verify APKs with `apksigner` (build-tools) or `jarsigner` (JDK). The
//! flags a signer accepts differ between releases, so its help text is probed first
//! and optional flags are only passed when listed there.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use droidrig_core::{ExecutionPipeline, Invocation, Result, RigError, SignerBackend, SigningSettings};

use crate::keystore::KeyStore;

const APKSIGNER_VERIFIED: &str = "Verifies";
const JARSIGNER_VERIFIED: &str = "jar verified.";

fn flag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\s\[,|])(?P<flag>--?[A-Za-z][A-Za-z0-9-]*)").expect("static regex")
    })
}

/// Flags a signer listed in its help text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerCapabilities {
    flags: BTreeSet<String>,
}

impl SignerCapabilities {
    pub fn from_help(help: &str) -> Self {
        let flags = help
            .lines()
            .flat_map(|line| flag_pattern().captures_iter(line))
            .map(|caps| caps["flag"].to_string())
            .collect();
        Self { flags }
    }

    /// Whether `flag` (with its dashes) was listed.
    pub fn supports(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// One signing job.
#[derive(Debug, Clone)]
pub struct SignRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub keystore: &'a KeyStore,
    pub settings: &'a SigningSettings,
    pub min_sdk: Option<u32>,
}

/// Signature verification result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureVerification {
    pub v1_signed: bool,
    pub v2_signed: bool,
    pub v3_signed: bool,
    pub v4_signed: bool,
    pub signer_certs: Vec<String>,
    pub output: String,
}

impl SignatureVerification {
    fn from_output(output: String) -> Self {
        let scheme = |n: u8| {
            output.lines().any(|l| {
                l.contains(&format!("v{} scheme", n)) && l.trim_end().ends_with("true")
            })
        };
        let mut verification = SignatureVerification {
            v1_signed: scheme(1),
            v2_signed: scheme(2),
            v3_signed: scheme(3),
            v4_signed: scheme(4),
            signer_certs: Vec::new(),
            output: String::new(),
        };
        for line in output.lines() {
            if line.contains("certificate DN:") || line.contains("X.509, ") {
                verification.signer_certs.push(line.trim().to_string());
            }
        }
        verification.output = output;
        verification
    }
}

/// A signing tool of one backend.
#[derive(Debug, Clone)]
pub struct Signer {
    backend: SignerBackend,
    program: PathBuf,
    pipeline: ExecutionPipeline,
    env: Vec<(String, String)>,
}

impl Signer {
    pub fn apksigner(program: impl Into<PathBuf>, pipeline: ExecutionPipeline) -> Self {
        Self::new(SignerBackend::Apksigner, program, pipeline)
    }

    pub fn jarsigner(program: impl Into<PathBuf>, pipeline: ExecutionPipeline) -> Self {
        Self::new(SignerBackend::Jarsigner, program, pipeline)
    }

    pub fn new(backend: SignerBackend, program: impl Into<PathBuf>, pipeline: ExecutionPipeline) -> Self {
        Self {
            backend,
            program: program.into(),
            pipeline,
            env: Vec::new(),
        }
    }

    /// Environment for every signer invocation (`apksigner` is a script that needs `java`).
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn backend(&self) -> SignerBackend {
        self.backend
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.program).envs(&self.env)
    }

    /// Read the flags the signer supports from its help text.
    pub fn probe(&self) -> Result<SignerCapabilities> {
        let invocation = match self.backend {
            SignerBackend::Apksigner => self.invocation().args(["sign", "--help"]),
            SignerBackend::Jarsigner => self.invocation().arg("-help"),
        };
        // some releases exit 1 after printing usage
        let outcome = self.pipeline.run_allowing(&invocation, &[0, 1])?;
        let capabilities = SignerCapabilities::from_help(&outcome.output);
        if capabilities.is_empty() {
            return Err(RigError::parse("signer help flags", outcome.output));
        }
        debug!("{:?} supports {:?}", self.program, capabilities.flags);
        Ok(capabilities)
    }

    /// Build the signing command. Required flags are always present; optional ones
    /// only when `capabilities` lists them.
    pub fn sign_invocation(&self, capabilities: &SignerCapabilities, request: &SignRequest<'_>) -> Invocation {
        let keystore = request.keystore;
        let path = |p: &Path| p.to_string_lossy().into_owned();
        let mut invocation = self.invocation();

        match self.backend {
            SignerBackend::Apksigner => {
                invocation = invocation
                    .args(["sign", "--ks"])
                    .arg(path(&keystore.path))
                    .arg("--ks-pass")
                    .arg(format!("pass:{}", keystore.password))
                    .arg("--ks-key-alias")
                    .arg(&keystore.alias)
                    .arg("--key-pass")
                    .arg(format!("pass:{}", keystore.effective_key_password()));
                if capabilities.supports("--ks-type") {
                    invocation = invocation.args(["--ks-type", keystore.store_type.as_str()]);
                }
                let schemes = [
                    ("--v1-signing-enabled", request.settings.v1),
                    ("--v2-signing-enabled", request.settings.v2),
                    ("--v3-signing-enabled", request.settings.v3),
                    ("--v4-signing-enabled", request.settings.v4),
                ];
                for (flag, enabled) in schemes {
                    if capabilities.supports(flag) {
                        invocation = invocation.arg(flag).arg(enabled.to_string());
                    }
                }
                if let Some(min_sdk) = request.min_sdk {
                    if capabilities.supports("--min-sdk-version") {
                        invocation = invocation.arg("--min-sdk-version").arg(min_sdk.to_string());
                    }
                }
                invocation
                    .arg("--out")
                    .arg(path(request.output))
                    .arg(path(request.input))
            }
            SignerBackend::Jarsigner => {
                invocation = invocation
                    .arg("-keystore")
                    .arg(path(&keystore.path))
                    .arg("-storepass")
                    .arg(&keystore.password)
                    .arg("-keypass")
                    .arg(keystore.effective_key_password());
                if capabilities.supports("-storetype") {
                    invocation = invocation.args(["-storetype", keystore.store_type.as_str()]);
                }
                if capabilities.supports("-sigalg") {
                    invocation = invocation.args(["-sigalg", "SHA256withRSA"]);
                }
                if capabilities.supports("-digestalg") {
                    invocation = invocation.args(["-digestalg", "SHA-256"]);
                }
                let target = if capabilities.supports("-signedjar") {
                    invocation = invocation.arg("-signedjar").arg(path(request.output));
                    request.input
                } else {
                    request.output
                };
                invocation.arg(path(target)).arg(&keystore.alias)
            }
        }
    }

    /// Sign `request.input` into `request.output`.
    pub fn sign(&self, capabilities: &SignerCapabilities, request: &SignRequest<'_>) -> Result<()> {
        info!("Signing APK: {:?}", request.input);
        if !request.keystore.exists() {
            return Err(RigError::SigningFailed(format!(
                "keystore {:?} does not exist",
                request.keystore.path
            )));
        }
        if self.backend == SignerBackend::Jarsigner && !capabilities.supports("-signedjar") {
            // signs in place, so start from a copy
            std::fs::copy(request.input, request.output)?;
        }

        let invocation = self.sign_invocation(capabilities, request);
        match self.pipeline.run(&invocation) {
            Ok(_) => {
                info!("APK signed successfully: {:?}", request.output);
                Ok(())
            }
            Err(RigError::CommandFailed { exit_code, output, .. }) => Err(RigError::SigningFailed(
                format!("{} exited with {}: {}", self.program.display(), exit_code, output.trim()),
            )),
            Err(err) => Err(err),
        }
    }

    /// Verify a signature. The backend's success token must appear in the output.
    pub fn verify(&self, apk: &Path) -> Result<SignatureVerification> {
        let (invocation, token) = match self.backend {
            SignerBackend::Apksigner => (
                self.invocation()
                    .args(["verify", "--verbose", "--print-certs"])
                    .arg(apk.to_string_lossy()),
                APKSIGNER_VERIFIED,
            ),
            SignerBackend::Jarsigner => (
                self.invocation()
                    .args(["-verify", "-verbose", "-certs"])
                    .arg(apk.to_string_lossy()),
                JARSIGNER_VERIFIED,
            ),
        };
        let outcome = self.pipeline.run_allowing(&invocation, &[0, 1])?;
        if !outcome.output.lines().any(|l| l.trim() == token) {
            warn!("{:?} failed verification", apk);
            return Err(RigError::SigningFailed(format!(
                "{:?} did not verify (expected {:?}): {}",
                apk,
                token,
                outcome.output.trim()
            )));
        }
        Ok(SignatureVerification::from_output(outcome.output))
    }
}

fn zipalign_verified() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Verification succ?essful").expect("static regex"))
}

/// The build-tools `zipalign`.
#[derive(Debug, Clone)]
pub struct Zipalign {
    program: PathBuf,
    pipeline: ExecutionPipeline,
}

impl Zipalign {
    pub const ALIGNMENT: &'static str = "4";

    pub fn new(program: impl Into<PathBuf>, pipeline: ExecutionPipeline) -> Self {
        Self {
            program: program.into(),
            pipeline,
        }
    }

    /// Align `input` into `output`, page-aligning shared libraries.
    pub fn align(&self, input: &Path, output: &Path) -> Result<()> {
        info!("Zipaligning APK: {:?}", input);
        let invocation = Invocation::new(&self.program)
            .args(["-f", "-p", Self::ALIGNMENT])
            .arg(input.to_string_lossy())
            .arg(output.to_string_lossy());
        self.pipeline.run(&invocation)?;
        Ok(())
    }

    pub fn is_aligned(&self, apk: &Path) -> Result<bool> {
        let invocation = Invocation::new(&self.program)
            .args(["-c", "-v", Self::ALIGNMENT])
            .arg(apk.to_string_lossy());
        let outcome = self.pipeline.run_allowing(&invocation, &[0, 1])?;
        Ok(outcome.exit_code == 0 && zipalign_verified().is_match(&outcome.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidrig_core::testing::ScriptedRunner;
    use std::sync::Arc;

    const APKSIGNER_HELP: &str = "\
USAGE: apksigner sign [options] apk

        --ks                  Load private key and certificate chain from the Java
                              KeyStore initialized from the specified file.
        --ks-key-alias        Alias under which the private key is stored.
        --ks-pass             KeyStore password.
        --key-pass            Password with which the private key is protected.
        --ks-type             Type/algorithm of KeyStore to use.
        --v1-signing-enabled  Whether to enable signing using JAR signing scheme.
        --v2-signing-enabled  Whether to enable signing using APK Signature Scheme v2.
        --out                 File into which to output the signed APK.
        -h, --help            Show help about this command and exit
";

    const JARSIGNER_HELP: &str = "\
Usage: jarsigner [options] jar-file alias
       jarsigner -verify [options] jar-file [alias...]

[-keystore <url>]           keystore location
[-storepass <password>]     password for keystore integrity
[-storetype <type>]         keystore type
[-keypass <password>]       password for private key (if different)
[-sigalg <algorithm>]       name of signature algorithm
[-digestalg <algorithm>]    name of digest algorithm
[-signedjar <file>]         name of signed JAR file
";

    fn keystore(dir: &Path) -> KeyStore {
        let path = dir.join("release.jks");
        std::fs::write(&path, b"keystore").unwrap();
        let mut keystore = KeyStore::new(path, "storepw", "release");
        keystore.key_password = Some("keypw".into());
        keystore
    }

    fn pipeline(runner: &Arc<ScriptedRunner>) -> ExecutionPipeline {
        ExecutionPipeline::new(runner.clone())
    }

    #[test]
    fn help_flags_are_collected() {
        let caps = SignerCapabilities::from_help(APKSIGNER_HELP);
        assert!(caps.supports("--ks-type"));
        assert!(caps.supports("--v2-signing-enabled"));
        assert!(!caps.supports("--v3-signing-enabled"));
        assert!(caps.supports("-h"));

        let caps = SignerCapabilities::from_help(JARSIGNER_HELP);
        assert!(caps.supports("-signedjar"));
        assert!(caps.supports("-verify"));
    }

    #[test]
    fn probe_accepts_usage_exit_and_rejects_empty_help() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .expect("sign --help", 1, APKSIGNER_HELP)
            .expect("sign --help", 0, "");
        let signer = Signer::apksigner("/sdk/build-tools/34.0.0/apksigner", pipeline(&runner));
        assert!(signer.probe().unwrap().supports("--out"));
        assert!(matches!(signer.probe(), Err(RigError::ParseFailed { .. })));
    }

    #[test]
    fn apksigner_passes_only_supported_scheme_flags() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = keystore(dir.path());
        let settings = SigningSettings::default();
        let runner = Arc::new(ScriptedRunner::new());
        let signer = Signer::apksigner("apksigner", pipeline(&runner));
        let request = SignRequest {
            input: Path::new("in.apk"),
            output: Path::new("out.apk"),
            keystore: &keystore,
            settings: &settings,
            min_sdk: Some(21),
        };

        let caps = SignerCapabilities::from_help(APKSIGNER_HELP);
        let args = signer.sign_invocation(&caps, &request).args;
        let ks = keystore.path.to_string_lossy().into_owned();
        assert_eq!(
            args,
            vec![
                "sign",
                "--ks",
                ks.as_str(),
                "--ks-pass",
                "pass:storepw",
                "--ks-key-alias",
                "release",
                "--key-pass",
                "pass:keypw",
                "--ks-type",
                "JKS",
                "--v1-signing-enabled",
                "true",
                "--v2-signing-enabled",
                "true",
                "--out",
                "out.apk",
                "in.apk",
            ]
        );
    }

    #[test]
    fn jarsigner_without_signedjar_signs_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = keystore(dir.path());
        let input = dir.path().join("in.apk");
        let output = dir.path().join("out.apk");
        std::fs::write(&input, b"apk").unwrap();
        let settings = SigningSettings::default();

        let runner = Arc::new(ScriptedRunner::new());
        runner.expect("-keystore", 0, "jar signed.");
        let signer = Signer::jarsigner("jarsigner", pipeline(&runner));
        let caps = SignerCapabilities::from_help("[-keystore <url>] [-storepass <pw>] [-keypass <pw>]");
        signer
            .sign(
                &caps,
                &SignRequest {
                    input: &input,
                    output: &output,
                    keystore: &keystore,
                    settings: &settings,
                    min_sdk: None,
                },
            )
            .unwrap();

        assert!(output.is_file());
        let args = &runner.calls()[0].args;
        assert!(!args.iter().any(|a| a == "-sigalg" || a == "-signedjar"));
        assert_eq!(args[args.len() - 2], output.to_string_lossy());
        assert_eq!(args[args.len() - 1], "release");
    }

    #[test]
    fn failed_sign_is_a_signing_error() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = keystore(dir.path());
        let settings = SigningSettings::default();
        let runner = Arc::new(ScriptedRunner::new());
        runner.expect("sign --ks", 1, "Failed to load signer \"signer #1\"");
        let signer = Signer::apksigner("apksigner", pipeline(&runner));
        let err = signer
            .sign(
                &SignerCapabilities::from_help(APKSIGNER_HELP),
                &SignRequest {
                    input: Path::new("in.apk"),
                    output: Path::new("out.apk"),
                    keystore: &keystore,
                    settings: &settings,
                    min_sdk: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, RigError::SigningFailed(ref m) if m.contains("Failed to load signer")));
    }

    #[test]
    fn verify_requires_the_backend_token() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .expect(
                "verify --verbose",
                0,
                "Verifies\nVerified using v1 scheme (JAR signing): true\n\
                 Verified using v2 scheme (APK Signature Scheme v2): true\n\
                 Verified using v3 scheme (APK Signature Scheme v3): false\n\
                 Signer #1 certificate DN: CN=Android Debug, O=Android, C=US\n",
            )
            .expect("verify --verbose", 1, "DOES NOT VERIFY\nERROR: Missing META-INF/MANIFEST.MF\n");
        let signer = Signer::apksigner("apksigner", pipeline(&runner));

        let verification = signer.verify(Path::new("app.apk")).unwrap();
        assert!(verification.v1_signed && verification.v2_signed);
        assert!(!verification.v3_signed);
        assert_eq!(verification.signer_certs.len(), 1);

        assert!(matches!(
            signer.verify(Path::new("app.apk")),
            Err(RigError::SigningFailed(ref m)) if m.contains("DOES NOT VERIFY")
        ));
    }

    #[test]
    fn jarsigner_verify_token() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .expect("-verify", 0, "\n  s = signature was verified \n\njar verified.\n")
            .expect("-verify", 0, "jar is unsigned.\n");
        let signer = Signer::jarsigner("jarsigner", pipeline(&runner));
        assert!(signer.verify(Path::new("app.apk")).is_ok());
        assert!(signer.verify(Path::new("app.apk")).is_err());
    }

    #[test]
    fn zipalign_check() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .expect("-c -v 4", 0, "Verifying alignment of app.apk (4)...\nVerification succesful\n")
            .expect("-c -v 4", 1, "Verification FAILED\n")
            .expect("-f -p 4", 0, "");
        let zipalign = Zipalign::new("zipalign", pipeline(&runner));
        assert!(zipalign.is_aligned(Path::new("app.apk")).unwrap());
        assert!(!zipalign.is_aligned(Path::new("app.apk")).unwrap());
        zipalign.align(Path::new("in.apk"), Path::new("out.apk")).unwrap();
        assert_eq!(runner.command_lines()[2], "zipalign -f -p 4 in.apk out.apk");
    }
}
