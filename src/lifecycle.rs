//! APK lifecycle
//!
//! Multi-step device and signing sequences. Each step is checked before the next
//! one runs; a missed post-condition is reported with what was expected and what the
//! tools actually printed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use droidrig_apk_signing::{
    FingerprintSet, KeyStore, Keytool, SignRequest, SignatureVerification, Signer, Zipalign,
};
use droidrig_core::{
    BackoffPolicy, HelperConfig, Result, RigConfig, RigError, SignerBackend, SigningSettings,
};
use droidrig_device_bridge::helper::{random_port, PORT_PLACEHOLDER};
use droidrig_device_bridge::{
    is_listed, ActivityManager, AdbClient, AdbCommand, AppOps, HelperHandle, HelperLauncher,
    InstallOptions, InstrumentationReport, PackageList, PackageManager, RUNTIME_PERMISSIONS_API,
    SCOPED_STORAGE_API,
};
use droidrig_manifest::{ManifestReader, PackageManifest};

use crate::container::{JdkToolsProvider, ProcessProvider, SdkToolsProvider};

/// Where a package stands on the target device. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninstalled,
    Installed,
    PermissionsGranted,
    InstrumentationRunning,
}

/// Mock location app-op, granted from API 23.
pub const MOCK_LOCATION_OP: &str = "android:mock_location";
/// All-files access app-op, granted from API 30.
pub const MANAGE_EXTERNAL_STORAGE_OP: &str = "MANAGE_EXTERNAL_STORAGE";

/// Device port the test server listens on inside the instrumentation.
pub const TEST_SERVER_PORT_ARG: &str = "test_server_port";

/// The device an orchestrator targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub serial: String,
    pub sdk_level: u32,
}

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub manifest: PackageManifest,
    pub serial: String,
    pub sdk_level: u32,
}

/// A test server running in the background.
#[derive(Debug)]
pub struct TestServer {
    pub package: String,
    pub helper: HelperHandle,
}

/// Drives packages through install, permissions, instrumentation and uninstall.
pub struct LifecycleOrchestrator<'a, C> {
    container: &'a C,
    serial: Option<String>,
    backoff: BackoffPolicy,
    helper: HelperConfig,
    signing: SigningSettings,
    session: Option<DeviceSession>,
    states: HashMap<String, LifecycleState>,
}

impl<'a, C> LifecycleOrchestrator<'a, C> {
    pub fn new(container: &'a C, config: &RigConfig) -> Self {
        Self {
            container,
            serial: config.adb.serial.clone(),
            backoff: config.adb.backoff(),
            helper: config.helper.clone(),
            signing: config.signing.clone(),
            session: None,
            states: HashMap::new(),
        }
    }

    /// Target this serial instead of the configured one.
    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        if serial.is_some() {
            self.serial = serial;
            self.session = None;
        }
        self
    }

    pub fn state(&self, package: &str) -> LifecycleState {
        self.states
            .get(package)
            .copied()
            .unwrap_or(LifecycleState::Uninstalled)
    }

    fn transition(&mut self, package: &str, state: LifecycleState) {
        debug!("{}: {:?} -> {:?}", package, self.state(package), state);
        self.states.insert(package.to_string(), state);
    }
}

impl<'a, C: SdkToolsProvider + ProcessProvider> LifecycleOrchestrator<'a, C> {
    fn adb(&self) -> Result<AdbClient> {
        let sdk = self.container.sdk_tools()?;
        Ok(AdbClient::new(sdk.adb(), self.container.pipeline())
            .with_backoff(self.backoff, self.container.sleeper())
            .with_env(self.container.child_env()))
    }

    fn manifest_reader(&self) -> Result<ManifestReader> {
        let sdk = self.container.sdk_tools()?;
        Ok(ManifestReader::new(sdk.aapt(), self.container.pipeline()))
    }

    /// Resolve the target device and its API level once.
    pub fn session(&mut self) -> Result<DeviceSession> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        let adb = self.adb()?;
        let device = adb.resolve_device(self.serial.as_deref())?;
        let sdk_level = adb.sdk_level(Some(&device.serial))?;
        info!("Using {} (API {})", device.display_name(), sdk_level);
        let session = DeviceSession {
            serial: device.serial,
            sdk_level,
        };
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Package facts of an APK.
    pub fn manifest(&self, apk: &Path) -> Result<PackageManifest> {
        self.manifest_reader()?.read(apk)
    }

    /// Install an APK and confirm the package manager lists it afterwards.
    pub fn install(&mut self, apk: &Path) -> Result<InstallReport> {
        let manifest = self.manifest(apk)?;
        let session = self.session()?;
        let adb = self.adb()?;
        let serial = Some(session.serial.as_str());

        let options = InstallOptions {
            replace: true,
            grant_permissions: session.sdk_level >= RUNTIME_PERMISSIONS_API,
            ..Default::default()
        };
        let outcome = adb.install(serial, apk, &options)?;
        debug!("install output: {}", outcome.output.trim());

        let (packages, listing) = adb.list_packages(serial, PackageList::new())?;
        if !is_listed(&packages, &manifest.package_name) {
            return Err(RigError::PostConditionFailed {
                step: "install".to_string(),
                expectation: format!(
                    "package {} to be listed after installing {}",
                    manifest.package_name,
                    apk.display()
                ),
                observed: listing,
            });
        }

        info!("Installed {} on {}", manifest.package_name, session.serial);
        self.transition(&manifest.package_name, LifecycleState::Installed);
        Ok(InstallReport {
            manifest,
            serial: session.serial,
            sdk_level: session.sdk_level,
        })
    }

    /// Allow the app-ops instrumented apps rely on. Each is attempted on its own and a
    /// failure is only logged. Returns the ops that were applied.
    pub fn grant_post_install_permissions(&mut self, package: &str) -> Result<Vec<&'static str>> {
        let session = self.session()?;
        let adb = self.adb()?;
        let serial = Some(session.serial.as_str());

        let mut requested = Vec::new();
        if session.sdk_level >= RUNTIME_PERMISSIONS_API {
            requested.push((MOCK_LOCATION_OP, AppOps::set(package, MOCK_LOCATION_OP, "allow")));
        }
        if session.sdk_level >= SCOPED_STORAGE_API {
            requested.push((
                MANAGE_EXTERNAL_STORAGE_OP,
                AppOps::set(package, MANAGE_EXTERNAL_STORAGE_OP, "allow").for_uid(),
            ));
        }

        let mut applied = Vec::new();
        for (op, command) in requested {
            match command.build().and_then(|cmd| adb.shell(serial, &cmd)) {
                Ok(_) => applied.push(op),
                Err(err) => warn!("could not allow {} for {}: {}", op, package, err),
            }
        }

        self.transition(package, LifecycleState::PermissionsGranted);
        Ok(applied)
    }

    /// Clear the app's data.
    ///
    /// With a test server component the clearing runs as instrumentation and its
    /// report must say `result=SUCCESSFUL`; otherwise `pm clear` must answer `Success`.
    pub fn clear_app_data(&mut self, package: &str, test_server: Option<&str>) -> Result<()> {
        let session = self.session()?;
        let adb = self.adb()?;
        let serial = Some(session.serial.as_str());

        match test_server {
            Some(component) => {
                let command = ActivityManager::instrument(component)
                    .wait()
                    .arg("target_package", package)
                    .build()?;
                let output = adb.shell(serial, &command)?;
                InstrumentationReport::parse(&output)?.require_successful("result", "clear app data")?;
            }
            None => {
                let output = adb.shell(serial, &PackageManager::clear(package))?;
                if !output.lines().any(|l| l.trim() == "Success") {
                    return Err(RigError::PostConditionFailed {
                        step: "clear app data".to_string(),
                        expectation: format!("pm clear {} to print Success", package),
                        observed: output,
                    });
                }
            }
        }
        info!("Cleared data of {}", package);
        Ok(())
    }

    /// Start the test server instrumentation in the background and forward its port.
    pub fn start_test_server(
        &mut self,
        package: &str,
        component: &str,
        port: Option<u16>,
    ) -> Result<TestServer> {
        let session = self.session()?;
        let adb = self.adb()?;

        let command = ActivityManager::instrument(component)
            .wait()
            .arg(TEST_SERVER_PORT_ARG, PORT_PLACEHOLDER)
            .arg("target_package", package)
            .build()?;
        let template = AdbCommand::new()
            .device(&session.serial)
            .shell(&command)
            .build()
            .invocation(adb.adb_path())
            .envs(&self.container.child_env());

        let launcher = HelperLauncher::new(self.container.pipeline(), self.container.sleeper(), &self.helper);
        let helper = launcher.launch(&template, port.unwrap_or_else(random_port))?;
        if let Err(err) = adb.forward(Some(&session.serial), helper.port, helper.port) {
            warn!("forwarding port {} failed, stopping the test server", helper.port);
            if let Err(stop_err) = helper.stop() {
                warn!("could not stop the test server: {}", stop_err);
            }
            return Err(err);
        }

        info!("Test server for {} listening on port {}", package, helper.port);
        self.transition(package, LifecycleState::InstrumentationRunning);
        Ok(TestServer {
            package: package.to_string(),
            helper,
        })
    }

    /// Uninstall a package; adb's exit code decides success.
    pub fn uninstall(&mut self, package: &str) -> Result<()> {
        let session = self.session()?;
        self.adb()?.uninstall(Some(&session.serial), package)?;
        self.transition(package, LifecycleState::Uninstalled);
        Ok(())
    }
}

impl<'a, C: SdkToolsProvider + JdkToolsProvider + ProcessProvider> LifecycleOrchestrator<'a, C> {
    fn signer(&self) -> Result<Signer> {
        let pipeline = self.container.pipeline();
        let signer = match self.signing.backend {
            SignerBackend::Apksigner => {
                Signer::apksigner(self.container.sdk_tools()?.apksigner(), pipeline)
            }
            SignerBackend::Jarsigner => {
                Signer::jarsigner(self.container.jdk_tools()?.jarsigner(), pipeline)
            }
        };
        // apksigner is a script that needs java on PATH
        self.container.jdk_tools()?;
        Ok(signer.with_env(self.container.child_env()))
    }

    /// Sign `input` into `output`, aligned, then verify the result.
    ///
    /// apksigner signs an aligned APK; jarsigner output is aligned after signing.
    pub fn sign(
        &self,
        input: &Path,
        output: &Path,
        keystore: &KeyStore,
        min_sdk: Option<u32>,
    ) -> Result<SignatureVerification> {
        let signer = self.signer()?;
        let capabilities = signer.probe()?;
        let zipalign = Zipalign::new(self.container.sdk_tools()?.zipalign(), self.container.pipeline());
        let intermediate = intermediate_path(output);

        let request = |input: &Path, output: &Path| {
            signer.sign(
                &capabilities,
                &SignRequest {
                    input,
                    output,
                    keystore,
                    settings: &self.signing,
                    min_sdk,
                },
            )
        };
        let result = match signer.backend() {
            SignerBackend::Apksigner => zipalign
                .align(input, &intermediate)
                .and_then(|_| request(&intermediate, output)),
            SignerBackend::Jarsigner => {
                request(input, &intermediate).and_then(|_| zipalign.align(&intermediate, output))
            }
        };
        if let Err(err) = std::fs::remove_file(&intermediate) {
            debug!("could not remove {:?}: {}", intermediate, err);
        }
        result?;

        signer.verify(output)
    }

    /// Verify an APK signature with the configured backend.
    pub fn verify(&self, apk: &Path) -> Result<SignatureVerification> {
        self.signer()?.verify(apk)
    }

    /// Certificate fingerprints of a keystore entry.
    pub fn fingerprint(&self, keystore: &KeyStore) -> Result<FingerprintSet> {
        let keytool = Keytool::new(self.container.jdk_tools()?.keytool(), self.container.pipeline());
        keytool.fingerprints(keystore)
    }
}

fn intermediate_path(output: &Path) -> PathBuf {
    output.with_extension("unaligned.apk")
}

/// The keystore to sign with: the given one, or the SDK debug keystore (created
/// with keytool when missing).
pub fn keystore_or_debug<C: JdkToolsProvider + ProcessProvider>(
    container: &C,
    keystore: Option<KeyStore>,
) -> Result<KeyStore> {
    if let Some(keystore) = keystore {
        return Ok(keystore);
    }
    let keystore = KeyStore::debug()?;
    if !keystore.exists() {
        let keytool = Keytool::new(container.jdk_tools()?.keytool(), container.pipeline());
        keytool.generate(&keystore, "CN=Android Debug,O=Android,C=US", 10000)?;
    }
    Ok(keystore)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::fake_install;
    use crate::container::Toolchain;
    use droidrig_core::testing::{RecordingSleeper, ScriptedRunner};
    use std::sync::Arc;

    const DEVICES: &str = "List of devices attached\nemulator-5554\tdevice product:sdk_gphone64 model:sdk_gphone64 transport_id:1\n\n";
    const BADGING: &str = "package: name='com.example.foo' versionCode='1' versionName='1.0'\nsdkVersion:'21'\n";

    struct Fixture {
        dir: tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        toolchain: Toolchain,
        config: RigConfig,
    }

    fn fixture(sdk_level: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_install(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .always("devices -l", 0, DEVICES)
            .always("getprop ro.build.version.sdk", 0, &format!("{}\n", sdk_level))
            .always("dump badging", 0, BADGING);
        let toolchain = Toolchain::new(config.clone())
            .with_runner(runner.clone())
            .with_sleeper(Arc::new(RecordingSleeper::new()));
        Fixture {
            dir,
            runner,
            toolchain,
            config,
        }
    }

    fn lines_with(runner: &ScriptedRunner, needle: &str) -> Vec<String> {
        runner
            .command_lines()
            .into_iter()
            .filter(|l| l.contains(needle))
            .collect()
    }

    #[test]
    fn install_grants_runtime_permissions_from_api_23() {
        let f = fixture(30);
        f.runner
            .expect(" install ", 0, "Performing Streamed Install\nSuccess\n")
            .expect("pm list packages", 0, "package:com.android.shell\npackage:com.example.foo\n");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);

        let report = lifecycle.install(Path::new("/tmp/foo.apk")).unwrap();
        assert_eq!(report.manifest.package_name, "com.example.foo");
        assert_eq!(report.serial, "emulator-5554");
        assert_eq!(lifecycle.state("com.example.foo"), LifecycleState::Installed);

        let install = &lines_with(&f.runner, " install ")[0];
        assert!(install.ends_with("-s emulator-5554 install -r -g /tmp/foo.apk"));
    }

    #[test]
    fn install_without_grant_below_api_23() {
        let f = fixture(22);
        f.runner
            .expect(" install ", 0, "Success\n")
            .expect("pm list packages", 0, "package:com.example.foo\n");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        lifecycle.install(Path::new("/tmp/foo.apk")).unwrap();
        assert!(lines_with(&f.runner, " install ")[0].ends_with("install -r /tmp/foo.apk"));
    }

    #[test]
    fn missing_package_after_install_is_a_post_condition_failure() {
        let f = fixture(30);
        let listing = "package:com.android.shell\npackage:com.example.other\n";
        f.runner
            .expect(" install ", 0, "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]\n")
            .expect("pm list packages", 0, listing);
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);

        match lifecycle.install(Path::new("/tmp/foo.apk")) {
            Err(RigError::PostConditionFailed { step, expectation, observed }) => {
                assert_eq!(step, "install");
                assert!(expectation.contains("com.example.foo"));
                assert_eq!(observed, listing);
            }
            other => panic!("expected PostConditionFailed, got {:?}", other),
        }
        assert_eq!(lifecycle.state("com.example.foo"), LifecycleState::Uninstalled);
    }

    #[test]
    fn permission_ops_follow_sdk_thresholds() {
        let f = fixture(29);
        f.runner.always("appops set", 0, "");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        assert_eq!(
            lifecycle.grant_post_install_permissions("com.example.foo").unwrap(),
            vec![MOCK_LOCATION_OP]
        );

        let f = fixture(33);
        f.runner
            .expect("android:mock_location", 1, "Error: no such package")
            .always("appops set", 0, "");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        assert_eq!(
            lifecycle.grant_post_install_permissions("com.example.foo").unwrap(),
            vec![MANAGE_EXTERNAL_STORAGE_OP]
        );
        assert!(lines_with(&f.runner, "MANAGE_EXTERNAL_STORAGE")[0]
            .ends_with("appops set --uid com.example.foo MANAGE_EXTERNAL_STORAGE allow"));
        assert_eq!(lifecycle.state("com.example.foo"), LifecycleState::PermissionsGranted);
    }

    #[test]
    fn nothing_is_granted_before_api_23() {
        let f = fixture(21);
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        assert!(lifecycle.grant_post_install_permissions("com.example.foo").unwrap().is_empty());
        assert!(lines_with(&f.runner, "appops").is_empty());
    }

    #[test]
    fn clear_data_through_instrumentation() {
        let f = fixture(30);
        f.runner
            .expect(
                "am instrument",
                0,
                "INSTRUMENTATION_STATUS: result=SUCCESSFUL\nINSTRUMENTATION_STATUS_CODE: 0\n",
            )
            .expect(
                "am instrument",
                0,
                "INSTRUMENTATION_STATUS: result=FAILED\n\
                 INSTRUMENTATION_STATUS: message=Unable to clear data\n\
                 INSTRUMENTATION_STATUS_CODE: -1\n",
            );
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        let server = Some("com.example.foo.test/sh.server.ClearAppData");

        lifecycle.clear_app_data("com.example.foo", server).unwrap();
        match lifecycle.clear_app_data("com.example.foo", server) {
            Err(RigError::PostConditionFailed { observed, .. }) => {
                assert_eq!(observed, "Unable to clear data")
            }
            other => panic!("expected PostConditionFailed, got {:?}", other),
        }
    }

    #[test]
    fn clear_data_falls_back_to_pm_clear() {
        let f = fixture(30);
        f.runner
            .expect("pm clear com.example.foo", 0, "Success\n")
            .expect("pm clear com.example.foo", 0, "Failed\n");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        lifecycle.clear_app_data("com.example.foo", None).unwrap();
        assert!(matches!(
            lifecycle.clear_app_data("com.example.foo", None),
            Err(RigError::PostConditionFailed { .. })
        ));
    }

    #[test]
    fn test_server_runs_in_background_and_is_forwarded() {
        let f = fixture(30);
        f.runner
            .expect_spawn("am instrument", None, "")
            .expect("forward tcp:50123 tcp:50123", 0, "");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);

        let server = lifecycle
            .start_test_server("com.example.foo", "com.example.foo.test/sh.server.Runner", Some(50123))
            .unwrap();
        assert_eq!(server.helper.port, 50123);
        assert_eq!(
            lifecycle.state("com.example.foo"),
            LifecycleState::InstrumentationRunning
        );
        let spawned = &lines_with(&f.runner, "am instrument")[0];
        assert!(spawned.contains("test_server_port") && spawned.contains("50123"));
        assert!(!spawned.contains(PORT_PLACEHOLDER));
        server.helper.stop().unwrap();
    }

    #[test]
    fn failed_forward_stops_the_test_server() {
        let f = fixture(30);
        f.runner
            .expect_spawn("am instrument", None, "")
            .expect("forward tcp:50123 tcp:50123", 1, "adb: error: cannot bind listener\n");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);

        let err = lifecycle
            .start_test_server("com.example.foo", "com.example.foo.test/sh.server.Runner", Some(50123))
            .unwrap_err();
        assert!(matches!(err, RigError::CommandFailed { .. }));

        let killed = f.runner.killed();
        assert_eq!(killed.len(), 1);
        assert!(killed[0].contains("am instrument"));
        assert_ne!(
            lifecycle.state("com.example.foo"),
            LifecycleState::InstrumentationRunning
        );
    }

    #[test]
    fn uninstall_returns_to_uninstalled() {
        let f = fixture(30);
        f.runner
            .expect(" install ", 0, "Success\n")
            .expect("pm list packages", 0, "package:com.example.foo\n")
            .expect("uninstall com.example.foo", 0, "Success\n");
        let mut lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        lifecycle.install(Path::new("/tmp/foo.apk")).unwrap();
        lifecycle.uninstall("com.example.foo").unwrap();
        assert_eq!(lifecycle.state("com.example.foo"), LifecycleState::Uninstalled);
    }

    #[test]
    fn apksigner_signs_an_aligned_copy_and_verifies() {
        let f = fixture(30);
        let keystore_path = f.dir.path().join("release.jks");
        std::fs::write(&keystore_path, b"keystore").unwrap();
        let keystore = KeyStore::new(&keystore_path, "pw", "release");
        f.runner
            .expect("sign --help", 0, "--ks --ks-pass --ks-key-alias --key-pass --out --v2-signing-enabled")
            .expect("-f -p 4", 0, "")
            .expect("sign --ks", 0, "")
            .expect("verify --verbose", 0, "Verifies\nVerified using v2 scheme (APK Signature Scheme v2): true\n");
        let lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);

        let verification = lifecycle
            .sign(Path::new("/tmp/app.apk"), Path::new("/tmp/app-signed.apk"), &keystore, None)
            .unwrap();
        assert!(verification.v2_signed);

        let lines = f.runner.command_lines();
        let align = lines.iter().position(|l| l.contains("-f -p 4")).unwrap();
        let sign = lines.iter().position(|l| l.contains("sign --ks")).unwrap();
        assert!(align < sign);
        assert!(lines[align].ends_with("/tmp/app.apk /tmp/app-signed.unaligned.apk"));
        assert!(lines[sign].ends_with("--out /tmp/app-signed.apk /tmp/app-signed.unaligned.apk"));
    }

    #[test]
    fn failed_verification_is_a_signing_failure() {
        let f = fixture(30);
        let keystore_path = f.dir.path().join("release.jks");
        std::fs::write(&keystore_path, b"keystore").unwrap();
        let keystore = KeyStore::new(&keystore_path, "pw", "release");
        f.runner
            .expect("sign --help", 0, "--ks --out")
            .expect("-f -p 4", 0, "")
            .expect("sign --ks", 0, "")
            .expect("verify --verbose", 1, "DOES NOT VERIFY\n");
        let lifecycle = LifecycleOrchestrator::new(&f.toolchain, &f.config);
        assert!(matches!(
            lifecycle.sign(Path::new("/tmp/app.apk"), Path::new("/tmp/out.apk"), &keystore, None),
            Err(RigError::SigningFailed(_))
        ));
    }
}
