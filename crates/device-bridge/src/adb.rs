//! ADB (Android Debug Bridge) Client
//!
//! Communicates with devices via the `adb` binary of the located SDK. Device
//! enumeration tolerates a daemon that is still starting; everything else fails fast.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, warn};

use droidrig_core::{
    BackoffPolicy, ExecutionOutcome, ExecutionPipeline, Result, RigError, Sleeper, ThreadSleeper,
};

use crate::command::{AdbCommand, CommandSpec, InstallOptions, PackageList, ShellCommand};
use crate::device::{parse_devices, select_device, Device};
use crate::packages::{parse_packages, parse_sdk_level, InstalledPackage};

/// Output fragments that mean the adb daemon is not ready yet.
const TRANSIENT_MARKERS: &[&str] = &[
    "daemon not running",
    "daemon started successfully",
    "cannot connect to daemon",
    "protocol fault",
];

/// Exit code adb uses while its daemon is still coming up.
const TRANSIENT_EXIT_CODE: i32 = 1;

fn incompatibility_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"adb server (?:version \((?P<server>\d+)\) doesn't match this client \((?P<client>\d+)\)|is out of date)",
        )
        .expect("static regex")
    })
}

/// Whether adb output reports a daemon that is not ready.
pub fn is_transient(output: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|m| output.contains(m))
}

/// ADB Client
pub struct AdbClient {
    adb: PathBuf,
    pipeline: ExecutionPipeline,
    backoff: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
    env: Vec<(String, String)>,
}

impl AdbClient {
    /// Create a new ADB client
    pub fn new(adb: impl Into<PathBuf>, pipeline: ExecutionPipeline) -> Self {
        Self {
            adb: adb.into(),
            pipeline,
            backoff: BackoffPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            env: Vec::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.backoff = backoff;
        self.sleeper = sleeper;
        self
    }

    /// Extra environment for every adb child process.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    pub fn pipeline(&self) -> &ExecutionPipeline {
        &self.pipeline
    }

    /// Run a built command, requiring exit code 0.
    pub fn run(&self, spec: &CommandSpec) -> Result<ExecutionOutcome> {
        self.run_allowing(spec, &[0])
    }

    pub fn run_allowing(&self, spec: &CommandSpec, allowed: &[i32]) -> Result<ExecutionOutcome> {
        let invocation = spec.invocation(&self.adb).envs(&self.env);
        self.pipeline.run_allowing(&invocation, allowed)
    }

    /// `adb devices -l`, retried while the daemon starts.
    ///
    /// Each throttled attempt also accepts exit code 1. A client/server version
    /// mismatch is reported at once. After the last throttled attempt one plain
    /// attempt runs and its result is returned as is.
    pub fn device_listing(&self) -> Result<ExecutionOutcome> {
        let spec = AdbCommand::devices().arg("-l").build();

        for attempt in 0..self.backoff.max_attempts {
            let outcome = self.compatible(self.run_allowing(&spec, &[0, TRANSIENT_EXIT_CODE]))?;

            if outcome.exit_code == 0 && !is_transient(&outcome.output) {
                return Ok(outcome);
            }

            let delay = self.backoff.delay(attempt);
            warn!(
                "adb daemon not ready (attempt {}/{}), retrying in {}s",
                attempt + 1,
                self.backoff.max_attempts,
                delay.as_secs()
            );
            self.sleeper.sleep(delay);
        }

        info!("adb still not ready, making a final attempt");
        self.compatible(self.run(&spec))
    }

    /// A version mismatch wins over whatever exit code came with it.
    fn compatible(&self, result: Result<ExecutionOutcome>) -> Result<ExecutionOutcome> {
        let output = match &result {
            Ok(outcome) => Some(outcome.output.as_str()),
            Err(RigError::CommandFailed { output, .. }) => Some(output.as_str()),
            Err(_) => None,
        };
        if let Some(output) = output {
            self.check_compatibility(output)?;
        }
        result
    }

    /// List attached devices.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let outcome = self.device_listing()?;
        let devices = parse_devices(&outcome.output);
        debug!("{} device(s) attached", devices.len());
        Ok(devices)
    }

    /// Resolve the device to target: the given serial, or the only online device.
    pub fn resolve_device(&self, serial: Option<&str>) -> Result<Device> {
        let devices = self.devices()?;
        select_device(&devices, serial).cloned()
    }

    fn check_compatibility(&self, output: &str) -> Result<()> {
        let Some(caps) = incompatibility_marker().captures(output) else {
            return Ok(());
        };
        let versions = match (caps.name("server"), caps.name("client")) {
            (Some(server), Some(client)) => format!(
                "server version {} does not match client version {}",
                server.as_str(),
                client.as_str()
            ),
            _ => "the running adb server is out of date".to_string(),
        };
        let on_path = match which::which("adb") {
            Ok(path) if path == self.adb => format!("{} (same binary)", path.display()),
            Ok(path) => path.display().to_string(),
            Err(_) => "none".to_string(),
        };
        Err(RigError::VersionIncompatible(format!(
            "{}. This session uses {}; adb on PATH is {}. Another adb (from a different SDK or \
             tool bundle) started the running server: stop it or point ANDROID_HOME at the SDK it \
             belongs to, then kill the server with `adb kill-server`.",
            versions,
            self.adb.display(),
            on_path
        )))
    }

    /// Run a device shell command and return its output.
    pub fn shell(&self, serial: Option<&str>, command: &ShellCommand) -> Result<String> {
        let spec = AdbCommand::new().maybe_device(serial).shell(command).build();
        Ok(self.run(&spec)?.output)
    }

    /// API level of the device.
    pub fn sdk_level(&self, serial: Option<&str>) -> Result<u32> {
        let output = self.shell(serial, &ShellCommand::getprop("ro.build.version.sdk"))?;
        parse_sdk_level(&output)
    }

    /// Installed packages plus the raw listing.
    pub fn list_packages(
        &self,
        serial: Option<&str>,
        listing: PackageList,
    ) -> Result<(Vec<InstalledPackage>, String)> {
        let output = self.shell(serial, &listing.build()?)?;
        let packages = parse_packages(&output)?;
        Ok((packages, output))
    }

    pub fn install(
        &self,
        serial: Option<&str>,
        apk: &Path,
        options: &InstallOptions,
    ) -> Result<ExecutionOutcome> {
        info!("Installing {:?}", apk);
        let spec = AdbCommand::install(apk, options).maybe_device(serial).build();
        self.run(&spec)
    }

    pub fn uninstall(&self, serial: Option<&str>, package: &str) -> Result<ExecutionOutcome> {
        info!("Uninstalling {}", package);
        let spec = AdbCommand::uninstall(package, false).maybe_device(serial).build();
        self.run(&spec)
    }

    pub fn forward(&self, serial: Option<&str>, local_port: u16, remote_port: u16) -> Result<()> {
        let spec = AdbCommand::forward(local_port, remote_port)
            .maybe_device(serial)
            .build();
        self.run(&spec)?;
        Ok(())
    }
}

impl std::fmt::Debug for AdbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbClient")
            .field("adb", &self.adb)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidrig_core::testing::{RecordingSleeper, ScriptedRunner};
    use std::time::Duration;

    fn client(runner: &Arc<ScriptedRunner>, sleeper: &Arc<RecordingSleeper>) -> AdbClient {
        AdbClient::new("/sdk/platform-tools/adb", ExecutionPipeline::new(runner.clone()))
            .with_backoff(BackoffPolicy::default(), sleeper.clone())
    }

    const READY: &str = "List of devices attached\nemulator-5554\tdevice product:sdk model:Pixel_7\n";

    #[test]
    fn ready_daemon_needs_one_call() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.expect("devices -l", 0, READY);
        let sleeper = Arc::new(RecordingSleeper::new());

        let devices = client(&runner, &sleeper).devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(runner.calls().len(), 1);
        assert!(sleeper.slept().is_empty());
    }

    #[test]
    fn transient_daemon_is_retried_with_linear_backoff() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .expect("devices -l", 1, "* daemon not running; starting now at tcp:5037\n")
            .expect("devices -l", 0, "* daemon started successfully\nList of devices attached\n")
            .expect("devices -l", 0, READY);
        let sleeper = Arc::new(RecordingSleeper::new());

        let devices = client(&runner, &sleeper).devices().unwrap();
        assert_eq!(devices[0].serial, "emulator-5554");
        assert_eq!(
            sleeper.slept(),
            vec![Duration::from_secs(3), Duration::from_secs(5)]
        );
    }

    #[test]
    fn exhausted_retries_surface_the_final_attempt() {
        let runner = Arc::new(ScriptedRunner::new());
        for _ in 0..3 {
            runner.expect("devices -l", 1, "cannot connect to daemon");
        }
        runner.expect("devices -l", 1, "cannot connect to daemon at tcp:5037");
        let sleeper = Arc::new(RecordingSleeper::new());

        let err = client(&runner, &sleeper).devices().unwrap_err();
        match err {
            RigError::CommandFailed { exit_code, output, .. } => {
                assert_eq!(exit_code, 1);
                assert!(output.contains("tcp:5037"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.calls().len(), 4);
        assert_eq!(sleeper.slept().len(), 3);
    }

    #[test]
    fn version_mismatch_is_not_retried() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.expect(
            "devices -l",
            0,
            "adb server version (40) doesn't match this client (41); killing...\n\
             * daemon started successfully\nList of devices attached\n",
        );
        let sleeper = Arc::new(RecordingSleeper::new());

        let err = client(&runner, &sleeper).devices().unwrap_err();
        match err {
            RigError::VersionIncompatible(message) => {
                assert!(message.contains("/sdk/platform-tools/adb"));
                assert!(message.contains("server version 40"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.calls().len(), 1);
        assert!(sleeper.slept().is_empty());
    }

    #[test]
    fn version_mismatch_is_reported_whatever_the_exit_code() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.expect(
            "devices -l",
            255,
            "adb server version (39) doesn't match this client (41); killing...\n\
             error: could not install *smartsocket* listener\n",
        );
        let sleeper = Arc::new(RecordingSleeper::new());

        let err = client(&runner, &sleeper).devices().unwrap_err();
        assert!(matches!(err, RigError::VersionIncompatible(ref m) if m.contains("server version 39")));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn version_mismatch_on_the_final_attempt_is_reported() {
        let runner = Arc::new(ScriptedRunner::new());
        for _ in 0..3 {
            runner.expect("devices -l", 1, "cannot connect to daemon");
        }
        runner.expect("devices -l", 1, "adb server is out of date.  killing...\n");
        let sleeper = Arc::new(RecordingSleeper::new());

        let err = client(&runner, &sleeper).devices().unwrap_err();
        assert!(matches!(err, RigError::VersionIncompatible(ref m) if m.contains("out of date")));
        assert_eq!(runner.calls().len(), 4);
    }

    #[test]
    fn unexpected_exit_code_fails_immediately() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.expect("devices -l", 255, "adb: usage");
        let sleeper = Arc::new(RecordingSleeper::new());

        assert!(matches!(
            client(&runner, &sleeper).devices(),
            Err(RigError::CommandFailed { exit_code: 255, .. })
        ));
    }

    #[test]
    fn shell_commands_are_scoped() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.expect("-s emulator-5554 shell getprop ro.build.version.sdk", 0, "34\n");
        let sleeper = Arc::new(RecordingSleeper::new());

        assert_eq!(client(&runner, &sleeper).sdk_level(Some("emulator-5554")).unwrap(), 34);
        assert_eq!(runner.calls()[0].args[0], "-s");
    }

    #[test]
    fn package_listing_keeps_raw_text() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.expect("pm list packages -f", 0, "package:/data/app/Foo-1.apk=com.example.foo\n");
        let sleeper = Arc::new(RecordingSleeper::new());

        let (packages, raw) = client(&runner, &sleeper)
            .list_packages(None, PackageList::new().with_paths())
            .unwrap();
        assert_eq!(packages[0].package_name, "com.example.foo");
        assert!(raw.contains("Foo-1.apk"));
    }
}
