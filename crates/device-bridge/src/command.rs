//! ADB command building
//!
//! Two layers: sub-command builders for the device-side utilities (`pm`, `am`,
//! `appops`) that reject conflicting or repeated flags, and [`AdbCommand`], which
//! renders the host-side command with its optional `-s <serial>` scope.
//!
//! Builders never look at the device SDK level. Callers decide which flags apply.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use droidrig_core::process::shell_quote;
use droidrig_core::{Invocation, Result, RigError};

/// A fully built adb command: optional device scope plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    serial: Option<String>,
    args: Vec<String>,
    /// Index in `args` where words already quoted for the device shell start
    shell_words: Option<usize>,
}

impl CommandSpec {
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Arguments after the device scope.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Every argument passed to adb, `-s <serial>` first when scoped.
    pub fn arguments(&self) -> Vec<String> {
        let mut all = Vec::with_capacity(self.args.len() + 2);
        if let Some(serial) = &self.serial {
            all.push("-s".to_string());
            all.push(serial.clone());
        }
        all.extend(self.args.iter().cloned());
        all
    }

    /// Single-space join of [`arguments`](Self::arguments), quoted where needed.
    ///
    /// Device shell words were quoted when the command was built and are kept as is.
    pub fn render(&self) -> String {
        let mut rendered: Vec<Cow<'_, str>> = Vec::with_capacity(self.args.len() + 2);
        if let Some(serial) = &self.serial {
            rendered.push(Cow::Borrowed("-s"));
            rendered.push(shell_quote(serial));
        }
        let quoted_from = self.shell_words.unwrap_or(self.args.len());
        for (index, arg) in self.args.iter().enumerate() {
            if index < quoted_from {
                rendered.push(shell_quote(arg));
            } else {
                rendered.push(Cow::Borrowed(arg.as_str()));
            }
        }
        rendered.join(" ")
    }

    pub fn invocation(&self, adb: &Path) -> Invocation {
        Invocation::new(adb).args(self.arguments())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Words of a command run by the device shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    words: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            words: vec![program.into()],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.words.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.words.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn getprop(name: &str) -> Self {
        Self::new("getprop").arg(name)
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<_> = self.words.iter().map(|w| shell_quote(w)).collect();
        f.write_str(&quoted.join(" "))
    }
}

/// APK install options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Replace existing app
    pub replace: bool,
    /// Allow version downgrade
    pub allow_downgrade: bool,
    /// Grant all runtime permissions
    pub grant_permissions: bool,
    /// Install as instant app
    pub instant: bool,
}

/// ADB command builder
#[derive(Debug, Clone, Default)]
pub struct AdbCommand {
    serial: Option<String>,
    args: Vec<String>,
    shell_words: Option<usize>,
}

impl AdbCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, serial: &str) -> Self {
        self.serial = Some(serial.to_string());
        self
    }

    /// Scope to `serial` when given, otherwise leave unscoped.
    pub fn maybe_device(mut self, serial: Option<&str>) -> Self {
        self.serial = serial.map(str::to_string);
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// `shell` followed by the device command, quoted for the device shell.
    pub fn shell(mut self, command: &ShellCommand) -> Self {
        self.args.push("shell".to_string());
        if self.shell_words.is_none() {
            self.shell_words = Some(self.args.len());
        }
        self.args
            .extend(command.words().iter().map(|w| shell_quote(w).into_owned()));
        self
    }

    pub fn build(self) -> CommandSpec {
        CommandSpec {
            serial: self.serial,
            args: self.args,
            shell_words: self.shell_words,
        }
    }

    pub fn devices() -> Self {
        Self::new().arg("devices")
    }

    pub fn install(apk: &Path, options: &InstallOptions) -> Self {
        let mut cmd = Self::new().arg("install");
        if options.replace {
            cmd = cmd.arg("-r");
        }
        if options.allow_downgrade {
            cmd = cmd.arg("-d");
        }
        if options.grant_permissions {
            cmd = cmd.arg("-g");
        }
        if options.instant {
            cmd = cmd.arg("--instant");
        }
        cmd.arg(apk.to_string_lossy())
    }

    pub fn uninstall(package: &str, keep_data: bool) -> Self {
        let cmd = Self::new().arg("uninstall");
        let cmd = if keep_data { cmd.arg("-k") } else { cmd };
        cmd.arg(package)
    }

    pub fn forward(local_port: u16, remote_port: u16) -> Self {
        Self::new()
            .arg("forward")
            .arg(format!("tcp:{}", local_port))
            .arg(format!("tcp:{}", remote_port))
    }
}

/// Records flag misuse so `build()` can report it.
#[derive(Debug, Clone, Default)]
struct Violations(Vec<String>);

impl Violations {
    fn once<T>(&mut self, slot: &mut Option<T>, value: T, flag: &str) {
        if slot.is_some() {
            self.0.push(format!("{} may only be given once", flag));
        } else {
            *slot = Some(value);
        }
    }

    fn exclusive(&mut self, a: bool, b: bool, flags: &str) {
        if a && b {
            self.0.push(format!("{} are mutually exclusive", flags));
        }
    }

    fn check(self, command: &str) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(RigError::InvalidCommand(format!("{}: {}", command, self.0.join("; "))))
        }
    }
}

/// `pm list packages` with its filters.
#[derive(Debug, Clone, Default)]
pub struct PackageList {
    show_path: bool,
    third_party: bool,
    system: bool,
    enabled: bool,
    disabled: bool,
    show_uid: bool,
    user: Option<u32>,
    filter: Option<String>,
    violations: Violations,
}

impl PackageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// `-f`: include the APK path
    pub fn with_paths(mut self) -> Self {
        self.show_path = true;
        self
    }

    /// `-3`
    pub fn third_party(mut self) -> Self {
        self.third_party = true;
        self
    }

    /// `-s`
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// `-e`
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    /// `-d`
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// `-U`
    pub fn with_uid(mut self) -> Self {
        self.show_uid = true;
        self
    }

    pub fn user(mut self, user: u32) -> Self {
        self.violations.once(&mut self.user, user, "--user");
        self
    }

    /// Only packages whose name contains `text`.
    pub fn filter(mut self, text: &str) -> Self {
        self.violations.once(&mut self.filter, text.to_string(), "package filter");
        self
    }

    pub fn build(mut self) -> Result<ShellCommand> {
        self.violations.exclusive(self.third_party, self.system, "-3 and -s");
        self.violations.exclusive(self.enabled, self.disabled, "-e and -d");
        self.violations.check("pm list packages")?;

        let mut cmd = ShellCommand::new("pm").args(["list", "packages"]);
        for (set, flag) in [
            (self.show_path, "-f"),
            (self.third_party, "-3"),
            (self.system, "-s"),
            (self.enabled, "-e"),
            (self.disabled, "-d"),
            (self.show_uid, "-U"),
        ] {
            if set {
                cmd = cmd.arg(flag);
            }
        }
        if let Some(user) = self.user {
            cmd = cmd.arg("--user").arg(user.to_string());
        }
        if let Some(filter) = self.filter {
            cmd = cmd.arg(filter);
        }
        Ok(cmd)
    }
}

/// Typed intent extra.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extra {
    String(String),
    Int(i64),
    Bool(bool),
}

/// An `am` intent specification.
#[derive(Debug, Clone, Default)]
pub struct Intent {
    action: Option<String>,
    data: Option<String>,
    mime_type: Option<String>,
    component: Option<String>,
    categories: Vec<String>,
    extras: Vec<(String, Extra)>,
    violations: Violations,
}

impl Intent {
    pub fn new() -> Self {
        Self::default()
    }

    /// `-a`, at most once
    pub fn action(mut self, action: &str) -> Self {
        self.violations.once(&mut self.action, action.to_string(), "-a (action)");
        self
    }

    /// `-d`, at most once
    pub fn data(mut self, uri: &str) -> Self {
        self.violations.once(&mut self.data, uri.to_string(), "-d (data uri)");
        self
    }

    /// `-t`, at most once
    pub fn mime_type(mut self, mime: &str) -> Self {
        self.violations.once(&mut self.mime_type, mime.to_string(), "-t (mime type)");
        self
    }

    /// `-n`, at most once
    pub fn component(mut self, component: &str) -> Self {
        self.violations.once(&mut self.component, component.to_string(), "-n (component)");
        self
    }

    /// `-c`, repeatable
    pub fn category(mut self, category: &str) -> Self {
        self.categories.push(category.to_string());
        self
    }

    pub fn extra(mut self, key: &str, value: Extra) -> Self {
        if self.extras.iter().any(|(k, _)| k == key) {
            self.violations.0.push(format!("extra '{}' may only be given once", key));
        } else {
            self.extras.push((key.to_string(), value));
        }
        self
    }

    fn words(mut self, command: &str) -> Result<Vec<String>> {
        if self.action.is_none() && self.component.is_none() && self.data.is_none() {
            self.violations
                .0
                .push("an action, data uri or component is required".into());
        }
        self.violations.check(command)?;

        let mut words = Vec::new();
        for (flag, value) in [("-a", self.action), ("-d", self.data), ("-t", self.mime_type)] {
            if let Some(value) = value {
                words.extend([flag.to_string(), value]);
            }
        }
        for category in self.categories {
            words.extend(["-c".to_string(), category]);
        }
        for (key, value) in self.extras {
            let (flag, value) = match value {
                Extra::String(v) => ("--es", v),
                Extra::Int(v) => ("--ei", v.to_string()),
                Extra::Bool(v) => ("--ez", v.to_string()),
            };
            words.extend([flag.to_string(), key, value]);
        }
        if let Some(component) = self.component {
            words.extend(["-n".to_string(), component]);
        }
        Ok(words)
    }
}

/// `am` commands.
pub struct ActivityManager;

impl ActivityManager {
    /// `am start [-W] [-S] <intent>`
    pub fn start(intent: Intent, wait: bool, force_stop: bool) -> Result<ShellCommand> {
        let mut cmd = ShellCommand::new("am").arg("start");
        if wait {
            cmd = cmd.arg("-W");
        }
        if force_stop {
            cmd = cmd.arg("-S");
        }
        Ok(cmd.args(intent.words("am start")?))
    }

    pub fn force_stop(package: &str) -> ShellCommand {
        ShellCommand::new("am").args(["force-stop", package])
    }

    pub fn instrument(component: &str) -> Instrument {
        Instrument {
            component: component.to_string(),
            wait: false,
            raw: false,
            args: Vec::new(),
            violations: Violations::default(),
        }
    }
}

/// `am instrument` builder.
#[derive(Debug, Clone)]
pub struct Instrument {
    component: String,
    wait: bool,
    raw: bool,
    args: Vec<(String, String)>,
    violations: Violations,
}

impl Instrument {
    /// `-w`: block until the instrumentation finishes
    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// `-r`: raw key=value status output
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// `-e key value`, each key at most once
    pub fn arg(mut self, key: &str, value: impl Into<String>) -> Self {
        if self.args.iter().any(|(k, _)| k == key) {
            self.violations.0.push(format!("-e {} may only be given once", key));
        } else {
            self.args.push((key.to_string(), value.into()));
        }
        self
    }

    pub fn build(mut self) -> Result<ShellCommand> {
        if !self.component.contains('/') {
            self.violations
                .0
                .push(format!("'{}' is not a package/runner component", self.component));
        }
        self.violations.check("am instrument")?;

        let mut cmd = ShellCommand::new("am").arg("instrument");
        if self.wait {
            cmd = cmd.arg("-w");
        }
        if self.raw {
            cmd = cmd.arg("-r");
        }
        for (key, value) in self.args {
            cmd = cmd.arg("-e").arg(key).arg(value);
        }
        Ok(cmd.arg(self.component))
    }
}

/// `pm` maintenance commands.
pub struct PackageManager;

impl PackageManager {
    pub fn clear(package: &str) -> ShellCommand {
        ShellCommand::new("pm").args(["clear", package])
    }

    pub fn grant(package: &str, permission: &str) -> ShellCommand {
        ShellCommand::new("pm").args(["grant", package, permission])
    }
}

/// `appops set` builder.
#[derive(Debug, Clone)]
pub struct AppOps {
    package: String,
    op: String,
    mode: String,
    uid: bool,
    user: Option<u32>,
    violations: Violations,
}

impl AppOps {
    const MODES: &'static [&'static str] = &["allow", "deny", "ignore", "default", "foreground"];

    pub fn set(package: &str, op: &str, mode: &str) -> Self {
        Self {
            package: package.to_string(),
            op: op.to_string(),
            mode: mode.to_string(),
            uid: false,
            user: None,
            violations: Violations::default(),
        }
    }

    /// `--uid`: apply to the package's uid
    pub fn for_uid(mut self) -> Self {
        self.uid = true;
        self
    }

    pub fn user(mut self, user: u32) -> Self {
        self.violations.once(&mut self.user, user, "--user");
        self
    }

    pub fn build(mut self) -> Result<ShellCommand> {
        if !Self::MODES.contains(&self.mode.as_str()) {
            self.violations.0.push(format!(
                "mode '{}' is not one of {}",
                self.mode,
                Self::MODES.join(", ")
            ));
        }
        self.violations.check("appops set")?;

        let mut cmd = ShellCommand::new("appops").arg("set");
        if self.uid {
            cmd = cmd.arg("--uid");
        }
        if let Some(user) = self.user {
            cmd = cmd.arg("--user").arg(user.to_string());
        }
        Ok(cmd.arg(self.package).arg(self.op).arg(self.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_prefix_always_comes_first() {
        let spec = AdbCommand::devices().device("emulator-5554").build();
        assert!(spec.render().starts_with("-s emulator-5554 "));
        assert_eq!(spec.render(), "-s emulator-5554 devices");

        let unscoped = AdbCommand::devices().build();
        assert_eq!(unscoped.render(), "devices");
        assert!(!unscoped.arguments().contains(&"-s".to_string()));
    }

    #[test]
    fn install_flags_in_fixed_order() {
        let options = InstallOptions {
            replace: true,
            grant_permissions: true,
            ..Default::default()
        };
        let spec = AdbCommand::install(Path::new("/tmp/app.apk"), &options)
            .device("R58M")
            .build();
        assert_eq!(spec.render(), "-s R58M install -r -g /tmp/app.apk");
    }

    #[test]
    fn shell_words_are_quoted_for_the_device() {
        let cmd = ShellCommand::new("echo").arg("hello world");
        let spec = AdbCommand::new().shell(&cmd).build();
        assert_eq!(spec.args(), &["shell", "echo", "'hello world'"]);
    }

    #[test]
    fn rendering_keeps_device_quoting_single() {
        let cmd = ShellCommand::new("echo").arg("hello world").arg("it's");
        let spec = AdbCommand::new().device("emulator 1").shell(&cmd).build();
        assert_eq!(
            spec.render(),
            r"-s 'emulator 1' shell echo 'hello world' 'it'\''s'"
        );
        assert_eq!(spec.to_string(), spec.render());
    }

    #[test]
    fn package_list_rejects_conflicting_filters() {
        let err = PackageList::new().third_party().system().build().unwrap_err();
        assert!(matches!(err, RigError::InvalidCommand(ref m) if m.contains("-3 and -s")));

        let err = PackageList::new().filter("a").filter("b").build().unwrap_err();
        assert!(matches!(err, RigError::InvalidCommand(_)));

        let cmd = PackageList::new().with_paths().third_party().filter("com.example").build().unwrap();
        assert_eq!(cmd.to_string(), "pm list packages -f -3 com.example");
    }

    #[test]
    fn intent_action_at_most_once() {
        let err = ActivityManager::start(
            Intent::new().action("android.intent.action.VIEW").action("android.intent.action.MAIN"),
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, RigError::InvalidCommand(ref m) if m.contains("-a (action)")));
    }

    #[test]
    fn intent_requires_a_target() {
        assert!(ActivityManager::start(Intent::new().category("x"), false, false).is_err());
    }

    #[test]
    fn intent_renders_flags_in_order() {
        let cmd = ActivityManager::start(
            Intent::new()
                .component("com.example/.MainActivity")
                .action("android.intent.action.MAIN")
                .category("android.intent.category.LAUNCHER")
                .extra("retries", Extra::Int(3)),
            true,
            false,
        )
        .unwrap();
        assert_eq!(
            cmd.to_string(),
            "am start -W -a android.intent.action.MAIN -c android.intent.category.LAUNCHER \
             --ei retries 3 -n com.example/.MainActivity"
        );
    }

    #[test]
    fn instrument_builds_with_extras() {
        let cmd = ActivityManager::instrument("com.example.test/sh.calaba.ClearAppData")
            .wait()
            .raw()
            .arg("target_package", "com.example")
            .build()
            .unwrap();
        assert_eq!(
            cmd.to_string(),
            "am instrument -w -r -e target_package com.example com.example.test/sh.calaba.ClearAppData"
        );
        assert!(ActivityManager::instrument("no-runner").build().is_err());
        assert!(ActivityManager::instrument("a/b").arg("k", "1").arg("k", "2").build().is_err());
    }

    #[test]
    fn appops_validates_mode() {
        let cmd = AppOps::set("com.example", "android:mock_location", "allow").build().unwrap();
        assert_eq!(cmd.to_string(), "appops set com.example android:mock_location allow");
        assert!(AppOps::set("com.example", "MANAGE_EXTERNAL_STORAGE", "yes").build().is_err());
    }
}
