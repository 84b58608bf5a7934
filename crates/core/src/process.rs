//! External process execution
//!
//! Every tool invocation in droidrig goes through [`ProcessRunner`]. The runner only
//! reports what happened; [`ExecutionPipeline`] decides which exit codes count as
//! failure and turns the rest into [`RigError::CommandFailed`].

use std::borrow::Cow;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, RigError};

/// Exit code reported when a process was terminated by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Quote a single argument for a POSIX shell, leaving plain tokens untouched.
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '+' | '@' | '%')
        });
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

/// A program plus its arguments and any extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: &[(String, String)]) -> Self {
        self.env.extend(vars.iter().cloned());
        self
    }

    /// Arguments rendered as one space-joined, shell-quoted string.
    pub fn argument_string(&self) -> String {
        self.args
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Program and arguments as a copy-pasteable command line.
    pub fn command_line(&self) -> String {
        let program = self.program.to_string_lossy();
        if self.args.is_empty() {
            shell_quote(&program).into_owned()
        } else {
            format!("{} {}", shell_quote(&program), self.argument_string())
        }
    }

    /// File name of the program, for messages.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }
}

/// Raw result of one external process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    /// stdout followed by stderr
    pub output: String,
    pub succeeded: bool,
}

impl ExecutionOutcome {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            succeeded: exit_code == 0,
        }
    }
}

/// A process started in the background and left running.
pub trait BackgroundProcess: Send {
    /// Exit code if the process has already finished.
    fn try_exit_code(&mut self) -> Result<Option<i32>>;

    /// Output captured so far.
    fn output(&self) -> String;

    fn kill(&mut self) -> Result<()>;
}

/// Runs external programs.
pub trait ProcessRunner: Send + Sync {
    /// Run to completion.
    fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome>;

    /// Start without waiting for completion.
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>>;
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

fn drain<R: Read + Send + 'static>(mut reader: R, sink: SharedBuffer) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => {
                    let mut buffer = sink.lock().unwrap_or_else(|p| p.into_inner());
                    buffer.extend_from_slice(&temp[..count]);
                }
                Err(_) => break,
            }
        }
    })
}

fn read_buffer(buffer: &SharedBuffer) -> String {
    let bytes = buffer.lock().unwrap_or_else(|p| p.into_inner());
    String::from_utf8_lossy(&bytes).to_string()
}

/// Captured stdout/stderr of a spawned child.
struct Capture {
    stdout: SharedBuffer,
    stderr: SharedBuffer,
    handles: Vec<JoinHandle<()>>,
}

impl Capture {
    fn attach(child: &mut Child) -> Self {
        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        let mut handles = Vec::new();
        if let Some(out) = child.stdout.take() {
            handles.push(drain(out, stdout.clone()));
        }
        if let Some(err) = child.stderr.take() {
            handles.push(drain(err, stderr.clone()));
        }
        Self {
            stdout,
            stderr,
            handles,
        }
    }

    fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn combined(&self) -> String {
        let mut text = read_buffer(&self.stdout);
        let err = read_buffer(&self.stderr);
        if !err.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&err);
        }
        text
    }
}

/// Runs programs with `std::process`, draining both pipes concurrently.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill processes that run longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        command
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome> {
        let mut child = Self::command(invocation).spawn()?;
        let mut capture = Capture::attach(&mut child);

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    capture.join();
                    return Err(RigError::Timeout(format!(
                        "{} did not finish within {:?}",
                        invocation.command_line(),
                        timeout
                    )));
                }
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        capture.join();
        Ok(ExecutionOutcome::new(
            status.code().unwrap_or(SIGNALLED_EXIT_CODE),
            capture.combined(),
        ))
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>> {
        let mut child = Self::command(invocation).spawn()?;
        let capture = Capture::attach(&mut child);
        Ok(Box::new(SystemBackgroundProcess { child, capture }))
    }
}

struct SystemBackgroundProcess {
    child: Child,
    capture: Capture,
}

impl BackgroundProcess for SystemBackgroundProcess {
    fn try_exit_code(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait()? {
            Some(status) => {
                self.capture.join();
                Ok(Some(status.code().unwrap_or(SIGNALLED_EXIT_CODE)))
            }
            None => Ok(None),
        }
    }

    fn output(&self) -> String {
        self.capture.combined()
    }

    fn kill(&mut self) -> Result<()> {
        self.child.kill()?;
        let _ = self.child.wait();
        self.capture.join();
        Ok(())
    }
}

/// Applies the allowed-exit-code contract on top of a runner.
#[derive(Clone)]
pub struct ExecutionPipeline {
    runner: Arc<dyn ProcessRunner>,
}

impl ExecutionPipeline {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    /// Run and require exit code 0.
    pub fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome> {
        self.run_allowing(invocation, &[0])
    }

    /// Run and fail with [`RigError::CommandFailed`] unless the exit code is in `allowed`.
    pub fn run_allowing(&self, invocation: &Invocation, allowed: &[i32]) -> Result<ExecutionOutcome> {
        debug!("exec: {}", invocation.command_line());
        let outcome = self.runner.run(invocation)?;
        debug!("exit {} ({} bytes of output)", outcome.exit_code, outcome.output.len());

        if allowed.contains(&outcome.exit_code) {
            Ok(outcome)
        } else {
            Err(RigError::CommandFailed {
                tool: invocation.program.display().to_string(),
                args: invocation.argument_string(),
                exit_code: outcome.exit_code,
                output: outcome.output,
            })
        }
    }

    /// Start a process in the background.
    pub fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>> {
        debug!("spawn: {}", invocation.command_line());
        self.runner.spawn(invocation)
    }
}

impl std::fmt::Debug for ExecutionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPipeline").finish_non_exhaustive()
    }
}
