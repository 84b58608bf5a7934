//! Test doubles for process execution and sleeping.
//!
//! Enabled for this crate's tests and, through the `test-support` feature, for the
//! tests of every crate that drives external tools.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, RigError};
use crate::process::{BackgroundProcess, ExecutionOutcome, Invocation, ProcessRunner};
use crate::retry::Sleeper;

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    exit_code: i32,
    output: String,
}

#[derive(Debug, Clone)]
struct SpawnRule {
    needle: String,
    exited: Option<i32>,
    output: String,
}

/// Answers invocations from a script keyed by substrings of the command line.
///
/// One-shot rules are consumed in the order they were added; persistent rules answer
/// whenever no one-shot rule matches.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    once: Mutex<VecDeque<Rule>>,
    always: Mutex<Vec<Rule>>,
    spawns: Mutex<VecDeque<SpawnRule>>,
    calls: Mutex<Vec<Invocation>>,
    killed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next matching invocation once.
    pub fn expect(&self, needle: &str, exit_code: i32, output: &str) -> &Self {
        self.once.lock().unwrap().push_back(Rule {
            needle: needle.to_string(),
            exit_code,
            output: output.to_string(),
        });
        self
    }

    /// Answer every matching invocation not claimed by a one-shot rule.
    pub fn always(&self, needle: &str, exit_code: i32, output: &str) -> &Self {
        self.always.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            exit_code,
            output: output.to_string(),
        });
        self
    }

    /// Script a background spawn. `exited` is `None` for a process that keeps running.
    pub fn expect_spawn(&self, needle: &str, exited: Option<i32>, output: &str) -> &Self {
        self.spawns.lock().unwrap().push_back(SpawnRule {
            needle: needle.to_string(),
            exited,
            output: output.to_string(),
        });
        self
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines of every invocation seen so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.command_line()).collect()
    }

    /// Command lines of spawned processes that were killed, in order.
    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    fn unscripted(invocation: &Invocation) -> RigError {
        RigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no scripted response for `{}`", invocation.command_line()),
        ))
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome> {
        self.calls.lock().unwrap().push(invocation.clone());
        let line = invocation.command_line();

        let mut once = self.once.lock().unwrap();
        if let Some(index) = once.iter().position(|r| line.contains(&r.needle)) {
            if let Some(rule) = once.remove(index) {
                return Ok(ExecutionOutcome::new(rule.exit_code, rule.output));
            }
        }
        drop(once);

        let always = self.always.lock().unwrap();
        always
            .iter()
            .find(|r| line.contains(&r.needle))
            .map(|r| ExecutionOutcome::new(r.exit_code, r.output.clone()))
            .ok_or_else(|| Self::unscripted(invocation))
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>> {
        self.calls.lock().unwrap().push(invocation.clone());
        let line = invocation.command_line();

        let mut spawns = self.spawns.lock().unwrap();
        let index = spawns
            .iter()
            .position(|r| line.contains(&r.needle))
            .ok_or_else(|| Self::unscripted(invocation))?;
        let rule = spawns.remove(index).ok_or_else(|| Self::unscripted(invocation))?;
        Ok(Box::new(ScriptedProcess {
            exited: rule.exited,
            output: rule.output,
            killed: false,
            command_line: line,
            kills: self.killed.clone(),
        }))
    }
}

struct ScriptedProcess {
    exited: Option<i32>,
    output: String,
    killed: bool,
    command_line: String,
    kills: Arc<Mutex<Vec<String>>>,
}

impl BackgroundProcess for ScriptedProcess {
    fn try_exit_code(&mut self) -> Result<Option<i32>> {
        if self.killed {
            return Ok(Some(crate::process::SIGNALLED_EXIT_CODE));
        }
        Ok(self.exited)
    }

    fn output(&self) -> String {
        self.output.clone()
    }

    fn kill(&mut self) -> Result<()> {
        self.killed = true;
        self.kills.lock().unwrap().push(self.command_line.clone());
        Ok(())
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}
