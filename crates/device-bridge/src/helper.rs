//! Background helper launching
//!
//! Starts a long-running helper (an instrumentation test server, a port forwarder)
//! and judges the launch by whether the process is still alive after a short delay.
//! A helper that died complaining about its port is relaunched on a fresh ephemeral
//! port.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use droidrig_core::config::HelperConfig;
use droidrig_core::{BackgroundProcess, ExecutionPipeline, Invocation, Result, RigError, Sleeper};

/// Placeholder replaced by the chosen port in helper arguments.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// IANA dynamic port range.
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

const BIND_CONFLICT_MARKERS: &[&str] = &[
    "Address already in use",
    "EADDRINUSE",
    "BindException",
    "bind failed",
];

/// Whether helper output reports that its port was taken.
pub fn is_bind_conflict(output: &str) -> bool {
    BIND_CONFLICT_MARKERS.iter().any(|m| output.contains(m))
}

pub fn random_port() -> u16 {
    rand::rng().random_range(EPHEMERAL_PORTS)
}

/// A helper that survived its launch window.
pub struct HelperHandle {
    pub port: u16,
    pub process: Box<dyn BackgroundProcess>,
}

impl HelperHandle {
    pub fn stop(mut self) -> Result<()> {
        self.process.kill()
    }
}

impl std::fmt::Debug for HelperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperHandle").field("port", &self.port).finish_non_exhaustive()
    }
}

/// Launches background helpers with bounded port retries.
pub struct HelperLauncher {
    pipeline: ExecutionPipeline,
    sleeper: Arc<dyn Sleeper>,
    sample_delay: Duration,
    max_port_retries: u32,
    next_port: Box<dyn Fn() -> u16 + Send + Sync>,
}

impl HelperLauncher {
    pub fn new(pipeline: ExecutionPipeline, sleeper: Arc<dyn Sleeper>, config: &HelperConfig) -> Self {
        Self {
            pipeline,
            sleeper,
            sample_delay: config.sample_delay(),
            max_port_retries: config.max_port_retries,
            next_port: Box::new(random_port),
        }
    }

    /// Replace the random port source.
    pub fn with_port_source(mut self, source: impl Fn() -> u16 + Send + Sync + 'static) -> Self {
        self.next_port = Box::new(source);
        self
    }

    fn with_port(template: &Invocation, port: u16) -> Invocation {
        let port = port.to_string();
        let mut invocation = template.clone();
        for arg in &mut invocation.args {
            if arg.contains(PORT_PLACEHOLDER) {
                *arg = arg.replace(PORT_PLACEHOLDER, &port);
            }
        }
        invocation
    }

    /// Launch `template`, substituting [`PORT_PLACEHOLDER`] with `port`.
    ///
    /// Returns once the process has stayed up for the sample delay. Exiting early is
    /// a failure unless the output names a bind conflict, in which case a new random
    /// port is tried, at most `max_port_retries` times.
    pub fn launch(&self, template: &Invocation, port: u16) -> Result<HelperHandle> {
        let mut port = port;
        let mut retries = 0;

        loop {
            let invocation = Self::with_port(template, port);
            info!("Starting helper on port {}: {}", port, invocation.command_line());
            let mut process = self.pipeline.spawn(&invocation)?;

            self.sleeper.sleep(self.sample_delay);

            let Some(exit_code) = process.try_exit_code()? else {
                debug!("helper still running after {:?}", self.sample_delay);
                return Ok(HelperHandle { port, process });
            };

            let output = process.output();
            if is_bind_conflict(&output) && retries < self.max_port_retries {
                retries += 1;
                let next = (self.next_port)();
                warn!(
                    "port {} is in use, retrying on {} ({}/{})",
                    port, next, retries, self.max_port_retries
                );
                port = next;
                continue;
            }

            return Err(RigError::HelperLaunchFailed(format!(
                "`{}` exited with {} after {} port retries:\n{}",
                invocation.command_line(),
                exit_code,
                retries,
                output
            )));
        }
    }
}

impl std::fmt::Debug for HelperLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperLauncher")
            .field("sample_delay", &self.sample_delay)
            .field("max_port_retries", &self.max_port_retries)
            .finish_non_exhaustive()
    }
}
