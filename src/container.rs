//! Capability container
//!
//! Lifecycle operations ask for the capabilities they use (SDK tools, JDK tools,
//! process execution) through small traits. [`Toolchain`] implements all of them and
//! resolves each tool set once.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use droidrig_android_toolchain::{
    AndroidSdkTools, HostEnvironment, JdkTools, SystemHost, ToolEnvironment, ToolSet, ToolchainLocator,
};
use droidrig_core::config::{ENV_JDK_HINT, ENV_SDK_HINT};
use droidrig_core::{
    ExecutionPipeline, ProcessRunner, Result, RigConfig, Sleeper, SystemRunner, ThreadSleeper,
};

/// Provides the Android SDK executables.
pub trait SdkToolsProvider {
    fn sdk_tools(&self) -> Result<&AndroidSdkTools>;
}

/// Provides the JDK executables.
pub trait JdkToolsProvider {
    fn jdk_tools(&self) -> Result<&JdkTools>;
}

/// Provides process execution.
pub trait ProcessProvider {
    fn pipeline(&self) -> ExecutionPipeline;
    fn sleeper(&self) -> Arc<dyn Sleeper>;
    /// Variables every tool child process gets.
    fn child_env(&self) -> Vec<(String, String)>;
}

/// Configuration, host probing and cached tool sets.
pub struct Toolchain {
    config: RigConfig,
    host: Box<dyn HostEnvironment + Send + Sync>,
    pipeline: ExecutionPipeline,
    sleeper: Arc<dyn Sleeper>,
    sdk: OnceCell<AndroidSdkTools>,
    jdk: OnceCell<JdkTools>,
}

impl Toolchain {
    pub fn new(config: RigConfig) -> Self {
        let runner = match config.adb.command_timeout() {
            Some(timeout) => SystemRunner::with_timeout(timeout),
            None => SystemRunner::new(),
        };
        Self {
            config,
            host: Box::new(SystemHost),
            pipeline: ExecutionPipeline::new(Arc::new(runner)),
            sleeper: Arc::new(ThreadSleeper),
            sdk: OnceCell::new(),
            jdk: OnceCell::new(),
        }
    }

    pub fn with_host(mut self, host: impl HostEnvironment + Send + Sync + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.pipeline = ExecutionPipeline::new(runner);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    fn locator(&self) -> ToolchainLocator {
        ToolchainLocator::from_config(&self.config.toolchain)
    }

    /// Hints for child processes that run droidrig themselves, so they skip discovery.
    pub fn hint_vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if let Some(sdk) = self.sdk.get() {
            vars.push((ENV_SDK_HINT.to_string(), sdk.root().to_string_lossy().to_string()));
        }
        if let Some(jdk) = self.jdk.get() {
            vars.push((ENV_JDK_HINT.to_string(), jdk.root().to_string_lossy().to_string()));
        }
        vars
    }
}

impl SdkToolsProvider for Toolchain {
    fn sdk_tools(&self) -> Result<&AndroidSdkTools> {
        self.sdk.get_or_try_init(|| {
            let tools = self
                .locator()
                .locate_android_sdk(self.host.as_ref(), &self.config.toolchain)?;
            info!("Android SDK: {:?} ({})", tools.root(), tools.provenance());
            Ok(tools)
        })
    }
}

impl JdkToolsProvider for Toolchain {
    fn jdk_tools(&self) -> Result<&JdkTools> {
        self.jdk.get_or_try_init(|| {
            let tools = self.locator().locate_jdk(self.host.as_ref(), &self.config.toolchain)?;
            info!("JDK: {:?} ({})", tools.root(), tools.provenance());
            Ok(tools)
        })
    }
}

impl ProcessProvider for Toolchain {
    fn pipeline(&self) -> ExecutionPipeline {
        self.pipeline.clone()
    }

    fn sleeper(&self) -> Arc<dyn Sleeper> {
        self.sleeper.clone()
    }

    fn child_env(&self) -> Vec<(String, String)> {
        let mut vars = ToolEnvironment::from_tools(self.sdk.get(), self.jdk.get()).vars();
        vars.extend(self.hint_vars());
        debug!("child environment: {} variable(s)", vars.len());
        vars
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain")
            .field("config", &self.config)
            .field("sdk", &self.sdk.get())
            .field("jdk", &self.jdk.get())
            .finish_non_exhaustive()
    }
}
