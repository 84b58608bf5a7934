//! droidrig - Android toolchain and APK lifecycle CLI

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use droidrig::commands::{
    parse_store_type, ClearDataCommand, DevicesCommand, FingerprintCommand, InstallCommand,
    KeystoreArgs, LocateCommand, ManifestCommand, SignCommand, StartServerCommand, UninstallCommand,
    VerifyCommand,
};
use droidrig::core::{RigConfig, RigError, VERSION};
use droidrig::signing::KeyStoreType;
use droidrig::Toolchain;

#[derive(Parser)]
#[command(name = "droidrig")]
#[command(author, version, about = "Android toolchain discovery and APK lifecycle driver")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Device serial to target
    #[arg(short, long, global = true, env = "DROIDRIG_SERIAL")]
    serial: Option<String>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct KeystoreOpts {
    /// Keystore file (the SDK debug keystore when omitted)
    #[arg(long = "keystore")]
    path: Option<PathBuf>,
    /// Keystore password
    #[arg(long, env = "DROIDRIG_STOREPASS")]
    storepass: Option<String>,
    /// Key alias
    #[arg(long)]
    alias: Option<String>,
    /// Key password, when different from the keystore password
    #[arg(long, env = "DROIDRIG_KEYPASS")]
    keypass: Option<String>,
    /// Keystore type: jks or pkcs12
    #[arg(long, value_parser = parse_store_type)]
    storetype: Option<KeyStoreType>,
}

impl From<KeystoreOpts> for KeystoreArgs {
    fn from(opts: KeystoreOpts) -> Self {
        KeystoreArgs {
            path: opts.path,
            password: opts.storepass,
            alias: opts.alias,
            key_password: opts.keypass,
            store_type: opts.storetype,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the Android SDK and JDK in use
    Locate {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List connected devices
    Devices,
    /// Install an APK and allow its post-install app-ops
    Install {
        apk: PathBuf,
        /// Skip the mock location and storage app-ops
        #[arg(long)]
        skip_permissions: bool,
    },
    /// Uninstall a package
    Uninstall { package: String },
    /// Clear a package's data
    #[command(name = "clear-data")]
    ClearData {
        package: String,
        /// Instrumentation component (package/class) that clears the data
        #[arg(long)]
        test_server: Option<String>,
    },
    /// Start a test server instrumentation in the background
    #[command(name = "start-server")]
    StartServer {
        /// Package under test
        package: String,
        /// Instrumentation component (package/runner)
        component: String,
        /// Port to try first (random ephemeral port otherwise)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Align, sign and verify an APK
    Sign {
        input: PathBuf,
        /// Output file (defaults to <input>.signed.apk)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Minimum SDK level to sign for
        #[arg(long)]
        min_sdk: Option<u32>,
        #[command(flatten)]
        keystore: KeystoreOpts,
    },
    /// Verify an APK signature
    Verify { apk: PathBuf },
    /// Show a keystore entry's certificate fingerprints
    Fingerprint {
        #[command(flatten)]
        keystore: KeystoreOpts,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print an APK's manifest facts as JSON
    Manifest { apk: PathBuf },
}

fn init_logging(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<RigConfig> {
    let config = match path {
        Some(path) => RigConfig::load_from(path)?,
        None => RigConfig::load()?,
    };
    Ok(config.with_process_env())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    debug!("droidrig v{} with {:?}", VERSION, config);
    let toolchain = Toolchain::new(config);
    let serial = cli.serial;

    match cli.command {
        Commands::Locate { json } => LocateCommand { json }.execute(&toolchain),
        Commands::Devices => DevicesCommand.execute(&toolchain),
        Commands::Install {
            apk,
            skip_permissions,
        } => InstallCommand {
            apk,
            serial,
            skip_permissions,
        }
        .execute(&toolchain),
        Commands::Uninstall { package } => UninstallCommand { package, serial }.execute(&toolchain),
        Commands::ClearData {
            package,
            test_server,
        } => ClearDataCommand {
            package,
            test_server,
            serial,
        }
        .execute(&toolchain),
        Commands::StartServer {
            package,
            component,
            port,
        } => StartServerCommand {
            package,
            component,
            port,
            serial,
        }
        .execute(&toolchain),
        Commands::Sign {
            input,
            output,
            min_sdk,
            keystore,
        } => SignCommand {
            input,
            output,
            keystore: keystore.into(),
            min_sdk,
        }
        .execute(&toolchain),
        Commands::Verify { apk } => VerifyCommand { apk }.execute(&toolchain),
        Commands::Fingerprint { keystore, json } => FingerprintCommand {
            keystore: keystore.into(),
            json,
        }
        .execute(&toolchain),
        Commands::Manifest { apk } => ManifestCommand { apk }.execute(&toolchain),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        match err.downcast_ref::<RigError>() {
            Some(rig) => error!("{}", rig.user_message()),
            None => error!("{:#}", err),
        }
        std::process::exit(1);
    }
}
