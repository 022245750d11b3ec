//! educ - dynamic DNS update client
//!
//! Command line entry point: parses arguments, sets up logging and the
//! process, then hands control to the update cycle.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use educ::config;
use educ::constants::{DEFAULT_CONFIG_PATH, PRODUCT_NAME, PRODUCT_VERSION, TLS_PORT};
use educ::daemon::Daemon;
use educ::process::{daemonize, drop_privileges, LockFile};
use educ::tls::TlsTransport;
use educ::transport::{PlainTransport, Transport};
use educ::wizard::create_config_file;

//==============================================================================
// Main
//==============================================================================

#[derive(Debug, Parser)]
#[command(name = "educ")]
#[command(version = PRODUCT_VERSION)]
#[command(about = "Dynamic DNS update client")]
struct Args {
    /// Interactively create a config file and exit
    #[arg(short = 'c', long = "create-config")]
    create_config: bool,

    /// Config file path
    #[arg(short = 'x', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging
    #[arg(short = 'D', long)]
    debug: bool,

    /// Update the host(s) once and exit
    #[arg(short = 'o', long)]
    once: bool,

    /// Detach from the terminal
    #[arg(short = 'B', long)]
    background: bool,

    /// Hold an exclusive lock on this file while running
    #[arg(short = 'L', long = "lock-file")]
    lock_file: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.create_config {
        return match create_config_file(&args.config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}: {:#}", PRODUCT_NAME, e);
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = init_logging(&args) {
        eprintln!("{}: {:#}", PRODUCT_NAME, e);
        return ExitCode::FAILURE;
    }

    let status = match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    };
    info!("{} {} has exited", PRODUCT_NAME, PRODUCT_VERSION);
    status
}

/// Installs the global subscriber
fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));

    match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Sets up the process and runs the update cycle until it ends
fn run(args: &Args) -> Result<()> {
    info!("{} {} started", PRODUCT_NAME, PRODUCT_VERSION);

    if args.background {
        daemonize(args.log_file.is_some()).context("Daemonize failed")?;
    }

    let _lock = args
        .lock_file
        .as_deref()
        .map(LockFile::acquire)
        .transpose()
        .context("Lock file failed")?;

    let settings = config::load(&args.config).context("Config load failed")?;
    settings.validate().context("Invalid configuration")?;
    drop_privileges().context("Privilege drop failed")?;

    let provider: Box<dyn Transport> = if settings.get("port") == TLS_PORT {
        Box::new(TlsTransport::new().context("TLS setup failed")?)
    } else {
        Box::new(PlainTransport)
    };
    info!(
        "provider {}:{} ({:?})",
        settings.get("sp_hostname"),
        settings.get("port"),
        provider.mode()
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Runtime setup failed")?;

    let mut daemon = Daemon::new(settings, provider, Box::new(PlainTransport), !args.once);
    runtime.block_on(daemon.run())
}
