use anyhow::{bail, Context, Result};
use log::{info, LevelFilter};
use marlowe::config::Config;
use marlowe::engine::Engine;
use marlowe::error::Error;
use marlowe::cli;
use simplelog::{Config as LogConfig, WriteLogger};
use std::fs::{self, File};
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {:#}", err);
        if needs_root_hint(&err) {
            eprintln!("Try running as root.");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let matches = cli::build_cli().get_matches();

    // Logging is opt-in, to keep stdout clean for the observers.
    if let Some(level) = matches.get_one::<String>("log-level") {
        let level: LevelFilter = level
            .parse()
            .with_context(|| format!("invalid log level '{}'", level))?;
        setup_logging(level)?;
    }

    let config = Config::from_matches(&matches)?;
    info!("starting marlowe ({})", config.ip_version);

    let engine = Engine::new(config);
    match matches.subcommand() {
        Some(("traffic", _)) => engine.run_traffic(),
        Some(("procs", _)) => engine.run_procs(),
        Some(("connections", _)) => engine.run_connections(),
        Some(("watch", _)) => engine.run_watch(),
        Some((other, _)) => bail!("unknown subcommand '{}'", other),
        None => bail!("a subcommand is required"),
    }
}

/// Capture and audit devices are root-only on the supported hosts;
/// point at the likely fix instead of a bare errno.
fn needs_root_hint(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<Error>() {
        Some(Error::DeviceUnavailable { .. }) => true,
        Some(typed) => typed.is_permission_denied(),
        None => false,
    }
}

fn setup_logging(level: LevelFilter) -> Result<()> {
    let log_dir = Path::new("logs");
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let log_file_path = log_dir.join(format!("marlowe_{}.log", timestamp));

    WriteLogger::init(level, LogConfig::default(), File::create(log_file_path)?)?;
    Ok(())
}
