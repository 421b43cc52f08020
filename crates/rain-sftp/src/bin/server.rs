//! SFTP Gateway Binary
//!
//! NIST 800-53: AU-2 (Audit Events), AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
//! STIG: V-222648 (Audit Records)
//! Implementation: SFTP-to-S3 gateway with JSON logging for SIEM integration
//!
//! Run with: cargo run --bin rain-sftp-server

use clap::Parser;
use rain_sftp::config::LoggingConfig;
use rain_sftp::storage::s3::S3Store;
use rain_sftp::{AuthCoordinator, Config, LogFormat, Server};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML); environment variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level filter (e.g. "info", "rain_sftp=debug")
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn load_config(args: Args) -> rain_sftp::Result<Config> {
    let mut config = match args.config {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;

    if config.debug {
        config.logging.level = "trace".to_string();
        config.logging.format = LogFormat::Text;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(file) = args.log_file {
        config.logging.file = Some(file);
    }

    Ok(config)
}

/// Directory and file name for the rolling appender; a bare file name lives
/// in the working directory
fn log_file_location(log_file: &Path) -> Option<(&Path, &OsStr)> {
    let file_name = log_file.file_name()?;
    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Some((directory, file_name))
}

/// Initialize logging with JSON support for SIEM integration
///
/// NIST 800-53 AU-9: Protection of Audit Information
/// NIST 800-53 AU-12: Audit Generation
/// STIG V-222648: Audit records must be generated
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || EnvFilter::new(logging.level.clone());

    let file_writer = logging.file.as_ref().and_then(|log_file| {
        let Some((directory, file_name)) = log_file_location(log_file) else {
            eprintln!("Warning: Log file path {} has no file name", log_file.display());
            eprintln!("Falling back to stderr logging");
            return None;
        };
        if let Err(e) = std::fs::create_dir_all(directory) {
            eprintln!("Warning: Failed to create log directory: {e}");
            eprintln!("Falling back to stderr logging");
            return None;
        }
        let appender = tracing_appender::rolling::daily(directory, file_name);
        Some(tracing_appender::non_blocking(appender))
    });

    match (file_writer, logging.format) {
        (Some((writer, guard)), LogFormat::Json) => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .init();
            Some(guard)
        }
        (Some((writer, guard)), LogFormat::Text) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .init();
            Some(guard)
        }
        (None, LogFormat::Json) => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_current_span(true)
                .with_span_list(true)
                .init();
            None
        }
        (None, LogFormat::Text) => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_guard = init_logging(&config.logging);
    let outcome = run(config).await;
    // Flush the non-blocking writer so a fatal event reaches the log file
    drop(log_guard);

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

/// Start the gateway and serve until the listener fails.
///
/// Fatal errors are logged here; the returned `Err` carries the event name.
async fn run(config: Config) -> Result<(), &'static str> {
    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting Rain SFTP gateway"
    );

    if let Err(e) = config.validate() {
        error!(
            event = "configuration_validation_failed",
            error = %e,
            "Configuration validation failed"
        );
        return Err("configuration_validation_failed");
    }

    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        port = config.port,
        storage = ?config.storage,
        host_keys = config.host_keys.len() + config.host_keys_pem.len(),
        inactivity_timeout_secs = config.inactivity_timeout_secs,
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        audit_enabled = config.logging.audit_enabled,
        "Gateway configuration"
    );

    let coordinator = match AuthCoordinator::from_config(&config).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!(event = "auth_setup_failed", error = %e, "Failed to set up authentication");
            return Err("auth_setup_failed");
        }
    };

    info!(event = "storage_connecting", "Connecting to storage service");
    let store = S3Store::new(&config.storage);
    if let Err(e) = store.check_bucket().await {
        error!(
            event = "storage_unreachable",
            bucket = %config.storage.bucket,
            error = %e,
            "Failed to connect to storage bucket"
        );
        return Err("storage_unreachable");
    }

    let server = match Server::new(&config, coordinator, Arc::new(store)) {
        Ok(server) => server,
        Err(e) => {
            error!(
                event = "server_creation_failed",
                error = %e,
                "Failed to create server"
            );
            return Err("server_creation_failed");
        }
    };

    if let Err(e) = server.run().await {
        error!(
            event = "server_error",
            error = %e,
            "Server encountered an error"
        );
        return Err("server_error");
    }

    info!(event = "server_shutdown", "SFTP gateway shutdown complete");
    Ok(())
}
