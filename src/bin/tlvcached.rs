//! tlvcached - standalone binary wiring [`Settings`] loading, logging, and
//! the [`Coordinator`] together behind a small CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tlvcache::{Coordinator, Result, Settings};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// tlvcached - a two-tier key/value cache with a durable L2 log.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML settings file
    #[arg(long, env = "TLVCACHE_CONFIG", default_value = "tlvcache.yaml")]
    config: PathBuf,

    /// Shutdown timeout in milliseconds, used on SIGINT/SIGTERM
    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value = "5000")]
    shutdown_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!(config = %args.config.display(), "starting tlvcached");
    let settings = Settings::from_yaml(&args.config)?;
    info!(
        strategy = %settings.strategy(),
        mem_max = settings.mem_max(),
        fs_max = settings.fs_max(),
        fs_files = settings.fs_files(),
        fs_dir = %settings.fs_dir().display(),
        "settings loaded"
    );

    let coordinator = Coordinator::create(settings);
    coordinator.start()?;
    info!("coordinator is Working");

    tokio::signal::ctrl_c().await.map_err(std::io::Error::from)?;
    info!("shutdown signal received");

    let timeout = Duration::from_millis(args.shutdown_timeout_ms);
    let completed = coordinator.shutdown(timeout);
    if completed {
        info!("coordinator stopped cleanly");
    } else {
        tracing::warn!(?timeout, "coordinator shutdown timed out");
    }

    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
