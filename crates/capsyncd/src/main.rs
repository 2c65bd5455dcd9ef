//! capsyncd - capability sync daemon
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;

use capsync_core::Config;
use capsyncd::logging::{self, LogOptions};
use capsyncd::Daemon;
use clap::{ArgAction, Parser};
use eyre::WrapErr;
use tracing::info;

#[derive(Parser)]
#[command(name = "capsyncd", about = "Capability sync daemon", version)]
struct Cli {
    /// Config file (key=value)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Namespace to discover definitions in (empty: all namespaces)
    #[arg(long)]
    namespace: Option<String>,

    /// Label selector for definitions
    #[arg(long)]
    selector: Option<String>,

    /// Directory capability templates are written to
    #[arg(long)]
    sync_dir: Option<PathBuf>,

    /// Directory of definition manifests
    #[arg(long)]
    definitions_dir: Option<PathBuf>,

    /// The log file path
    #[arg(long)]
    log_file_path: Option<PathBuf>,

    /// The number of days of logs history to retain (0: keep all)
    #[arg(long = "log-retain-date")]
    log_retain_days: Option<u32>,

    /// Log file size in megabytes that triggers rotation (0: never)
    #[arg(long = "log-max-size")]
    log_max_size_mb: Option<u64>,

    /// Enable compression on the rotated logs
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    log_compress: Option<bool>,

    /// Development mode
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    development: Option<bool>,

    /// Auth token for the HTTP API
    #[arg(long, env = "CAPSYNC_AUTH_TOKEN")]
    auth_token: Option<String>,
}

impl Cli {
    /// CLI flags > config file > defaults.
    fn into_config(self) -> eyre::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if let Some(selector) = self.selector {
            config.selector = selector;
        }
        if let Some(sync_dir) = self.sync_dir {
            config.sync_dir = sync_dir;
        }
        if let Some(definitions_dir) = self.definitions_dir {
            config.definitions_dir = definitions_dir;
        }
        if let Some(log_file_path) = self.log_file_path {
            config.log_file_path = Some(log_file_path);
        }
        if let Some(days) = self.log_retain_days {
            config.log_retain_days = days;
        }
        if let Some(size) = self.log_max_size_mb {
            config.log_max_size_mb = size;
        }
        if let Some(compress) = self.log_compress {
            config.log_compress = compress;
        }
        if let Some(development) = self.development {
            config.development = development;
        }
        if let Some(token) = self.auth_token {
            config.auth_token = Some(token);
        }
        let cwd = std::env::current_dir().wrap_err("failed to resolve working directory")?;
        config.resolve_paths(&cwd);
        Ok(config)
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("capsyncd: {e:?}");
        std::process::exit(1);
    }
}

fn run() -> eyre::Result<()> {
    let config = Cli::parse().into_config()?;

    logging::init(&LogOptions {
        file_path: config.log_file_path.clone(),
        retain_days: config.log_retain_days,
        max_size_bytes: config.log_max_size_mb.saturating_mul(1024 * 1024),
        compress: config.log_compress,
        development: config.development,
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create tokio runtime")?;

    runtime.block_on(async {
        // Handlers go in before the socket is bound so an early signal still drains.
        let mut signals = Signals::register()?;
        let daemon = Daemon::new(config)?;
        daemon.launch().await?;

        let signal = signals.recv().await;
        info!("received {signal}, initiating graceful shutdown");
        let outcome = daemon.shutdown().await;
        info!(outcome = ?outcome, "capsyncd exiting");
        Ok(())
    })
}

/// Termination signals, registered up front.
struct Signals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl Signals {
    fn register() -> eyre::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                sigterm: signal(SignalKind::terminate())
                    .wrap_err("failed to register SIGTERM handler")?,
                sigint: signal(SignalKind::interrupt())
                    .wrap_err("failed to register SIGINT handler")?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Block until the process is asked to terminate.
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigterm.recv() => "SIGTERM",
                _ = self.sigint.recv() => "SIGINT",
            }
        }

        #[cfg(not(unix))]
        {
            // ctrl_c only fails when no handler can be installed; treat that
            // as a request to stop.
            let _ = tokio::signal::ctrl_c().await;
            "ctrl-c"
        }
    }
}
