//! CLI entry point for otf-reader.
//!
//! Watches a folder and publishes every record of every new or changed
//! file to a NATS topic.
//!
//! # Usage
//!
//! ```bash
//! otf-reader [OPTIONS] --topic <TOPIC>
//!
//! # Publish CSV files dropped into ./in
//! otf-reader --topic otf.raw --folder ./in --suffix .csv
//!
//! # Settings from a JSON file, overridden by flags and OTF_READER_* variables
//! otf-reader --config reader.json --nats-host broker.local
//!
//! # Show the effective configuration, then log envelopes instead of sending
//! otf-reader --config reader.json --print-config --dry-run
//! ```
//!
//! Settings resolve as flag, then environment variable, then config file,
//! then built-in default.

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::{WrapErr, eyre};
use otf_core::{ReaderConfig, ReaderSettings};
use otf_reader::{Broker, MemoryBroker, Reader, RunningReader, ShutdownReason};
use otf_watcher::{filter_for, watched_files};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watches a folder and publishes CSV or JSON records to a NATS topic.
///
/// Each record is wrapped in an envelope carrying the original record and
/// the reader's metadata.
#[derive(Debug, Parser)]
#[command(name = "otf-reader", version, about, long_about = None)]
struct Cli {
    /// JSON config file with camelCase setting names.
    #[arg(long, env = "OTF_READER_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Name for this reader; generated when blank.
    #[arg(long, env = "OTF_READER_NAME")]
    name: Option<String>,

    /// Id for this reader; generated when blank.
    #[arg(long, env = "OTF_READER_ID")]
    id: Option<String>,

    /// Name of the product or system supplying the data.
    #[arg(long, env = "OTF_READER_PROVIDER")]
    provider: Option<String>,

    /// Format of input data, one of csv|json.
    #[arg(long, alias = "inputFormat", env = "OTF_READER_INPUT_FORMAT")]
    input_format: Option<String>,

    /// Method used to align input data, one of prescribed|mapped|inferred.
    #[arg(long, alias = "alignMethod", env = "OTF_READER_ALIGN_METHOD")]
    align_method: Option<String>,

    /// Method used to level input data, one of prescribed|mapped|rules.
    #[arg(long, alias = "levelMethod", env = "OTF_READER_LEVEL_METHOD")]
    level_method: Option<String>,

    /// Capability the data relates to, one of literacy|numeracy.
    #[arg(long, env = "OTF_READER_CAPABILITY")]
    capability: Option<String>,

    /// Hostname or IP of the NATS broker.
    #[arg(long, alias = "natsHost", env = "OTF_READER_NATS_HOST")]
    nats_host: Option<String>,

    /// Port of the NATS broker.
    #[arg(long, alias = "natsPort", env = "OTF_READER_NATS_PORT")]
    nats_port: Option<u16>,

    /// Cluster id of the NATS broker.
    #[arg(long, alias = "natsCluster", env = "OTF_READER_NATS_CLUSTER")]
    nats_cluster: Option<String>,

    /// Topic to publish envelopes to.
    #[arg(long, env = "OTF_READER_TOPIC")]
    topic: Option<String>,

    /// Folder to watch; the working directory when blank.
    #[arg(long, env = "OTF_READER_FOLDER")]
    folder: Option<String>,

    /// Only read files with this suffix, e.g. .csv.
    #[arg(long, env = "OTF_READER_SUFFIX")]
    suffix: Option<String>,

    /// Poll interval, e.g. 500ms or 2s.
    #[arg(long, env = "OTF_READER_INTERVAL")]
    interval: Option<String>,

    /// Watch subfolders too.
    #[arg(long, env = "OTF_READER_RECURSIVE")]
    recursive: Option<bool>,

    /// Also read files whose names start with a dot.
    #[arg(long, env = "OTF_READER_DOTFILES")]
    dotfiles: Option<bool>,

    /// Comma-separated paths to ignore, relative to the folder.
    #[arg(long, env = "OTF_READER_IGNORE")]
    ignore: Option<String>,

    /// Maximum number of files processed at once.
    #[arg(long, alias = "concurrentFiles", env = "OTF_READER_CONCURRENT_FILES")]
    concurrent_files: Option<usize>,

    /// How long to wait for in-flight files at shutdown; abandon when unset.
    #[arg(long, env = "OTF_READER_DRAIN_TIMEOUT")]
    drain_timeout: Option<String>,

    /// Print the configuration and the watched files at start.
    #[arg(long)]
    print_config: bool,

    /// Log envelopes instead of sending them.
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

impl Cli {
    /// Layers flags and environment values over `base`.
    fn apply(&self, base: ReaderSettings) -> ReaderSettings {
        let mut settings = base;
        let text = [
            (&self.name, &mut settings.name),
            (&self.id, &mut settings.id),
            (&self.provider, &mut settings.provider),
            (&self.input_format, &mut settings.input_format),
            (&self.align_method, &mut settings.align_method),
            (&self.level_method, &mut settings.level_method),
            (&self.capability, &mut settings.capability),
            (&self.nats_host, &mut settings.nats_host),
            (&self.nats_cluster, &mut settings.nats_cluster),
            (&self.topic, &mut settings.topic),
            (&self.folder, &mut settings.folder),
            (&self.suffix, &mut settings.suffix),
            (&self.interval, &mut settings.interval),
            (&self.ignore, &mut settings.ignore),
            (&self.drain_timeout, &mut settings.drain_timeout),
        ];
        for (flag, field) in text {
            if let Some(value) = flag {
                value.clone_into(field);
            }
        }
        if let Some(port) = self.nats_port {
            settings.nats_port = port;
        }
        if let Some(n) = self.concurrent_files {
            settings.concurrent_files = n;
        }
        if self.recursive.is_some() {
            settings.recursive = self.recursive;
        }
        if self.dotfiles.is_some() {
            settings.dotfiles = self.dotfiles;
        }
        settings
    }
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects `RUST_LOG` if set. Otherwise uses `debug` with `--verbose` or
/// `info` by default. Client and polling internals are kept at `warn`.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},async_nats=warn,notify=warn"))
    });

    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Resolves settings from every source and validates them.
fn build_config(cli: &Cli) -> color_eyre::Result<ReaderConfig> {
    let base = match &cli.config {
        Some(path) => ReaderSettings::from_json_file(path)
            .wrap_err_with(|| format!("cannot load config file {path}"))?,
        None => ReaderSettings::new(),
    };
    cli.apply(base)
        .build()
        .wrap_err("cannot create otf-reader")
}

/// Writes the configuration dump and the files currently under watch.
fn print_config(config: &ReaderConfig) -> color_eyre::Result<()> {
    let files = watched_files(config.watch(), &filter_for(config.watch()))?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{config}")?;
    writeln!(handle)?;
    writeln!(handle, "Watched files ({}):", files.len())?;
    for file in &files {
        writeln!(handle, "  {file}")?;
    }
    writeln!(handle)?;
    Ok(())
}

// =============================================================================
// RUN LOOP
// =============================================================================

/// What ended the run.
#[derive(Debug)]
enum Stop {
    Signal(&'static str),
    Internal(ShutdownReason),
}

/// Waits for Ctrl-C, SIGTERM or an internal shutdown request.
async fn wait_for_stop<B: Broker>(reader: &mut RunningReader<B>) -> color_eyre::Result<Stop> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            reason = reader.shutdown_requested() => Ok(Stop::Internal(reason)),
            result = tokio::signal::ctrl_c() => result.map(|()| Stop::Signal("interrupt")).map_err(Into::into),
            _ = sigterm.recv() => Ok(Stop::Signal("terminate")),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            reason = reader.shutdown_requested() => Ok(Stop::Internal(reason)),
            result = tokio::signal::ctrl_c() => result.map(|()| Stop::Signal("interrupt")).map_err(Into::into),
        }
    }
}

/// Runs until stopped, then closes the reader.
async fn run<B: Broker>(mut reader: RunningReader<B>) -> color_eyre::Result<()> {
    let stop = wait_for_stop(&mut reader).await?;
    match &stop {
        Stop::Signal(signal) => info!(signal, "Received signal, shutting down"),
        Stop::Internal(reason) => tracing::error!(%reason, "Reader requested shutdown"),
    }

    let stats = reader.close().await?;
    info!(%stats, "otf-reader stopped");

    match stop {
        Stop::Internal(reason) if reason.is_failure() => Err(eyre!("otf-reader stopped: {reason}")),
        _ => Ok(()),
    }
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Resolve and validate settings; nothing starts on failure
    let config = build_config(&cli)?;
    if cli.print_config {
        print_config(&config)?;
    }

    // 5. Start watching and run until stopped
    let reader = Reader::new(config);
    if cli.dry_run {
        info!("Dry run: envelopes are logged, not sent");
        run(reader.start_with_broker(MemoryBroker::discarding()).await?).await
    } else {
        run(reader.start().await?).await
    }
}
