//! netflow-sentinel - network flow anomaly scoring
//!
//! `serve` runs the TCP ingestion listener (collection or realtime mode),
//! `calibrate` fits the artifacts realtime mode loads, `send` replays
//! recorded traffic to a listener.

mod constants;
mod logic;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use logic::calibrate::{self, CalibrationOptions};
use logic::config::{Mode, ServerConfig};
use logic::dataset::{self, Stores};
use logic::pipeline::Pipeline;
use logic::replay::{self, ReplayOptions};
use logic::server;

#[derive(Parser)]
#[command(name = "netflow-sentinel", version, about = "Network flow anomaly scoring")]
struct Cli {
    /// Enable debug logging (raw received text)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion listener
    Serve(ServeArgs),
    /// Fit vocabularies and anomaly model from a collection store
    Calibrate(CalibrateArgs),
    /// Replay recorded traffic to a running listener
    Send(SendArgs),
}

/// Flags override the environment, which overrides the built-in defaults
#[derive(Args)]
struct ServeArgs {
    /// Operating mode: collection or realtime
    #[arg(long)]
    mode: Option<Mode>,
    /// Address to listen on (host:port)
    #[arg(long)]
    bind: Option<String>,
    /// Records per batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Directory for stores and default artifact paths
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,
    /// Seconds a connection may stay silent (0 = no limit)
    #[arg(long)]
    idle_timeout: Option<u64>,
    /// Flush a partial batch when its connection closes
    #[arg(long)]
    flush_on_close: bool,
    /// Also persist normal traffic in realtime mode
    #[arg(long)]
    persist_normal: bool,
    /// Model artifact (.json, or .onnx with the onnx feature)
    #[arg(long)]
    model: Option<PathBuf>,
    #[arg(long)]
    src_vocab: Option<PathBuf>,
    #[arg(long)]
    dst_vocab: Option<PathBuf>,
}

#[derive(Args)]
struct CalibrateArgs {
    /// Collection store to learn from
    #[arg(long)]
    input: PathBuf,
    /// Where the artifacts are written (default: data dir)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Expected fraction of anomalies
    #[arg(long, default_value_t = 0.04)]
    contamination: f64,
    #[arg(long, default_value_t = 100)]
    trees: usize,
    #[arg(long, default_value_t = 256)]
    sample_size: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Synthetic anomalies added, as a fraction of cleaned rows
    #[arg(long, default_value_t = 0.05)]
    synthetic_fraction: f64,
    /// Also write the cleaned, labelled training set here
    #[arg(long)]
    cleaned_out: Option<PathBuf>,
}

#[derive(Args)]
struct SendArgs {
    /// Listener address
    #[arg(long, default_value = constants::DEFAULT_BIND_ADDR)]
    addr: String,
    /// Records file (default: stdin)
    #[arg(long)]
    file: Option<PathBuf>,
    /// Records per connection
    #[arg(long, default_value_t = constants::DEFAULT_BATCH_SIZE)]
    chunk_lines: usize,
    /// Pause between connections, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "info,netflow_sentinel=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    log::info!("Starting {} v{}", constants::APP_NAME, constants::APP_VERSION);

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Calibrate(args) => run_calibrate(args).await,
        Command::Send(args) => run_send(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::from_env().context("Invalid environment configuration")?;

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }
    if let Some(idle_timeout) = args.idle_timeout {
        config.idle_timeout_secs = idle_timeout;
    }
    config.flush_on_close |= args.flush_on_close;
    config.persist_normal |= args.persist_normal;
    config.model_file = args.model.or(config.model_file);
    config.src_vocab_file = args.src_vocab.or(config.src_vocab_file);
    config.dst_vocab_file = args.dst_vocab.or(config.dst_vocab_file);

    config.validate().context("Invalid configuration")?;
    log::info!(
        "Mode: {}, batch size: {}, data dir: {}",
        config.mode,
        config.batch_size,
        config.data_dir.display()
    );

    let (router, router_task) = dataset::spawn(Stores::in_dir(&config.data_dir, config.persist_normal));
    let pipeline = Arc::new(Pipeline::load(&config, router).context("Failed to load model artifacts")?);

    let listener = server::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    server::serve(listener, pipeline.clone(), config.max_connections, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Shutdown requested");
    })
    .await;

    let stats = pipeline.stats().snapshot();
    drop(pipeline);
    let written = router_task.finish().await;

    log::info!(
        "Served {} connections: {} records, {} malformed, {} undecodable chunks, {} dropped before scoring",
        stats.connections,
        stats.records,
        stats.malformed,
        stats.undecodable,
        stats.coercion_dropped
    );
    log::info!(
        "Batches: {} flushed, {} failed, {} records discarded at close; {} anomalies, {} normal",
        stats.batches_flushed,
        stats.batches_failed,
        stats.discarded,
        stats.anomalies,
        stats.normal
    );
    log::info!(
        "Stores: {} rows written, {} failed writes",
        written.written,
        written.failed_writes
    );
    Ok(())
}

async fn run_calibrate(args: CalibrateArgs) -> Result<()> {
    let output_dir = args.output_dir.unwrap_or_else(constants::get_data_dir);
    let options = CalibrationOptions {
        input: args.input,
        output_dir,
        contamination: args.contamination,
        trees: args.trees,
        sample_size: args.sample_size,
        seed: args.seed,
        synthetic_fraction: args.synthetic_fraction,
        cleaned_out: args.cleaned_out,
    };

    let report = tokio::task::spawn_blocking(move || calibrate::run(&options))
        .await
        .context("Calibration task failed")?
        .context("Calibration failed")?;

    log::info!(
        "Calibrated on {} rows ({} synthetic): {} source / {} destination classes, threshold {:.4}, model {}",
        report.training_rows,
        report.synthetic,
        report.src_classes,
        report.dst_classes,
        report.threshold,
        report.model_path.display()
    );
    Ok(())
}

async fn run_send(args: SendArgs) -> Result<()> {
    let lines = replay::read_source(args.file.as_deref())
        .await
        .context("Failed to read records")?;

    let options = ReplayOptions {
        addr: args.addr,
        chunk_lines: args.chunk_lines,
        interval: args.interval_ms.map(Duration::from_millis),
    };

    replay::replay(&lines, &options)
        .await
        .with_context(|| format!("Failed to send records to {}", options.addr))?;
    Ok(())
}
