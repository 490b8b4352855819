//! Command-line entry point for tierswap.
//!
//! Logs go to stderr; stdout carries only JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tierswap::config::TierswapConfig;
use tierswap::worker::serve;
use tierswap::orchestrator::{
    ComputeOrchestrator, HardwareProbe, InferenceBackend, ModelCache, OllamaBackend, TaskRequest,
    TelemetryMonitor, TierId, TierSelector,
};

#[derive(Parser)]
#[command(name = "tierswap")]
#[command(about = "VRAM-aware model tier orchestrator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE", env = "TIERSWAP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `tierswap=trace`. Overrides RUST_LOG.
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify, route and run one task, printing the result as JSON
    Execute {
        /// Task text
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,

        /// Run on this tier instead of the selected one
        #[arg(long)]
        tier: Option<TierId>,

        /// Programming language hint for code tasks
        #[arg(long)]
        language: Option<String>,

        /// Leave the specialist loaded after the task finishes
        #[arg(long)]
        keep_resident: bool,
    },
    /// Print a hardware snapshot as JSON
    Hardware {
        /// Keep sampling every N seconds until interrupted
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// Print the tier catalog as JSON
    Tiers,
    /// Read JSON-lines task requests from stdin, write JSON-lines results
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_format);

    let config = TierswapConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Execute {
            task,
            tier,
            language,
            keep_resident,
        } => {
            let mut request = TaskRequest::new(task.join(" "));
            request.tier = tier;
            request.language = language;
            execute(&config, request, keep_resident).await
        }
        Commands::Hardware { watch } => hardware(&config, watch).await,
        Commands::Tiers => {
            let catalog = config.catalog()?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
            Ok(())
        }
        Commands::Worker => worker(&config).await,
    }
}

fn init_tracing(level: Option<&str>, format: LogFormat) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wire the runtime adapter, telemetry and cache from configuration.
async fn connect(config: &TierswapConfig) -> Result<ComputeOrchestrator> {
    let backend = Arc::new(OllamaBackend::new(config.backend.clone()));
    let probe = Arc::new(TelemetryMonitor::with_config(config.telemetry.clone()));
    let catalog = Arc::new(config.catalog()?);

    if !backend.is_available().await {
        warn!(
            "Inference runtime at {} is not answering; router bootstrap will likely fail",
            config.backend.base_url
        );
    }

    let cache = ModelCache::new(catalog, probe.clone(), backend.clone(), config.cache.clone())
        .await
        .context("bootstrapping the router tier")?;

    Ok(ComputeOrchestrator::new(Arc::new(cache), backend, probe)
        .with_classifier_config(config.classifier.clone())
        .with_selector(TierSelector::new(config.selector))
        .with_dispatch_config(config.dispatch.clone()))
}

async fn release_specialists(orchestrator: &ComputeOrchestrator) {
    for (tier, result) in orchestrator.cache().shutdown().await {
        if let Err(e) = result {
            error!("Failed to release '{}': {}", tier, e);
        }
    }
}

async fn execute(config: &TierswapConfig, request: TaskRequest, keep_resident: bool) -> Result<()> {
    let orchestrator = connect(config).await?;
    let result = orchestrator.execute_request(request).await;

    if !keep_resident {
        release_specialists(&orchestrator).await;
    }

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn hardware(config: &TierswapConfig, watch: Option<u64>) -> Result<()> {
    let monitor = TelemetryMonitor::with_config(config.telemetry.clone());

    let Some(secs) = watch else {
        println!("{}", serde_json::to_string_pretty(&monitor.sample().await)?);
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!("{}", serde_json::to_string(&monitor.sample().await)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}

async fn worker(config: &TierswapConfig) -> Result<()> {
    let orchestrator = Arc::new(connect(config).await?);
    let housekeeping = orchestrator.cache().spawn_housekeeping(
        config.cache.housekeeping_interval(),
        config.cache.idle_release(),
    );

    info!("Worker ready, reading task requests from stdin");

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let summary = serve(
        &orchestrator,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        interrupted,
    )
    .await;

    housekeeping.abort();
    info!("Worker stopped: {:?}", summary.stop_reason);
    Ok(())
}
