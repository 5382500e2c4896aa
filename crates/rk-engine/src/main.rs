use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use rk_config::{HumanDuration, KpiConfig};
use rk_runtime::lifecycle::{Engine, wait_for_signal};
use rk_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "retail-kpi", about = "Windowed retail KPI streaming engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine
    Run {
        /// Path to retail-kpi.toml config file
        #[arg(short, long)]
        config: PathBuf,
        /// Enable runtime metrics and periodic snapshot output
        #[arg(long)]
        metrics: bool,
        /// Override metrics report interval (e.g. "2s", "30s", "1m")
        #[arg(long)]
        metrics_interval: Option<String>,
        /// Override metrics listen address for the /metrics and /status endpoint
        #[arg(long)]
        metrics_listen: Option<String>,
    },
    /// Parse and validate a config file, then exit
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            metrics,
            metrics_interval,
            metrics_listen,
        } => {
            let mut kpi_config = load_config(&config)?;
            if metrics || metrics_interval.is_some() || metrics_listen.is_some() {
                kpi_config.metrics.enabled = true;
            }
            if let Some(interval) = metrics_interval {
                kpi_config.metrics.report_interval = HumanDuration::from_str(&interval)
                    .map_err(|e| anyhow::anyhow!("invalid --metrics-interval '{interval}': {e}"))?;
            }
            if let Some(listen) = metrics_listen {
                kpi_config.metrics.prometheus_listen = listen;
            }

            let _guard = init_tracing(&kpi_config.logging)?;

            let engine = Engine::start(kpi_config)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            tracing::info!(domain = "sys", "retail KPI engine started");
            if let Some(addr) = engine.metrics_addr() {
                tracing::info!(domain = "res", listen = %addr, "runtime metrics enabled");
            }

            // Ingest cancels the root token itself when the source is gone
            // for good.
            let cancel = engine.cancel_token();
            tokio::select! {
                _ = wait_for_signal(cancel.clone()) => {}
                _ = cancel.cancelled() => {}
            }
            engine.shutdown();
            engine.wait().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        Commands::Check { config } => {
            let kpi_config = load_config(&config)?;
            println!(
                "config ok: source={} window={} slide={} lateness={}",
                kpi_config.source.path.display(),
                kpi_config.window.size,
                kpi_config.window.slide,
                kpi_config.window.allowed_lateness,
            );
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<KpiConfig> {
    let config_path = path
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", path.display()))?;
    KpiConfig::load(&config_path)
}
