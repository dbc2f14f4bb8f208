// =============================================================================
// Microstructure Lab — Main Entry Point
// =============================================================================
//
// Samples an exchange order book on a fixed grid, then tests whether depth
// imbalance predicts short-horizon returns and whether mid-price changes
// behave like a random walk.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod collection;
mod exchange;
mod pipeline;
mod render;
mod runtime_config;
mod store;
mod types;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::exchange::ConnectorRegistry;
use crate::pipeline::{key_findings, AnalysisReport};
use crate::runtime_config::AppConfig;

const DEFAULT_CONFIG_PATH: &str = "microstructure_config.json";

#[derive(Parser)]
#[command(name = "microstructure-lab")]
#[command(about = "Order book sampling and market microstructure hypothesis tests")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run both tests on a dataset (latest one if omitted)
    Analyse {
        #[arg(value_name = "DATASET")]
        dataset: Option<PathBuf>,
    },
    /// Sample the order book for a number of minutes
    Collect {
        #[arg(value_name = "DURATION_MINUTES")]
        duration_minutes: Option<u64>,
    },
    /// Initialise the connector and fetch one order book
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_or_init(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        AppConfig::default()
    });
    config.apply_env_overrides();

    // ── 2. Connector registry ────────────────────────────────────────────
    let registry = ConnectorRegistry::with_builtin();
    registry.validate(&config.exchange)?;

    info!(
        exchange = %config.exchange,
        symbol = %config.symbol,
        interval_secs = config.interval_secs,
        "microstructure lab ready"
    );

    // ── 3. Dispatch ──────────────────────────────────────────────────────
    let code = match cli.command {
        Some(Command::Analyse { dataset }) => run_analysis(&config, dataset),
        Some(Command::Collect { duration_minutes }) => {
            let minutes = duration_minutes.unwrap_or(config.duration_minutes);
            exit_code(run_collection(&config, &registry, minutes).await)
        }
        Some(Command::Check) => match pipeline::check(&config, &registry).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %format!("{e:#}"), "connector check failed");
                ExitCode::FAILURE
            }
        },
        None => interactive(&config, &registry).await?,
    };

    Ok(code)
}

fn run_analysis(config: &AppConfig, dataset: Option<PathBuf>) -> ExitCode {
    match pipeline::analyse(config, dataset.as_deref()) {
        Ok(Some(report)) => {
            report_findings(&report, config.interval_secs);
            ExitCode::SUCCESS
        }
        Ok(None) => {
            error!(
                data_dir = %config.data_dir.display(),
                symbol = %config.symbol,
                "no dataset found, run a collection first"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "analysis failed");
            ExitCode::FAILURE
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_collection(
    config: &AppConfig,
    registry: &ConnectorRegistry,
    duration_minutes: u64,
) -> bool {
    match pipeline::collect(config, registry, duration_minutes).await {
        Ok(report) => {
            info!(
                path = %report.dataset.display(),
                snapshots = report.summary.snapshots,
                errors = report.summary.errors,
                "collection saved"
            );
            true
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "collection failed");
            false
        }
    }
}

fn report_findings(report: &AnalysisReport, interval_secs: u64) {
    info!(
        dataset = %report.dataset.display(),
        rows = report.rows,
        "════════════ KEY FINDINGS ════════════"
    );
    for line in key_findings(report, interval_secs) {
        info!("{line}");
    }
    for path in report.documents.iter().chain(&report.figures) {
        info!(path = %path.display(), "output");
    }
}

// ── Interactive mode ─────────────────────────────────────────────────────────

fn prompt(message: &str) -> anyhow::Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_duration(default_minutes: u64) -> anyhow::Result<Option<u64>> {
    let raw = prompt(&format!("Collection duration in minutes [{default_minutes}]: "))?;
    if raw.is_empty() {
        return Ok(Some(default_minutes));
    }
    Ok(raw.parse::<u64>().ok().filter(|m| *m > 0))
}

async fn interactive(config: &AppConfig, registry: &ConnectorRegistry) -> anyhow::Result<ExitCode> {
    println!("Microstructure Lab ({} {})", config.exchange, config.symbol);
    println!("  1) Analyse the latest dataset");
    println!("  2) Collect order book snapshots");
    println!("  3) Collect, then analyse");
    let choice = prompt("Choice: ")?;

    let code = match choice.as_str() {
        "1" => run_analysis(config, None),
        "2" | "3" => {
            let Some(minutes) = prompt_duration(config.duration_minutes)? else {
                println!("Invalid duration");
                return Ok(ExitCode::FAILURE);
            };
            let collected = run_collection(config, registry, minutes).await;
            if choice == "3" && collected {
                run_analysis(config, None)
            } else {
                exit_code(collected)
            }
        }
        _ => {
            println!("Invalid choice");
            ExitCode::FAILURE
        }
    };
    Ok(code)
}
