// =============================================================================
// Pipeline — collect, analyse and check flows behind the CLI
// =============================================================================
//
//   collect:  connector → Sampler → dataset CSV
//   analyse:  dataset CSV → both tests → result JSON + figures → key findings
//   check:    connector initialise + one fetch
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::analysis::{test_efficiency, test_imbalance, ImbalanceHypothesis, VarianceRatioTest};
use crate::collection::{CollectionSummary, Sampler, SamplerSettings};
use crate::exchange::{ConnectorRegistry, ConnectorSettings, OrderBookSource};
use crate::render::{write_charts, ChartStyle, ImbalanceFigure, SvgRenderer};
use crate::runtime_config::AppConfig;
use crate::store::{
    find_latest_dataset, load_dataset, load_results, save_dataset, save_results,
    EFFICIENCY_DOCUMENT, IMBALANCE_DOCUMENT,
};
use crate::types::Snapshot;

// =============================================================================
// Collect
// =============================================================================

#[derive(Debug, Clone)]
pub struct CollectionReport {
    pub dataset: PathBuf,
    pub summary: CollectionSummary,
}

fn connector(config: &AppConfig, registry: &ConnectorRegistry) -> Result<Box<dyn OrderBookSource>> {
    let settings = ConnectorSettings {
        request_timeout: config.fetch_timeout(),
    };
    registry.build(&config.exchange, &settings)
}

fn collection_duration(minutes: u64) -> Result<Duration> {
    match minutes.checked_mul(60) {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => bail!("collection duration of {minutes} minutes is out of range"),
    }
}

/// Collect for `duration_minutes` with the configured connector. Ctrl-C ends
/// the run early and keeps what was captured.
pub async fn collect(
    config: &AppConfig,
    registry: &ConnectorRegistry,
    duration_minutes: u64,
) -> Result<CollectionReport> {
    let duration = collection_duration(duration_minutes)?;
    let source = connector(config, registry)?;

    let stop = Arc::new(AtomicBool::new(false));
    let ctrl_c = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing collection");
                stop.store(true, Ordering::Relaxed);
            }
        })
    };

    let outcome = collect_from(source.as_ref(), config, duration, stop).await;
    ctrl_c.abort();
    outcome
}

/// Initialise `source`, run the sampler and persist the dataset.
pub async fn collect_from(
    source: &dyn OrderBookSource,
    config: &AppConfig,
    duration: Duration,
    stop: Arc<AtomicBool>,
) -> Result<CollectionReport> {
    source
        .initialise()
        .await
        .with_context(|| format!("failed to initialise {} connector", source.name()))?;

    let settings = SamplerSettings::from_config(config, duration);
    let run = Sampler::new(source, settings)
        .with_stop_flag(stop)
        .run()
        .await?;

    let dataset = save_dataset(&config.data_dir, &config.symbol, run.started_at, &run.series)?;
    Ok(CollectionReport {
        dataset,
        summary: run.summary,
    })
}

// =============================================================================
// Analyse
// =============================================================================

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub dataset: PathBuf,
    pub rows: usize,
    pub imbalance: ImbalanceHypothesis,
    pub efficiency: VarianceRatioTest,
    pub documents: Vec<PathBuf>,
    pub figures: Vec<PathBuf>,
}

/// Analyse `dataset`, or the latest dataset for the configured symbol.
///
/// Returns `Ok(None)` when no dataset can be found.
pub fn analyse(config: &AppConfig, dataset: Option<&Path>) -> Result<Option<AnalysisReport>> {
    let path = match dataset {
        Some(path) => path.to_path_buf(),
        None => match find_latest_dataset(&config.data_dir, &config.symbol)? {
            Some(path) => path,
            None => return Ok(None),
        },
    };
    analyse_dataset(config, &path).map(Some)
}

pub fn analyse_dataset(config: &AppConfig, path: &Path) -> Result<AnalysisReport> {
    info!(path = %path.display(), "analysing dataset");
    let series = load_dataset(path)?;
    let params = &config.analysis;

    let imbalance = test_imbalance(&series, &params.horizons, &params.thresholds)
        .context("imbalance hypothesis test failed")?;
    let efficiency =
        test_efficiency(&series, &params.lags).context("market efficiency test failed")?;

    let metrics = config.metrics_dir();
    let documents = vec![
        save_results(&metrics, IMBALANCE_DOCUMENT, &imbalance)?,
        save_results(&metrics, EFFICIENCY_DOCUMENT, &efficiency)?,
    ];

    // Figures are drawn from the persisted documents, not the in-memory values.
    let imbalance_doc: ImbalanceHypothesis = load_results(&metrics, IMBALANCE_DOCUMENT)?;
    let efficiency_doc: VarianceRatioTest = load_results(&metrics, EFFICIENCY_DOCUMENT)?;
    let figure = ImbalanceFigure {
        series: &series,
        result: &imbalance_doc,
        interval_secs: config.interval_secs,
    };
    let figures = write_charts(
        &SvgRenderer,
        &ChartStyle::default(),
        &config.figures_dir(),
        &figure,
        &efficiency_doc,
    )?;

    Ok(AnalysisReport {
        dataset: path.to_path_buf(),
        rows: series.len(),
        imbalance,
        efficiency,
        documents,
        figures,
    })
}

/// Human-readable headline results.
pub fn key_findings(report: &AnalysisReport, interval_secs: u64) -> Vec<String> {
    let imbalance = &report.imbalance;
    let horizon_secs = imbalance.best_horizon as u64 * interval_secs;

    let mut lines = Vec::with_capacity(4);
    match imbalance.best_correlation() {
        Some(c) if c.is_finite() => lines.push(format!(
            "Peak imbalance/return correlation: {c:.4} at {horizon_secs} seconds ahead"
        )),
        _ => lines.push(format!(
            "Imbalance/return correlation undefined (reported horizon {horizon_secs} seconds)"
        )),
    }

    if let Some((threshold, accuracy)) = imbalance
        .directional_accuracy
        .iter()
        .filter(|(_, a)| a.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
    {
        lines.push(format!(
            "Best directional accuracy: {:.1}% for |imbalance| > {threshold}",
            accuracy * 100.0
        ));
    }

    let efficiency = &report.efficiency;
    let average = if efficiency.average_vr.is_finite() {
        format!("{:.3}", efficiency.average_vr)
    } else {
        "undefined".to_string()
    };
    lines.push(format!("Average variance ratio: {average}"));
    lines.push(format!(
        "Market characterization: {}",
        efficiency.market_characterization
    ));
    lines
}

// =============================================================================
// Check
// =============================================================================

/// Verify connectivity: initialise the connector and fetch one book.
pub async fn check(config: &AppConfig, registry: &ConnectorRegistry) -> Result<Snapshot> {
    let source = connector(config, registry)?;
    check_source(source.as_ref(), config).await
}

pub async fn check_source(source: &dyn OrderBookSource, config: &AppConfig) -> Result<Snapshot> {
    source
        .initialise()
        .await
        .with_context(|| format!("failed to initialise {} connector", source.name()))?;

    let book = tokio::time::timeout(
        config.fetch_timeout(),
        source.fetch(&config.symbol, config.depth),
    )
    .await
    .with_context(|| format!("order book fetch timed out after {}s", config.fetch_timeout_secs))??;
    book.check_not_crossed()?;

    let snapshot = Snapshot::from_book(config.symbol.clone(), chrono::Utc::now(), &book);
    info!(
        exchange = %source.name(),
        symbol = %config.symbol,
        best_bid = ?snapshot.best_bid,
        best_ask = ?snapshot.best_ask,
        spread_bps = ?snapshot.spread_bps,
        imbalance_5 = ?snapshot.imbalance_5,
        "connector check passed"
    );
    Ok(snapshot)
}
