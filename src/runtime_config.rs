// =============================================================================
// Runtime Configuration — Collection and analysis settings with atomic save
// =============================================================================
//
// Every tunable parameter of the lab lives here: which exchange and pair to
// sample, the sampling cadence, where datasets and results are written, and
// the horizon / threshold / lag sets used by the statistical tests.
//
// All fields carry `#[serde(default)]` so that a partial or older config file
// always loads. Persistence uses an atomic tmp + rename write.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_exchange() -> String {
    "binance".to_string()
}

fn default_symbol() -> String {
    "BTC/USDT".to_string()
}

fn default_depth() -> usize {
    20
}

fn default_interval_secs() -> u64 {
    20
}

fn default_duration_minutes() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_horizons() -> Vec<usize> {
    (1..=30).collect()
}

fn default_thresholds() -> Vec<f64> {
    vec![0.3, 0.5, 0.7]
}

fn default_lags() -> Vec<usize> {
    vec![2, 5, 7, 10, 15, 20, 25, 30]
}

// =============================================================================
// AnalysisParams
// =============================================================================

/// Parameter sets for the two statistical tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Forward horizons (in snapshot steps) for the correlation test.
    #[serde(default = "default_horizons")]
    pub horizons: Vec<usize>,

    /// Absolute-imbalance thresholds for the directional accuracy test.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,

    /// Lags (in snapshot steps) for the variance ratio test.
    #[serde(default = "default_lags")]
    pub lags: Vec<usize>,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            horizons: default_horizons(),
            thresholds: default_thresholds(),
            lags: default_lags(),
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    // --- Collection ---------------------------------------------------------

    /// Connector identifier, resolved through the connector registry.
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Trading pair in `BASE/QUOTE` form.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Levels requested per side on every fetch.
    #[serde(default = "default_depth")]
    pub depth: usize,

    /// Seconds between consecutive snapshot targets.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Default collection length when none is given on the command line.
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u64,

    /// Upper bound on a single order-book fetch.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    // --- Storage ------------------------------------------------------------

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    // --- Analysis -----------------------------------------------------------

    #[serde(default)]
    pub analysis: AnalysisParams,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            symbol: default_symbol(),
            depth: default_depth(),
            interval_secs: default_interval_secs(),
            duration_minutes: default_duration_minutes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            analysis: AnalysisParams::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            exchange = %config.exchange,
            symbol = %config.symbol,
            "config loaded"
        );

        Ok(config)
    }

    /// Load `path`, or write the defaults there first when it is missing so
    /// the file can be edited for the next run.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Apply `MICROLAB_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(exchange) = lookup("MICROLAB_EXCHANGE") {
            let exchange = exchange.trim().to_lowercase();
            if !exchange.is_empty() {
                self.exchange = exchange;
            }
        }
        if let Some(symbol) = lookup("MICROLAB_SYMBOL") {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() {
                self.symbol = symbol;
            }
        }
        if let Some(raw) = lookup("MICROLAB_INTERVAL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.interval_secs = secs,
                _ => warn!(value = %raw, "ignoring invalid MICROLAB_INTERVAL_SECS"),
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.results_dir.join("metrics")
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.results_dir.join("figures")
    }
}
