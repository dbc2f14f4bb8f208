// =============================================================================
// Result Documents — JSON persistence of test outcomes
// =============================================================================
//
// Each test writes one pretty-printed document to
// `<results_dir>/metrics/<name>_results.json`, replaced atomically
// (write `.tmp`, then rename) so a reader never sees a half-written file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

pub const IMBALANCE_DOCUMENT: &str = "imbalance_hypothesis";
pub const EFFICIENCY_DOCUMENT: &str = "market_efficiency";

pub fn results_path(metrics_dir: &Path, name: &str) -> PathBuf {
    metrics_dir.join(format!("{name}_results.json"))
}

/// Serialise `value` under `metrics_dir`, returning the written path.
pub fn save_results<T: Serialize>(metrics_dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    fs::create_dir_all(metrics_dir)
        .with_context(|| format!("failed to create metrics dir {}", metrics_dir.display()))?;

    let path = results_path(metrics_dir, name);
    let content =
        serde_json::to_string_pretty(value).context("failed to serialise results to JSON")?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to rename results to {}", path.display()))?;

    info!(path = %path.display(), "results saved");
    Ok(path)
}

pub fn load_results<T: DeserializeOwned>(metrics_dir: &Path, name: &str) -> Result<T> {
    let path = results_path(metrics_dir, name);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
