// =============================================================================
// Snapshot Dataset — CSV persistence
// =============================================================================
//
// One row per snapshot, header = snapshot field names, absent values as empty
// cells. Files are named `orderbook_<BASE>_<QUOTE>_<YYYYMMDD_HHMMSS>.csv`
// from the symbol and the UTC collection start time, and are written once at
// the end of a completed run.
// =============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{Reader, Writer};
use tracing::{debug, info};

use crate::types::{OutOfOrder, Snapshot, SnapshotSeries};

/// Columns the analysis cannot run without.
pub const REQUIRED_COLUMNS: [&str; 3] = ["timestamp", "mid_price", "imbalance_5"];

const FILE_PREFIX: &str = "orderbook_";

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("dataset rows out of order: {0}")]
    OutOfOrder(#[from] OutOfOrder),

    #[error("refusing to write an empty dataset")]
    Empty,
}

/// `BTC/USDT` → `BTC_USDT`.
fn symbol_stem(symbol: &str) -> String {
    symbol.replace(['/', ':', ' '], "_")
}

/// File name for a dataset of `symbol` collected from `started_at`.
pub fn dataset_file_name(symbol: &str, started_at: DateTime<Utc>) -> String {
    format!(
        "{FILE_PREFIX}{}_{}.csv",
        symbol_stem(symbol),
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/// Write every snapshot of `series` to `path`.
pub fn write_dataset(path: &Path, series: &SnapshotSeries) -> Result<()> {
    if series.is_empty() {
        return Err(DatasetError::Empty.into());
    }

    let mut writer = Writer::from_path(path)
        .with_context(|| format!("failed to create dataset {}", path.display()))?;
    for snapshot in series.snapshots() {
        writer
            .serialize(snapshot)
            .context("failed to write snapshot row")?;
    }
    writer.flush().context("failed to flush dataset")?;

    debug!(path = %path.display(), rows = series.len(), "dataset written");
    Ok(())
}

/// Persist a collected series under `data_dir`, returning the file path.
pub fn save_dataset(
    data_dir: &Path,
    symbol: &str,
    started_at: DateTime<Utc>,
    series: &SnapshotSeries,
) -> Result<PathBuf> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let path = data_dir.join(dataset_file_name(symbol, started_at));
    write_dataset(&path, series)?;
    info!(path = %path.display(), rows = series.len(), "dataset saved");
    Ok(path)
}

/// Load and validate a dataset.
///
/// Fails before reading any row if a required column is missing, and rejects
/// rows whose timestamps do not strictly increase.
pub fn load_dataset(path: &Path) -> Result<SnapshotSeries> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;

    let headers = reader
        .headers()
        .context("failed to read dataset header")?
        .clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DatasetError::MissingColumns(missing).into());
    }

    let snapshots = reader
        .deserialize::<Snapshot>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse dataset {}", path.display()))?;

    let series = SnapshotSeries::from_snapshots(snapshots).map_err(DatasetError::from)?;
    info!(path = %path.display(), rows = series.len(), "dataset loaded");
    Ok(series)
}

/// Most recently modified dataset for `symbol` in `data_dir`, if any.
pub fn find_latest_dataset(data_dir: &Path, symbol: &str) -> Result<Option<PathBuf>> {
    if !data_dir.exists() {
        return Ok(None);
    }
    let prefix = format!("{FILE_PREFIX}{}_", symbol_stem(symbol));

    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(data_dir)
        .with_context(|| format!("failed to list {}", data_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) || !name.ends_with(".csv") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, entry.path()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookLevel, OrderBookDepth};
    use chrono::{Duration, TimeZone};

    fn sample_series() -> SnapshotSeries {
        let t0 = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let full = OrderBookDepth::new(
            (0..10).map(|i| BookLevel::new(37_000.1 - i as f64 * 0.1, 0.013 + i as f64)).collect(),
            (0..10).map(|i| BookLevel::new(37_000.2 + i as f64 * 0.1, 1.7)).collect(),
        );
        let shallow = OrderBookDepth::new(
            vec![BookLevel::new(36_999.9, 0.5)],
            (0..6).map(|i| BookLevel::new(37_000.0 + i as f64, 0.25)).collect(),
        );
        let snapshots = vec![
            Snapshot::from_book("BTC/USDT", t0, &full),
            Snapshot::from_book("BTC/USDT", t0 + Duration::seconds(20), &shallow),
            Snapshot::from_book("BTC/USDT", t0 + Duration::milliseconds(40_007), &full),
        ];
        SnapshotSeries::from_snapshots(snapshots).unwrap()
    }

    #[test]
    fn file_name_encodes_symbol_and_start() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            dataset_file_name("BTC/USDT", started),
            "orderbook_BTC_USDT_20240309_140507.csv"
        );
    }

    #[test]
    fn save_then_load_reproduces_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let series = sample_series();
        let started = series.snapshots()[0].timestamp;
        let path = save_dataset(dir.path(), "BTC/USDT", started, &series).unwrap();

        let loaded = load_dataset(&path).unwrap();
        assert_eq!(loaded, series);
        assert_eq!(loaded.snapshots()[1].imbalance_5, None);
        assert_eq!(loaded.snapshots()[1].bid_depth_5, None);
    }

    #[test]
    fn missing_required_column_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "timestamp,symbol,mid_price\n2024-01-01T00:00:00Z,BTC/USDT,1.0\n").unwrap();

        let err = load_dataset(&path).unwrap_err();
        match err.downcast_ref::<DatasetError>() {
            Some(DatasetError::MissingColumns(cols)) => assert_eq!(cols, &vec!["imbalance_5".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn minimal_columns_load_with_absent_optionals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.csv");
        fs::write(
            &path,
            "timestamp,mid_price,imbalance_5\n\
             2024-01-01T00:00:00Z,100.5,0.25\n\
             2024-01-01T00:00:20Z,,\n",
        )
        .unwrap();
        let series = load_dataset(&path).unwrap();
        assert_eq!(series.mid_prices(), vec![Some(100.5), None]);
        assert_eq!(series.imbalances(), vec![Some(0.25), None]);
        assert_eq!(series.snapshots()[0].best_bid, None);
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unordered.csv");
        fs::write(
            &path,
            "timestamp,mid_price,imbalance_5\n\
             2024-01-01T00:00:20Z,1.0,0.1\n\
             2024-01-01T00:00:00Z,1.0,0.1\n",
        )
        .unwrap();
        let err = load_dataset(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::OutOfOrder(_))
        ));
    }

    #[test]
    fn latest_dataset_is_most_recently_modified() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_latest_dataset(&dir.path().join("absent"), "BTC/USDT").unwrap(), None);
        assert_eq!(find_latest_dataset(dir.path(), "BTC/USDT").unwrap(), None);

        let older = dir.path().join("orderbook_BTC_USDT_20240101_000000.csv");
        let newer = dir.path().join("orderbook_BTC_USDT_20230101_000000.csv");
        fs::write(&older, "x").unwrap();
        fs::write(dir.path().join("orderbook_ETH_USDT_20250101_000000.csv"), "x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&newer, "x").unwrap();

        assert_eq!(find_latest_dataset(dir.path(), "BTC/USDT").unwrap(), Some(newer));
    }

    #[test]
    fn empty_series_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_dataset(&dir.path().join("e.csv"), &SnapshotSeries::new()).is_err());
    }
}
