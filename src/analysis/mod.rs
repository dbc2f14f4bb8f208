// =============================================================================
// Analysis Engine
// =============================================================================
//
// Two batch tests over a persisted snapshot series:
// - Imbalance hypothesis: does depth imbalance predict the forward return?
//   (multi-horizon Pearson correlation + directional accuracy)
// - Market efficiency: do mid-price changes scale like a random walk?
//   (multi-lag variance ratio)
//
// Both are pure functions of their inputs: they borrow the series read-only
// and return freshly built result values.

pub mod efficiency;
pub mod imbalance;
pub mod stats;

pub use efficiency::{test_efficiency, VarianceRatioTest};
pub use imbalance::{forward_returns, test_imbalance, ImbalanceHypothesis};

use crate::types::SnapshotSeries;

/// Precondition failure, raised before any computation starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Fail unless at least one row defines `column`.
fn require_column(
    series: &SnapshotSeries,
    column: &str,
    values: &[Option<f64>],
) -> Result<(), AnalysisError> {
    if series.is_empty() {
        return Err(AnalysisError::Validation("snapshot series is empty".into()));
    }
    if values.iter().all(Option::is_none) {
        return Err(AnalysisError::Validation(format!(
            "column '{column}' has no defined values"
        )));
    }
    Ok(())
}
