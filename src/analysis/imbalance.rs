// =============================================================================
// Imbalance Hypothesis — does depth imbalance predict the next move?
// =============================================================================
//
// For each horizon h the forward return r_h(t) = mid(t+h) / mid(t) - 1 is
// associated with time t and correlated with imbalance_5(t) over the rows
// where both are defined. Rows are dropped per horizon, not globally.
//
// The best horizon is the one with the largest *signed* correlation; a strong
// negative relationship is deliberately not preferred over a weak positive
// one. Undefined correlations never win; if every horizon is undefined the
// first one tested is reported.
//
// Directional accuracy then uses the returns at the best horizon: among rows
// with |imbalance| > threshold, the fraction where sign(imbalance) equals
// sign(return), with sign(0) = 0. Thresholds that select no rows are omitted.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::stats::{complete_pairs, pearson, sign};
use super::{require_column, AnalysisError};
use crate::store::keyed;
use crate::types::SnapshotSeries;

/// Result of the imbalance hypothesis test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImbalanceHypothesis {
    /// (horizon, correlation) in tested order; NaN when undefined.
    #[serde(with = "keyed")]
    pub correlations: Vec<(usize, f64)>,

    pub best_horizon: usize,

    /// (threshold, accuracy) in tested order; empty selections are omitted.
    #[serde(with = "keyed")]
    pub directional_accuracy: Vec<(f64, f64)>,
}

impl ImbalanceHypothesis {
    pub fn correlation(&self, horizon: usize) -> Option<f64> {
        self.correlations
            .iter()
            .find(|(h, _)| *h == horizon)
            .map(|(_, c)| *c)
    }

    pub fn best_correlation(&self) -> Option<f64> {
        self.correlation(self.best_horizon)
    }
}

#[cfg(test)]
impl ImbalanceHypothesis {
    pub fn accuracy(&self, threshold: f64) -> Option<f64> {
        self.directional_accuracy
            .iter()
            .find(|(t, _)| *t == threshold)
            .map(|(_, a)| *a)
    }
}

/// Forward percentage return over `horizon` steps, aligned to the start row.
pub fn forward_returns(mids: &[Option<f64>], horizon: usize) -> Vec<Option<f64>> {
    (0..mids.len())
        .map(|t| {
            let now = mids[t]?;
            let later = (*mids.get(t.checked_add(horizon)?)?)?;
            if now == 0.0 {
                return None;
            }
            Some(later / now - 1.0)
        })
        .collect()
}

/// Correlation of imbalance with the forward return at every horizon.
pub fn horizon_correlations(
    imbalances: &[Option<f64>],
    mids: &[Option<f64>],
    horizons: &[usize],
) -> Vec<(usize, f64)> {
    horizons
        .iter()
        .map(|&h| {
            let returns = forward_returns(mids, h);
            let (xs, ys) = complete_pairs(imbalances, &returns);
            let corr = pearson(&xs, &ys);
            debug!(horizon = h, pairs = xs.len(), corr, "horizon correlation");
            (h, corr)
        })
        .collect()
}

/// Horizon with the maximum signed correlation; first occurrence wins ties.
///
/// Returns `None` only for an empty input.
pub fn select_best_horizon(correlations: &[(usize, f64)]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &(h, c) in correlations {
        if c.is_nan() {
            continue;
        }
        match best {
            Some((_, best_c)) if c <= best_c => {}
            _ => best = Some((h, c)),
        }
    }

    match best {
        Some((h, _)) => Some(h),
        None => {
            let first = correlations.first().map(|(h, _)| *h)?;
            warn!(horizon = first, "every horizon correlation is undefined");
            Some(first)
        }
    }
}

/// Directional accuracy of sign(imbalance) against sign(return) per threshold.
pub fn directional_accuracy(
    imbalances: &[Option<f64>],
    returns: &[Option<f64>],
    thresholds: &[f64],
) -> Vec<(f64, f64)> {
    let (imb, ret) = complete_pairs(imbalances, returns);

    thresholds
        .iter()
        .filter_map(|&threshold| {
            let mut selected = 0usize;
            let mut correct = 0usize;
            for (i, r) in imb.iter().zip(&ret) {
                if i.abs() > threshold {
                    selected += 1;
                    if sign(*i) == sign(*r) {
                        correct += 1;
                    }
                }
            }
            if selected == 0 {
                debug!(threshold, "no rows beyond threshold, omitted");
                return None;
            }
            let accuracy = correct as f64 / selected as f64;
            debug!(threshold, selected, correct, accuracy, "directional accuracy");
            Some((threshold, accuracy))
        })
        .collect()
}

fn validate(horizons: &[usize], thresholds: &[f64]) -> Result<(), AnalysisError> {
    if horizons.is_empty() {
        return Err(AnalysisError::Validation("no horizons supplied".into()));
    }
    if horizons.contains(&0) {
        return Err(AnalysisError::Validation(
            "horizons must be positive".into(),
        ));
    }
    if let Some(t) = thresholds
        .iter()
        .find(|t| !(0.0..=1.0).contains(*t))
    {
        return Err(AnalysisError::Validation(format!(
            "threshold {t} outside [0, 1]"
        )));
    }
    Ok(())
}

/// Run the imbalance hypothesis test.
pub fn test_imbalance(
    series: &SnapshotSeries,
    horizons: &[usize],
    thresholds: &[f64],
) -> Result<ImbalanceHypothesis, AnalysisError> {
    let mids = series.mid_prices();
    let imbalances = series.imbalances();

    require_column(series, "mid_price", &mids)?;
    require_column(series, "imbalance_5", &imbalances)?;
    validate(horizons, thresholds)?;

    let correlations = horizon_correlations(&imbalances, &mids, horizons);
    let best_horizon = select_best_horizon(&correlations)
        .ok_or_else(|| AnalysisError::Validation("no horizons supplied".into()))?;

    let best_returns = forward_returns(&mids, best_horizon);
    let accuracy = directional_accuracy(&imbalances, &best_returns, thresholds);

    let result = ImbalanceHypothesis {
        correlations,
        best_horizon,
        directional_accuracy: accuracy,
    };

    info!(
        rows = series.len(),
        best_horizon,
        best_corr = ?result.best_correlation(),
        thresholds_reported = result.directional_accuracy.len(),
        "imbalance hypothesis tested"
    );

    Ok(result)
}
