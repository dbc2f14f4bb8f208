// =============================================================================
// Market Efficiency — Variance Ratio test
// =============================================================================
//
// Under a random walk the variance of k-step log returns grows linearly in k:
//
//   VR(k) = Var(ln p_t - ln p_{t-k}) / (k * Var(ln p_t - ln p_{t-1}))
//
//   VR > 1  =>  trending / momentum (returns positively autocorrelated)
//   VR ~ 1  =>  random walk
//   VR < 1  =>  mean-reverting
//
// Variances use the unbiased N-1 estimator. A zero one-step variance makes
// every ratio undefined (NaN or infinite) and that propagates into the
// average; an undefined average is classified as `Indeterminate`.
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::stats::{mean, sample_variance};
use super::{require_column, AnalysisError};
use crate::store::keyed;
use crate::types::SnapshotSeries;

/// Average VR above which the market is called trending.
const TRENDING_ABOVE: f64 = 1.1;
/// Average VR below which the market is called mean-reverting.
const MEAN_REVERTING_BELOW: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketCharacterization {
    #[serde(rename = "Trending/Momentum")]
    Trending,
    #[serde(rename = "Mean-reverting")]
    MeanReverting,
    #[serde(rename = "Approximately efficient (random walk)")]
    Efficient,
    #[serde(rename = "Indeterminate (undefined variance ratio)")]
    Indeterminate,
}

impl MarketCharacterization {
    /// Classify an average variance ratio.
    pub fn from_average_vr(average_vr: f64) -> Self {
        if average_vr.is_nan() {
            Self::Indeterminate
        } else if average_vr > TRENDING_ABOVE {
            Self::Trending
        } else if average_vr < MEAN_REVERTING_BELOW {
            Self::MeanReverting
        } else {
            Self::Efficient
        }
    }
}

impl fmt::Display for MarketCharacterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trending => write!(f, "Trending/Momentum"),
            Self::MeanReverting => write!(f, "Mean-reverting"),
            Self::Efficient => write!(f, "Approximately efficient (random walk)"),
            Self::Indeterminate => write!(f, "Indeterminate (undefined variance ratio)"),
        }
    }
}

/// Result of the variance ratio test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceRatioTest {
    /// (lag, VR) in tested order.
    #[serde(with = "keyed")]
    pub variance_ratios: Vec<(usize, f64)>,

    #[serde(with = "keyed::nullable")]
    pub average_vr: f64,

    pub market_characterization: MarketCharacterization,
}

#[cfg(test)]
impl VarianceRatioTest {
    pub fn ratio(&self, lag: usize) -> Option<f64> {
        self.variance_ratios
            .iter()
            .find(|(k, _)| *k == lag)
            .map(|(_, vr)| *vr)
    }
}

/// k-step log returns over every pair of positive prices `k` rows apart.
pub fn log_returns(mids: &[Option<f64>], k: usize) -> Vec<f64> {
    (k..mids.len())
        .filter_map(|t| match (mids[t - k], mids[t]) {
            (Some(then), Some(now)) if then > 0.0 && now > 0.0 => Some((now / then).ln()),
            _ => None,
        })
        .collect()
}

fn validate(lags: &[usize]) -> Result<(), AnalysisError> {
    if lags.is_empty() {
        return Err(AnalysisError::Validation("no lags supplied".into()));
    }
    if let Some(k) = lags.iter().find(|&&k| k < 2) {
        return Err(AnalysisError::Validation(format!(
            "lag {k} must be greater than 1"
        )));
    }
    Ok(())
}

/// Run the variance ratio test.
pub fn test_efficiency(
    series: &SnapshotSeries,
    lags: &[usize],
) -> Result<VarianceRatioTest, AnalysisError> {
    let mids = series.mid_prices();
    require_column(series, "mid_price", &mids)?;
    validate(lags)?;

    let one_step_variance = sample_variance(&log_returns(&mids, 1));

    let variance_ratios: Vec<(usize, f64)> = lags
        .iter()
        .map(|&k| {
            let returns = log_returns(&mids, k);
            let k_step_variance = sample_variance(&returns);
            let vr = k_step_variance / (k as f64 * one_step_variance);
            debug!(lag = k, samples = returns.len(), vr, "variance ratio");
            (k, vr)
        })
        .collect();

    let ratios: Vec<f64> = variance_ratios.iter().map(|(_, vr)| *vr).collect();
    let average_vr = mean(&ratios);
    let market_characterization = MarketCharacterization::from_average_vr(average_vr);

    info!(
        rows = series.len(),
        one_step_variance,
        average_vr,
        characterization = %market_characterization,
        "market efficiency tested"
    );

    Ok(VarianceRatioTest {
        variance_ratios,
        average_vr,
        market_characterization,
    })
}
