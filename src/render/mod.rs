// =============================================================================
// Rendering — charts from a dataset and its result documents
// =============================================================================
//
// Read-only consumer of the analysis output. Every render call receives its
// `ChartStyle` explicitly; renderers hold no mutable state.
// =============================================================================

pub mod svg;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::analysis::{ImbalanceHypothesis, VarianceRatioTest};
use crate::types::SnapshotSeries;

pub use svg::SvgRenderer;

pub const IMBALANCE_FIGURE: &str = "imbalance_analysis";
pub const VARIANCE_RATIO_FIGURE: &str = "variance_ratios";

/// Visual parameters shared by every chart.
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub width: f64,
    pub panel_height: f64,
    pub margin: f64,
    pub font_family: String,
    pub font_size: f64,
    pub background: String,
    pub axis_color: String,
    pub point_color: String,
    pub fit_color: String,
    pub positive_color: String,
    pub negative_color: String,
    pub reference_color: String,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 1000.0,
            panel_height: 360.0,
            margin: 60.0,
            font_family: "Helvetica, Arial, sans-serif".into(),
            font_size: 12.0,
            background: "#ffffff".into(),
            axis_color: "#333333".into(),
            point_color: "#1f77b4".into(),
            fit_color: "#d62728".into(),
            positive_color: "#2ca02c".into(),
            negative_color: "#d62728".into(),
            reference_color: "#7f7f7f".into(),
        }
    }
}

/// Inputs of the three-panel imbalance figure.
#[derive(Debug, Clone, Copy)]
pub struct ImbalanceFigure<'a> {
    pub series: &'a SnapshotSeries,
    pub result: &'a ImbalanceHypothesis,
    /// Seconds per snapshot step, for horizon axes in minutes.
    pub interval_secs: u64,
}

pub trait ChartRenderer {
    /// File extension of produced documents, without the dot.
    fn extension(&self) -> &str;

    fn render_imbalance(&self, figure: &ImbalanceFigure<'_>, style: &ChartStyle) -> Result<String>;

    fn render_variance_ratios(&self, result: &VarianceRatioTest, style: &ChartStyle)
        -> Result<String>;
}

/// Render both figures into `figures_dir`, returning the written paths.
pub fn write_charts(
    renderer: &dyn ChartRenderer,
    style: &ChartStyle,
    figures_dir: &Path,
    figure: &ImbalanceFigure<'_>,
    efficiency: &VarianceRatioTest,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(figures_dir)
        .with_context(|| format!("failed to create figures dir {}", figures_dir.display()))?;

    let documents = [
        (IMBALANCE_FIGURE, renderer.render_imbalance(figure, style)?),
        (
            VARIANCE_RATIO_FIGURE,
            renderer.render_variance_ratios(efficiency, style)?,
        ),
    ];

    let mut written = Vec::with_capacity(documents.len());
    for (name, content) in documents {
        let path = figures_dir.join(format!("{name}.{}", renderer.extension()));
        fs::write(&path, content)
            .with_context(|| format!("failed to write figure {}", path.display()))?;
        info!(path = %path.display(), "figure written");
        written.push(path);
    }
    Ok(written)
}
