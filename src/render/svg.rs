// =============================================================================
// SVG chart renderer
// =============================================================================
//
// Charts are assembled as plain SVG text. Undefined values (NaN, infinite)
// are skipped: a missing correlation breaks the decay curve instead of
// dropping it to zero, and a missing ratio simply has no bar.
// =============================================================================

use anyhow::Result;

use super::{ChartRenderer, ChartStyle, ImbalanceFigure};
use crate::analysis::stats::{complete_pairs, linear_fit};
use crate::analysis::{forward_returns, VarianceRatioTest};

/// Accuracy reference: a coin flip.
const ACCURACY_REFERENCE_PCT: f64 = 50.0;
/// Variance ratio of a random walk.
const VR_REFERENCE: f64 = 1.0;
const TICKS: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct SvgRenderer;

impl ChartRenderer for SvgRenderer {
    fn extension(&self) -> &str {
        "svg"
    }

    fn render_imbalance(&self, figure: &ImbalanceFigure<'_>, style: &ChartStyle) -> Result<String> {
        let height = style.panel_height * 3.0;
        let mut doc = SvgDoc::new(style.width, height, style);

        scatter_panel(&mut doc, frame(style, 0), figure, style);
        decay_panel(&mut doc, frame(style, 1), figure, style);
        accuracy_panel(&mut doc, frame(style, 2), figure, style);

        Ok(doc.finish())
    }

    fn render_variance_ratios(
        &self,
        result: &VarianceRatioTest,
        style: &ChartStyle,
    ) -> Result<String> {
        let mut doc = SvgDoc::new(style.width, style.panel_height, style);
        let area = frame(style, 0);

        let bars: Vec<(String, f64)> = result
            .variance_ratios
            .iter()
            .filter(|(_, vr)| vr.is_finite())
            .map(|(k, vr)| (k.to_string(), *vr))
            .collect();
        let top = bars
            .iter()
            .map(|(_, v)| *v)
            .fold(VR_REFERENCE, f64::max)
            * 1.1;
        let y = Axis::new(0.0, top);

        doc.open_panel();
        draw_axes(&mut doc, area, None, &y, style);
        doc.title(area, "Variance Ratio by Lag", style);
        doc.label_x(area, "Lag (snapshots)", style);
        doc.label_y(area, "Variance ratio", style);
        draw_bars(&mut doc, area, &y, &bars, style, |vr| vr >= VR_REFERENCE);
        doc.reference_line(area, &y, VR_REFERENCE, style);

        let average = if result.average_vr.is_finite() {
            format!("{:.3}", result.average_vr)
        } else {
            "undefined".to_string()
        };
        doc.text(
            area.x + area.w,
            area.y + style.font_size,
            &format!("Average VR = {average}: {}", result.market_characterization),
            style.font_size,
            "end",
            &style.axis_color,
        );
        doc.close_panel();

        Ok(doc.finish())
    }
}

// -----------------------------------------------------------------------------
// Panels
// -----------------------------------------------------------------------------

fn scatter_panel(doc: &mut SvgDoc, area: Frame, figure: &ImbalanceFigure<'_>, style: &ChartStyle) {
    let horizon = figure.result.best_horizon;
    let returns_pct: Vec<Option<f64>> = forward_returns(&figure.series.mid_prices(), horizon)
        .into_iter()
        .map(|r| r.map(|r| r * 100.0))
        .collect();
    let (xs, ys) = complete_pairs(&figure.series.imbalances(), &returns_pct);

    let x = Axis::from_values(xs.iter().copied()).unwrap_or(Axis::new(-1.0, 1.0));
    let y = Axis::from_values(ys.iter().copied())
        .unwrap_or(Axis::new(-0.1, 0.1))
        .padded(0.05);

    doc.open_panel();
    draw_axes(doc, area, Some(&x), &y, style);
    doc.title(
        area,
        &format!(
            "Imbalance vs {}-min Forward Return",
            minutes(horizon, figure.interval_secs)
        ),
        style,
    );
    doc.label_x(area, "Order book imbalance (5 levels)", style);
    doc.label_y(area, "Forward return (%)", style);

    for (xv, yv) in xs.iter().zip(&ys) {
        doc.circle(area.map_x(&x, *xv), area.map_y(&y, *yv), 2.5, &style.point_color);
    }

    if let Some((slope, intercept)) = linear_fit(&xs, &ys) {
        doc.line(
            area.map_x(&x, x.lo),
            area.map_y(&y, slope * x.lo + intercept),
            area.map_x(&x, x.hi),
            area.map_y(&y, slope * x.hi + intercept),
            &style.fit_color,
            2.0,
            false,
        );
    }

    let corr = match figure.result.best_correlation() {
        Some(c) if c.is_finite() => format!("{c:.3}"),
        _ => "undefined".to_string(),
    };
    doc.text(
        area.x + area.w,
        area.y + style.font_size,
        &format!("Correlation: {corr}"),
        style.font_size,
        "end",
        &style.fit_color,
    );
    doc.close_panel();
}

fn decay_panel(doc: &mut SvgDoc, area: Frame, figure: &ImbalanceFigure<'_>, style: &ChartStyle) {
    let points: Vec<(f64, f64)> = figure
        .result
        .correlations
        .iter()
        .map(|(h, c)| (minutes(*h, figure.interval_secs), *c))
        .collect();

    let x = Axis::from_values(points.iter().map(|(m, _)| *m)).unwrap_or(Axis::new(0.0, 1.0));
    let y = Axis::from_values(points.iter().map(|(_, c)| *c))
        .unwrap_or(Axis::new(-0.1, 0.1))
        .including(0.0)
        .padded(0.1);

    doc.open_panel();
    draw_axes(doc, area, Some(&x), &y, style);
    doc.title(area, "Correlation Decay over Horizons", style);
    doc.label_x(area, "Horizon (minutes)", style);
    doc.label_y(area, "Correlation", style);
    doc.reference_line(area, &y, 0.0, style);

    for run in finite_runs(&points) {
        let mapped: Vec<(f64, f64)> = run
            .iter()
            .map(|(m, c)| (area.map_x(&x, *m), area.map_y(&y, *c)))
            .collect();
        doc.polyline(&mapped, &style.point_color, 2.0);
        for (px, py) in mapped {
            doc.circle(px, py, 3.0, &style.point_color);
        }
    }
    doc.close_panel();
}

fn accuracy_panel(doc: &mut SvgDoc, area: Frame, figure: &ImbalanceFigure<'_>, style: &ChartStyle) {
    let bars: Vec<(String, f64)> = figure
        .result
        .directional_accuracy
        .iter()
        .filter(|(_, a)| a.is_finite())
        .map(|(t, a)| (format!(">{t}"), a * 100.0))
        .collect();
    let y = Axis::new(0.0, 100.0);

    doc.open_panel();
    draw_axes(doc, area, None, &y, style);
    doc.title(area, "Directional Accuracy by Imbalance Threshold", style);
    doc.label_x(area, "|Imbalance| threshold", style);
    doc.label_y(area, "Accuracy (%)", style);
    draw_bars(doc, area, &y, &bars, style, |pct| pct > ACCURACY_REFERENCE_PCT);
    doc.reference_line(area, &y, ACCURACY_REFERENCE_PCT, style);
    doc.close_panel();
}

// -----------------------------------------------------------------------------
// Geometry
// -----------------------------------------------------------------------------

fn minutes(steps: usize, interval_secs: u64) -> f64 {
    (steps as u64 * interval_secs) as f64 / 60.0
}

/// Split a curve into runs of consecutive finite points.
fn finite_runs(points: &[(f64, f64)]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for &(x, y) in points {
        if x.is_finite() && y.is_finite() {
            current.push((x, y));
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis {
    lo: f64,
    hi: f64,
}

impl Axis {
    fn new(lo: f64, hi: f64) -> Self {
        if hi > lo {
            Self { lo, hi }
        } else {
            let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
            Self {
                lo: lo - pad,
                hi: lo + pad,
            }
        }
    }

    /// Extent of the finite values, `None` if there are none.
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let (lo, hi) = values
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        (lo <= hi).then(|| Self::new(lo, hi))
    }

    fn including(self, v: f64) -> Self {
        Self::new(self.lo.min(v), self.hi.max(v))
    }

    fn padded(self, fraction: f64) -> Self {
        let pad = (self.hi - self.lo) * fraction;
        Self::new(self.lo - pad, self.hi + pad)
    }

    fn ticks(&self) -> impl Iterator<Item = f64> + '_ {
        let step = (self.hi - self.lo) / (TICKS - 1) as f64;
        (0..TICKS).map(move |i| self.lo + step * i as f64)
    }
}

/// Plot area in pixels.
#[derive(Debug, Clone, Copy)]
struct Frame {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Frame {
    fn map_x(&self, axis: &Axis, v: f64) -> f64 {
        self.x + (v - axis.lo) / (axis.hi - axis.lo) * self.w
    }

    fn map_y(&self, axis: &Axis, v: f64) -> f64 {
        self.y + self.h - (v - axis.lo) / (axis.hi - axis.lo) * self.h
    }
}

fn frame(style: &ChartStyle, panel: usize) -> Frame {
    Frame {
        x: style.margin,
        y: style.panel_height * panel as f64 + style.margin * 0.75,
        w: style.width - style.margin * 1.5,
        h: style.panel_height - style.margin * 1.5,
    }
}

fn draw_axes(doc: &mut SvgDoc, area: Frame, x: Option<&Axis>, y: &Axis, style: &ChartStyle) {
    let bottom = area.y + area.h;
    doc.line(area.x, bottom, area.x + area.w, bottom, &style.axis_color, 1.0, false);
    doc.line(area.x, area.y, area.x, bottom, &style.axis_color, 1.0, false);

    for v in y.ticks() {
        let py = area.map_y(y, v);
        doc.line(area.x - 4.0, py, area.x, py, &style.axis_color, 1.0, false);
        doc.text(area.x - 6.0, py + 4.0, &tick_label(v), style.font_size * 0.85, "end", &style.axis_color);
    }
    if let Some(x) = x {
        for v in x.ticks() {
            let px = area.map_x(x, v);
            doc.line(px, bottom, px, bottom + 4.0, &style.axis_color, 1.0, false);
            doc.text(px, bottom + 16.0, &tick_label(v), style.font_size * 0.85, "middle", &style.axis_color);
        }
    }
}

fn draw_bars(
    doc: &mut SvgDoc,
    area: Frame,
    y: &Axis,
    bars: &[(String, f64)],
    style: &ChartStyle,
    is_positive: impl Fn(f64) -> bool,
) {
    if bars.is_empty() {
        return;
    }
    let slot = area.w / bars.len() as f64;
    let bottom = area.y + area.h;
    for (i, (label, value)) in bars.iter().enumerate() {
        let top = area.map_y(y, *value);
        let fill = if is_positive(*value) {
            &style.positive_color
        } else {
            &style.negative_color
        };
        let left = area.x + slot * i as f64 + slot * 0.15;
        doc.bar(left, top, slot * 0.7, bottom - top, fill);
        doc.text(left + slot * 0.35, top - 4.0, &format!("{value:.2}"), style.font_size * 0.85, "middle", &style.axis_color);
        doc.text(left + slot * 0.35, bottom + 16.0, label, style.font_size * 0.85, "middle", &style.axis_color);
    }
}

fn tick_label(v: f64) -> String {
    if v.abs() >= 100.0 {
        format!("{v:.0}")
    } else if v.abs() >= 1.0 {
        format!("{v:.2}")
    } else {
        format!("{v:.3}")
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// -----------------------------------------------------------------------------
// Document builder
// -----------------------------------------------------------------------------

struct SvgDoc {
    body: String,
    font_family: String,
    reference_color: String,
}

impl SvgDoc {
    fn new(width: f64, height: f64, style: &ChartStyle) -> Self {
        let mut body = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">\n"
        );
        body.push_str(&format!(
            "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>\n",
            style.background
        ));
        Self {
            body,
            font_family: style.font_family.clone(),
            reference_color: style.reference_color.clone(),
        }
    }

    fn open_panel(&mut self) {
        self.body.push_str("<g class=\"panel\">\n");
    }

    fn close_panel(&mut self) {
        self.body.push_str("</g>\n");
    }

    #[allow(clippy::too_many_arguments)]
    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: &str, width: f64, dashed: bool) {
        let dash = if dashed { " stroke-dasharray=\"6 4\"" } else { "" };
        self.body.push_str(&format!(
            "<line x1=\"{x1:.1}\" y1=\"{y1:.1}\" x2=\"{x2:.1}\" y2=\"{y2:.1}\" stroke=\"{stroke}\" stroke-width=\"{width}\"{dash}/>\n"
        ));
    }

    fn reference_line(&mut self, area: Frame, y: &Axis, value: f64, style: &ChartStyle) {
        let py = area.map_y(y, value);
        let color = self.reference_color.clone();
        self.line(area.x, py, area.x + area.w, py, &color, style.font_size / 8.0, true);
    }

    fn bar(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str) {
        self.body.push_str(&format!(
            "<rect class=\"bar\" x=\"{x:.1}\" y=\"{y:.1}\" width=\"{w:.1}\" height=\"{h:.1}\" fill=\"{fill}\"/>\n"
        ));
    }

    fn circle(&mut self, cx: f64, cy: f64, r: f64, fill: &str) {
        self.body.push_str(&format!(
            "<circle cx=\"{cx:.1}\" cy=\"{cy:.1}\" r=\"{r}\" fill=\"{fill}\" fill-opacity=\"0.6\"/>\n"
        ));
    }

    fn polyline(&mut self, points: &[(f64, f64)], stroke: &str, width: f64) {
        let coords: Vec<String> = points.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
        self.body.push_str(&format!(
            "<polyline points=\"{}\" fill=\"none\" stroke=\"{stroke}\" stroke-width=\"{width}\"/>\n",
            coords.join(" ")
        ));
    }

    fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: &str, fill: &str) {
        self.body.push_str(&format!(
            "<text x=\"{x:.1}\" y=\"{y:.1}\" font-family=\"{}\" font-size=\"{size:.1}\" text-anchor=\"{anchor}\" fill=\"{fill}\">{}</text>\n",
            self.font_family,
            escape(content)
        ));
    }

    fn title(&mut self, area: Frame, content: &str, style: &ChartStyle) {
        self.text(
            area.x + area.w / 2.0,
            area.y - style.font_size,
            content,
            style.font_size * 1.25,
            "middle",
            &style.axis_color,
        );
    }

    fn label_x(&mut self, area: Frame, content: &str, style: &ChartStyle) {
        self.text(
            area.x + area.w / 2.0,
            area.y + area.h + style.font_size * 3.0,
            content,
            style.font_size,
            "middle",
            &style.axis_color,
        );
    }

    fn label_y(&mut self, area: Frame, content: &str, style: &ChartStyle) {
        let x = area.x - style.margin * 0.8;
        let y = area.y + area.h / 2.0;
        self.body.push_str(&format!(
            "<text x=\"{x:.1}\" y=\"{y:.1}\" font-family=\"{}\" font-size=\"{:.1}\" text-anchor=\"middle\" fill=\"{}\" transform=\"rotate(-90 {x:.1} {y:.1})\">{}</text>\n",
            self.font_family,
            style.font_size,
            style.axis_color,
            escape(content)
        ));
    }

    fn finish(mut self) -> String {
        self.body.push_str("</svg>\n");
        self.body
    }
}
