//! svg figures - a small string canvas plus the survival & residual panels

use std::fmt::Write as _;

use crate::km::CovariateCurves;
use crate::stats::format_p_value;
use crate::zph::ResidualSeries;

/// line colours, one per curve level
pub const PALETTE: [&str; 4] = ["#2c7bb6", "#d7191c", "#1a9641", "#7b3294"];

const FONT: &str = "Helvetica, Arial, sans-serif";

/// escape text for svg/html bodies
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    Middle,
    End,
}

impl Anchor {
    fn as_str(self) -> &'static str {
        match self {
            Anchor::Start => "start",
            Anchor::Middle => "middle",
            Anchor::End => "end",
        }
    }
}

/// append-only svg document
#[derive(Debug, Clone)]
pub struct Svg {
    width: f64,
    height: f64,
    body: String,
}

impl Svg {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height, body: String::new() }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: &str, width: f64, dash: Option<&str>) {
        let dash = dash.map(|d| format!(r#" stroke-dasharray="{d}""#)).unwrap_or_default();
        let _ = writeln!(
            self.body,
            r#"<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}" stroke="{stroke}" stroke-width="{width}"{dash}/>"#
        );
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], stroke: &str, width: f64) {
        if points.is_empty() {
            return;
        }
        let _ = writeln!(
            self.body,
            r#"<polyline points="{}" fill="none" stroke="{stroke}" stroke-width="{width}"/>"#,
            point_list(points)
        );
    }

    pub fn polygon(&mut self, points: &[(f64, f64)], fill: &str, opacity: f64) {
        if points.len() < 3 {
            return;
        }
        let _ = writeln!(
            self.body,
            r#"<polygon points="{}" fill="{fill}" fill-opacity="{opacity}" stroke="none"/>"#,
            point_list(points)
        );
    }

    pub fn circle(&mut self, cx: f64, cy: f64, r: f64, fill: &str, opacity: f64) {
        let _ = writeln!(
            self.body,
            r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="{r}" fill="{fill}" fill-opacity="{opacity}"/>"#
        );
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str) {
        let _ = writeln!(
            self.body,
            r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="{fill}"/>"#
        );
    }

    pub fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: Anchor, bold: bool, fill: &str) {
        let weight = if bold { r#" font-weight="bold""# } else { "" };
        let _ = writeln!(
            self.body,
            r#"<text x="{x:.1}" y="{y:.1}" font-family="{FONT}" font-size="{size}" text-anchor="{}" fill="{fill}"{weight}>{}</text>"#,
            anchor.as_str(),
            escape(content)
        );
    }

    /// draw `other` with its origin at (x, y)
    pub fn embed(&mut self, x: f64, y: f64, other: &Svg) {
        let _ = writeln!(self.body, r#"<g transform="translate({x:.1},{y:.1})">"#);
        self.body.push_str(&other.body);
        self.body.push_str("</g>\n");
    }

    pub fn finish(&self) -> String {
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">
<rect width="100%" height="100%" fill="white"/>
{body}</svg>
"#,
            w = self.width,
            h = self.height,
            body = self.body
        )
    }
}

fn point_list(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("{x:.1},{y:.1}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// maps a data interval onto a pixel interval
#[derive(Debug, Clone, Copy)]
pub struct LinearScale {
    domain: (f64, f64),
    range: (f64, f64),
}

impl LinearScale {
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Self {
        Self { domain, range }
    }

    pub fn map(&self, v: f64) -> f64 {
        let span = self.domain.1 - self.domain.0;
        if span == 0.0 {
            return (self.range.0 + self.range.1) / 2.0;
        }
        self.range.0 + (v - self.domain.0) / span * (self.range.1 - self.range.0)
    }
}

/// same, on a log10 axis
#[derive(Debug, Clone, Copy)]
pub struct LogScale {
    inner: LinearScale,
}

impl LogScale {
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Self {
        Self {
            inner: LinearScale::new((domain.0.log10(), domain.1.log10()), range),
        }
    }

    pub fn map(&self, v: f64) -> f64 {
        self.inner.map(v.max(f64::MIN_POSITIVE).log10())
    }
}

/// round tick positions from 0 to at least `max`
pub fn nice_ticks(max: f64, target: usize) -> Vec<f64> {
    if !(max > 0.0) || target == 0 {
        return vec![0.0];
    }
    let raw = max / target as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 2.5, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * magnitude);
    let mut ticks = Vec::new();
    let mut t = 0.0;
    while t < max + step * 0.5 {
        ticks.push(t);
        t += step;
    }
    ticks
}

fn tick_label(v: f64) -> String {
    if v.fract().abs() < 1e-9 { format!("{v:.0}") } else { format!("{v:.1}") }
}

pub const KM_PANEL_WIDTH: f64 = 480.0;
pub const KM_PANEL_HEIGHT: f64 = 380.0;

/// one survival panel: step curves, bands, medians, log-rank p & at-risk table
pub fn km_panel(curves: &CovariateCurves) -> Svg {
    let mut svg = Svg::new(KM_PANEL_WIDTH, KM_PANEL_HEIGHT);
    let (left, right, top) = (120.0, KM_PANEL_WIDTH - 15.0, 40.0);
    let bottom = 250.0;

    svg.text(KM_PANEL_WIDTH / 2.0, 20.0, curves.covariate.label(), 14.0, Anchor::Middle, true, "#222");

    let max_time = curves.risk_table.breaks.last().copied().unwrap_or(0.0).max(
        curves.curves.iter().map(|c| c.max_time()).fold(0.0, f64::max),
    );
    let x = LinearScale::new((0.0, max_time.max(1.0)), (left, right));
    let y = LinearScale::new((0.0, 1.0), (bottom, top));

    // axes
    svg.line(left, bottom, right, bottom, "#444", 1.0, None);
    svg.line(left, top, left, bottom, "#444", 1.0, None);
    for tick in [0.0, 0.25, 0.5, 0.75, 1.0] {
        svg.line(left - 4.0, y.map(tick), left, y.map(tick), "#444", 1.0, None);
        svg.text(left - 7.0, y.map(tick) + 4.0, &format!("{tick:.2}"), 10.0, Anchor::End, false, "#444");
    }
    for &tick in &curves.risk_table.breaks {
        svg.line(x.map(tick), bottom, x.map(tick), bottom + 4.0, "#444", 1.0, None);
        svg.text(x.map(tick), bottom + 16.0, &tick_label(tick), 10.0, Anchor::Middle, false, "#444");
    }
    svg.text((left + right) / 2.0, bottom + 32.0, "Time (days)", 11.0, Anchor::Middle, false, "#222");
    svg.text(left - 40.0, (top + bottom) / 2.0, "Survival", 11.0, Anchor::End, false, "#222");

    for (i, curve) in curves.curves.iter().enumerate() {
        let colour = PALETTE[i % PALETTE.len()];

        let mut upper = vec![(x.map(0.0), y.map(1.0))];
        let mut lower = vec![(x.map(0.0), y.map(1.0))];
        let mut line = vec![(x.map(0.0), y.map(1.0))];
        let (mut prev_s, mut prev_lo, mut prev_hi) = (1.0, 1.0, 1.0);
        for step in &curve.steps {
            let px = x.map(step.time);
            line.push((px, y.map(prev_s)));
            line.push((px, y.map(step.survival)));
            upper.push((px, y.map(prev_hi)));
            upper.push((px, y.map(step.upper)));
            lower.push((px, y.map(prev_lo)));
            lower.push((px, y.map(step.lower)));
            prev_s = step.survival;
            prev_hi = step.upper;
            prev_lo = step.lower;
        }
        let end = x.map(curve.max_time());
        line.push((end, y.map(prev_s)));

        let band: Vec<(f64, f64)> = upper.iter().copied().chain(lower.iter().rev().copied()).collect();
        svg.polygon(&band, colour, 0.12);
        svg.polyline(&line, colour, 1.6);

        if let Some(median) = curve.median {
            svg.line(left, y.map(0.5), x.map(median), y.map(0.5), "#888", 0.8, Some("4,3"));
            svg.line(x.map(median), y.map(0.5), x.map(median), bottom, "#888", 0.8, Some("4,3"));
        }

        // legend
        let ly = top + 4.0 + 14.0 * i as f64;
        svg.line(right - 110.0, ly, right - 95.0, ly, colour, 2.0, None);
        svg.text(right - 90.0, ly + 4.0, &curve.label, 10.0, Anchor::Start, false, "#222");
    }

    let p_label = match &curves.log_rank {
        Some(test) => format!("Log-rank p = {}", format_p_value(test.p_value)),
        None => "Log-rank p = NA".to_string(),
    };
    svg.text(left + 8.0, bottom - 10.0, &p_label, 11.0, Anchor::Start, false, "#222");

    // at-risk table
    let table_top = bottom + 52.0;
    svg.text(8.0, table_top, "Number at risk", 11.0, Anchor::Start, true, "#222");
    for (i, (curve, counts)) in curves.curves.iter().zip(&curves.risk_table.counts).enumerate() {
        let ry = table_top + 16.0 * (i + 1) as f64;
        let colour = PALETTE[i % PALETTE.len()];
        svg.text(left - 10.0, ry, &curve.label, 10.0, Anchor::End, false, colour);
        for (&tick, count) in curves.risk_table.breaks.iter().zip(counts) {
            svg.text(x.map(tick), ry, &count.to_string(), 10.0, Anchor::Middle, false, "#222");
        }
    }

    svg
}

/// panels laid out row by row, `columns` per row
pub fn grid(panels: &[Svg], columns: usize) -> Svg {
    let columns = columns.max(1);
    let cell_w = panels.iter().map(Svg::width).fold(0.0, f64::max);
    let cell_h = panels.iter().map(Svg::height).fold(0.0, f64::max);
    let rows = panels.len().div_ceil(columns);

    let mut svg = Svg::new(cell_w * columns.min(panels.len().max(1)) as f64, cell_h * rows as f64);
    for (i, panel) in panels.iter().enumerate() {
        let (r, c) = (i / columns, i % columns);
        svg.embed(c as f64 * cell_w, r as f64 * cell_h, panel);
    }
    svg
}

/// all survival panels, two per row
pub fn km_grid(all: &[CovariateCurves]) -> String {
    let panels: Vec<Svg> = all.iter().map(km_panel).collect();
    grid(&panels, 2).finish()
}

pub const RESIDUAL_PANEL_WIDTH: f64 = 420.0;
pub const RESIDUAL_PANEL_HEIGHT: f64 = 300.0;

/// scaled schoenfeld residuals against event time with the smooth & beta
pub fn residual_panel(series: &ResidualSeries) -> Svg {
    let mut svg = Svg::new(RESIDUAL_PANEL_WIDTH, RESIDUAL_PANEL_HEIGHT);
    let (left, right, top, bottom) = (60.0, RESIDUAL_PANEL_WIDTH - 15.0, 36.0, RESIDUAL_PANEL_HEIGHT - 45.0);

    let title = format!("Beta(t) for {}", series.term);
    svg.text(RESIDUAL_PANEL_WIDTH / 2.0, 20.0, &title, 13.0, Anchor::Middle, true, "#222");

    let max_time = series.points.iter().map(|p| p.0).fold(0.0, f64::max).max(1.0);
    let (mut lo, mut hi) = series
        .points
        .iter()
        .map(|p| p.1)
        .chain(std::iter::once(series.beta))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() || hi - lo < 1e-9 {
        lo = series.beta - 1.0;
        hi = series.beta + 1.0;
    }
    let pad = 0.05 * (hi - lo);
    let x = LinearScale::new((0.0, max_time), (left, right));
    let y = LinearScale::new((lo - pad, hi + pad), (bottom, top));

    svg.line(left, bottom, right, bottom, "#444", 1.0, None);
    svg.line(left, top, left, bottom, "#444", 1.0, None);
    for tick in nice_ticks(max_time, 5) {
        if tick > max_time {
            break;
        }
        svg.line(x.map(tick), bottom, x.map(tick), bottom + 4.0, "#444", 1.0, None);
        svg.text(x.map(tick), bottom + 16.0, &tick_label(tick), 10.0, Anchor::Middle, false, "#444");
    }
    for i in 0..=4 {
        let v = lo - pad + (hi - lo + 2.0 * pad) * i as f64 / 4.0;
        svg.text(left - 6.0, y.map(v) + 4.0, &format!("{v:.1}"), 10.0, Anchor::End, false, "#444");
    }
    svg.text((left + right) / 2.0, bottom + 32.0, "Time (days)", 11.0, Anchor::Middle, false, "#222");

    for &(t, r) in &series.points {
        svg.circle(x.map(t), y.map(r), 1.6, "#555", 0.45);
    }
    svg.line(left, y.map(series.beta), right, y.map(series.beta), "#d7191c", 1.0, Some("5,4"));
    let smooth: Vec<(f64, f64)> = series.smooth.iter().map(|&(t, v)| (x.map(t), y.map(v))).collect();
    svg.polyline(&smooth, "#2c7bb6", 2.0);

    svg.text(right, top + 4.0, &format!("p = {}", format_p_value(series.p_value)), 10.0, Anchor::End, false, "#222");
    svg
}

/// one residual panel per model column, two per row
pub fn residual_grid(series: &[ResidualSeries]) -> String {
    let panels: Vec<Svg> = series.iter().map(residual_panel).collect();
    grid(&panels, 2).finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::km::{KaplanMeier, RiskTable};
    use crate::covariate::Covariate;

    #[test]
    fn test_escape() {
        assert_eq!(escape("Lev+5FU <a & b>"), "Lev+5FU &lt;a &amp; b&gt;");
    }

    #[test]
    fn test_scales() {
        let x = LinearScale::new((0.0, 10.0), (100.0, 200.0));
        assert_eq!(x.map(5.0), 150.0);
        let y = LinearScale::new((0.0, 1.0), (250.0, 50.0));
        assert_eq!(y.map(1.0), 50.0);
        let log = LogScale::new((0.1, 10.0), (0.0, 200.0));
        assert!((log.map(1.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_nice_ticks() {
        assert_eq!(nice_ticks(3000.0, 5), vec![0.0, 1000.0, 2000.0, 3000.0]);
        assert_eq!(nice_ticks(2400.0, 5), vec![0.0, 500.0, 1000.0, 1500.0, 2000.0, 2500.0]);
        assert_eq!(nice_ticks(0.0, 5), vec![0.0]);
    }

    #[test]
    fn test_km_grid_has_every_panel() {
        let km = KaplanMeier::fit("No", &[10.0, 20.0, 30.0], &[true, false, true]).unwrap();
        let curves = CovariateCurves {
            covariate: Covariate::Obstruct,
            curves: vec![km],
            log_rank: None,
            risk_table: RiskTable { breaks: vec![0.0], counts: vec![vec![3]] },
        };
        let all = vec![curves.clone(), curves.clone(), curves];
        let svg = km_grid(&all);

        assert!(svg.starts_with("<svg"));
        assert_eq!(svg.matches("<g transform").count(), 3);
        assert!(svg.contains("Colon obstruction"));
        assert!(svg.contains("Log-rank p = NA"));
        // 2 columns x 2 rows
        assert!(svg.contains(&format!(r#"viewBox="0 0 {} {}""#, 2.0 * KM_PANEL_WIDTH, 2.0 * KM_PANEL_HEIGHT)));
    }
}
