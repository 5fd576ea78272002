//! forest table & figure for the multivariable model

use serde::Serialize;

use crate::cleaning::AnalysisRecord;
use crate::model::hazard_ratio_interval;
use crate::plot::{Anchor, LogScale, Svg};
use crate::regression::FittedModel;
use crate::stats::format_p_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForestRowKind {
    Total,
    Header,
    Reference,
    Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForestRow {
    pub kind: ForestRowKind,
    pub label: String,
    pub n: Option<usize>,
    pub hazard_ratio: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub p_value: Option<f64>,
}

impl ForestRow {
    pub fn is_bold(&self) -> bool {
        matches!(self.kind, ForestRowKind::Total | ForestRowKind::Header)
    }

    /// "Ref." on reference rows, "0.70 (0.58 to 0.85)" on estimates
    pub fn hr_text(&self) -> String {
        match (self.kind, self.hazard_ratio, self.ci_lower, self.ci_upper) {
            (ForestRowKind::Reference, ..) => "Ref.".to_string(),
            (ForestRowKind::Estimate, Some(hr), Some(lo), Some(hi)) => {
                format!("{hr:.2} ({lo:.2} to {hi:.2})")
            }
            _ => String::new(),
        }
    }

    pub fn p_text(&self) -> String {
        self.p_value.map(format_p_value).unwrap_or_default()
    }
}

// columns, left to right: label, N, interval plot, blank spacer, HR (95% CI), p
const ROW_H: f64 = 22.0;
const WIDTH: f64 = 900.0;
const LABEL_X: f64 = 10.0;
/// right edge of the N column
const N_X: f64 = 300.0;
const PLOT_L: f64 = 330.0;
const PLOT_R: f64 = 600.0;
const SPACER_W: f64 = 40.0;
const HR_W: f64 = 150.0;
/// right edge of the HR column
const HR_X: f64 = PLOT_R + SPACER_W + HR_W;
/// right edge of the p column
const P_X: f64 = HR_X + 90.0;

/// one row per category, grouped under a bold row per predictor
#[derive(Debug, Clone, Serialize)]
pub struct ForestTable {
    pub rows: Vec<ForestRow>,
}

impl ForestTable {
    /// reshape a fitted model; counts per level come from `records`
    pub fn from_model(model: &FittedModel, records: &[AnalysisRecord]) -> Self {
        let mut rows = vec![ForestRow {
            kind: ForestRowKind::Total,
            label: format!("Total participants (N = {})", records.len()),
            n: Some(records.len()),
            hazard_ratio: None,
            ci_lower: None,
            ci_upper: None,
            p_value: None,
        }];

        for &covariate in &model.covariates {
            rows.push(ForestRow {
                kind: ForestRowKind::Header,
                label: covariate.label().to_string(),
                n: None,
                hazard_ratio: None,
                ci_lower: None,
                ci_upper: None,
                p_value: None,
            });

            let counts = covariate.level_counts(records);
            for estimate in model.estimates_for(covariate) {
                let n = Some(counts[estimate.level]);
                let row = match estimate.std_error {
                    None => ForestRow {
                        kind: ForestRowKind::Reference,
                        label: estimate.level_label.to_string(),
                        n,
                        hazard_ratio: Some(1.0),
                        ci_lower: Some(1.0),
                        ci_upper: Some(1.0),
                        p_value: None,
                    },
                    Some(se) => {
                        let (lo, hi) = hazard_ratio_interval(estimate.hazard_ratio, se);
                        ForestRow {
                            kind: ForestRowKind::Estimate,
                            label: estimate.level_label.to_string(),
                            n,
                            hazard_ratio: Some(estimate.hazard_ratio),
                            ci_lower: Some(lo),
                            ci_upper: Some(hi),
                            p_value: estimate.p_value,
                        }
                    }
                };
                rows.push(row);
            }
        }

        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// axis limits covering every interval & 1, padded a little
    fn axis_domain(&self) -> (f64, f64) {
        let (lo, hi) = self
            .rows
            .iter()
            .filter(|r| r.kind == ForestRowKind::Estimate)
            .flat_map(|r| [r.ci_lower, r.ci_upper])
            .flatten()
            .filter(|v| v.is_finite() && *v > 0.0)
            .fold((1.0f64, 1.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        (lo / 1.15, hi * 1.15)
    }

    pub fn render_svg(&self) -> String {
        let header_y = 24.0;
        let body_top = header_y + 14.0;
        let height = body_top + ROW_H * self.rows.len() as f64 + 44.0;

        let mut svg = Svg::new(WIDTH, height);

        svg.text(LABEL_X, header_y, "Characteristic", 12.0, Anchor::Start, true, "#222");
        svg.text(N_X, header_y, "N", 12.0, Anchor::End, true, "#222");
        svg.text(HR_X, header_y, "HR (95% CI)", 12.0, Anchor::End, true, "#222");
        svg.text(P_X, header_y, "p", 12.0, Anchor::End, true, "#222");
        svg.line(LABEL_X, body_top - 4.0, WIDTH - 10.0, body_top - 4.0, "#222", 1.0, None);

        let (lo, hi) = self.axis_domain();
        let x = LogScale::new((lo, hi), (PLOT_L, PLOT_R));
        let plot_bottom = body_top + ROW_H * self.rows.len() as f64;

        svg.line(x.map(1.0), body_top, x.map(1.0), plot_bottom, "#888", 1.0, Some("4,3"));

        for (i, row) in self.rows.iter().enumerate() {
            let cy = body_top + ROW_H * (i as f64 + 0.5);
            let ty = cy + 4.0;
            let indent = if row.kind == ForestRowKind::Header || row.kind == ForestRowKind::Total { 0.0 } else { 12.0 };

            svg.text(LABEL_X + indent, ty, &row.label, 11.0, Anchor::Start, row.is_bold(), "#222");
            if row.kind != ForestRowKind::Total {
                if let Some(n) = row.n {
                    svg.text(N_X, ty, &n.to_string(), 11.0, Anchor::End, false, "#222");
                }
            }
            svg.text(HR_X, ty, &row.hr_text(), 11.0, Anchor::End, false, "#222");
            svg.text(P_X, ty, &row.p_text(), 11.0, Anchor::End, false, "#222");

            if let (ForestRowKind::Estimate, Some(hr), Some(l), Some(h)) =
                (row.kind, row.hazard_ratio, row.ci_lower, row.ci_upper)
            {
                svg.line(x.map(l), cy, x.map(h), cy, "#2c3e50", 1.4, None);
                svg.rect(x.map(hr) - 4.0, cy - 4.0, 8.0, 8.0, "#2c3e50");
            }
        }

        // log axis
        svg.line(PLOT_L, plot_bottom, PLOT_R, plot_bottom, "#444", 1.0, None);
        for tick in log_ticks(lo, hi) {
            svg.line(x.map(tick), plot_bottom, x.map(tick), plot_bottom + 4.0, "#444", 1.0, None);
            svg.text(x.map(tick), plot_bottom + 16.0, &format!("{tick}"), 10.0, Anchor::Middle, false, "#444");
        }
        svg.text((PLOT_L + PLOT_R) / 2.0, plot_bottom + 32.0, "Hazard ratio", 11.0, Anchor::Middle, false, "#222");

        svg.finish()
    }
}

/// powers of two inside the domain
fn log_ticks(lo: f64, hi: f64) -> Vec<f64> {
    (-6..=6)
        .map(|k| 2f64.powi(k))
        .filter(|t| *t >= lo && *t <= hi)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::{age_band, differ_label};
    use crate::covariate::Covariate;
    use crate::dataset::Treatment;
    use crate::regression::{fit_model, FitOptions};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn trial_records(n: usize, seed: u64) -> Vec<AnalysisRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let rx = Treatment::ALL[i % 3];
                let node4: u8 = rng.gen_bool(0.3).into();
                let differ: u8 = rng.gen_range(1..=3);
                let rate = 0.001 * if node4 == 1 { 2.5 } else { 1.0 } * if rx == Treatment::LevFu { 0.6 } else { 1.0 };
                let event_time = -rng.gen_range(1e-9..1.0_f64).ln() / rate;
                let censor_time: f64 = rng.gen_range(500.0..3000.0);
                let age = rng.gen_range(30..85);
                AnalysisRecord {
                    id: i as u32,
                    rx,
                    sex: 0,
                    age,
                    obstruct: 0,
                    perfor: 0,
                    adhere: 0,
                    nodes: Some(2),
                    status: u8::from(event_time <= censor_time),
                    differ,
                    extent: 3,
                    surg: 0,
                    node4,
                    time: event_time.min(censor_time).round().max(1.0),
                    age_band: age_band(age),
                    sex_label: "Female",
                    differ_label: differ_label(differ).unwrap(),
                    extent_label: "Serosa",
                    surg_label: "Short",
                }
            })
            .collect()
    }

    #[test]
    fn test_from_model_layout() {
        let records = trial_records(300, 21);
        let covariates = [Covariate::Treatment, Covariate::Node4, Covariate::Differ];
        let fit = fit_model(&records, &covariates, &[], &FitOptions::default()).unwrap();
        let table = ForestTable::from_model(&fit, &records);

        let expected: usize = 1 + covariates.iter().map(|c| 1 + c.n_levels()).sum::<usize>();
        assert_eq!(table.len(), expected);

        let total = &table.rows[0];
        assert_eq!(total.kind, ForestRowKind::Total);
        assert_eq!(total.n, Some(records.len()));
        assert_eq!(table.rows.iter().filter(|r| r.kind == ForestRowKind::Total).count(), 1);

        let headers: Vec<&str> = table
            .rows
            .iter()
            .filter(|r| r.kind == ForestRowKind::Header)
            .map(|r| r.label.as_str())
            .collect();
        assert_eq!(headers, covariates.iter().map(|c| c.label()).collect::<Vec<_>>());

        let references: Vec<&ForestRow> = table.rows.iter().filter(|r| r.kind == ForestRowKind::Reference).collect();
        assert_eq!(references.len(), covariates.len());
        for row in references {
            assert_eq!(row.hazard_ratio, Some(1.0));
            assert_eq!((row.ci_lower, row.ci_upper), (Some(1.0), Some(1.0)));
            assert_eq!(row.p_value, None);
            assert_eq!(row.hr_text(), "Ref.");
        }
    }

    #[test]
    fn test_from_model_estimate_intervals() {
        let records = trial_records(300, 22);
        let fit = fit_model(&records, &[Covariate::Treatment, Covariate::Node4], &[], &FitOptions::default()).unwrap();
        let table = ForestTable::from_model(&fit, &records);

        let estimates: Vec<&ForestRow> = table.rows.iter().filter(|r| r.kind == ForestRowKind::Estimate).collect();
        let fitted: Vec<_> = fit.estimates.iter().filter(|e| e.std_error.is_some()).collect();
        assert_eq!(estimates.len(), fitted.len());
        assert_eq!(estimates.len(), 3);

        for (row, estimate) in estimates.iter().zip(fitted) {
            let se = estimate.std_error.unwrap();
            let log_hr = estimate.hazard_ratio.ln();
            assert_eq!(row.label, estimate.level_label);
            assert_relative_eq!(row.hazard_ratio.unwrap(), estimate.hazard_ratio);
            assert_relative_eq!(row.ci_lower.unwrap(), (log_hr - 1.96 * se).exp(), max_relative = 1e-12);
            assert_relative_eq!(row.ci_upper.unwrap(), (log_hr + 1.96 * se).exp(), max_relative = 1e-12);
            assert_eq!(row.p_value, estimate.p_value);
            assert_eq!(row.n, Some(estimate.n));
        }
    }

    #[test]
    fn test_spacer_column_stays_blank() {
        let records = trial_records(200, 23);
        let fit = fit_model(&records, &[Covariate::Treatment, Covariate::Node4], &[], &FitOptions::default()).unwrap();
        let svg = ForestTable::from_model(&fit, &records).render_svg();

        let spacer = PLOT_R..(PLOT_R + SPACER_W);
        for attr in [" x=\"", " x1=\"", " x2=\""] {
            for piece in svg.split(attr).skip(1) {
                let value: f64 = piece.split('"').next().unwrap().parse().unwrap();
                assert!(
                    !(value > spacer.start && value < spacer.end),
                    "{attr} {value} falls in the spacer column"
                );
            }
        }
        assert!(HR_X - HR_W >= PLOT_R + SPACER_W);
    }

    fn estimate_row(hr: f64, lo: f64, hi: f64) -> ForestRow {
        ForestRow {
            kind: ForestRowKind::Estimate,
            label: "Lev+5FU".to_string(),
            n: Some(304),
            hazard_ratio: Some(hr),
            ci_lower: Some(lo),
            ci_upper: Some(hi),
            p_value: Some(0.0003),
        }
    }

    #[test]
    fn test_hr_text() {
        let row = estimate_row(0.7012, 0.5804, 0.8471);
        assert_eq!(row.hr_text(), "0.70 (0.58 to 0.85)");
        assert_eq!(row.p_text(), "<0.001");

        let reference = ForestRow { kind: ForestRowKind::Reference, p_value: None, ..row };
        assert_eq!(reference.hr_text(), "Ref.");
        assert_eq!(reference.p_text(), "");
    }

    #[test]
    fn test_log_ticks() {
        assert_eq!(log_ticks(0.4, 3.0), vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_render_has_rule_and_reference_line() {
        let table = ForestTable {
            rows: vec![
                ForestRow {
                    kind: ForestRowKind::Total,
                    label: "Total participants (N = 10)".to_string(),
                    n: Some(10),
                    hazard_ratio: None,
                    ci_lower: None,
                    ci_upper: None,
                    p_value: None,
                },
                ForestRow {
                    kind: ForestRowKind::Header,
                    label: Covariate::Treatment.label().to_string(),
                    n: None,
                    hazard_ratio: None,
                    ci_lower: None,
                    ci_upper: None,
                    p_value: None,
                },
                estimate_row(0.7, 0.58, 0.85),
            ],
        };
        let svg = table.render_svg();
        assert!(svg.contains("HR (95% CI)"));
        assert!(svg.contains(r#"font-weight="bold">Treatment<"#));
        assert!(svg.contains("0.70 (0.58 to 0.85)"));
        assert!(svg.contains("stroke-dasharray"));
        assert!(svg.contains("Hazard ratio"));
    }
}
