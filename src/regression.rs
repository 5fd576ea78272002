//! univariable & multivariable cox fits on the cleaned table, plus the
//! combined hazard-ratio table that sets them side by side

use rayon::prelude::*;
use serde::Serialize;

use crate::cleaning::AnalysisRecord;
use crate::covariate::{strata_codes, Covariate, Design, DesignColumn};
use crate::data::SurvivalData;
use crate::error::{Result, SurvError};
use crate::metrics::ModelMetrics;
use crate::model::{hazard_ratio_interval, CoxModel, CoxModelSummary};
use crate::optimization::TieMethod;
use crate::stats::format_p_value;

/// knobs shared by every fit in a report
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitOptions {
    pub ties: TieMethod,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            ties: TieMethod::Efron,
            max_iterations: 30,
            tolerance: 1e-9,
        }
    }
}

/// hazard ratio of one covariate level against the reference level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelEstimate {
    pub covariate: Covariate,
    pub level: usize,
    pub level_label: &'static str,
    /// coefficient name, `None` on the reference level
    pub term: Option<String>,
    /// observed records at this level
    pub n: usize,
    pub hazard_ratio: f64,
    pub std_error: Option<f64>,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: Option<f64>,
}

impl LevelEstimate {
    pub fn is_reference(&self) -> bool {
        self.term.is_none()
    }
}

/// a cox fit together with the design it came from
#[derive(Debug, Clone, Serialize)]
pub struct FittedModel {
    pub covariates: Vec<Covariate>,
    pub strata: Vec<Covariate>,
    pub strata_labels: Vec<String>,
    pub columns: Vec<DesignColumn>,
    pub summary: CoxModelSummary,
    pub metrics: ModelMetrics,
    pub estimates: Vec<LevelEstimate>,
    #[serde(skip)]
    terms: Vec<(Covariate, std::ops::Range<usize>)>,
    #[serde(skip)]
    model: CoxModel,
    #[serde(skip)]
    data: SurvivalData,
}

impl FittedModel {
    pub fn model(&self) -> &CoxModel {
        &self.model
    }

    /// the survival data the model was fitted to (strata included)
    pub fn data(&self) -> &SurvivalData {
        &self.data
    }

    /// column range of each covariate in model order
    pub fn terms(&self) -> &[(Covariate, std::ops::Range<usize>)] {
        &self.terms
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// all level rows of one covariate, reference first
    pub fn estimates_for(&self, covariate: Covariate) -> impl Iterator<Item = &LevelEstimate> {
        self.estimates.iter().filter(move |e| e.covariate == covariate)
    }

    /// hazard ratio of `level_label` of `covariate`, if that covariate is in the model
    pub fn hazard_ratio(&self, covariate: Covariate, level_label: &str) -> Option<f64> {
        self.estimates_for(covariate)
            .find(|e| e.level_label == level_label)
            .map(|e| e.hazard_ratio)
    }
}

/// fit `covariates` with treatment coding, baseline hazards split by `strata`
pub fn fit_model(
    records: &[AnalysisRecord],
    covariates: &[Covariate],
    strata: &[Covariate],
    options: &FitOptions,
) -> Result<FittedModel> {
    if records.is_empty() {
        return Err(SurvError::invalid_survival_data("no records to fit"));
    }
    if let Some(c) = covariates.iter().find(|c| strata.contains(c)) {
        return Err(SurvError::invalid_parameter("strata", format!("`{}` is also a model covariate", c.key())));
    }

    let design = Design::build(records, covariates);
    let columns = design.columns().to_vec();
    let terms = design.terms().to_vec();
    let names = design.column_names();

    let (codes, strata_labels) = if strata.is_empty() {
        (vec![0; records.len()], Vec::new())
    } else {
        strata_codes(records, strata)
    };

    let data = SurvivalData::with_strata(
        records.iter().map(|r| r.time).collect(),
        records.iter().map(|r| r.is_event()).collect(),
        design.into_matrix(),
        codes,
    )?;

    let mut model = CoxModel::new()
        .with_ties(options.ties)
        .with_max_iterations(options.max_iterations)
        .with_tolerance(options.tolerance)
        .with_feature_names(names);
    model.fit(&data)?;

    let summary = model.summary()?;
    let metrics = ModelMetrics::compute(&model, &data)?;

    let mut estimates = Vec::new();
    for (covariate, range) in &terms {
        let counts = covariate.level_counts(records);
        for (level, level_label) in covariate.levels().iter().copied().enumerate() {
            if level == 0 {
                estimates.push(LevelEstimate {
                    covariate: *covariate,
                    level,
                    level_label,
                    term: None,
                    n: counts[level],
                    hazard_ratio: 1.0,
                    std_error: None,
                    ci_lower: 1.0,
                    ci_upper: 1.0,
                    p_value: None,
                });
                continue;
            }
            let row = &summary.rows[range.start + level - 1];
            let (ci_lower, ci_upper) = hazard_ratio_interval(row.hazard_ratio, row.std_error);
            estimates.push(LevelEstimate {
                covariate: *covariate,
                level,
                level_label,
                term: Some(row.name.clone()),
                n: counts[level],
                hazard_ratio: row.hazard_ratio,
                std_error: Some(row.std_error),
                ci_lower,
                ci_upper,
                p_value: Some(row.p_value),
            });
        }
    }

    tracing::info!(
        covariates = ?covariates.iter().map(|c| c.key()).collect::<Vec<_>>(),
        strata = ?strata.iter().map(|c| c.key()).collect::<Vec<_>>(),
        n = summary.n_samples,
        events = summary.n_events,
        log_likelihood = summary.log_likelihood,
        iterations = summary.iterations,
        "fitted cox model"
    );

    Ok(FittedModel {
        covariates: covariates.to_vec(),
        strata: strata.to_vec(),
        strata_labels,
        columns,
        summary,
        metrics,
        estimates,
        terms,
        model,
        data,
    })
}

/// one single-covariate model per covariate, in the given order
pub fn fit_univariable(
    records: &[AnalysisRecord],
    covariates: &[Covariate],
    options: &FitOptions,
    parallel: bool,
) -> Result<Vec<FittedModel>> {
    if parallel {
        covariates
            .par_iter()
            .map(|c| fit_model(records, &[*c], &[], options))
            .collect()
    } else {
        covariates
            .iter()
            .map(|c| fit_model(records, &[*c], &[], options))
            .collect()
    }
}

pub fn fit_multivariable(
    records: &[AnalysisRecord],
    covariates: &[Covariate],
    options: &FitOptions,
) -> Result<FittedModel> {
    fit_model(records, covariates, &[], options)
}

/// display cells of one estimate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateCells {
    pub hazard_ratio: String,
    pub ci: String,
    pub p_value: String,
}

impl EstimateCells {
    pub(crate) fn from_estimate(estimate: &LevelEstimate) -> Self {
        if estimate.is_reference() {
            return Self {
                hazard_ratio: "-".to_string(),
                ci: "-".to_string(),
                p_value: "-".to_string(),
            };
        }
        Self {
            hazard_ratio: format!("{:.2}", estimate.hazard_ratio),
            ci: format!("{:.2}, {:.2}", estimate.ci_lower, estimate.ci_upper),
            p_value: estimate.p_value.map(format_p_value).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedRow {
    pub label: String,
    pub is_header: bool,
    /// model size, on header rows
    pub n: Option<usize>,
    pub univariable: Option<EstimateCells>,
    pub multivariable: Option<EstimateCells>,
}

/// univariable results stacked, the multivariable model beside them
#[derive(Debug, Clone, Serialize)]
pub struct CombinedTable {
    pub rows: Vec<CombinedRow>,
}

impl CombinedTable {
    pub const GROUPS: [(&'static str, usize); 3] = [("", 1), ("Univariable", 4), ("Multivariable", 3)];
    pub const HEADERS: [&'static str; 8] = ["Characteristic", "N", "HR", "95% CI", "p", "HR", "95% CI", "p"];

    pub fn build(univariable: &[FittedModel], multivariable: &FittedModel) -> Self {
        let mut rows = Vec::new();
        for fit in univariable {
            for &covariate in &fit.covariates {
                let in_multi = multivariable.covariates.contains(&covariate);
                rows.push(CombinedRow {
                    label: covariate.label().to_string(),
                    is_header: true,
                    n: Some(fit.summary.n_samples),
                    univariable: None,
                    multivariable: None,
                });
                for estimate in fit.estimates_for(covariate) {
                    let multi = in_multi
                        .then(|| {
                            multivariable
                                .estimates_for(covariate)
                                .find(|m| m.level == estimate.level)
                                .map(EstimateCells::from_estimate)
                        })
                        .flatten();
                    rows.push(CombinedRow {
                        label: estimate.level_label.to_string(),
                        is_header: false,
                        n: None,
                        univariable: Some(EstimateCells::from_estimate(estimate)),
                        multivariable: multi,
                    });
                }
            }
        }
        Self { rows }
    }

    /// flat cells in `HEADERS` order
    pub fn cells(row: &CombinedRow) -> Vec<String> {
        let mut cells = vec![row.label.clone(), row.n.map(|n| n.to_string()).unwrap_or_default()];
        for group in [&row.univariable, &row.multivariable] {
            match group {
                Some(c) => cells.extend([c.hazard_ratio.clone(), c.ci.clone(), c.p_value.clone()]),
                None => cells.extend([String::new(), String::new(), String::new()]),
            }
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Treatment;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn synthetic_records(n: usize, seed: u64) -> Vec<AnalysisRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let rx = Treatment::ALL[i % 3];
                let node4: u8 = rng.gen_bool(0.3).into();
                let differ: u8 = rng.gen_range(1..=3);
                let rate = 0.001 * if node4 == 1 { 2.5 } else { 1.0 } * if rx == Treatment::LevFu { 0.6 } else { 1.0 };
                let u: f64 = rng.gen_range(1e-9..1.0);
                let event_time = -u.ln() / rate;
                let censor_time: f64 = rng.gen_range(500.0..3000.0);
                let age = rng.gen_range(30..85);
                AnalysisRecord {
                    id: i as u32,
                    rx,
                    sex: rng.gen_range(0..=1),
                    age,
                    obstruct: rng.gen_bool(0.2).into(),
                    perfor: rng.gen_bool(0.15).into(),
                    adhere: 0,
                    nodes: Some(rng.gen_range(0..10)),
                    status: u8::from(event_time <= censor_time),
                    differ,
                    extent: rng.gen_range(1..=4),
                    surg: 0,
                    node4,
                    time: event_time.min(censor_time).round().max(1.0),
                    age_band: crate::cleaning::age_band(age),
                    sex_label: "Female",
                    differ_label: crate::cleaning::differ_label(differ).unwrap(),
                    extent_label: "Serosa",
                    surg_label: "Short",
                }
            })
            .collect()
    }

    #[test]
    fn test_reference_rows_are_exactly_one() {
        let records = synthetic_records(300, 7);
        let fit = fit_model(&records, &[Covariate::Treatment, Covariate::Node4], &[], &FitOptions::default()).unwrap();

        let reference: Vec<_> = fit.estimates.iter().filter(|e| e.is_reference()).collect();
        assert_eq!(reference.len(), 2);
        for e in reference {
            assert_eq!(e.hazard_ratio, 1.0);
            assert_eq!((e.ci_lower, e.ci_upper), (1.0, 1.0));
            assert!(e.p_value.is_none());
        }
        // 3 + 2 levels
        assert_eq!(fit.estimates.len(), 5);
    }

    #[test]
    fn test_recovers_effect_direction() {
        let records = synthetic_records(600, 11);
        let fit = fit_multivariable(&records, &[Covariate::Treatment, Covariate::Node4], &FitOptions::default()).unwrap();

        let node4 = fit.hazard_ratio(Covariate::Node4, "Yes").unwrap();
        let levfu = fit.hazard_ratio(Covariate::Treatment, "Lev+5FU").unwrap();
        assert!(node4 > 1.5, "node4 hr {node4}");
        assert!(levfu < 1.0, "lev+5fu hr {levfu}");

        let e = fit.estimates_for(Covariate::Node4).nth(1).unwrap();
        let se = e.std_error.unwrap();
        assert_relative_eq!(e.ci_lower, (e.hazard_ratio.ln() - 1.96 * se).exp(), epsilon = 1e-12);
        assert!(e.ci_lower <= e.hazard_ratio && e.hazard_ratio <= e.ci_upper);
    }

    #[test]
    fn test_single_stratum_equals_unstratified() {
        let records: Vec<_> = synthetic_records(200, 3)
            .into_iter()
            .map(|mut r| {
                r.surg = 1;
                r
            })
            .collect();
        let options = FitOptions::default();
        let plain = fit_model(&records, &[Covariate::Node4], &[], &options).unwrap();
        let stratified = fit_model(&records, &[Covariate::Node4], &[Covariate::Surg], &options).unwrap();

        assert_eq!(stratified.strata_labels, vec!["surg=Long"]);
        assert_relative_eq!(
            plain.summary.rows[0].coefficient,
            stratified.summary.rows[0].coefficient,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_strata_cannot_overlap_covariates() {
        let records = synthetic_records(50, 1);
        let err = fit_model(&records, &[Covariate::Differ], &[Covariate::Differ], &FitOptions::default());
        assert!(matches!(err, Err(SurvError::InvalidParameter { .. })));
    }

    #[test]
    fn test_univariable_order_is_stable() {
        let records = synthetic_records(250, 5);
        let covariates = [Covariate::Node4, Covariate::Treatment, Covariate::Differ];
        let sequential = fit_univariable(&records, &covariates, &FitOptions::default(), false).unwrap();
        let parallel = fit_univariable(&records, &covariates, &FitOptions::default(), true).unwrap();

        for (s, p) in sequential.iter().zip(&parallel) {
            assert_eq!(s.covariates, p.covariates);
            assert_relative_eq!(s.summary.log_likelihood, p.summary.log_likelihood, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_combined_table_blanks_and_placeholders() {
        let records = synthetic_records(300, 9);
        let options = FitOptions::default();
        let uni = fit_univariable(&records, &[Covariate::Treatment, Covariate::Perfor], &options, false).unwrap();
        let multi = fit_multivariable(&records, &[Covariate::Treatment], &options).unwrap();
        let table = CombinedTable::build(&uni, &multi);

        // header + 3 levels, header + 2 levels
        assert_eq!(table.rows.len(), 7);
        let obs = &table.rows[1];
        assert_eq!(obs.univariable.as_ref().unwrap().hazard_ratio, "-");
        assert_eq!(obs.multivariable.as_ref().unwrap().ci, "-");

        let perfor_yes = &table.rows[6];
        assert!(perfor_yes.multivariable.is_none());
        let cells = CombinedTable::cells(perfor_yes);
        assert_eq!(cells.len(), CombinedTable::HEADERS.len());
        assert_eq!(cells[7], "");
    }
}
