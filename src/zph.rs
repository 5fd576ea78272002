//! proportional-hazards check on scaled schoenfeld residuals
//!
//! Each model column x gets a companion column x * g(t), g a transform of
//! event time. The score test of the companion columns at the fitted beta,
//! per covariate & jointly, is the test of a time-constant effect. The
//! residual panels show beta + n_events * V r_i over time with a lowess
//! smooth, which stays flat when the hazard ratio is constant.

use ::lowess::prelude::{Batch, Lowess};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::cleaning::AnalysisRecord;
use crate::covariate::Covariate;
use crate::error::{Result, SurvError};
use crate::km::KaplanMeier;
use crate::metrics::ChiSquareTest;
use crate::optimization::{risk_set_moments, risk_weights, solve_linear_system};
use crate::regression::{fit_model, FitOptions, FittedModel};

/// time scale the residual trend is tested against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeTransform {
    /// 1 - left-continuous pooled kaplan-meier
    #[default]
    Km,
    Identity,
    Log,
    Rank,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZphSettings {
    pub transform: TimeTransform,
    /// p below this flags a violation
    pub alpha: f64,
    pub smoother_span: f64,
}

impl Default for ZphSettings {
    fn default() -> Self {
        Self {
            transform: TimeTransform::Km,
            alpha: 0.05,
            smoother_span: 2.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZphTerm {
    pub covariate: Covariate,
    pub test: ChiSquareTest,
    pub violates: bool,
}

/// residuals of one model column
#[derive(Debug, Clone, Serialize)]
pub struct ResidualSeries {
    pub term: String,
    pub beta: f64,
    /// (event time, scaled residual), by time
    pub points: Vec<(f64, f64)>,
    pub smooth: Vec<(f64, f64)>,
    /// p-value of the covariate the column belongs to
    pub p_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZphResult {
    pub transform: TimeTransform,
    pub alpha: f64,
    pub terms: Vec<ZphTerm>,
    pub global: ChiSquareTest,
    pub residuals: Vec<ResidualSeries>,
}

impl ZphResult {
    pub fn violations(&self) -> Vec<Covariate> {
        self.terms.iter().filter(|t| t.violates).map(|t| t.covariate).collect()
    }

    pub fn term(&self, covariate: Covariate) -> Option<&ZphTerm> {
        self.terms.iter().find(|t| t.covariate == covariate)
    }
}

/// g(t) at each event group's time, before centring
fn transformed_times(fit: &FittedModel, transform: TimeTransform) -> Result<Vec<f64>> {
    let data = fit.data();
    let groups = data.event_groups();
    Ok(match transform {
        TimeTransform::Identity => groups.iter().map(|g| g.time).collect(),
        TimeTransform::Log => groups.iter().map(|g| g.time.max(f64::MIN_POSITIVE).ln()).collect(),
        TimeTransform::Km => {
            let times = data.times().to_vec();
            let km = KaplanMeier::fit("pooled", &times, data.events())?;
            groups
                .iter()
                .map(|g| {
                    let before = km
                        .steps
                        .iter()
                        .take_while(|s| s.time < g.time)
                        .last()
                        .map_or(1.0, |s| s.survival);
                    1.0 - before
                })
                .collect()
        }
        TimeTransform::Rank => {
            let mut death_times: Vec<f64> = groups
                .iter()
                .flat_map(|g| std::iter::repeat_n(g.time, g.deaths.len()))
                .collect();
            death_times.sort_by(f64::total_cmp);
            groups
                .iter()
                .map(|g| {
                    let below = death_times.partition_point(|t| *t < g.time);
                    let through = death_times.partition_point(|t| *t <= g.time);
                    // mid-rank of the tied block
                    (below + through + 1) as f64 / 2.0
                })
                .collect()
        }
    })
}

/// test every covariate of `fit` & build the residual series
pub fn test_proportional_hazards(fit: &FittedModel, settings: &ZphSettings) -> Result<ZphResult> {
    let data = fit.data();
    let model = fit.model();
    let p = data.n_features();
    if p == 0 {
        return Err(SurvError::invalid_parameter("covariates", "model has no coefficients to test"));
    }
    if !(settings.alpha > 0.0 && settings.alpha < 1.0) {
        return Err(SurvError::invalid_parameter("zph_alpha", settings.alpha));
    }

    let beta = model.coefficients()?.to_owned();
    let covariance = model.covariance()?.to_owned();
    let weights = risk_weights(data, &beta)?;
    let x = data.covariates();
    let n_events = data.n_events() as f64;

    let mut g = transformed_times(fit, settings.transform)?;
    let g_mean = data
        .event_groups()
        .iter()
        .zip(&g)
        .map(|(group, v)| v * group.deaths.len() as f64)
        .sum::<f64>()
        / n_events;
    g.iter_mut().for_each(|v| *v -= g_mean);

    let mut score = Array1::<f64>::zeros(2 * p);
    let mut information = Array2::<f64>::zeros((2 * p, 2 * p));
    let mut raw_points: Vec<(f64, Array1<f64>)> = Vec::with_capacity(data.n_events());

    for (group, &gt) in data.event_groups().iter().zip(&g) {
        let moments = risk_set_moments(data, &weights, group, model.ties())?;

        for &i in &group.deaths {
            for j in 0..p {
                score[j] += x[[i, j]];
                score[p + j] += gt * x[[i, j]];
            }
        }

        let mut mean_avg = Array1::<f64>::zeros(p);
        for m in &moments {
            for j in 0..p {
                score[j] -= m.mean[j];
                score[p + j] -= gt * m.mean[j];
                for l in 0..p {
                    let c = m.covariance[[j, l]];
                    information[[j, l]] += c;
                    information[[j, p + l]] += gt * c;
                    information[[p + j, l]] += gt * c;
                    information[[p + j, p + l]] += gt * gt * c;
                }
            }
            mean_avg += &m.mean;
        }
        mean_avg /= moments.len() as f64;

        for &i in &group.deaths {
            let r = &x.row(i) - &mean_avg;
            raw_points.push((group.time, r));
        }
    }

    let quadratic = |idx: &[usize]| -> Result<f64> {
        let u = Array1::from_iter(idx.iter().map(|&i| score[i]));
        let mut sub = Array2::zeros((idx.len(), idx.len()));
        for (a, &i) in idx.iter().enumerate() {
            for (b, &j) in idx.iter().enumerate() {
                sub[[a, b]] = information[[i, j]];
            }
        }
        Ok(u.dot(&solve_linear_system(&sub, &u)?))
    };

    let mut terms = Vec::with_capacity(fit.terms().len());
    for (covariate, range) in fit.terms() {
        let idx: Vec<usize> = (0..p).chain(range.clone().map(|j| p + j)).collect();
        let test = ChiSquareTest::new(quadratic(&idx)?.max(0.0), range.len());
        let violates = test.p_value < settings.alpha;
        if violates {
            tracing::warn!(
                covariate = covariate.key(),
                chisq = test.statistic,
                p_value = test.p_value,
                "proportional hazards violated"
            );
        }
        terms.push(ZphTerm { covariate: *covariate, test, violates });
    }

    let all: Vec<usize> = (0..2 * p).collect();
    let global = ChiSquareTest::new(quadratic(&all)?.max(0.0), p);

    raw_points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let scaled: Vec<(f64, Array1<f64>)> = raw_points
        .into_iter()
        .map(|(t, r)| (t, &beta + &(covariance.dot(&r) * n_events)))
        .collect();

    let names = fit.column_names();
    let mut residuals = Vec::with_capacity(p);
    for (covariate, range) in fit.terms() {
        let p_value = terms
            .iter()
            .find(|t| t.covariate == *covariate)
            .map_or(1.0, |t| t.test.p_value);
        for j in range.clone() {
            let points: Vec<(f64, f64)> = scaled.iter().map(|(t, s)| (*t, s[j])).collect();
            residuals.push(ResidualSeries {
                term: names[j].clone(),
                beta: beta[j],
                smooth: lowess_smooth(&points, settings.smoother_span)?,
                points,
                p_value,
            });
        }
    }

    tracing::info!(
        transform = ?settings.transform,
        global_chisq = global.statistic,
        global_p = global.p_value,
        violations = ?terms.iter().filter(|t| t.violates).map(|t| t.covariate.key()).collect::<Vec<_>>(),
        "tested proportional hazards"
    );

    Ok(ZphResult {
        transform: settings.transform,
        alpha: settings.alpha,
        terms,
        global,
        residuals,
    })
}

/// lowess smooth of residuals against time, one value per distinct x
pub fn lowess_smooth(points: &[(f64, f64)], span: f64) -> Result<Vec<(f64, f64)>> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    // too few points for a local line
    if sorted.len() < 3 {
        sorted.dedup_by(|a, b| a.0 == b.0);
        return Ok(sorted);
    }

    let (xs, ys): (Vec<f64>, Vec<f64>) = sorted.into_iter().unzip();
    let model = Lowess::new()
        .fraction(span)
        .iterations(3)
        .adapter(Batch)
        .build()
        .map_err(|e| SurvError::numerical_error(format!("lowess: {e}")))?;
    let fitted = model
        .fit(&xs, &ys)
        .map_err(|e| SurvError::numerical_error(format!("lowess: {e}")))?;

    let mut out: Vec<(f64, f64)> = Vec::with_capacity(xs.len());
    for (&x, &y) in xs.iter().zip(fitted.y.iter()) {
        if out.last().is_none_or(|&(last, _)| last != x) {
            out.push((x, y));
        }
    }
    Ok(out)
}

/// the multivariable refit with violators moved to strata, re-tested
#[derive(Debug, Clone, Serialize)]
pub struct StratifiedRefit {
    pub strata: Vec<Covariate>,
    pub model: FittedModel,
    pub zph: ZphResult,
}

/// `None` when nothing violates, or when every covariate does
pub fn stratified_refit(
    records: &[AnalysisRecord],
    fit: &FittedModel,
    zph: &ZphResult,
    options: &FitOptions,
    settings: &ZphSettings,
) -> Result<Option<StratifiedRefit>> {
    let violations = zph.violations();
    if violations.is_empty() {
        return Ok(None);
    }

    let covariates: Vec<Covariate> = fit
        .covariates
        .iter()
        .copied()
        .filter(|c| !violations.contains(c))
        .collect();
    let mut strata = fit.strata.clone();
    strata.extend(violations.iter().copied());
    if covariates.is_empty() {
        tracing::warn!(
            strata = ?strata.iter().map(|c| c.key()).collect::<Vec<_>>(),
            "every covariate violates, skipping the stratified refit"
        );
        return Ok(None);
    }

    let model = fit_model(records, &covariates, &strata, options)?;
    let zph = test_proportional_hazards(&model, settings)?;

    tracing::info!(
        strata = ?strata.iter().map(|c| c.key()).collect::<Vec<_>>(),
        n_strata = model.strata_labels.len(),
        global_p = zph.global.p_value,
        remaining_violations = zph.violations().len(),
        "refitted with violating covariates as strata"
    );

    Ok(Some(StratifiedRefit { strata, model, zph }))
}
