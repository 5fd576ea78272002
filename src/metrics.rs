use ndarray::ArrayView1;
use serde::Serialize;
use crate::{
    data::SurvivalData,
    error::{SurvError, Result},
    model::CoxModel,
    optimization::solve_linear_system,
    stats::chi_square_sf,
};

/// Harrell's C-index with tie handling - how often higher risk = shorter survival
pub fn concordance_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = risk_scores.len();
    if n != times.len() || n != events.len() {
        return Err(SurvError::invalid_dimensions(
            "risk scores, times, and events must have same length"
        ));
    }

    let mut concordant = 0.0;
    let mut discordant = 0.0;
    let mut tied_risk = 0.0;

    for i in 0..n {
        if !events[i] {
            continue; // censored obs can't anchor a pair
        }

        for j in 0..n {
            if i == j {
                continue;
            }

            // j outlived i (event later, or censored no earlier)
            if times[j] > times[i] || (!events[j] && times[j] >= times[i]) {
                if risk_scores[i] > risk_scores[j] {
                    concordant += 1.0;
                } else if risk_scores[i] < risk_scores[j] {
                    discordant += 1.0;
                } else {
                    tied_risk += 1.0;
                }
            }
        }
    }

    let total_pairs = concordant + discordant + tied_risk;
    if total_pairs == 0.0 {
        return Err(SurvError::numerical_error(
            "no comparable pairs for concordance calc"
        ));
    }

    Ok((concordant + 0.5 * tied_risk) / total_pairs)
}

/// breslow log partial likelihood of given risk scores (respects strata)
pub fn log_partial_likelihood(
    data: &SurvivalData,
    risk_scores: ArrayView1<f64>,
) -> Result<f64> {
    if risk_scores.len() != data.n_samples() {
        return Err(SurvError::invalid_dimensions(
            "risk scores length must match number of samples"
        ));
    }

    let mut loglik = 0.0;
    for group in data.event_groups() {
        // log-sum-exp, numerically stable
        let max_risk = group.at_risk.iter().map(|&i| risk_scores[i]).fold(f64::NEG_INFINITY, f64::max);
        let log_sum_exp = max_risk +
            group.at_risk.iter()
                .map(|&i| (risk_scores[i] - max_risk).exp())
                .sum::<f64>()
                .ln();

        for &event_idx in &group.deaths {
            loglik += risk_scores[event_idx] - log_sum_exp;
        }
    }

    Ok(loglik)
}

/// AIC for a cox model
pub fn aic(log_likelihood: f64, n_parameters: usize) -> f64 {
    2.0 * n_parameters as f64 - 2.0 * log_likelihood
}

/// BIC for a cox model (n = number of events)
pub fn bic(log_likelihood: f64, n_parameters: usize, n_events: usize) -> f64 {
    (n_parameters as f64) * (n_events as f64).ln() - 2.0 * log_likelihood
}

/// one chi-square test of all coefficients = 0
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChiSquareTest {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

impl ChiSquareTest {
    pub fn new(statistic: f64, df: usize) -> Self {
        Self { statistic, df, p_value: chi_square_sf(statistic, df) }
    }
}

/// model-level fit statistics
#[derive(Debug, Clone, Serialize)]
pub struct ModelMetrics {
    pub n_samples: usize,
    pub n_events: usize,
    pub concordance: f64,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub likelihood_ratio: ChiSquareTest,
    pub wald: ChiSquareTest,
    pub score: ChiSquareTest,
    pub aic: f64,
    pub bic: f64,
}

impl ModelMetrics {
    /// compute everything for a fitted model on the data it was fitted to
    pub fn compute(model: &CoxModel, data: &SurvivalData) -> Result<Self> {
        let beta = model.coefficients()?.to_owned();
        let df = beta.len();
        let risk_scores = model.predict(data.covariates())?;

        let log_likelihood = model.log_likelihood()?;
        let null_log_likelihood = model.null_log_likelihood()?;

        let covariance = model.covariance()?.to_owned();
        let wald_statistic = if df == 0 {
            0.0
        } else {
            beta.dot(&solve_linear_system(&covariance, &beta)?)
        };

        Ok(Self {
            n_samples: data.n_samples(),
            n_events: data.n_events(),
            concordance: concordance_index(risk_scores.view(), data.times(), data.events())?,
            log_likelihood,
            null_log_likelihood,
            likelihood_ratio: ChiSquareTest::new(2.0 * (log_likelihood - null_log_likelihood), df),
            wald: ChiSquareTest::new(wald_statistic, df),
            score: ChiSquareTest::new(model.score_statistic()?, df),
            aic: aic(log_likelihood, df),
            bic: bic(log_likelihood, df, data.n_events()),
        })
    }
}
