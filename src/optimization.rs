use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use crate::{
    data::{EventGroup, SurvivalData},
    error::{SurvError, Result},
};

/// how tied event times share the risk set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieMethod {
    /// efron approximation - the usual default
    #[default]
    Efron,
    /// breslow approximation - every tied death sees the full risk set
    Breslow,
}

/// configuration for the newton-raphson fit
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub max_iterations: usize,
    pub tolerance: f64,     // relative change in log-likelihood
    pub ties: TieMethod,
    pub max_halvings: usize, // step halvings before giving up on an iteration
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            tolerance: 1e-9,
            ties: TieMethod::Efron,
            max_halvings: 30,
        }
    }
}

/// everything the fit produces
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub coefficients: Array1<f64>,
    pub information: Array2<f64>,   // observed information at the estimate
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,   // at beta = 0
    pub score_statistic: f64,       // score test of beta = 0
    pub iterations: usize,
}

/// log partial likelihood, score & information at one beta
#[derive(Debug, Clone)]
pub struct LikelihoodDerivatives {
    pub log_likelihood: f64,
    pub gradient: Array1<f64>,
    pub information: Array2<f64>,
}

/// per-group risk set sums, weighted by exp(eta)
struct GroupSums {
    s0: f64,
    s1: Array1<f64>,
    s2: Array2<f64>,
    d0: f64,
    d1: Array1<f64>,
    d2: Array2<f64>,
}

fn accumulate(x: ArrayView2<f64>, weights: &Array1<f64>, rows: &[usize], p: usize) -> (f64, Array1<f64>, Array2<f64>) {
    let mut s0 = 0.0;
    let mut s1 = Array1::zeros(p);
    let mut s2 = Array2::zeros((p, p));
    for &i in rows {
        let w = weights[i];
        let xi = x.row(i);
        s0 += w;
        for j in 0..p {
            let wxj = w * xi[j];
            s1[j] += wxj;
            for k in 0..=j {
                s2[[j, k]] += wxj * xi[k];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            s2[[k, j]] = s2[[j, k]];
        }
    }
    (s0, s1, s2)
}

fn group_sums(data: &SurvivalData, weights: &Array1<f64>, group: &EventGroup) -> GroupSums {
    let p = data.n_features();
    let x = data.covariates();
    let (s0, s1, s2) = accumulate(x, weights, &group.at_risk, p);
    let (d0, d1, d2) = accumulate(x, weights, &group.deaths, p);
    GroupSums { s0, s1, s2, d0, d1, d2 }
}

/// fraction of the tied deaths removed from the risk set for the k-th death
fn tie_fraction(ties: TieMethod, k: usize, d: usize) -> f64 {
    match ties {
        TieMethod::Efron => k as f64 / d as f64,
        TieMethod::Breslow => 0.0,
    }
}

/// exp(x beta) with a sanity check
pub(crate) fn risk_weights(data: &SurvivalData, beta: &Array1<f64>) -> Result<Array1<f64>> {
    let weights = data.covariates().dot(beta).mapv(f64::exp);
    if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
        return Err(SurvError::numerical_error(
            "risk weights overflowed - coefficients are diverging"
        ));
    }
    Ok(weights)
}

/// weighted mean & covariance of x over one (tie-adjusted) risk set
#[derive(Debug, Clone)]
pub(crate) struct RiskSetMoments {
    pub denom: f64,
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
}

/// one entry per tied death of `group`
pub(crate) fn risk_set_moments(
    data: &SurvivalData,
    weights: &Array1<f64>,
    group: &EventGroup,
    ties: TieMethod,
) -> Result<Vec<RiskSetMoments>> {
    let p = data.n_features();
    let sums = group_sums(data, weights, group);
    let d = group.deaths.len();

    let mut moments = Vec::with_capacity(d);
    for k in 0..d {
        let f = tie_fraction(ties, k, d);
        let denom = sums.s0 - f * sums.d0;
        if denom <= 0.0 || !denom.is_finite() {
            return Err(SurvError::numerical_error("risk set sum is non-positive"));
        }
        let mean = (&sums.s1 - &(f * &sums.d1)) / denom;
        let mut covariance = (&sums.s2 - &(f * &sums.d2)) / denom;
        for j in 0..p {
            for l in 0..p {
                covariance[[j, l]] -= mean[j] * mean[l];
            }
        }
        moments.push(RiskSetMoments { denom, mean, covariance });
    }
    Ok(moments)
}

/// log partial likelihood with its gradient & information matrix
pub fn likelihood_derivatives(
    data: &SurvivalData,
    beta: &Array1<f64>,
    ties: TieMethod,
) -> Result<LikelihoodDerivatives> {
    let p = data.n_features();
    if beta.len() != p {
        return Err(SurvError::invalid_dimensions(
            format!("beta has {} entries, data has {} features", beta.len(), p)
        ));
    }

    let weights = risk_weights(data, beta)?;
    let eta = data.covariates().dot(beta);
    let x = data.covariates();

    let mut loglik = 0.0;
    let mut gradient = Array1::zeros(p);
    let mut information = Array2::zeros((p, p));

    for group in data.event_groups() {
        for &i in &group.deaths {
            loglik += eta[i];
            gradient += &x.row(i);
        }

        for m in risk_set_moments(data, &weights, group, ties)? {
            loglik -= m.denom.ln();
            gradient -= &m.mean;
            information += &m.covariance;
        }
    }

    Ok(LikelihoodDerivatives { log_likelihood: loglik, gradient, information })
}

/// cox partial-likelihood maximiser (newton-raphson w/ step halving)
pub struct CoxOptimizer {
    config: OptimizationConfig,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// fit starting from beta = 0
    pub fn optimize(&self, data: &SurvivalData) -> Result<OptimizationResult> {
        let p = data.n_features();
        if data.n_events() == 0 {
            return Err(SurvError::invalid_survival_data("no events - nothing to fit"));
        }

        let mut beta = Array1::zeros(p);
        let mut current = likelihood_derivatives(data, &beta, self.config.ties)?;
        let null_log_likelihood = current.log_likelihood;

        let score_statistic = if p == 0 {
            0.0
        } else {
            let step = solve_linear_system(&current.information, &current.gradient)?;
            current.gradient.dot(&step)
        };

        if p == 0 {
            return Ok(OptimizationResult {
                coefficients: beta,
                information: current.information,
                log_likelihood: null_log_likelihood,
                null_log_likelihood,
                score_statistic,
                iterations: 0,
            });
        }

        for iteration in 1..=self.config.max_iterations {
            let step = solve_linear_system(&current.information, &current.gradient)?;
            let (next_beta, next) = self.halving_step(data, &beta, step, current.log_likelihood)?;

            let previous = current.log_likelihood;
            beta = next_beta;
            current = next;

            tracing::debug!(
                iteration,
                log_likelihood = current.log_likelihood,
                "newton-raphson step"
            );

            if converged(previous, current.log_likelihood, self.config.tolerance) {
                return Ok(OptimizationResult {
                    coefficients: beta,
                    information: current.information,
                    log_likelihood: current.log_likelihood,
                    null_log_likelihood,
                    score_statistic,
                    iterations: iteration,
                });
            }
        }

        Err(SurvError::optimization_failed(format!(
            "newton-raphson didn't converge in {} iterations",
            self.config.max_iterations
        )))
    }

    // take the newton step, halving it back toward beta while the likelihood drops
    fn halving_step(
        &self,
        data: &SurvivalData,
        beta: &Array1<f64>,
        step: Array1<f64>,
        loglik: f64,
    ) -> Result<(Array1<f64>, LikelihoodDerivatives)> {
        let mut step = step;
        for _ in 0..=self.config.max_halvings {
            let candidate = beta + &step;
            match likelihood_derivatives(data, &candidate, self.config.ties) {
                Ok(next) if next.log_likelihood.is_finite() && next.log_likelihood >= loglik - 1e-12 => {
                    return Ok((candidate, next));
                }
                Ok(_) | Err(SurvError::NumericalError { .. }) => {
                    step.mapv_inplace(|s| s / 2.0);
                }
                Err(e) => return Err(e),
            }
        }
        Err(SurvError::optimization_failed(
            "step halving couldn't improve the log-likelihood"
        ))
    }
}

fn converged(previous: f64, current: f64, tolerance: f64) -> bool {
    if current == 0.0 {
        return (previous - current).abs() <= tolerance;
    }
    (1.0 - previous / current).abs() <= tolerance
}

/// solve Ax = b by gaussian elimination w/ partial pivoting
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(SurvError::invalid_dimensions("matrix dimensions mismatch"));
    }

    let mut a_copy = a.clone();
    let mut b_copy = b.clone();
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);

    // forward elimination
    for i in 0..n {
        let mut max_row = i;
        for k in i + 1..n {
            if a_copy[[k, i]].abs() > a_copy[[max_row, i]].abs() {
                max_row = k;
            }
        }

        if a_copy[[max_row, i]].abs() < 1e-12 * scale {
            return Err(SurvError::numerical_error("matrix is singular"));
        }

        if max_row != i {
            for j in 0..n {
                a_copy.swap([i, j], [max_row, j]);
            }
            b_copy.swap(i, max_row);
        }

        for k in i + 1..n {
            let factor = a_copy[[k, i]] / a_copy[[i, i]];
            for j in i..n {
                a_copy[[k, j]] -= factor * a_copy[[i, j]];
            }
            b_copy[k] -= factor * b_copy[i];
        }
    }

    // back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = b_copy[i];
        for j in i + 1..n {
            x[i] -= a_copy[[i, j]] * x[j];
        }
        x[i] /= a_copy[[i, i]];
    }

    Ok(x)
}

/// matrix inverse one column at a time
pub fn invert_matrix(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let mut inverse = Array2::zeros((n, n));
    for j in 0..n {
        let mut e = Array1::zeros(n);
        e[j] = 1.0;
        let column = solve_linear_system(a, &e)?;
        inverse.column_mut(j).assign(&column);
    }
    Ok(inverse)
}
