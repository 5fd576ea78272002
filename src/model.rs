use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::Serialize;
use crate::{
    data::SurvivalData,
    error::{SurvError, Result},
    optimization::{invert_matrix, CoxOptimizer, OptimizationConfig, OptimizationResult, TieMethod},
    stats::{normal_two_sided_p, Z_95},
};

/// normal-approximation interval on the log-hazard scale: exp(ln(hr) +- 1.96 se)
pub fn hazard_ratio_interval(hazard_ratio: f64, std_error: f64) -> (f64, f64) {
    let log_hr = hazard_ratio.ln();
    ((log_hr - Z_95 * std_error).exp(), (log_hr + Z_95 * std_error).exp())
}

/// cox proportional hazards model, optionally stratified through the data
#[derive(Debug, Clone)]
pub struct CoxModel {
    fit: Option<OptimizationResult>,    // fitted state
    covariance: Option<Array2<f64>>,    // inverse information
    n_samples: usize,
    n_events: usize,
    n_strata: usize,
    ties: TieMethod,
    max_iterations: usize,              // newton-raphson limit
    tolerance: f64,                     // relative loglik change
    feature_names: Option<Vec<String>>, // optional feature labels
}

impl Default for CoxModel {
    fn default() -> Self {
        let config = OptimizationConfig::default();
        Self {
            fit: None,
            covariance: None,
            n_samples: 0,
            n_events: 0,
            n_strata: 0,
            ties: config.ties,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            feature_names: None,
        }
    }
}

impl CoxModel {
    /// new cox model w/ defaults (efron ties)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ties(mut self, ties: TieMethod) -> Self {
        self.ties = ties;
        self
    }

    /// max iterations before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// how close is close enough for convergence
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// give names to your features for nicer output
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = Some(names);
        self
    }

    /// fit the model to data - this does the actual work
    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        if let Some(names) = &self.feature_names {
            if names.len() != data.n_features() {
                return Err(SurvError::invalid_dimensions(format!(
                    "{} feature names for {} features",
                    names.len(),
                    data.n_features()
                )));
            }
        }
        if !(self.tolerance > 0.0) {
            return Err(SurvError::invalid_parameter("tolerance", self.tolerance));
        }

        let optimizer = CoxOptimizer::new(OptimizationConfig {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            ties: self.ties,
            ..OptimizationConfig::default()
        });

        let result = optimizer.optimize(data)?;
        let covariance = invert_matrix(&result.information)?;
        if covariance.diag().iter().any(|v| !(*v >= 0.0) || !v.is_finite()) {
            return Err(SurvError::numerical_error(
                "information matrix isn't positive definite at the estimate"
            ));
        }

        self.n_samples = data.n_samples();
        self.n_events = data.n_events();
        self.n_strata = data.n_strata();
        self.covariance = Some(covariance);
        self.fit = Some(result);

        Ok(self)
    }

    fn fitted(&self) -> Result<&OptimizationResult> {
        self.fit.as_ref().ok_or(SurvError::ModelNotFitted)
    }

    /// get the fitted coefficients (betas)
    pub fn coefficients(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.fitted()?.coefficients.view())
    }

    /// variance-covariance matrix of the coefficients
    pub fn covariance(&self) -> Result<ArrayView2<'_, f64>> {
        self.covariance.as_ref().map(|c| c.view()).ok_or(SurvError::ModelNotFitted)
    }

    pub fn standard_errors(&self) -> Result<Array1<f64>> {
        Ok(self.covariance()?.diag().mapv(f64::sqrt))
    }

    pub fn log_likelihood(&self) -> Result<f64> {
        Ok(self.fitted()?.log_likelihood)
    }

    pub fn null_log_likelihood(&self) -> Result<f64> {
        Ok(self.fitted()?.null_log_likelihood)
    }

    pub fn score_statistic(&self) -> Result<f64> {
        Ok(self.fitted()?.score_statistic)
    }

    pub fn ties(&self) -> TieMethod {
        self.ties
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// predict linear predictors (log relative hazard) for new patients
    pub fn predict(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let coefs = self.coefficients()?;

        if covariates.ncols() != coefs.len() {
            return Err(SurvError::invalid_dimensions(
                format!("feature count mismatch: expected {}, got {}",
                       coefs.len(), covariates.ncols())
            ));
        }

        Ok(covariates.dot(&coefs))
    }

    /// predict hazard ratios (exp of linear predictors)
    pub fn predict_hazard_ratios(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let linear_predictors = self.predict(covariates)?;
        Ok(linear_predictors.mapv(f64::exp))
    }

    /// get a nice summary of the fitted model
    pub fn summary(&self) -> Result<CoxModelSummary> {
        let fit = self.fitted()?;
        let se = self.standard_errors()?;

        let rows = fit
            .coefficients
            .iter()
            .zip(se.iter())
            .enumerate()
            .map(|(i, (&coef, &std_error))| {
                let name = match &self.feature_names {
                    Some(names) => names[i].clone(),
                    None => format!("x{}", i),
                };
                let hazard_ratio = coef.exp();
                let (ci_lower, ci_upper) = hazard_ratio_interval(hazard_ratio, std_error);
                let z = coef / std_error;
                CoefficientRow {
                    name,
                    coefficient: coef,
                    hazard_ratio,
                    std_error,
                    z,
                    p_value: normal_two_sided_p(z),
                    ci_lower,
                    ci_upper,
                }
            })
            .collect();

        Ok(CoxModelSummary {
            rows,
            n_samples: self.n_samples,
            n_events: self.n_events,
            n_strata: self.n_strata,
            ties: self.ties,
            log_likelihood: fit.log_likelihood,
            null_log_likelihood: fit.null_log_likelihood,
            iterations: fit.iterations,
        })
    }

    /// has this model been fit to data yet?
    pub fn is_fitted(&self) -> bool {
        self.fit.is_some()
    }
}

/// one coefficient of the fitted model
#[derive(Debug, Clone, Serialize)]
pub struct CoefficientRow {
    pub name: String,
    pub coefficient: f64,
    pub hazard_ratio: f64,
    pub std_error: f64,
    pub z: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// what the model learned
#[derive(Debug, Clone, Serialize)]
pub struct CoxModelSummary {
    pub rows: Vec<CoefficientRow>,
    pub n_samples: usize,
    pub n_events: usize,
    pub n_strata: usize,
    pub ties: TieMethod,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub iterations: usize,
}

impl CoxModelSummary {
    pub fn row(&self, name: &str) -> Option<&CoefficientRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for CoxModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cox proportional hazards model ({:?} ties)", self.ties)?;
        writeln!(f, "n = {}, events = {}, strata = {}", self.n_samples, self.n_events, self.n_strata)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<24} {:>10} {:>10} {:>10} {:>10} {:>21}",
            "term", "coef", "hr", "se", "p", "95% ci"
        )?;
        writeln!(f, "{:-<90}", "")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<24} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} - {:<8.4}",
                row.name, row.coefficient, row.hazard_ratio, row.std_error, row.p_value, row.ci_lower, row.ci_upper
            )?;
        }
        write!(
            f,
            "log-likelihood: {:.4} (null {:.4}), {} iterations",
            self.log_likelihood, self.null_log_likelihood, self.iterations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use approx::assert_relative_eq;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let events = vec![true, false, true, true, false, true, true, false];
        let covariates = Array2::from_shape_vec((8, 2), vec![
            1.0, 0.0,
            0.0, 1.0,
            1.0, 1.0,
            0.0, 0.0,
            0.0, 1.0,
            1.0, 0.0,
            0.0, 1.0,
            0.0, 0.0,
        ]).unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_model_creation() {
        let model = CoxModel::new()
            .with_ties(TieMethod::Breslow)
            .with_max_iterations(50);

        assert_eq!(model.max_iterations, 50);
        assert_eq!(model.ties(), TieMethod::Breslow);
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_model_not_fitted_error() {
        let model = CoxModel::new();
        assert!(model.coefficients().is_err());
        assert!(model.summary().is_err());

        let covariates = Array2::zeros((5, 2));
        assert!(model.predict(covariates.view()).is_err());
    }

    #[test]
    fn test_feature_names_must_match() {
        let data = create_test_data();
        let mut model = CoxModel::new().with_feature_names(vec!["only_one".to_string()]);
        assert!(model.fit(&data).is_err());
    }

    #[test]
    fn test_summary_rows() {
        let data = create_test_data();
        let mut model = CoxModel::new()
            .with_feature_names(vec!["a".to_string(), "b".to_string()]);
        model.fit(&data).unwrap();

        let summary = model.summary().unwrap();
        assert_eq!(summary.rows.len(), 2);
        assert_eq!(summary.n_events, 5);
        let a = summary.row("a").unwrap();
        assert_relative_eq!(a.hazard_ratio, a.coefficient.exp(), epsilon = 1e-12);
        assert!(a.ci_lower <= a.hazard_ratio && a.hazard_ratio <= a.ci_upper);
        assert_relative_eq!(a.z, a.coefficient / a.std_error, epsilon = 1e-12);
        assert!(format!("{summary}").contains("cox proportional hazards model"));
    }

    #[test]
    fn test_interval_reconstruction() {
        let (lo, hi) = hazard_ratio_interval(0.7, 0.1);
        assert_relative_eq!(lo, (0.7f64.ln() - 1.96 * 0.1).exp(), epsilon = 1e-12);
        assert_relative_eq!(hi, (0.7f64.ln() + 1.96 * 0.1).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_prediction_dimension_mismatch() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        let wrong_covariates = Array2::zeros((5, 3));
        assert!(model.predict(wrong_covariates.view()).is_err());
    }
}
