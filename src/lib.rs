//! # colon survival
//!
//! survival report for the colon cancer adjuvant chemotherapy trial - from the
//! raw csv to a finished document
//!
//! ## what you get
//!
//! - cleaning & labelling of the trial table
//! - descriptive table per treatment arm
//! - kaplan-meier curves w/ log-rank tests for ten covariates
//! - univariable & multivariable cox regression (efron or breslow ties, strata)
//! - forest plot of the multivariable model
//! - schoenfeld residual test of proportional hazards + a stratified refit
//! - html, paged html & docx output
//!
//! ## quick start
//!
//! ```rust
//! use colon_survival::{fit_model, Covariate, FitOptions, SurvivalData, CoxModel};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // the cox engine works on plain arrays too
//! let times = vec![1.0, 2.5, 3.2, 4.1, 5.0, 6.3];
//! let events = vec![true, false, true, true, false, true];
//! let covariates = Array2::from_shape_vec((6, 1), vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0])?;
//! let data = SurvivalData::new(times, events, covariates)?;
//!
//! let mut model = CoxModel::new();
//! model.fit(&data)?;
//! let hazard_ratios = model.predict_hazard_ratios(data.covariates())?;
//! # let _ = (hazard_ratios, fit_model, Covariate::Treatment, FitOptions::default());
//! # Ok(())
//! # }
//! ```
//!
//! the whole report is one call:
//!
//! ```rust,no_run
//! use colon_survival::{pipeline, ReportConfig};
//!
//! # fn main() -> colon_survival::Result<()> {
//! let config = ReportConfig::load_or_default(None)?;
//! let path = pipeline::render_report(&config)?;
//! println!("wrote {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod cleaning;
pub mod cli;
pub mod config;
pub mod covariate;
pub mod data;
pub mod dataset;
pub mod error;
pub mod forest;
pub mod km;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod pipeline;
pub mod plot;
pub mod regression;
pub mod report;
pub mod stats;
pub mod summary;
pub mod zph;

pub use cleaning::{clean, AnalysisRecord, CleanedTable};
pub use config::{ReportConfig, ReportFormat, ReportKind};
pub use covariate::{Covariate, CURVE_COVARIATES, MULTIVARIABLE_COVARIATES};
pub use data::SurvivalData;
pub use dataset::{Dataset, EventType, RawRecord, Treatment};
pub use error::{Result, SurvError};
pub use km::{estimate_by_covariate, log_rank_test, KaplanMeier};
pub use model::CoxModel;
pub use optimization::TieMethod;
pub use regression::{fit_model, fit_multivariable, fit_univariable, FitOptions, FittedModel};
pub use zph::{stratified_refit, test_proportional_hazards, TimeTransform, ZphSettings};
