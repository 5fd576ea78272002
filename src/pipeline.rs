//! the report pipeline: load, clean, describe, estimate, fit, check, render
//!
//! Stages run in order on one immutable cleaned table. Only the curve
//! estimates & univariable fits fan out over rayon, and their output keeps
//! covariate order.

use std::path::PathBuf;

use rayon::prelude::*;
use serde::Serialize;

use crate::cleaning::{clean, AnalysisRecord};
use crate::config::{ReportConfig, ReportKind};
use crate::covariate::{Covariate, CURVE_COVARIATES, MULTIVARIABLE_COVARIATES};
use crate::dataset::{Dataset, EventType};
use crate::error::{Result, SurvError};
use crate::forest::ForestTable;
use crate::km::{estimate_by_covariate, CovariateCurves};
use crate::metrics::ChiSquareTest;
use crate::plot::{km_grid, residual_grid};
use crate::regression::{fit_multivariable, fit_univariable, CombinedTable, EstimateCells, FittedModel};
use crate::report::{write_report, Document, Section, Table};
use crate::stats::format_p_value;
use crate::summary::{build_summary, SummaryTable};
use crate::zph::{stratified_refit, test_proportional_hazards, StratifiedRefit, ZphResult};

/// every number the fixed-time report shows
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResults {
    pub dataset: String,
    pub target_event: EventType,
    pub raw_rows: usize,
    pub event_filtered: usize,
    pub dropped_missing_differ: usize,
    pub n_subjects: usize,
    pub n_events: usize,
    pub summary: SummaryTable,
    pub curves: Vec<CovariateCurves>,
    pub univariable: Vec<FittedModel>,
    pub multivariable: FittedModel,
    pub combined: CombinedTable,
    pub forest: ForestTable,
    pub zph: ZphResult,
    pub stratified: Option<StratifiedRefit>,
}

/// load the configured dataset & run every analysis stage
pub fn analyze(config: &ReportConfig) -> Result<AnalysisResults> {
    let dataset = Dataset::load_named(&config.data.dir, &config.data.dataset)?;
    run_analysis(&dataset, config)
}

/// every analysis stage on an already loaded dataset
pub fn run_analysis(dataset: &Dataset, config: &ReportConfig) -> Result<AnalysisResults> {
    let analysis = &config.analysis;
    let options = config.fit_options();

    let cleaned = clean(dataset, config.data.target_event)?;
    if cleaned.is_empty() {
        return Err(SurvError::invalid_survival_data(format!(
            "no {} rows with a differentiation grade in `{}`",
            cleaned.target(),
            dataset.name()
        )));
    }
    let records = cleaned.records();

    let summary = build_summary(records);

    let curves = estimate_curves(records, analysis.risk_table_break_days, analysis.parallel)?;
    tracing::info!(
        covariates = curves.len(),
        significant = curves
            .iter()
            .filter(|c| c.log_rank.as_ref().is_some_and(|t| t.p_value < 0.05))
            .count(),
        "estimated survival curves"
    );

    let univariable = fit_univariable(records, &CURVE_COVARIATES, &options, analysis.parallel)?;
    let multivariable = fit_multivariable(records, &MULTIVARIABLE_COVARIATES, &options)?;
    let combined = CombinedTable::build(&univariable, &multivariable);
    let forest = ForestTable::from_model(&multivariable, records);

    let settings = config.zph_settings();
    let zph = test_proportional_hazards(&multivariable, &settings)?;
    let stratified = if analysis.stratify_violations {
        stratified_refit(records, &multivariable, &zph, &options, &settings)?
    } else {
        None
    };

    Ok(AnalysisResults {
        dataset: dataset.name().to_string(),
        target_event: cleaned.target(),
        raw_rows: dataset.len(),
        event_filtered: cleaned.event_filtered(),
        dropped_missing_differ: cleaned.dropped_missing_differ(),
        n_subjects: cleaned.len(),
        n_events: cleaned.n_events(),
        summary,
        curves,
        univariable,
        multivariable,
        combined,
        forest,
        zph,
        stratified,
    })
}

fn estimate_curves(records: &[AnalysisRecord], break_days: f64, parallel: bool) -> Result<Vec<CovariateCurves>> {
    if parallel {
        CURVE_COVARIATES
            .par_iter()
            .map(|c| estimate_by_covariate(records, *c, break_days))
            .collect()
    } else {
        CURVE_COVARIATES
            .iter()
            .map(|c| estimate_by_covariate(records, *c, break_days))
            .collect()
    }
}

/// build the configured report kind & write it; returns the output path
pub fn render_report(config: &ReportConfig) -> Result<PathBuf> {
    let document = match config.report.kind {
        ReportKind::FixedTime => {
            let results = analyze(config)?;
            build_fixed_time_document(&results, config)
        }
        ReportKind::TimeVarying => build_time_varying_document(config),
    };
    write_report(&document, &config.report, &config.output_path())
}

fn new_document(config: &ReportConfig) -> Document {
    let mut document = Document::new(config.title());
    document.author = config.report.author.clone();
    document.date = config.report.date.clone();
    document
}

const INTRODUCTION: &str = "The colon data come from one of the first successful trials of adjuvant \
chemotherapy for colon cancer. Patients with resected stage B/C disease were randomised to \
observation (Obs), levamisole alone (Lev) or levamisole combined with 5-fluorouracil (Lev+5FU). \
Each patient has one record for recurrence and one for death.";

pub fn build_fixed_time_document(results: &AnalysisResults, config: &ReportConfig) -> Document {
    let mut doc = new_document(config);

    doc.push(Section::new(1, "Introduction").paragraph(INTRODUCTION).paragraph(format!(
        "This report analyses time to {} in days. Survival curves are estimated with the \
         Kaplan-Meier method and compared with log-rank tests; hazard ratios come from Cox \
         proportional-hazards models with {:?} tie handling.",
        results.target_event, config.analysis.ties
    )));

    doc.push(Section::new(1, "Data"));
    doc.push(Section::new(2, "Data cleaning").paragraph(format!(
        "The {} dataset has {} rows. Keeping the {} records leaves {} rows, one per patient. \
         {} of these have no recorded tumour differentiation and were excluded, leaving {} \
         patients with {} events.",
        results.dataset,
        results.raw_rows,
        results.target_event,
        results.event_filtered,
        results.dropped_missing_differ,
        results.n_subjects,
        results.n_events
    )));
    doc.push(Section::new(2, "Patient characteristics").table(summary_table(&results.summary)));

    doc.push(
        Section::new(1, "Survival curves")
            .paragraph(format!(
                "Kaplan-Meier estimates by each of the {} covariates, with 95% pointwise \
                 confidence bands, median survival and the number at risk every {} days.",
                results.curves.len(),
                config.analysis.risk_table_break_days
            ))
            .figure("km_curves", "Kaplan-Meier survival curves by covariate", km_grid(&results.curves))
            .table(log_rank_table(&results.curves))
            .table(median_table(&results.curves)),
    );

    doc.push(Section::new(1, "Cox regression"));
    doc.push(
        Section::new(2, "Hazard ratios")
            .paragraph(format!(
                "Univariable models fit each covariate alone. The multivariable model adjusts for {}.",
                labels(&results.multivariable.covariates)
            ))
            .table(combined_table(&results.combined)),
    );
    doc.push(
        Section::new(2, "Model fit")
            .table(model_fit_table(&results.multivariable))
            .preformatted(results.multivariable.summary.to_string()),
    );
    doc.push(Section::new(2, "Forest plot").figure(
        "forest",
        "Hazard ratios of the multivariable model",
        results.forest.render_svg(),
    ));

    doc.push(Section::new(1, "Proportional hazards"));
    doc.push(ph_section(&results.zph));

    let refit = Section::new(2, "Stratified model");
    let refit = match &results.stratified {
        Some(refit) => refit_section(refit, refit_intro(refit)),
        None if results.zph.violations().is_empty() => {
            refit.paragraph("No covariate violates the assumption, so no stratified refit is needed.")
        }
        None if config.analysis.stratify_violations => refit.paragraph(
            "Every covariate of the model violates the assumption, so no stratified refit was attempted.",
        ),
        None => refit.paragraph("The stratified refit is disabled in the configuration."),
    };
    doc.push(refit);

    tracing::info!(
        sections = doc.sections.len(),
        figures = doc.figures().count(),
        tables = doc.tables().count(),
        "assembled fixed-time report"
    );
    doc
}

/// placeholder report, loads no data
pub fn build_time_varying_document(config: &ReportConfig) -> Document {
    let mut doc = new_document(config);
    doc.push(Section::new(1, "Introduction").paragraph(INTRODUCTION));
    doc.push(Section::new(1, "Time-varying analysis").paragraph(
        "This report will extend the fixed-time analysis with time-varying covariates. \
         No analysis has been written yet.",
    ));
    tracing::info!("assembled time-varying report");
    doc
}

fn labels(covariates: &[Covariate]) -> String {
    covariates.iter().map(|c| c.label().to_lowercase()).collect::<Vec<_>>().join(", ")
}

fn summary_table(summary: &SummaryTable) -> Table {
    let mut headers = vec!["Characteristic".to_string()];
    headers.extend(summary.headers());
    let mut table = Table::new(headers).with_caption("Patient characteristics by treatment arm");
    for row in summary.rows() {
        let mut cells = vec![row.label];
        cells.extend(row.cells);
        table.push_row(cells, row.is_header);
    }
    table
}

fn log_rank_table(curves: &[CovariateCurves]) -> Table {
    let mut table = Table::new(vec!["Covariate".into(), "Chi-square".into(), "df".into(), "p".into()])
        .with_caption("Log-rank tests");
    for c in curves {
        let cells = match &c.log_rank {
            Some(t) => vec![
                c.covariate.label().to_string(),
                format!("{:.2}", t.statistic),
                t.df.to_string(),
                format_p_value(t.p_value),
            ],
            None => vec![c.covariate.label().to_string(), "-".into(), "-".into(), "-".into()],
        };
        table.push_row(cells, false);
    }
    table
}

fn median_table(curves: &[CovariateCurves]) -> Table {
    let mut table = Table::new(vec!["Group".into(), "N".into(), "Events".into(), "Median (days)".into()])
        .with_caption("Median survival");
    for c in curves {
        table.push_row(vec![c.covariate.label().to_string(), String::new(), String::new(), String::new()], true);
        for km in &c.curves {
            table.push_row(
                vec![
                    km.label.clone(),
                    km.n.to_string(),
                    km.n_events.to_string(),
                    km.median.map_or_else(|| "not reached".to_string(), |m| format!("{m:.0}")),
                ],
                false,
            );
        }
    }
    table
}

fn combined_table(combined: &CombinedTable) -> Table {
    let headers = CombinedTable::HEADERS.iter().map(|h| h.to_string()).collect();
    let groups = CombinedTable::GROUPS.iter().map(|(l, s)| (l.to_string(), *s)).collect();
    let mut table = Table::new(headers)
        .with_caption("Univariable and multivariable hazard ratios")
        .with_groups(groups);
    for row in &combined.rows {
        table.push_row(CombinedTable::cells(row), row.is_header);
    }
    table
}

fn test_cells(label: &str, test: &ChiSquareTest) -> Vec<String> {
    vec![
        label.to_string(),
        format!("{:.2}", test.statistic),
        test.df.to_string(),
        format_p_value(test.p_value),
    ]
}

fn model_fit_table(fit: &FittedModel) -> Table {
    let m = &fit.metrics;
    let mut table = Table::new(vec!["Test".into(), "Chi-square".into(), "df".into(), "p".into()]).with_caption(
        format!(
            "Multivariable model: n = {}, events = {}, concordance = {:.3}, AIC = {:.1}",
            m.n_samples, m.n_events, m.concordance, m.aic
        ),
    );
    table.push_row(test_cells("Likelihood ratio", &m.likelihood_ratio), false);
    table.push_row(test_cells("Wald", &m.wald), false);
    table.push_row(test_cells("Score (log-rank)", &m.score), false);
    table
}

fn zph_table(zph: &ZphResult, caption: &str) -> Table {
    let mut table = Table::new(vec![
        "Covariate".into(),
        "Chi-square".into(),
        "df".into(),
        "p".into(),
        "Violation".into(),
    ])
    .with_caption(caption);
    for term in &zph.terms {
        let mut cells = test_cells(term.covariate.label(), &term.test);
        cells.push(if term.violates { "Yes".into() } else { "No".into() });
        table.push_row(cells, false);
    }
    let mut global = test_cells("Global", &zph.global);
    global.push(String::new());
    table.push_row(global, true);
    table
}

fn ph_section(zph: &ZphResult) -> Section {
    let violations = zph.violations();
    let verdict = if violations.is_empty() {
        "No covariate shows evidence against proportional hazards.".to_string()
    } else {
        format!("Evidence against proportional hazards for: {}.", labels(&violations))
    };
    Section::new(2, "Schoenfeld residual test")
        .paragraph(format!(
            "Scaled Schoenfeld residuals of the multivariable model are tested against a {:?} \
             transform of time; p below {} flags a violation. {}",
            zph.transform, zph.alpha, verdict
        ))
        .table(zph_table(zph, "Proportional-hazards test"))
        .figure(
            "schoenfeld",
            "Scaled Schoenfeld residuals against time with a LOWESS smooth",
            residual_grid(&zph.residuals),
        )
}

fn refit_intro(refit: &StratifiedRefit) -> String {
    format!(
        "The multivariable model is refitted with {} as strata ({} strata), each with its own \
         baseline hazard, and the test is repeated.",
        labels(&refit.strata),
        refit.model.strata_labels.len().max(1)
    )
}

fn refit_section(refit: &StratifiedRefit, intro: String) -> Section {
    let mut table = Table::new(vec!["Characteristic".into(), "N".into(), "HR".into(), "95% CI".into(), "p".into()])
        .with_caption("Stratified multivariable model");
    for &covariate in &refit.model.covariates {
        table.push_row(vec![covariate.label().to_string(), String::new(), String::new(), String::new(), String::new()], true);
        for estimate in refit.model.estimates_for(covariate) {
            let cells = EstimateCells::from_estimate(estimate);
            table.push_row(
                vec![estimate.level_label.to_string(), estimate.n.to_string(), cells.hazard_ratio, cells.ci, cells.p_value],
                false,
            );
        }
    }
    Section::new(2, "Stratified model")
        .paragraph(intro)
        .table(table)
        .table(zph_table(&refit.zph, "Proportional-hazards test of the stratified model"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{RawRecord, Treatment};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn synthetic_dataset(n: u32, seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut records = Vec::new();
        for id in 1..=n {
            let rx = Treatment::ALL[rng.gen_range(0..3)];
            let node4 = u8::from(rng.gen_bool(0.3));
            let rate = 0.0004 * if node4 == 1 { 2.5 } else { 1.0 } * if rx == Treatment::LevFu { 0.7 } else { 1.0 };
            let u: f64 = rng.gen_range(0.001..1.0);
            let event_time = -u.ln() / rate;
            let censor = rng.gen_range(1500.0..3000.0);
            let differ = if rng.gen_bool(0.03) { None } else { Some(rng.gen_range(1..=3)) };
            let base = RawRecord {
                id,
                study: 1,
                rx,
                sex: rng.gen_range(0..=1),
                age: rng.gen_range(30..85),
                obstruct: u8::from(rng.gen_bool(0.2)),
                perfor: u8::from(rng.gen_bool(0.1)),
                adhere: u8::from(rng.gen_bool(0.15)),
                nodes: Some(rng.gen_range(0..12)),
                status: u8::from(event_time <= censor),
                differ,
                extent: rng.gen_range(1..=4),
                surg: rng.gen_range(0..=1),
                node4,
                time: event_time.min(censor).round().max(1.0),
                etype: EventType::Death,
            };
            let recurrence = RawRecord {
                etype: EventType::Recurrence,
                time: (base.time * 0.7).round().max(1.0),
                ..base.clone()
            };
            records.push(recurrence);
            records.push(base);
        }
        Dataset::from_records("synthetic", records)
    }

    fn quick_config() -> ReportConfig {
        let mut config = ReportConfig::default();
        config.analysis.parallel = false;
        config.report.date = Some("2024-01-01".to_string());
        config
    }

    #[test]
    fn test_run_analysis_counts() {
        let dataset = synthetic_dataset(400, 11);
        let results = run_analysis(&dataset, &quick_config()).unwrap();

        assert_eq!(results.raw_rows, 800);
        assert_eq!(results.event_filtered, 400);
        assert_eq!(results.n_subjects + results.dropped_missing_differ, 400);
        assert_eq!(results.curves.len(), 10);
        assert_eq!(results.univariable.len(), 10);
        assert_eq!(results.multivariable.covariates.len(), 7);
        assert_eq!(results.curves[0].covariate, Covariate::Treatment);
        assert_eq!(results.zph.terms.len(), 7);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dataset = synthetic_dataset(300, 5);
        let sequential = run_analysis(&dataset, &quick_config()).unwrap();
        let mut config = quick_config();
        config.analysis.parallel = true;
        let parallel = run_analysis(&dataset, &config).unwrap();

        for (a, b) in sequential.univariable.iter().zip(&parallel.univariable) {
            assert_eq!(a.covariates, b.covariates);
            assert_eq!(a.summary.log_likelihood, b.summary.log_likelihood);
        }
        let order: Vec<_> = parallel.curves.iter().map(|c| c.covariate).collect();
        assert_eq!(order, CURVE_COVARIATES.to_vec());
    }

    #[test]
    fn test_fixed_time_document_has_every_output() {
        let dataset = synthetic_dataset(400, 3);
        let config = quick_config();
        let results = run_analysis(&dataset, &config).unwrap();
        let doc = build_fixed_time_document(&results, &config);

        let figures: Vec<_> = doc.figures().map(|f| f.id.as_str()).collect();
        assert_eq!(figures, vec!["km_curves", "forest", "schoenfeld"]);
        let captions: Vec<_> = doc.tables().filter_map(|t| t.caption.as_deref()).collect();
        assert!(captions.contains(&"Patient characteristics by treatment arm"));
        assert!(captions.contains(&"Univariable and multivariable hazard ratios"));
        assert!(captions.contains(&"Proportional-hazards test"));
        assert_eq!(doc.date.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn test_cleaning_narrative_states_drop_count() {
        let dataset = synthetic_dataset(200, 8);
        let config = quick_config();
        let results = run_analysis(&dataset, &config).unwrap();
        let doc = build_fixed_time_document(&results, &config);

        let cleaning = doc.sections.iter().find(|s| s.title == "Data cleaning").unwrap();
        let text = format!("{:?}", cleaning.blocks);
        assert!(text.contains(&format!("{} of these", results.dropped_missing_differ)));
    }

    #[test]
    fn test_time_varying_stub() {
        let mut config = quick_config();
        config.report.kind = ReportKind::TimeVarying;
        let doc = build_time_varying_document(&config);
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.figures().count(), 0);
        assert!(doc.title.contains("Time-varying"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut inner) = self.0.lock() {
                inner.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_each_stage_logs_once() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let dataset = synthetic_dataset(150, 9);
        tracing::subscriber::with_default(subscriber, || run_analysis(&dataset, &quick_config())).unwrap();

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        for stage in ["cleaned dataset", "built summary table", "estimated survival curves"] {
            assert_eq!(text.matches(stage).count(), 1, "{stage}");
        }
    }

    #[test]
    fn test_run_analysis_rejects_empty_table() {
        let rows: Vec<RawRecord> = synthetic_dataset(20, 4)
            .records()
            .iter()
            .map(|r| RawRecord { differ: None, ..r.clone() })
            .collect();
        let err = run_analysis(&Dataset::from_records("graded", rows), &quick_config()).unwrap_err();
        assert!(matches!(err, SurvError::InvalidSurvivalData { .. }));
        assert!(err.to_string().contains("graded"));
    }

    #[test]
    fn test_render_report_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = quick_config();
        config.data.dir = dir.path().to_path_buf();
        config.data.dataset = "rectum".to_string();
        config.report.output = Some(dir.path().join("out.html"));

        let err = render_report(&config).unwrap_err();
        assert!(matches!(err, SurvError::DatasetNotFound { .. }));
        assert!(!dir.path().join("out.html").exists());
    }

    #[test]
    fn test_render_time_varying_skips_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = quick_config();
        config.data.dir = dir.path().join("nowhere");
        config.report.kind = ReportKind::TimeVarying;
        config.report.output = Some(dir.path().join("tv.html"));

        let path = render_report(&config).unwrap();
        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("Time-varying analysis"));
    }
}
