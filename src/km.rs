//! kaplan-meier curves, median survival, at-risk counts & the log-rank test

use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::cleaning::AnalysisRecord;
use crate::covariate::Covariate;
use crate::error::{Result, SurvError};
use crate::optimization::solve_linear_system;
use crate::stats::{chi_square_sf, Z_95};

/// one distinct time on a curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KmStep {
    pub time: f64,
    pub n_risk: usize,
    pub n_event: usize,
    pub n_censor: usize,
    pub survival: f64,
    /// greenwood standard error of log S
    pub std_err_log: f64,
    pub lower: f64,
    pub upper: f64,
}

/// product-limit estimate for one group
#[derive(Debug, Clone, Serialize)]
pub struct KaplanMeier {
    pub label: String,
    pub n: usize,
    pub n_events: usize,
    pub steps: Vec<KmStep>,
    pub median: Option<f64>,
}

impl KaplanMeier {
    pub fn fit(label: impl Into<String>, times: &[f64], events: &[bool]) -> Result<Self> {
        if times.len() != events.len() {
            return Err(SurvError::invalid_dimensions(format!(
                "times len ({}) != events len ({})",
                times.len(),
                events.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(SurvError::invalid_survival_data("survival times must be non-negative & finite"));
        }

        let mut data: Vec<(f64, bool)> = times.iter().copied().zip(events.iter().copied()).collect();
        data.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut steps = Vec::new();
        let mut survival = 1.0;
        let mut greenwood = 0.0;
        let mut n_risk = data.len();
        let mut i = 0;

        while i < data.len() {
            let time = data[i].0;
            let mut n_event = 0;
            let mut n_censor = 0;
            while i < data.len() && data[i].0 == time {
                if data[i].1 {
                    n_event += 1;
                } else {
                    n_censor += 1;
                }
                i += 1;
            }

            if n_event > 0 {
                survival *= 1.0 - n_event as f64 / n_risk as f64;
                if n_risk > n_event {
                    greenwood += n_event as f64 / (n_risk as f64 * (n_risk - n_event) as f64);
                } else {
                    greenwood = f64::INFINITY;
                }
            }

            let std_err_log = greenwood.sqrt();
            let (lower, upper) = if survival > 0.0 && std_err_log.is_finite() {
                (
                    (survival * (-Z_95 * std_err_log).exp()).clamp(0.0, 1.0),
                    (survival * (Z_95 * std_err_log).exp()).clamp(0.0, 1.0),
                )
            } else {
                (0.0, 0.0)
            };

            steps.push(KmStep {
                time,
                n_risk,
                n_event,
                n_censor,
                survival,
                std_err_log,
                lower,
                upper,
            });

            n_risk -= n_event + n_censor;
        }

        let median = median_survival(&steps);
        Ok(Self {
            label: label.into(),
            n: data.len(),
            n_events: data.iter().filter(|d| d.1).count(),
            steps,
            median,
        })
    }

    /// S(t), right-continuous
    pub fn survival_at(&self, t: f64) -> f64 {
        self.steps
            .iter()
            .take_while(|s| s.time <= t)
            .last()
            .map_or(1.0, |s| s.survival)
    }

    /// how many still under observation at time t
    pub fn n_at_risk(&self, t: f64) -> usize {
        self.steps
            .iter()
            .find(|s| s.time >= t)
            .map_or(0, |s| s.n_risk)
    }

    pub fn max_time(&self) -> f64 {
        self.steps.last().map_or(0.0, |s| s.time)
    }
}

/// first time S <= 0.5; if S sits exactly at 0.5, the midpoint to the next drop
pub fn median_survival(steps: &[KmStep]) -> Option<f64> {
    const EPS: f64 = 1e-10;
    let idx = steps.iter().position(|s| s.survival <= 0.5 + EPS)?;
    let step = &steps[idx];
    if (step.survival - 0.5).abs() < EPS {
        if let Some(next) = steps[idx + 1..].iter().find(|s| s.survival < 0.5 - EPS) {
            return Some((step.time + next.time) / 2.0);
        }
    }
    Some(step.time)
}

/// k-sample log-rank test
#[derive(Debug, Clone, Serialize)]
pub struct LogRankTest {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
    pub observed: Vec<f64>,
    pub expected: Vec<f64>,
}

/// compare `n_groups` groups (labels 0..n_groups) - `None` with fewer than two non-empty groups
pub fn log_rank_test(times: &[f64], events: &[bool], groups: &[usize], n_groups: usize) -> Result<Option<LogRankTest>> {
    if times.len() != events.len() || times.len() != groups.len() {
        return Err(SurvError::invalid_dimensions("times, events & groups must have same length"));
    }
    if groups.iter().any(|&g| g >= n_groups) {
        return Err(SurvError::invalid_dimensions("group label out of range"));
    }

    // only groups with members take part
    let mut sizes = vec![0usize; n_groups];
    for &g in groups {
        sizes[g] += 1;
    }
    let present: Vec<usize> = (0..n_groups).filter(|&g| sizes[g] > 0).collect();
    if present.len() < 2 {
        return Ok(None);
    }
    let k = present.len();
    let mut slot = vec![usize::MAX; n_groups];
    for (s, &g) in present.iter().enumerate() {
        slot[g] = s;
    }

    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

    let mut at_risk = Array1::<f64>::zeros(k);
    for &g in groups {
        at_risk[slot[g]] += 1.0;
    }

    let mut observed = Array1::<f64>::zeros(k);
    let mut expected = Array1::<f64>::zeros(k);
    let mut variance = Array2::<f64>::zeros((k, k));

    let mut i = 0;
    while i < order.len() {
        let time = times[order[i]];
        let mut deaths = Array1::<f64>::zeros(k);
        let mut leaving = Array1::<f64>::zeros(k);
        while i < order.len() && times[order[i]] == time {
            let idx = order[i];
            let s = slot[groups[idx]];
            if events[idx] {
                deaths[s] += 1.0;
            }
            leaving[s] += 1.0;
            i += 1;
        }

        let d = deaths.sum();
        let n = at_risk.sum();
        if d > 0.0 && n > 0.0 {
            observed += &deaths;
            expected += &(&at_risk * (d / n));
            if n > 1.0 {
                let factor = d * (n - d) / (n - 1.0);
                for a in 0..k {
                    for b in 0..k {
                        let delta = if a == b { 1.0 } else { 0.0 };
                        variance[[a, b]] += factor * (at_risk[a] / n) * (delta - at_risk[b] / n);
                    }
                }
            }
        }
        at_risk -= &leaving;
    }

    // drop the last group, the full covariance is singular
    let m = k - 1;
    let diff: Array1<f64> = (&observed - &expected).slice(ndarray::s![..m]).to_owned();
    let v = variance.slice(ndarray::s![..m, ..m]).to_owned();
    let statistic = match solve_linear_system(&v, &diff) {
        Ok(x) => diff.dot(&x),
        // no events in all but one group etc. - no evidence either way
        Err(SurvError::NumericalError { .. }) => 0.0,
        Err(e) => return Err(e),
    };

    // report in level order with zeros for empty groups
    let mut observed_all = vec![0.0; n_groups];
    let mut expected_all = vec![0.0; n_groups];
    for (s, &g) in present.iter().enumerate() {
        observed_all[g] = observed[s];
        expected_all[g] = expected[s];
    }

    Ok(Some(LogRankTest {
        statistic,
        df: m,
        p_value: chi_square_sf(statistic, m),
        observed: observed_all,
        expected: expected_all,
    }))
}

/// at-risk counts per level at the break times
#[derive(Debug, Clone, Serialize)]
pub struct RiskTable {
    pub breaks: Vec<f64>,
    pub counts: Vec<Vec<usize>>, // one row per curve
}

/// break points 0, step, 2*step, ... up to `max_time`
pub fn risk_breaks(max_time: f64, step: f64) -> Vec<f64> {
    let mut breaks = Vec::new();
    let mut t = 0.0;
    while t <= max_time {
        breaks.push(t);
        t += step;
    }
    breaks
}

/// survival curves of one covariate, one per level
#[derive(Debug, Clone, Serialize)]
pub struct CovariateCurves {
    pub covariate: Covariate,
    pub curves: Vec<KaplanMeier>,
    pub log_rank: Option<LogRankTest>,
    pub risk_table: RiskTable,
}

/// stratify the cleaned table by `covariate` & estimate each level
pub fn estimate_by_covariate(
    records: &[AnalysisRecord],
    covariate: Covariate,
    break_days: f64,
) -> Result<CovariateCurves> {
    if !(break_days > 0.0) {
        return Err(SurvError::invalid_parameter("risk_table_break_days", break_days));
    }

    let times: Vec<f64> = records.iter().map(|r| r.time).collect();
    let events: Vec<bool> = records.iter().map(|r| r.is_event()).collect();
    let groups: Vec<usize> = records.iter().map(|r| covariate.level_index(r)).collect();

    let mut curves = Vec::new();
    for (level, label) in covariate.levels().iter().enumerate() {
        let (t, e): (Vec<f64>, Vec<bool>) = records
            .iter()
            .zip(&groups)
            .filter(|(_, g)| **g == level)
            .map(|(r, _)| (r.time, r.is_event()))
            .unzip();
        if t.is_empty() {
            continue;
        }
        curves.push(KaplanMeier::fit(*label, &t, &e)?);
    }

    let log_rank = log_rank_test(&times, &events, &groups, covariate.n_levels())?;

    let max_time = times.iter().copied().fold(0.0, f64::max);
    let breaks = risk_breaks(max_time, break_days);
    let counts = curves
        .iter()
        .map(|c| breaks.iter().map(|&b| c.n_at_risk(b)).collect())
        .collect();

    Ok(CovariateCurves {
        covariate,
        curves,
        log_rank,
        risk_table: RiskTable { breaks, counts },
    })
}
