//! descriptive table, one column per treatment arm & an overall column

use serde::Serialize;

use crate::cleaning::{status_label, AnalysisRecord};
use crate::covariate::Covariate;
use crate::dataset::Treatment;

/// mean, sd, quartiles & range of one column of values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContinuousStats {
    pub n: usize,
    pub mean: f64,
    pub sd: Option<f64>, // needs two values
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub min: f64,
    pub max: f64,
}

impl ContinuousStats {
    /// `None` for an empty column; non-finite values are skipped
    pub fn compute(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let sd = (n > 1).then(|| {
            let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        });

        Some(Self {
            n,
            mean,
            sd,
            median: quantile(&sorted, 0.5),
            q1: quantile(&sorted, 0.25),
            q3: quantile(&sorted, 0.75),
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

/// linear-interpolation quantile (type 7) of sorted, non-empty data
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// one header cell
#[derive(Debug, Clone, Serialize)]
pub struct SummaryColumn {
    pub label: String,
    pub n: usize,
}

impl SummaryColumn {
    pub fn header(&self) -> String {
        format!("{} (N = {})", self.label, self.n)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryVariable {
    Continuous {
        label: String,
        stats: Vec<Option<ContinuousStats>>, // per column
    },
    Categorical {
        label: String,
        levels: Vec<String>,
        counts: Vec<Vec<usize>>, // [level][column]
    },
}

/// one rendered line of the table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub label: String,
    pub cells: Vec<String>,
    pub is_header: bool,
}

impl SummaryVariable {
    pub fn label(&self) -> &str {
        match self {
            SummaryVariable::Continuous { label, .. } | SummaryVariable::Categorical { label, .. } => label,
        }
    }

    /// percentage of the non-missing values of `column` at `level`
    pub fn percentage(&self, level: usize, column: usize) -> Option<f64> {
        let SummaryVariable::Categorical { counts, .. } = self else {
            return None;
        };
        let total: usize = counts.iter().map(|row| row[column]).sum();
        (total > 0).then(|| 100.0 * counts[level][column] as f64 / total as f64)
    }

    /// a bold header line followed by the statistic lines
    pub fn rows(&self) -> Vec<SummaryRow> {
        match self {
            SummaryVariable::Continuous { label, stats } => {
                let cells = |f: &dyn Fn(&ContinuousStats) -> String| -> Vec<String> {
                    stats.iter().map(|s| s.as_ref().map_or_else(String::new, f)).collect()
                };
                vec![
                    header_row(label, stats.len()),
                    SummaryRow {
                        label: "Mean (SD)".to_string(),
                        cells: cells(&|s| match s.sd {
                            Some(sd) => format!("{:.1} ({:.1})", s.mean, sd),
                            None => format!("{:.1} (NA)", s.mean),
                        }),
                        is_header: false,
                    },
                    SummaryRow {
                        label: "Median [Q1, Q3]".to_string(),
                        cells: cells(&|s| format!("{:.1} [{:.1}, {:.1}]", s.median, s.q1, s.q3)),
                        is_header: false,
                    },
                    SummaryRow {
                        label: "Min - Max".to_string(),
                        cells: cells(&|s| format!("{:.1} - {:.1}", s.min, s.max)),
                        is_header: false,
                    },
                ]
            }
            SummaryVariable::Categorical { label, levels, counts } => {
                let n_columns = counts.first().map_or(0, Vec::len);
                let mut rows = vec![header_row(label, n_columns)];
                for (level, name) in levels.iter().enumerate() {
                    let cells = (0..n_columns)
                        .map(|column| match self.percentage(level, column) {
                            Some(pct) => format!("{} ({:.1}%)", counts[level][column], pct),
                            None => String::new(),
                        })
                        .collect();
                    rows.push(SummaryRow { label: name.clone(), cells, is_header: false });
                }
                rows
            }
        }
    }
}

fn header_row(label: &str, n_columns: usize) -> SummaryRow {
    SummaryRow {
        label: label.to_string(),
        cells: vec![String::new(); n_columns],
        is_header: true,
    }
}

/// the whole descriptive table
#[derive(Debug, Clone, Serialize)]
pub struct SummaryTable {
    pub columns: Vec<SummaryColumn>,
    pub variables: Vec<SummaryVariable>,
}

impl SummaryTable {
    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(SummaryColumn::header).collect()
    }

    pub fn rows(&self) -> Vec<SummaryRow> {
        self.variables.iter().flat_map(SummaryVariable::rows).collect()
    }

    pub fn variable(&self, label: &str) -> Option<&SummaryVariable> {
        self.variables.iter().find(|v| v.label() == label)
    }
}

/// categorical variables of the table besides treatment, in display order
const SUMMARY_COVARIATES: [Covariate; 9] = [
    Covariate::Sex,
    Covariate::AgeBand,
    Covariate::Obstruct,
    Covariate::Perfor,
    Covariate::Adhere,
    Covariate::Differ,
    Covariate::Extent,
    Covariate::Surg,
    Covariate::Node4,
];

/// group by treatment arm (Obs, Lev, Lev+5FU) & add the overall column last
pub fn build_summary(records: &[AnalysisRecord]) -> SummaryTable {
    let mut groups: Vec<(String, Vec<&AnalysisRecord>)> = Treatment::ALL
        .iter()
        .map(|arm| (arm.label().to_string(), records.iter().filter(|r| r.rx == *arm).collect()))
        .collect();
    groups.push(("Overall".to_string(), records.iter().collect()));

    let columns = groups
        .iter()
        .map(|(label, rows)| SummaryColumn { label: label.clone(), n: rows.len() })
        .collect();

    let continuous = |label: &str, value: fn(&AnalysisRecord) -> Option<f64>| SummaryVariable::Continuous {
        label: label.to_string(),
        stats: groups
            .iter()
            .map(|(_, rows)| {
                let values: Vec<f64> = rows.iter().filter_map(|r| value(r)).collect();
                ContinuousStats::compute(&values)
            })
            .collect(),
    };

    let mut variables = vec![
        continuous("Age (years)", |r| Some(f64::from(r.age))),
        continuous("Positive lymph nodes", |r| r.nodes.map(f64::from)),
        continuous("Follow-up (days)", |r| Some(r.time)),
    ];

    for covariate in SUMMARY_COVARIATES {
        let mut counts = vec![vec![0usize; groups.len()]; covariate.n_levels()];
        for (column, (_, rows)) in groups.iter().enumerate() {
            for record in rows {
                counts[covariate.level_index(record)][column] += 1;
            }
        }
        variables.push(SummaryVariable::Categorical {
            label: covariate.label().to_string(),
            levels: covariate.levels().iter().map(|l| l.to_string()).collect(),
            counts,
        });
    }

    let mut status_counts = vec![vec![0usize; groups.len()]; 2];
    for (column, (_, rows)) in groups.iter().enumerate() {
        for record in rows {
            status_counts[usize::from(record.is_event())][column] += 1;
        }
    }
    variables.push(SummaryVariable::Categorical {
        label: "Status".to_string(),
        levels: [0, 1]
            .iter()
            .filter_map(|&code| status_label(code))
            .map(str::to_string)
            .collect(),
        counts: status_counts,
    });

    tracing::info!(
        columns = groups.len(),
        variables = variables.len(),
        "built summary table"
    );

    SummaryTable { columns, variables }
}
