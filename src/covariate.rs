//! the covariates the report talks about & how they turn into model columns

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::cleaning::{AGE_BANDS, AnalysisRecord};
use crate::dataset::Treatment;

/// a categorical covariate of the analysis table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Covariate {
    Treatment,
    Sex,
    AgeBand,
    Obstruct,
    Perfor,
    Adhere,
    Differ,
    Extent,
    Surg,
    Node4,
}

/// the ten covariates with a survival curve & a univariable model
pub const CURVE_COVARIATES: [Covariate; 10] = [
    Covariate::Treatment,
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

/// the seven covariates of the multivariable model
pub const MULTIVARIABLE_COVARIATES: [Covariate; 7] = [
    Covariate::Treatment,
    Covariate::Sex,
    Covariate::AgeBand,
    Covariate::Obstruct,
    Covariate::Differ,
    Covariate::Extent,
    Covariate::Node4,
];

const TREATMENT_LEVELS: [&str; 3] = ["Obs", "Lev", "Lev+5FU"];
const SEX_LEVELS: [&str; 2] = ["Female", "Male"];
const YES_NO: [&str; 2] = ["No", "Yes"];
const DIFFER_LEVELS: [&str; 3] = ["Well", "Moderate", "Poor"];
const EXTENT_LEVELS: [&str; 4] = ["Submucosa", "Muscle", "Serosa", "Contiguous structures"];
const SURG_LEVELS: [&str; 2] = ["Short", "Long"];

impl Covariate {
    /// short column-style key
    pub fn key(self) -> &'static str {
        match self {
            Covariate::Treatment => "rx",
            Covariate::Sex => "sex",
            Covariate::AgeBand => "age_band",
            Covariate::Obstruct => "obstruct",
            Covariate::Perfor => "perfor",
            Covariate::Adhere => "adhere",
            Covariate::Differ => "differ",
            Covariate::Extent => "extent",
            Covariate::Surg => "surg",
            Covariate::Node4 => "node4",
        }
    }

    /// human-readable name for tables & plots
    pub fn label(self) -> &'static str {
        match self {
            Covariate::Treatment => "Treatment",
            Covariate::Sex => "Sex",
            Covariate::AgeBand => "Age group",
            Covariate::Obstruct => "Colon obstruction",
            Covariate::Perfor => "Colon perforation",
            Covariate::Adhere => "Adherence to nearby organs",
            Covariate::Differ => "Tumour differentiation",
            Covariate::Extent => "Extent of local spread",
            Covariate::Surg => "Time from surgery to registration",
            Covariate::Node4 => "More than 4 positive lymph nodes",
        }
    }

    /// levels in display order, reference first
    pub fn levels(self) -> &'static [&'static str] {
        match self {
            Covariate::Treatment => &TREATMENT_LEVELS,
            Covariate::Sex => &SEX_LEVELS,
            Covariate::AgeBand => &AGE_BANDS,
            Covariate::Obstruct | Covariate::Perfor | Covariate::Adhere | Covariate::Node4 => &YES_NO,
            Covariate::Differ => &DIFFER_LEVELS,
            Covariate::Extent => &EXTENT_LEVELS,
            Covariate::Surg => &SURG_LEVELS,
        }
    }

    pub fn n_levels(self) -> usize {
        self.levels().len()
    }

    pub fn reference_level(self) -> &'static str {
        self.levels()[0]
    }

    /// index into `levels()` for one record
    pub fn level_index(self, record: &AnalysisRecord) -> usize {
        match self {
            Covariate::Treatment => match record.rx {
                Treatment::Obs => 0,
                Treatment::Lev => 1,
                Treatment::LevFu => 2,
            },
            Covariate::Sex => usize::from(record.sex),
            Covariate::AgeBand => usize::from(record.age_band != AGE_BANDS[0]),
            Covariate::Obstruct => usize::from(record.obstruct),
            Covariate::Perfor => usize::from(record.perfor),
            Covariate::Adhere => usize::from(record.adhere),
            Covariate::Differ => usize::from(record.differ) - 1,
            Covariate::Extent => usize::from(record.extent) - 1,
            Covariate::Surg => usize::from(record.surg),
            Covariate::Node4 => usize::from(record.node4),
        }
    }

    pub fn level_label(self, record: &AnalysisRecord) -> &'static str {
        self.levels()[self.level_index(record)]
    }

    /// coefficient name for a non-reference level, e.g. `rxLev+5FU`
    pub fn column_name(self, level: usize) -> String {
        format!("{}{}", self.key(), self.levels()[level])
    }

    /// how many records sit at each level
    pub fn level_counts(self, records: &[AnalysisRecord]) -> Vec<usize> {
        let mut counts = vec![0; self.n_levels()];
        for record in records {
            counts[self.level_index(record)] += 1;
        }
        counts
    }
}

impl fmt::Display for Covariate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// one model column - a non-reference level of some covariate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesignColumn {
    pub covariate: Covariate,
    pub level: usize,
    pub name: String,
}

/// treatment-coded covariate matrix (reference level = all zeros)
#[derive(Debug, Clone)]
pub struct Design {
    matrix: Array2<f64>,
    columns: Vec<DesignColumn>,
    terms: Vec<(Covariate, Range<usize>)>,
}

impl Design {
    pub fn build(records: &[AnalysisRecord], covariates: &[Covariate]) -> Self {
        let mut columns = Vec::new();
        let mut terms = Vec::with_capacity(covariates.len());

        for &covariate in covariates {
            let start = columns.len();
            for level in 1..covariate.n_levels() {
                columns.push(DesignColumn {
                    covariate,
                    level,
                    name: covariate.column_name(level),
                });
            }
            terms.push((covariate, start..columns.len()));
        }

        let mut matrix = Array2::zeros((records.len(), columns.len()));
        for (i, record) in records.iter().enumerate() {
            for (covariate, range) in &terms {
                let level = covariate.level_index(record);
                if level > 0 {
                    matrix[[i, range.start + level - 1]] = 1.0;
                }
            }
        }

        Self { matrix, columns, terms }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn into_matrix(self) -> Array2<f64> {
        self.matrix
    }

    pub fn columns(&self) -> &[DesignColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// column range per covariate, in model order
    pub fn terms(&self) -> &[(Covariate, Range<usize>)] {
        &self.terms
    }
}

/// cross-classify records by `covariates` into stratum codes + labels
pub fn strata_codes(records: &[AnalysisRecord], covariates: &[Covariate]) -> (Vec<usize>, Vec<String>) {
    let mut index: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
    let keys: Vec<Vec<usize>> = records
        .iter()
        .map(|r| covariates.iter().map(|c| c.level_index(r)).collect())
        .collect();

    // BTreeMap gives the strata a stable level-order numbering
    for key in &keys {
        index.entry(key.clone()).or_insert(0);
    }
    let mut labels = Vec::with_capacity(index.len());
    for (code, (key, slot)) in index.iter_mut().enumerate() {
        *slot = code;
        let label = covariates
            .iter()
            .zip(key)
            .map(|(c, &level)| format!("{}={}", c.key(), c.levels()[level]))
            .collect::<Vec<_>>()
            .join(", ");
        labels.push(label);
    }

    let codes = keys.iter().map(|k| index[k]).collect();
    (codes, labels)
}
