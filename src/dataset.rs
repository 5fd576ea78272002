//! raw subject records & the named dataset loader
//!
//! the trial table is the public `colon` data (one row per subject per event
//! type), compiled into the crate from `data/colon.csv` and looked up by
//! name. a `<name>.csv` under the configured data directory takes precedence.
//! columns follow the survival package export: `id, study, rx, sex, age,
//! obstruct, perfor, adhere, nodes, status, differ, extent, surg, node4,
//! time, etype` with `NA` (or empty) for missing values.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SurvError};

#[cfg(embedded_colon)]
const EMBEDDED: &[(&str, &str)] = &[(
    "colon",
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/colon.csv")),
)];

#[cfg(not(embedded_colon))]
const EMBEDDED: &[(&str, &str)] = &[];

/// csv text of a dataset compiled into the crate
pub fn embedded(name: &str) -> Option<&'static str> {
    EMBEDDED.iter().find(|(n, _)| *n == name).map(|(_, text)| *text)
}

/// names of the datasets compiled into the crate
pub fn embedded_names() -> Vec<&'static str> {
    EMBEDDED.iter().map(|(n, _)| *n).collect()
}

/// columns every dataset file must carry (extra columns like `rownames` are ignored)
pub const REQUIRED_COLUMNS: [&str; 16] = [
    "id", "study", "rx", "sex", "age", "obstruct", "perfor", "adhere", "nodes", "status",
    "differ", "extent", "surg", "node4", "time", "etype",
];

/// treatment arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Treatment {
    /// observation only
    Obs,
    /// levamisole
    Lev,
    /// levamisole + 5-fluorouracil
    LevFu,
}

impl Treatment {
    pub const ALL: [Treatment; 3] = [Treatment::Obs, Treatment::Lev, Treatment::LevFu];

    pub fn label(self) -> &'static str {
        match self {
            Treatment::Obs => "Obs",
            Treatment::Lev => "Lev",
            Treatment::LevFu => "Lev+5FU",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Obs" | "1" => Some(Treatment::Obs),
            "Lev" | "2" => Some(Treatment::Lev),
            "Lev+5FU" | "3" => Some(Treatment::LevFu),
            _ => None,
        }
    }
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// which event a row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Recurrence,
    Death,
}

impl EventType {
    pub fn code(self) -> u8 {
        match self {
            EventType::Recurrence => 1,
            EventType::Death => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EventType::Recurrence),
            2 => Some(EventType::Death),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Recurrence => f.write_str("recurrence"),
            EventType::Death => f.write_str("death"),
        }
    }
}

/// one row of the source table, codes kept as they come
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub id: u32,
    pub study: u32,
    pub rx: Treatment,
    pub sex: u8,
    pub age: u32,
    pub obstruct: u8,
    pub perfor: u8,
    pub adhere: u8,
    pub nodes: Option<u32>,
    pub status: u8,
    pub differ: Option<u8>,
    pub extent: u8,
    pub surg: u8,
    pub node4: u8,
    pub time: f64,
    pub etype: EventType,
}

// every column comes in as text so NA handling and error rows stay ours
#[derive(Debug, Deserialize)]
struct CsvRow {
    id: String,
    study: String,
    rx: String,
    sex: String,
    age: String,
    obstruct: String,
    perfor: String,
    adhere: String,
    nodes: String,
    status: String,
    differ: String,
    extent: String,
    surg: String,
    node4: String,
    time: String,
    etype: String,
}

fn is_missing(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("na")
}

fn required<'a>(field: &str, raw: &'a str, row: usize) -> Result<&'a str> {
    if is_missing(raw) {
        Err(SurvError::missing_field(field, row))
    } else {
        Ok(raw)
    }
}

// integers sometimes show up as "12.0" in exported csvs
fn parse_uint(field: &str, raw: &str, row: usize) -> Result<u32> {
    let value = required(field, raw, row)?;
    if let Ok(v) = value.parse::<u32>() {
        return Ok(v);
    }
    match value.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Ok(v as u32),
        _ => Err(SurvError::data_shape(field, value, row)),
    }
}

fn parse_opt_uint(field: &str, raw: &str, row: usize) -> Result<Option<u32>> {
    if is_missing(raw) {
        Ok(None)
    } else {
        parse_uint(field, raw, row).map(Some)
    }
}

fn parse_flag(field: &str, raw: &str, row: usize) -> Result<u8> {
    match parse_uint(field, raw, row)? {
        v @ (0 | 1) => Ok(v as u8),
        _ => Err(SurvError::data_shape(field, raw, row)),
    }
}

fn parse_code(field: &str, raw: &str, row: usize, max: u32) -> Result<u8> {
    let v = parse_uint(field, raw, row)?;
    if (1..=max).contains(&v) {
        Ok(v as u8)
    } else {
        Err(SurvError::data_shape(field, raw, row))
    }
}

impl CsvRow {
    fn into_record(self, row: usize) -> Result<RawRecord> {
        let rx_raw = required("rx", &self.rx, row)?;
        let rx = Treatment::parse(rx_raw).ok_or_else(|| SurvError::data_shape("rx", rx_raw, row))?;

        let etype_code = parse_code("etype", &self.etype, row, 2)?;
        let etype = EventType::from_code(etype_code)
            .ok_or_else(|| SurvError::data_shape("etype", &self.etype, row))?;

        let time_raw = required("time", &self.time, row)?;
        let time: f64 = time_raw
            .parse()
            .map_err(|_| SurvError::data_shape("time", time_raw, row))?;
        if !time.is_finite() || time < 0.0 {
            return Err(SurvError::data_shape("time", time_raw, row));
        }

        let differ = if is_missing(&self.differ) {
            None
        } else {
            Some(parse_code("differ", &self.differ, row, 3)?)
        };

        Ok(RawRecord {
            id: parse_uint("id", &self.id, row)?,
            study: parse_uint("study", &self.study, row)?,
            rx,
            sex: parse_flag("sex", &self.sex, row)?,
            age: parse_uint("age", &self.age, row)?,
            obstruct: parse_flag("obstruct", &self.obstruct, row)?,
            perfor: parse_flag("perfor", &self.perfor, row)?,
            adhere: parse_flag("adhere", &self.adhere, row)?,
            nodes: parse_opt_uint("nodes", &self.nodes, row)?,
            status: parse_flag("status", &self.status, row)?,
            differ,
            extent: parse_code("extent", &self.extent, row, 4)?,
            surg: parse_flag("surg", &self.surg, row)?,
            node4: parse_flag("node4", &self.node4, row)?,
            time,
            etype,
        })
    }
}

/// the raw record set, read once & never mutated afterwards
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    records: Vec<RawRecord>,
}

impl Dataset {
    /// wrap already-parsed records (handy for tests & synthetic data)
    pub fn from_records(name: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self { name: name.into(), records }
    }

    /// parse a csv stream in the `colon` layout
    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(SurvError::missing_field(column, 0));
            }
        }

        let mut records = Vec::new();
        for (idx, row) in rdr.deserialize::<CsvRow>().enumerate() {
            // 1-based data rows, header is row 0
            records.push(row?.into_record(idx + 1)?);
        }

        let name = name.into();
        tracing::debug!(dataset = %name, rows = records.len(), "parsed dataset");
        Ok(Self { name, records })
    }

    pub fn from_path(name: impl Into<String>, path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(name, file)
    }

    /// where a named dataset lives under `dir`
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.csv"))
    }

    /// `<dir>/<name>.csv` when present, otherwise the embedded table `name`
    pub fn load_named(dir: &Path, name: &str) -> Result<Self> {
        let path = Self::path_for(dir, name);
        let (dataset, source) = if path.is_file() {
            (Self::from_path(name, &path)?, path.display().to_string())
        } else if let Some(text) = embedded(name) {
            (Self::from_reader(name, text.as_bytes())?, "embedded".to_string())
        } else {
            return Err(SurvError::DatasetNotFound { name: name.to_string(), path });
        };
        let offenders = dataset.subjects_without_two_rows();
        if !offenders.is_empty() {
            tracing::warn!(
                dataset = name,
                subjects = offenders.len(),
                "some subjects don't have exactly one row per event type"
            );
        }
        tracing::info!(dataset = name, rows = dataset.len(), source = %source, "loaded dataset");
        Ok(dataset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// subject ids breaking the one-row-per-event-type layout
    pub fn subjects_without_two_rows(&self) -> Vec<u32> {
        let mut seen: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
        for record in &self.records {
            let entry = seen.entry(record.id).or_default();
            match record.etype {
                EventType::Recurrence => entry.0 += 1,
                EventType::Death => entry.1 += 1,
            }
        }
        seen.into_iter()
            .filter(|(_, counts)| *counts != (1, 1))
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "\"rownames\",\"id\",\"study\",\"rx\",\"sex\",\"age\",\"obstruct\",\"perfor\",\"adhere\",\"nodes\",\"status\",\"differ\",\"extent\",\"surg\",\"node4\",\"time\",\"etype\"\n";

    fn parse(body: &str) -> Result<Dataset> {
        Dataset::from_reader("test", format!("{HEADER}{body}").as_bytes())
    }

    #[test]
    fn test_parses_rows_and_missing_values() {
        let data = parse(
            "1,1,1,\"Lev+5FU\",1,43,0,0,0,5,1,2,3,0,1,1521,1\n\
             2,1,1,\"Lev+5FU\",1,43,0,0,0,5,1,2,3,0,1,1521,2\n\
             3,2,1,\"Obs\",0,63,0,0,0,NA,0,NA,3,0,0,3087,2\n",
        )
        .unwrap();

        assert_eq!(data.len(), 3);
        let first = &data.records()[0];
        assert_eq!(first.rx, Treatment::LevFu);
        assert_eq!(first.etype, EventType::Recurrence);
        assert_eq!(first.nodes, Some(5));
        assert_eq!(first.differ, Some(2));

        let third = &data.records()[2];
        assert_eq!(third.nodes, None);
        assert_eq!(third.differ, None);
        assert_eq!(third.time, 3087.0);
    }

    #[test]
    fn test_bad_code_is_a_shape_failure() {
        let err = parse("1,1,1,\"Obs\",1,43,0,0,0,5,1,2,9,0,1,1521,1\n").unwrap_err();
        assert!(matches!(err, SurvError::DataShape { ref field, row: 1, .. } if field == "extent"));
    }

    #[test]
    fn test_unknown_arm_is_a_shape_failure() {
        let err = parse("1,1,1,\"Placebo\",1,43,0,0,0,5,1,2,3,0,1,1521,1\n").unwrap_err();
        assert!(matches!(err, SurvError::DataShape { ref field, .. } if field == "rx"));
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = Dataset::from_reader("test", "id,study\n1,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SurvError::MissingField { ref field, row: 0 } if field == "rx"));
    }

    #[test]
    fn test_two_rows_per_subject_check() {
        let data = parse(
            "1,1,1,\"Obs\",1,43,0,0,0,5,1,2,3,0,1,1521,1\n\
             2,1,1,\"Obs\",1,43,0,0,0,5,1,2,3,0,1,1521,2\n\
             3,2,1,\"Obs\",0,63,0,0,0,1,0,1,3,0,0,3087,2\n",
        )
        .unwrap();
        assert_eq!(data.subjects_without_two_rows(), vec![2]);
    }

    #[test]
    fn test_load_named_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dataset::load_named(dir.path(), "rectum").unwrap_err();
        assert!(matches!(err, SurvError::DatasetNotFound { ref name, .. } if name == "rectum"));
    }

    #[test]
    fn test_directory_file_overrides_embedded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("colon.csv"),
            format!(
                "{HEADER}1,1,1,\"Obs\",1,43,0,0,0,5,1,2,3,0,1,1521,1\n\
                 2,1,1,\"Obs\",1,43,0,0,0,5,1,2,3,0,1,1521,2\n"
            ),
        )
        .unwrap();
        let data = Dataset::load_named(dir.path(), "colon").unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.name(), "colon");
    }

    #[cfg(embedded_colon)]
    #[test]
    fn test_embedded_colon_table() {
        assert_eq!(embedded_names(), vec!["colon"]);
        let dir = tempfile::tempdir().unwrap();
        let data = Dataset::load_named(dir.path(), "colon").unwrap();
        assert_eq!(data.len(), 1858);
        assert!(data.subjects_without_two_rows().is_empty());
    }

    #[cfg(not(embedded_colon))]
    #[test]
    fn test_nothing_embedded_without_data_file() {
        assert!(embedded_names().is_empty());
        assert!(embedded("colon").is_none());
    }

    #[test]
    fn test_float_encoded_integers() {
        let data = parse("1,1.0,1,\"Lev\",0,70.0,1,0,0,NA,1,3,4,1,0,250,2\n").unwrap();
        assert_eq!(data.records()[0].age, 70);
        assert_eq!(data.records()[0].rx, Treatment::Lev);
    }
}
