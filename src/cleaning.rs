//! cleaner / labeler - raw rows in, one analysis-ready row per subject out
//!
//! keeps the target event type, drops rows with no differentiation grade &
//! attaches the display labels. labels are literal lookups, so re-deriving
//! them from the raw codes always gives the same answer.

use serde::Serialize;

use crate::dataset::{Dataset, EventType, RawRecord, Treatment};
use crate::error::{Result, SurvError};

/// age at or above this goes in the older band
pub const AGE_BAND_THRESHOLD: u32 = 70;

pub const AGE_BANDS: [&str; 2] = ["18-69", "70+"];
pub const SEX_LABELS: [(u8, &str); 2] = [(0, "Female"), (1, "Male")];
pub const DIFFER_LABELS: [(u8, &str); 3] = [(1, "Well"), (2, "Moderate"), (3, "Poor")];
pub const EXTENT_LABELS: [(u8, &str); 4] = [
    (1, "Submucosa"),
    (2, "Muscle"),
    (3, "Serosa"),
    (4, "Contiguous structures"),
];
pub const SURG_LABELS: [(u8, &str); 2] = [(0, "Short"), (1, "Long")];
pub const FLAG_LABELS: [(u8, &str); 2] = [(0, "No"), (1, "Yes")];
pub const STATUS_LABELS: [(u8, &str); 2] = [(0, "Censored"), (1, "Event")];

fn lookup(table: &[(u8, &'static str)], code: u8) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, label)| *label)
}

/// "18-69" below 70, "70+" otherwise - total over every age
pub fn age_band(age: u32) -> &'static str {
    if age < AGE_BAND_THRESHOLD { AGE_BANDS[0] } else { AGE_BANDS[1] }
}

pub fn sex_label(code: u8) -> Option<&'static str> {
    lookup(&SEX_LABELS, code)
}

pub fn differ_label(code: u8) -> Option<&'static str> {
    lookup(&DIFFER_LABELS, code)
}

pub fn extent_label(code: u8) -> Option<&'static str> {
    lookup(&EXTENT_LABELS, code)
}

pub fn surg_label(code: u8) -> Option<&'static str> {
    lookup(&SURG_LABELS, code)
}

pub fn flag_label(code: u8) -> Option<&'static str> {
    lookup(&FLAG_LABELS, code)
}

pub fn status_label(code: u8) -> Option<&'static str> {
    lookup(&STATUS_LABELS, code)
}

/// one subject, one event type, differentiation known
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub id: u32,
    pub rx: Treatment,
    pub sex: u8,
    pub age: u32,
    pub obstruct: u8,
    pub perfor: u8,
    pub adhere: u8,
    pub nodes: Option<u32>,
    pub status: u8,
    pub differ: u8,
    pub extent: u8,
    pub surg: u8,
    pub node4: u8,
    pub time: f64,
    // derived
    pub age_band: &'static str,
    pub sex_label: &'static str,
    pub differ_label: &'static str,
    pub extent_label: &'static str,
    pub surg_label: &'static str,
}

impl AnalysisRecord {
    /// label a raw row; `None` when differentiation is undefined
    pub fn derive(raw: &RawRecord, row: usize) -> Result<Option<Self>> {
        let Some(differ) = raw.differ else {
            return Ok(None);
        };

        let sex_label = sex_label(raw.sex).ok_or_else(|| SurvError::data_shape("sex", raw.sex, row))?;
        let differ_label = differ_label(differ).ok_or_else(|| SurvError::data_shape("differ", differ, row))?;
        let extent_label =
            extent_label(raw.extent).ok_or_else(|| SurvError::data_shape("extent", raw.extent, row))?;
        let surg_label = surg_label(raw.surg).ok_or_else(|| SurvError::data_shape("surg", raw.surg, row))?;

        Ok(Some(Self {
            id: raw.id,
            rx: raw.rx,
            sex: raw.sex,
            age: raw.age,
            obstruct: raw.obstruct,
            perfor: raw.perfor,
            adhere: raw.adhere,
            nodes: raw.nodes,
            status: raw.status,
            differ,
            extent: raw.extent,
            surg: raw.surg,
            node4: raw.node4,
            time: raw.time,
            age_band: age_band(raw.age),
            sex_label,
            differ_label,
            extent_label,
            surg_label,
        }))
    }

    pub fn is_event(&self) -> bool {
        self.status == 1
    }
}

/// the analysis table every downstream step reads from
#[derive(Debug, Clone, Serialize)]
pub struct CleanedTable {
    target: EventType,
    records: Vec<AnalysisRecord>,
    event_filtered: usize,
    dropped_missing_differ: usize,
}

impl CleanedTable {
    pub fn records(&self) -> &[AnalysisRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn target(&self) -> EventType {
        self.target
    }

    /// rows left after the event-type filter, before dropping missing grades
    pub fn event_filtered(&self) -> usize {
        self.event_filtered
    }

    /// rows removed for an undefined differentiation grade
    pub fn dropped_missing_differ(&self) -> usize {
        self.dropped_missing_differ
    }

    pub fn n_events(&self) -> usize {
        self.records.iter().filter(|r| r.is_event()).count()
    }
}

/// filter to `target`, drop undefined grades, attach labels
///
/// Dropping is silent, so the table may come back empty.
pub fn clean(dataset: &Dataset, target: EventType) -> Result<CleanedTable> {
    let mut records = Vec::new();
    let mut event_filtered = 0;
    let mut dropped = 0;

    for (idx, raw) in dataset.records().iter().enumerate() {
        if raw.etype != target {
            continue;
        }
        event_filtered += 1;

        match AnalysisRecord::derive(raw, idx + 1)? {
            Some(record) => records.push(record),
            None => dropped += 1,
        }
    }

    tracing::info!(
        target_event = %target,
        event_rows = event_filtered,
        dropped_missing_differ = dropped,
        kept = records.len(),
        "cleaned dataset"
    );

    Ok(CleanedTable {
        target,
        records,
        event_filtered,
        dropped_missing_differ: dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: u32, etype: EventType, differ: Option<u8>, age: u32) -> RawRecord {
        RawRecord {
            id,
            study: 1,
            rx: Treatment::Obs,
            sex: 1,
            age,
            obstruct: 0,
            perfor: 0,
            adhere: 0,
            nodes: Some(3),
            status: 1,
            differ,
            extent: 3,
            surg: 0,
            node4: 0,
            time: 100.0 + id as f64,
            etype,
        }
    }

    fn two_rows(id: u32, differ: Option<u8>, age: u32) -> [RawRecord; 2] {
        [
            raw(id, EventType::Recurrence, differ, age),
            raw(id, EventType::Death, differ, age),
        ]
    }

    #[test]
    fn test_age_band_threshold() {
        assert_eq!(age_band(0), "18-69");
        assert_eq!(age_band(69), "18-69");
        assert_eq!(age_band(70), "70+");
        assert_eq!(age_band(120), "70+");
    }

    #[test]
    fn test_label_tables() {
        assert_eq!(sex_label(0), Some("Female"));
        assert_eq!(differ_label(3), Some("Poor"));
        assert_eq!(extent_label(4), Some("Contiguous structures"));
        assert_eq!(surg_label(1), Some("Long"));
        assert_eq!(differ_label(0), None);
        assert_eq!(extent_label(5), None);
    }

    #[test]
    fn test_clean_keeps_target_and_drops_missing_grades() {
        let mut rows = Vec::new();
        rows.extend(two_rows(1, Some(2), 50));
        rows.extend(two_rows(2, None, 72));
        rows.extend(two_rows(3, Some(1), 70));
        let data = Dataset::from_records("toy", rows);

        let table = clean(&data, EventType::Death).unwrap();
        assert_eq!(table.event_filtered(), 3);
        assert_eq!(table.dropped_missing_differ(), 1);
        assert_eq!(table.len(), 2);
        assert!(table.len() < table.event_filtered());
        assert!(table.records().iter().all(|r| r.differ >= 1));

        let third = &table.records()[1];
        assert_eq!(third.id, 3);
        assert_eq!(third.age_band, "70+");
        assert_eq!(third.differ_label, "Well");
        assert_eq!(third.extent_label, "Serosa");
        assert_eq!(third.sex_label, "Male");
    }

    #[test]
    fn test_clean_with_nothing_left_is_empty() {
        let data = Dataset::from_records("toy", two_rows(1, None, 50).to_vec());
        let table = clean(&data, EventType::Death).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.event_filtered(), 1);
        assert_eq!(table.dropped_missing_differ(), 1);
    }

    #[test]
    fn test_clean_without_target_rows_is_empty() {
        let rows: Vec<RawRecord> = two_rows(1, Some(2), 50)
            .into_iter()
            .filter(|r| r.etype == EventType::Recurrence)
            .collect();
        let table = clean(&Dataset::from_records("toy", rows), EventType::Death).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.event_filtered(), 0);
    }

    #[test]
    fn test_derivation_is_repeatable() {
        let row = raw(7, EventType::Death, Some(3), 64);
        let a = AnalysisRecord::derive(&row, 1).unwrap();
        let b = AnalysisRecord::derive(&row, 1).unwrap();
        assert_eq!(a, b);
    }
}
