//! Row and record types flowing through the import pipeline

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use super::EntityKind;

// =============================================================================
// RAW ROW
// =============================================================================

/// Raw spreadsheet cell value as decoded by the parser
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Native date/time cell
    DateTime(NaiveDateTime),
}

impl RawValue {
    pub fn is_empty(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Empty => Ok(()),
            RawValue::Text(s) => f.write_str(s),
            RawValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

/// One spreadsheet row: header → raw value, in column order
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    index: usize,
    cells: Vec<(String, RawValue)>,
}

impl RawRow {
    /// `index` is the 1-based data row number used in error reports
    pub fn new(index: usize) -> Self {
        Self {
            index,
            cells: Vec::new(),
        }
    }

    pub fn with_cell(mut self, header: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.push(header, value);
        self
    }

    pub fn push(&mut self, header: impl Into<String>, value: impl Into<RawValue>) {
        self.cells.push((header.into(), value.into()));
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.cells.iter().map(|(h, v)| (h.as_str(), v))
    }

    /// First cell under exactly this header
    #[cfg(test)]
    pub fn get(&self, header: &str) -> Option<&RawValue> {
        self.cells.iter().find(|(h, _)| h == header).map(|(_, v)| v)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.is_empty())
    }
}

// =============================================================================
// CANDIDATE RECORD
// =============================================================================

/// Coerced field value, typed for persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Canonical decimal string (money, area)
    Decimal(String),
    DateTime(DateTime<Utc>),
    /// Reference to another entity
    Id(Uuid),
}

impl FieldValue {
    /// Textual view of text and decimal values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Decimal(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) | FieldValue::Decimal(s) => f.write_str(s),
            FieldValue::DateTime(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            FieldValue::Id(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Validated, type-correct record ready for reconciliation.
///
/// Absent optional fields are simply not present in `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub kind: EntityKind,
    /// Originating 1-based data row
    pub row: usize,
    pub fields: BTreeMap<&'static str, FieldValue>,
}

impl CandidateRecord {
    pub fn new(kind: EntityKind, row: usize) -> Self {
        Self {
            kind,
            row,
            fields: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, field: &'static str, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

/// Resolved dedup key: the fields and values to look an entity up by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupMatch {
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl DedupMatch {
    pub fn single(field: &'static str, value: FieldValue) -> Self {
        Self {
            fields: vec![(field, value)],
        }
    }
}

impl fmt::Display for DedupMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, value)| format!("{}={}", field, value))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_raw_number_displays_without_trailing_zero() {
        assert_eq!(RawValue::Number(9876543210.0).to_string(), "9876543210");
        assert_eq!(RawValue::Number(12.5).to_string(), "12.5");
    }

    #[test]
    fn test_raw_row_keeps_column_order_and_first_duplicate() {
        let row = RawRow::new(1)
            .with_cell("Name", "Asha")
            .with_cell("Phone", "98")
            .with_cell("Name", "Other");

        let headers: Vec<&str> = row.cells().map(|(h, _)| h).collect();
        assert_eq!(headers, vec!["Name", "Phone", "Name"]);
        assert_eq!(row.get("Name"), Some(&RawValue::Text("Asha".to_string())));
    }

    #[test]
    fn test_blank_row_detection() {
        let blank = RawRow::new(4).with_cell("Name", "  ").with_cell("Phone", RawValue::Empty);
        assert!(blank.is_blank());
        assert!(!RawRow::new(5).with_cell("Name", "x").is_blank());
    }

    #[test]
    fn test_datetime_field_displays_iso() {
        let dt = Utc.with_ymd_and_hms(2025, 11, 17, 12, 30, 0).unwrap();
        assert_eq!(FieldValue::DateTime(dt).to_string(), "2025-11-17T12:30:00.000Z");
    }

    #[test]
    fn test_dedup_match_display() {
        let key = DedupMatch {
            fields: vec![
                ("title", FieldValue::Text("Sea View 2BHK".to_string())),
                ("location", FieldValue::Text("Bandra".to_string())),
            ],
        };
        assert_eq!(key.to_string(), "title=Sea View 2BHK, location=Bandra");
    }

    #[test]
    fn test_candidate_remove_and_has() {
        let mut record = CandidateRecord::new(EntityKind::Property, 1);
        record.set("owner_phone", FieldValue::Text("9820000001".to_string()));
        assert!(record.has("owner_phone"));
        assert_eq!(
            record.remove("owner_phone"),
            Some(FieldValue::Text("9820000001".to_string()))
        );
        assert!(!record.has("owner_phone"));
    }
}
