//! Spreadsheet parser: binary upload → ordered raw rows
//!
//! Only the first worksheet is read and its first row is the header.
//! `.csv` uploads are accepted as a single-sheet spreadsheet.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDateTime;
use tracing::debug;

use crate::types::{RawRow, RawValue};

use super::error::ImportError;

/// Decoded first worksheet
#[derive(Debug, Clone)]
pub struct Spreadsheet {
    /// `None` for columns with an empty header cell; those are ignored
    headers: Vec<Option<String>>,
    rows: Vec<Vec<RawValue>>,
}

impl Spreadsheet {
    /// Decode an upload. The filename only selects CSV vs workbook decoding.
    pub fn from_bytes(bytes: &[u8], filename: Option<&str>) -> Result<Self, ImportError> {
        let is_csv = filename
            .map(|f| f.to_lowercase().ends_with(".csv"))
            .unwrap_or(false);

        let sheet = if is_csv {
            Self::from_csv(bytes)?
        } else {
            Self::from_workbook(bytes)?
        };

        debug!(
            "Decoded spreadsheet: {} columns, {} data rows",
            sheet.headers.iter().filter(|h| h.is_some()).count(),
            sheet.rows.len()
        );
        Ok(sheet)
    }

    fn from_workbook(bytes: &[u8]) -> Result<Self, ImportError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| ImportError::MalformedFile(format!("not a spreadsheet: {}", e)))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ImportError::MalformedFile("workbook has no sheets".to_string()))?
            .map_err(|e| ImportError::MalformedFile(format!("failed to read first sheet: {}", e)))?;

        let mut rows = range.rows();
        let headers = rows
            .next()
            .ok_or_else(|| ImportError::MalformedFile("first sheet is empty".to_string()))?
            .iter()
            .map(cell_to_header)
            .collect::<Vec<_>>();

        if headers.iter().all(Option::is_none) {
            return Err(ImportError::MalformedFile("header row is empty".to_string()));
        }

        let rows = rows
            .map(|row| row.iter().map(cell_to_raw).collect())
            .collect();

        Ok(Self { headers, rows })
    }

    fn from_csv(bytes: &[u8]) -> Result<Self, ImportError> {
        let content = std::str::from_utf8(bytes)
            .map_err(|_| ImportError::MalformedFile("CSV file is not valid UTF-8".to_string()))?;
        let content = content.trim_start_matches('\u{feff}');

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(sniff_delimiter(content))
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<Option<String>> = reader
            .headers()
            .map_err(|e| ImportError::MalformedFile(format!("failed to read CSV header: {}", e)))?
            .iter()
            .map(|h| Some(h.trim().to_string()).filter(|h| !h.is_empty()))
            .collect();

        if headers.iter().all(Option::is_none) {
            return Err(ImportError::MalformedFile("header row is empty".to_string()));
        }

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                ImportError::MalformedFile(format!("failed to read CSV row {}: {}", idx + 1, e))
            })?;
            rows.push(record.iter().map(text_to_raw).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Headers in column order, empty header cells skipped
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().filter_map(|h| h.as_deref())
    }

    /// Data rows below the header. Fully blank rows are skipped but keep
    /// their position in the numbering. Call again to restart.
    pub fn rows(&self) -> impl Iterator<Item = RawRow> + '_ {
        self.rows.iter().enumerate().filter_map(move |(idx, cells)| {
            let mut row = RawRow::new(idx + 1);
            for (header, value) in self.headers.iter().zip(cells) {
                if let Some(header) = header {
                    row.push(header.as_str(), value.clone());
                }
            }
            if row.is_blank() {
                None
            } else {
                Some(row)
            }
        })
    }
}

fn sniff_delimiter(content: &str) -> u8 {
    let first_line = content.lines().next().unwrap_or_default();
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn text_to_raw(s: &str) -> RawValue {
    let s = s.trim();
    if s.is_empty() {
        RawValue::Empty
    } else {
        RawValue::Text(s.to_string())
    }
}

fn cell_to_header(cell: &Data) -> Option<String> {
    let header = match cell_to_raw(cell) {
        RawValue::Empty => return None,
        other => other.to_string(),
    };
    Some(header.trim().to_string()).filter(|h| !h.is_empty())
}

fn parse_iso_cell(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Convert a calamine cell to a raw value
fn cell_to_raw(cell: &Data) -> RawValue {
    match cell {
        Data::Empty | Data::Error(_) => RawValue::Empty,
        Data::String(s) => text_to_raw(s),
        Data::Float(f) => RawValue::Number(*f),
        Data::Int(i) => RawValue::Number(*i as f64),
        Data::Bool(b) => RawValue::Bool(*b),
        // as_datetime honours the workbook's 1904 date system
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) => RawValue::DateTime(naive),
            None => RawValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match parse_iso_cell(s) {
            Some(naive) => RawValue::DateTime(naive),
            None => text_to_raw(s),
        },
        Data::DurationIso(s) => text_to_raw(s),
    }
}
