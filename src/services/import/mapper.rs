//! Row mapper: raw row → candidate record, or a structural row error.
//!
//! Runs entirely before any transaction opens, so rows rejected here
//! never reach storage.

use crate::types::{CandidateRecord, EntityKind, RawRow};

use super::coerce::coerce;
use super::error::{CoercionError, RowError};
use super::fields::EntityFieldConfig;
use super::normalize::ColumnNormalizer;

pub struct RowMapper<'a> {
    config: &'a EntityFieldConfig,
    normalizer: ColumnNormalizer,
}

impl<'a> RowMapper<'a> {
    pub fn new(config: &'a EntityFieldConfig) -> Self {
        Self {
            config,
            normalizer: ColumnNormalizer::new(config),
        }
    }

    /// Map one row. Missing required fields are reported together and take
    /// precedence over coercion failures.
    pub fn map_row(&self, row: &RawRow) -> Result<CandidateRecord, RowError> {
        let raw_fields = self.normalizer.normalize(row);
        let mut record = CandidateRecord::new(self.config.kind, row.index());
        let mut missing = Vec::new();
        let mut first_invalid: Option<CoercionError> = None;

        for field in &self.config.fields {
            let coerced = match raw_fields.get(field.name) {
                Some(raw) => coerce(field, raw),
                None => Ok(None),
            };
            match coerced {
                Ok(Some(value)) => record.set(field.name, value),
                Ok(None) if field.required => missing.push(field.name),
                Ok(None) => {}
                Err(e) => {
                    first_invalid.get_or_insert(e);
                }
            }
        }

        if !missing.is_empty() {
            return Err(RowError::MissingRequired(missing));
        }
        if let Some(err) = first_invalid {
            return Err(err.into());
        }

        check_relationships(&record)?;
        Ok(record)
    }
}

/// Relationship fields that can be judged without storage
fn check_relationships(record: &CandidateRecord) -> Result<(), RowError> {
    if record.kind == EntityKind::Property
        && record.has("owner_name")
        && !record.has("owner_phone")
    {
        return Err(RowError::Relationship(format!(
            "Owner phone is required to link owner '{}'",
            record.text("owner_name").unwrap_or_default()
        )));
    }
    Ok(())
}
