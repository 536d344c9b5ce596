//! Header normalization: resolve arbitrary spreadsheet headers to
//! canonical field names.

use std::collections::HashMap;

use crate::types::{RawRow, RawValue};

use super::fields::EntityFieldConfig;

/// Matching key for a header or alias: all whitespace removed, lower-cased
pub fn header_key(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Precomputed alias lookup for one entity
#[derive(Debug, Clone)]
pub struct ColumnNormalizer {
    lookup: HashMap<String, &'static str>,
}

impl ColumnNormalizer {
    pub fn new(config: &EntityFieldConfig) -> Self {
        let mut lookup = HashMap::new();
        for field in &config.fields {
            for alias in &field.aliases {
                // First field listing an alias keeps it
                lookup.entry(header_key(alias)).or_insert(field.name);
            }
        }
        Self { lookup }
    }

    /// Canonical field for a header, if any alias matches
    pub fn resolve(&self, header: &str) -> Option<&'static str> {
        self.lookup.get(&header_key(header)).copied()
    }

    /// Map a row to canonical field → raw value.
    ///
    /// Unrecognised headers are dropped. When two headers resolve to the
    /// same field, the leftmost non-empty cell wins.
    pub fn normalize<'a>(&self, row: &'a RawRow) -> HashMap<&'static str, &'a RawValue> {
        let mut out: HashMap<&'static str, &'a RawValue> = HashMap::new();
        for (header, value) in row.cells() {
            let Some(field) = self.resolve(header) else {
                continue;
            };
            match out.get(field) {
                Some(existing) if !existing.is_empty() => {}
                _ => {
                    out.insert(field, value);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::import::fields::EntityFieldConfig;

    #[test]
    fn test_header_key_strips_whitespace_and_case() {
        assert_eq!(header_key("  Next Follow\tUp "), "nextfollowup");
        assert_eq!(header_key("E-mail"), "e-mail");
    }

    #[test]
    fn test_follow_up_variants_resolve_to_same_field() {
        let normalizer = ColumnNormalizer::new(&EntityFieldConfig::lead());
        for header in ["Next Follow Up", "next follow up", "NextFollowUp", "NEXT  FOLLOW UP"] {
            assert_eq!(normalizer.resolve(header), Some("next_follow_up"), "{}", header);
        }
    }

    #[test]
    fn test_canonical_name_matches_itself() {
        let normalizer = ColumnNormalizer::new(&EntityFieldConfig::lead());
        assert_eq!(normalizer.resolve("preferred_location"), Some("preferred_location"));
    }

    #[test]
    fn test_unknown_headers_are_absent() {
        let normalizer = ColumnNormalizer::new(&EntityFieldConfig::lead());
        let row = RawRow::new(1)
            .with_cell("Mobile No", "9876543210")
            .with_cell("Favourite Colour", "blue");

        let mapped = normalizer.normalize(&row);
        assert_eq!(mapped.len(), 1);
        assert!(mapped.contains_key("phone"));
    }

    #[test]
    fn test_leftmost_non_empty_duplicate_wins() {
        let normalizer = ColumnNormalizer::new(&EntityFieldConfig::lead());
        let row = RawRow::new(1)
            .with_cell("Mobile", "")
            .with_cell("Phone Number", "111")
            .with_cell("Contact", "222");

        let mapped = normalizer.normalize(&row);
        assert_eq!(mapped.get("phone"), Some(&&RawValue::Text("111".to_string())));
    }

    #[test]
    fn test_first_field_keeps_shared_alias() {
        let mut config = EntityFieldConfig::owner();
        config.fields[1].aliases.push("Owner Name".to_string());
        let normalizer = ColumnNormalizer::new(&config);
        assert_eq!(normalizer.resolve("owner name"), Some("name"));
    }
}
