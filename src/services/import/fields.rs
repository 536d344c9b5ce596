//! Per-entity field configuration: canonical fields, header aliases,
//! semantic types, required-field policy and dedup keys.
//!
//! The configuration is an explicit value handed to the pipeline at
//! construction, so callers (and tests) can substitute alias tables.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::EntityKind;

/// Column limits of a `NUMERIC(precision, scale)` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalLimits {
    pub precision: u32,
    pub scale: u32,
}

impl DecimalLimits {
    /// Prices and budgets, `NUMERIC(16, 2)`
    pub const MONEY: DecimalLimits = DecimalLimits { precision: 16, scale: 2 };
    /// Floor area, `NUMERIC(12, 2)`
    pub const AREA: DecimalLimits = DecimalLimits { precision: 12, scale: 2 };

    pub fn max_integer_digits(&self) -> usize {
        self.precision.saturating_sub(self.scale) as usize
    }
}

/// Semantic type a raw cell is coerced into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    /// Text, trimmed and lower-cased
    Email,
    /// Text with separators stripped
    Phone,
    /// Decimal kept as its canonical string form, rounded to the column scale
    Decimal(DecimalLimits),
    DateTime,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Decimal(_) => "decimal",
            FieldType::DateTime => "date",
        }
    }
}

/// One canonical field of an entity
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    /// Accepted header variants; the canonical name is always included
    pub aliases: Vec<String>,
}

impl FieldSpec {
    fn new(name: &'static str, ty: FieldType, required: bool, aliases: &[&str]) -> Self {
        let mut all = vec![name.to_string()];
        all.extend(aliases.iter().map(|a| a.to_string()));
        Self {
            name,
            ty,
            required,
            aliases: all,
        }
    }

    fn required(name: &'static str, ty: FieldType, aliases: &[&str]) -> Self {
        Self::new(name, ty, true, aliases)
    }

    fn optional(name: &'static str, ty: FieldType, aliases: &[&str]) -> Self {
        Self::new(name, ty, false, aliases)
    }
}

/// Ordered set of fields that identify an existing entity.
/// Usable only when every field is present on the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub fields: Vec<&'static str>,
}

impl DedupKey {
    fn of(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }
}

/// Field configuration for one entity kind
#[derive(Debug, Clone)]
pub struct EntityFieldConfig {
    pub kind: EntityKind,
    pub fields: Vec<FieldSpec>,
    /// Tried in order; the first key that finds a row wins
    pub dedup_keys: Vec<DedupKey>,
}

impl EntityFieldConfig {
    pub fn lead() -> Self {
        use FieldType::*;
        Self {
            kind: EntityKind::Lead,
            fields: vec![
                FieldSpec::required("name", Text, &["Lead Name", "Client Name", "Customer Name", "Full Name"]),
                FieldSpec::required("phone", Phone, &["Phone Number", "Mobile", "Mobile No", "Mobile Number", "Contact", "Contact Number"]),
                FieldSpec::required("source", Text, &["Lead Source", "Source Of Lead", "Channel"]),
                FieldSpec::optional("email", Email, &["Email Address", "E-mail", "Mail"]),
                FieldSpec::optional("status", Text, &["Lead Status", "Stage"]),
                FieldSpec::optional("budget", Decimal(DecimalLimits::MONEY), &["Budget (INR)", "Max Budget", "Budget Amount"]),
                FieldSpec::optional("requirement", Text, &["Requirements", "Looking For"]),
                FieldSpec::optional("preferred_location", Text, &["Preferred Location", "Location", "Area Preference"]),
                FieldSpec::optional("property_type", Text, &["Property Type", "Type"]),
                FieldSpec::optional("assigned_to", Text, &["Assigned To", "Agent", "Assigned Agent"]),
                FieldSpec::optional("notes", Text, &["Remarks", "Comments", "Note"]),
                FieldSpec::optional("next_follow_up", DateTime, &["Next Follow Up", "Follow Up Date", "Next Followup Date"]),
            ],
            dedup_keys: vec![DedupKey::of(&["phone"]), DedupKey::of(&["email"])],
        }
    }

    pub fn property() -> Self {
        use FieldType::*;
        Self {
            kind: EntityKind::Property,
            fields: vec![
                FieldSpec::required("title", Text, &["Property Title", "Property Name", "Listing Title"]),
                FieldSpec::required("location", Text, &["Property Location", "Address", "Locality"]),
                FieldSpec::optional("property_type", Text, &["Property Type", "Type"]),
                FieldSpec::optional("listing_type", Text, &["Listing Type", "For", "Rent/Sell", "Deal Type"]),
                FieldSpec::optional("price", Decimal(DecimalLimits::MONEY), &["Price (INR)", "Expected Price", "Rent", "Amount"]),
                FieldSpec::optional("area", Decimal(DecimalLimits::AREA), &["Area (sq ft)", "Carpet Area", "Size", "Sq Ft"]),
                FieldSpec::optional("bedrooms", Text, &["BHK", "Bedrooms", "Configuration"]),
                FieldSpec::optional("status", Text, &["Listing Status", "Availability"]),
                FieldSpec::optional("description", Text, &["Details", "Property Description"]),
                FieldSpec::optional("available_from", DateTime, &["Available From", "Possession Date"]),
                FieldSpec::optional("owner_name", Text, &["Owner Name", "Owner", "Landlord"]),
                FieldSpec::optional("owner_phone", Phone, &["Owner Phone", "Owner Mobile", "Owner Contact", "Landlord Phone"]),
            ],
            dedup_keys: vec![DedupKey::of(&["title", "location"])],
        }
    }

    pub fn owner() -> Self {
        use FieldType::*;
        Self {
            kind: EntityKind::Owner,
            fields: vec![
                FieldSpec::required("name", Text, &["Owner Name", "Full Name", "Landlord"]),
                FieldSpec::required("phone", Phone, &["Owner Phone", "Phone Number", "Mobile", "Mobile No", "Contact Number"]),
                FieldSpec::optional("email", Email, &["Owner Email", "Email Address", "E-mail"]),
                FieldSpec::optional("address", Text, &["Owner Address", "Residential Address"]),
                FieldSpec::optional("notes", Text, &["Remarks", "Comments"]),
            ],
            dedup_keys: vec![DedupKey::of(&["phone"]), DedupKey::of(&["email"])],
        }
    }

    pub fn client() -> Self {
        use FieldType::*;
        Self {
            kind: EntityKind::Client,
            fields: vec![
                FieldSpec::required("name", Text, &["Client Name", "Customer Name", "Full Name"]),
                FieldSpec::optional("email", Email, &["Client Email", "Email Address", "E-mail"]),
                FieldSpec::optional("phone", Phone, &["Client Phone", "Phone Number", "Mobile", "Mobile No", "Contact Number"]),
                FieldSpec::optional("address", Text, &["Client Address", "Address"]),
                FieldSpec::optional("client_type", Text, &["Client Type", "Buyer/Tenant", "Category"]),
                FieldSpec::optional("budget", Decimal(DecimalLimits::MONEY), &["Budget (INR)", "Max Budget"]),
                FieldSpec::optional("notes", Text, &["Remarks", "Comments"]),
            ],
            dedup_keys: vec![DedupKey::of(&["email"]), DedupKey::of(&["phone"])],
        }
    }
}

// =============================================================================
// CONFIG SET
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read alias overrides from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid alias overrides: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown entity kind in alias overrides: {0}")]
    UnknownKind(String),
    #[error("unknown field '{field}' for {kind} in alias overrides")]
    UnknownField { kind: EntityKind, field: String },
}

/// `{ "<kind>": { "<field>": ["alias", ...] } }`
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct AliasOverrides(HashMap<String, HashMap<String, Vec<String>>>);

/// Field configuration for every entity kind
#[derive(Debug, Clone)]
pub struct FieldConfigSet {
    lead: EntityFieldConfig,
    property: EntityFieldConfig,
    owner: EntityFieldConfig,
    client: EntityFieldConfig,
}

impl Default for FieldConfigSet {
    fn default() -> Self {
        Self {
            lead: EntityFieldConfig::lead(),
            property: EntityFieldConfig::property(),
            owner: EntityFieldConfig::owner(),
            client: EntityFieldConfig::client(),
        }
    }
}

impl FieldConfigSet {
    pub fn get(&self, kind: EntityKind) -> &EntityFieldConfig {
        match kind {
            EntityKind::Lead => &self.lead,
            EntityKind::Property => &self.property,
            EntityKind::Owner => &self.owner,
            EntityKind::Client => &self.client,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut EntityFieldConfig {
        match kind {
            EntityKind::Lead => &mut self.lead,
            EntityKind::Property => &mut self.property,
            EntityKind::Owner => &mut self.owner,
            EntityKind::Client => &mut self.client,
        }
    }

    /// Extend alias lists from a JSON document
    pub fn with_alias_overrides(mut self, json: &str) -> Result<Self, ConfigError> {
        let overrides: AliasOverrides = serde_json::from_str(json)?;

        for (kind_name, fields) in overrides.0 {
            let kind: EntityKind = kind_name
                .parse()
                .map_err(|_| ConfigError::UnknownKind(kind_name.clone()))?;
            let config = self.get_mut(kind);

            for (field_name, aliases) in fields {
                let spec = config
                    .fields
                    .iter_mut()
                    .find(|f| f.name == field_name)
                    .ok_or_else(|| ConfigError::UnknownField {
                        kind,
                        field: field_name.clone(),
                    })?;
                for alias in aliases {
                    if !spec.aliases.contains(&alias) {
                        spec.aliases.push(alias);
                    }
                }
            }
        }

        Ok(self)
    }

    /// Defaults extended by the overrides file at `path`
    pub fn from_overrides_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::default().with_alias_overrides(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(set: &FieldConfigSet, kind: EntityKind) -> Vec<&'static str> {
        set.get(kind).fields.iter().filter(|f| f.required).map(|f| f.name).collect()
    }

    fn field<'a>(set: &'a FieldConfigSet, kind: EntityKind, name: &str) -> Option<&'a FieldSpec> {
        set.get(kind).fields.iter().find(|f| f.name == name)
    }

    #[test]
    fn test_required_fields_per_entity() {
        let set = FieldConfigSet::default();
        assert_eq!(required(&set, EntityKind::Lead), vec!["name", "phone", "source"]);
        assert_eq!(required(&set, EntityKind::Property), vec!["title", "location"]);
        assert_eq!(required(&set, EntityKind::Owner), vec!["name", "phone"]);
        assert_eq!(required(&set, EntityKind::Client), vec!["name"]);
    }

    #[test]
    fn test_client_dedup_is_email_then_phone() {
        let set = FieldConfigSet::default();
        let keys = &set.get(EntityKind::Client).dedup_keys;
        assert_eq!(keys[0].fields, vec!["email"]);
        assert_eq!(keys[1].fields, vec!["phone"]);
    }

    #[test]
    fn test_canonical_name_is_always_an_alias() {
        let set = FieldConfigSet::default();
        for kind in EntityKind::ALL {
            for field in &set.get(kind).fields {
                assert_eq!(field.aliases[0], field.name, "{} {}", kind, field.name);
            }
        }
    }

    #[test]
    fn test_alias_overrides_extend_lists() {
        let set = FieldConfigSet::default()
            .with_alias_overrides(r#"{ "lead": { "phone": ["WhatsApp No"] } }"#)
            .unwrap();
        let phone = field(&set, EntityKind::Lead, "phone").unwrap();
        assert!(phone.aliases.iter().any(|a| a == "WhatsApp No"));
    }

    #[test]
    fn test_alias_overrides_reject_unknown_field() {
        let err = FieldConfigSet::default()
            .with_alias_overrides(r#"{ "owner": { "pan_number": ["PAN"] } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { .. }));
    }

    #[test]
    fn test_alias_overrides_reject_unknown_kind() {
        let err = FieldConfigSet::default()
            .with_alias_overrides(r#"{ "agreement": {} }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKind(_)));
    }

    #[test]
    fn test_overrides_leave_other_kinds_alone() {
        let set = FieldConfigSet::default()
            .with_alias_overrides(r#"{ "owner": { "address": ["Flat Address"] } }"#)
            .unwrap();
        let client_address = field(&set, EntityKind::Client, "address").unwrap();
        assert!(!client_address.aliases.iter().any(|a| a == "Flat Address"));
    }
}
