//! Reconciliation: decide insert vs update for a candidate and resolve
//! its relationships, all inside the caller's batch transaction.

use tracing::debug;
use uuid::Uuid;

use crate::db::{ImportTx, StoreError};
use crate::types::{CandidateRecord, DedupMatch, EntityKind, FieldValue, RowOutcome};

use super::fields::EntityFieldConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update(Uuid),
}

/// Usable dedup keys for `record`, in configured order.
/// A key is usable only when every one of its fields is present.
pub fn dedup_matches(config: &EntityFieldConfig, record: &CandidateRecord) -> Vec<DedupMatch> {
    config
        .dedup_keys
        .iter()
        .filter_map(|key| {
            let fields = key
                .fields
                .iter()
                .map(|field| record.get(field).map(|value| (*field, value.clone())))
                .collect::<Option<Vec<_>>>()?;
            Some(DedupMatch { fields })
        })
        .collect()
}

/// First usable key that finds an existing entity decides an update
pub async fn decide(
    tx: &mut dyn ImportTx,
    config: &EntityFieldConfig,
    record: &CandidateRecord,
) -> Result<Decision, StoreError> {
    for key in dedup_matches(config, record) {
        if let Some(id) = tx.find_by_dedup_key(config.kind, &key).await? {
            debug!("Row {} matches existing {} {} on {}", record.row, config.kind, id, key);
            return Ok(Decision::Update(id));
        }
    }
    Ok(Decision::Insert)
}

/// Replace a property's `owner_name`/`owner_phone` with an `owner_id`,
/// creating the owner when no owner with that phone exists yet.
pub async fn resolve_owner(tx: &mut dyn ImportTx, record: &mut CandidateRecord) -> Result<(), StoreError> {
    if record.kind != EntityKind::Property {
        return Ok(());
    }
    let owner_name = record.remove("owner_name");
    let Some(owner_phone) = record.remove("owner_phone") else {
        return Ok(());
    };

    let key = DedupMatch::single("phone", owner_phone.clone());
    let owner_id = match tx.find_by_dedup_key(EntityKind::Owner, &key).await? {
        Some(id) => id,
        None => {
            let mut owner = CandidateRecord::new(EntityKind::Owner, record.row);
            owner.set("name", owner_name.unwrap_or_else(|| owner_phone.clone()));
            owner.set("phone", owner_phone);
            let id = tx.insert(EntityKind::Owner, &owner).await?;
            debug!("Created owner {} for property row {}", id, record.row);
            id
        }
    };

    record.set("owner_id", FieldValue::Id(owner_id));
    Ok(())
}

/// Reconcile and write one candidate inside an open transaction
pub async fn apply(
    tx: &mut dyn ImportTx,
    config: &EntityFieldConfig,
    mut record: CandidateRecord,
) -> Result<RowOutcome, StoreError> {
    resolve_owner(tx, &mut record).await?;
    let row = record.row;

    match decide(tx, config, &record).await? {
        Decision::Insert => {
            tx.insert(config.kind, &record).await?;
            Ok(RowOutcome::Inserted { row })
        }
        Decision::Update(id) => {
            tx.update(config.kind, id, &record).await?;
            Ok(RowOutcome::Updated { row })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ImportStore, MemoryImportStore};
    use crate::types::ImportContext;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    fn lead(row: usize, phone: Option<&str>, email: Option<&str>) -> CandidateRecord {
        let mut record = CandidateRecord::new(EntityKind::Lead, row);
        record.set("name", text("Asha"));
        record.set("source", text("Website"));
        if let Some(phone) = phone {
            record.set("phone", text(phone));
        }
        if let Some(email) = email {
            record.set("email", text(email));
        }
        record
    }

    fn ctx() -> ImportContext {
        ImportContext::new(Uuid::new_v4(), "admin")
    }

    #[test]
    fn test_keys_with_absent_fields_are_skipped() {
        let config = EntityFieldConfig::client();
        let mut record = CandidateRecord::new(EntityKind::Client, 1);
        record.set("name", text("Ravi"));
        record.set("phone", text("9000000000"));

        let keys = dedup_matches(&config, &record);
        assert_eq!(keys, vec![DedupMatch::single("phone", text("9000000000"))]);
    }

    #[test]
    fn test_composite_key_needs_every_field() {
        let config = EntityFieldConfig::property();
        let mut record = CandidateRecord::new(EntityKind::Property, 1);
        record.set("title", text("Shop 12"));
        assert!(dedup_matches(&config, &record).is_empty());

        record.set("location", text("Dadar"));
        assert_eq!(dedup_matches(&config, &record).len(), 1);
    }

    #[tokio::test]
    async fn test_decide_falls_back_to_second_key() {
        let store = MemoryImportStore::new();
        let config = EntityFieldConfig::lead();
        let mut tx = store.begin(&ctx()).await.unwrap();
        let existing = tx
            .insert(EntityKind::Lead, &lead(1, Some("111"), Some("asha@example.com")))
            .await
            .unwrap();

        let candidate = lead(2, Some("222"), Some("asha@example.com"));
        assert_eq!(
            decide(tx.as_mut(), &config, &candidate).await.unwrap(),
            Decision::Update(existing)
        );

        let stranger = lead(3, Some("333"), None);
        assert_eq!(decide(tx.as_mut(), &config, &stranger).await.unwrap(), Decision::Insert);
    }

    #[tokio::test]
    async fn test_apply_twice_updates_second_time() {
        let store = MemoryImportStore::new();
        let config = EntityFieldConfig::lead();
        let mut tx = store.begin(&ctx()).await.unwrap();

        let first = apply(tx.as_mut(), &config, lead(1, Some("9876543210"), None)).await.unwrap();
        let second = apply(tx.as_mut(), &config, lead(2, Some("9876543210"), None)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first, RowOutcome::Inserted { row: 1 });
        assert_eq!(second, RowOutcome::Updated { row: 2 });
        assert_eq!(store.count(EntityKind::Lead), 1);
    }

    #[tokio::test]
    async fn test_property_owner_created_then_reused() {
        let store = MemoryImportStore::new();
        let config = EntityFieldConfig::property();
        let mut tx = store.begin(&ctx()).await.unwrap();

        let mut flat = CandidateRecord::new(EntityKind::Property, 1);
        flat.set("title", text("Sea View 2BHK"));
        flat.set("location", text("Bandra"));
        flat.set("owner_name", text("Mehta"));
        flat.set("owner_phone", text("9820000001"));

        let mut shop = CandidateRecord::new(EntityKind::Property, 2);
        shop.set("title", text("Shop 12"));
        shop.set("location", text("Dadar"));
        shop.set("owner_phone", text("9820000001"));

        apply(tx.as_mut(), &config, flat).await.unwrap();
        apply(tx.as_mut(), &config, shop).await.unwrap();
        tx.commit().await.unwrap();

        let owners = store.entities(EntityKind::Owner);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].text("name"), Some("Mehta"));

        let properties = store.entities(EntityKind::Property);
        assert!(properties
            .iter()
            .all(|p| p.get("owner_id") == Some(&FieldValue::Id(owners[0].id))));
        assert!(properties.iter().all(|p| p.get("owner_phone").is_none()));
    }

    #[tokio::test]
    async fn test_owner_without_name_is_named_by_phone() {
        let store = MemoryImportStore::new();
        let mut tx = store.begin(&ctx()).await.unwrap();
        let mut record = CandidateRecord::new(EntityKind::Property, 4);
        record.set("title", text("Plot 7"));
        record.set("location", text("Panvel"));
        record.set("owner_phone", text("9000012345"));

        resolve_owner(tx.as_mut(), &mut record).await.unwrap();
        tx.commit().await.unwrap();

        let owner = store.find(EntityKind::Owner, "phone", "9000012345").unwrap();
        assert_eq!(owner.text("name"), Some("9000012345"));
        assert_eq!(record.get("owner_id"), Some(&FieldValue::Id(owner.id)));
    }
}
