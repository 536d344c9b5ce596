//! In-process import store for tests and dry runs

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{CandidateRecord, DedupMatch, EntityKind, FieldValue, ImportContext};

use super::store::{ImportStore, ImportTx, StoreError};

/// Entity row as held by the memory store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntity {
    pub id: Uuid,
    pub created_by: Uuid,
    pub fields: BTreeMap<&'static str, FieldValue>,
}

impl StoredEntity {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    #[cfg(test)]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }
}

type Tables = HashMap<EntityKind, Vec<StoredEntity>>;

#[derive(Debug, Clone)]
struct FailRule {
    kind: EntityKind,
    field: &'static str,
    value: String,
}

impl FailRule {
    fn check(&self, kind: EntityKind, record: &CandidateRecord) -> Result<(), StoreError> {
        let hit = self.kind == kind
            && record
                .get(self.field)
                .is_some_and(|v| v.to_string() == self.value);
        if hit {
            return Err(StoreError::Constraint(format!(
                "{} rejected {} '{}'",
                kind.table(),
                self.field,
                self.value
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Memory-backed store.
///
/// Each transaction works on a private copy of the tables that replaces the
/// shared tables on commit. Meant for one import at a time.
#[derive(Debug, Clone, Default)]
pub struct MemoryImportStore {
    tables: Arc<Mutex<Tables>>,
    failures: Arc<Mutex<Vec<FailRule>>>,
    counters: Arc<Counters>,
}

impl MemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any write of `kind` whose `field` renders as `value`
    pub fn fail_when(&self, kind: EntityKind, field: &'static str, value: impl Into<String>) {
        self.failures.lock().push(FailRule {
            kind,
            field,
            value: value.into(),
        });
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.tables.lock().get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
impl MemoryImportStore {
    /// Committed entities of `kind`, in insertion order
    pub fn entities(&self, kind: EntityKind) -> Vec<StoredEntity> {
        self.tables.lock().get(&kind).cloned().unwrap_or_default()
    }

    /// First committed entity of `kind` whose `field` renders as `value`
    pub fn find(&self, kind: EntityKind, field: &str, value: &str) -> Option<StoredEntity> {
        self.tables.lock().get(&kind).and_then(|rows| {
            rows.iter()
                .find(|e| e.get(field).is_some_and(|v| v.to_string() == value))
                .cloned()
        })
    }

    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImportStore for MemoryImportStore {
    async fn begin(&self, ctx: &ImportContext) -> Result<Box<dyn ImportTx>, StoreError> {
        Ok(Box::new(MemoryImportTx {
            shared: Arc::clone(&self.tables),
            snapshot: Some(self.tables.lock().clone()),
            failures: self.failures.lock().clone(),
            counters: Arc::clone(&self.counters),
            user_id: ctx.user_id,
        }))
    }
}

struct MemoryImportTx {
    shared: Arc<Mutex<Tables>>,
    /// `None` once committed or rolled back
    snapshot: Option<Tables>,
    failures: Vec<FailRule>,
    counters: Arc<Counters>,
    user_id: Uuid,
}

impl MemoryImportTx {
    fn tables(&mut self) -> Result<&mut Tables, StoreError> {
        self.snapshot.as_mut().ok_or(StoreError::Finished)
    }

    fn check_failures(&self, kind: EntityKind, record: &CandidateRecord) -> Result<(), StoreError> {
        self.failures.iter().try_for_each(|rule| rule.check(kind, record))
    }
}

/// Email comparisons ignore case
fn values_equal(field: &str, stored: &FieldValue, wanted: &FieldValue) -> bool {
    match (field, stored.as_str(), wanted.as_str()) {
        ("email", Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => stored == wanted,
    }
}

#[async_trait]
impl ImportTx for MemoryImportTx {
    async fn find_by_dedup_key(
        &mut self,
        kind: EntityKind,
        key: &DedupMatch,
    ) -> Result<Option<Uuid>, StoreError> {
        let tables = self.tables()?;
        let found = tables.get(&kind).and_then(|rows| {
            rows.iter().find(|entity| {
                key.fields.iter().all(|(field, wanted)| {
                    entity
                        .get(field)
                        .is_some_and(|stored| values_equal(field, stored, wanted))
                })
            })
        });
        Ok(found.map(|e| e.id))
    }

    async fn insert(&mut self, kind: EntityKind, record: &CandidateRecord) -> Result<Uuid, StoreError> {
        self.check_failures(kind, record)?;
        let user_id = self.user_id;
        let entity = StoredEntity {
            id: Uuid::new_v4(),
            created_by: user_id,
            fields: record.fields.clone(),
        };
        let id = entity.id;
        self.tables()?.entry(kind).or_default().push(entity);
        Ok(id)
    }

    async fn update(
        &mut self,
        kind: EntityKind,
        id: Uuid,
        record: &CandidateRecord,
    ) -> Result<(), StoreError> {
        self.check_failures(kind, record)?;
        let entity = self
            .tables()?
            .get_mut(&kind)
            .and_then(|rows| rows.iter_mut().find(|e| e.id == id))
            .ok_or(StoreError::NotFound { kind, id })?;
        entity
            .fields
            .extend(record.fields.iter().map(|(k, v)| (*k, v.clone())));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.take().ok_or(StoreError::Finished)?;
        *self.shared.lock() = snapshot;
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.snapshot.take().ok_or(StoreError::Finished)?;
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ImportContext {
        ImportContext::new(Uuid::new_v4(), "agent")
    }

    fn owner(row: usize, name: &str, phone: &str) -> CandidateRecord {
        let mut record = CandidateRecord::new(EntityKind::Owner, row);
        record.set("name", FieldValue::Text(name.to_string()));
        record.set("phone", FieldValue::Text(phone.to_string()));
        record
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryImportStore::new();
        let mut tx = store.begin(&ctx()).await.unwrap();
        tx.insert(EntityKind::Owner, &owner(1, "Mehta", "9820000001")).await.unwrap();
        assert_eq!(store.count(EntityKind::Owner), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.count(EntityKind::Owner), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemoryImportStore::new();
        {
            let mut tx = store.begin(&ctx()).await.unwrap();
            tx.insert(EntityKind::Owner, &owner(1, "Mehta", "9820000001")).await.unwrap();
        }
        assert_eq!(store.count(EntityKind::Owner), 0);
    }

    #[tokio::test]
    async fn test_transaction_reads_its_own_writes() {
        let store = MemoryImportStore::new();
        let mut tx = store.begin(&ctx()).await.unwrap();
        let id = tx.insert(EntityKind::Owner, &owner(1, "Mehta", "9820000001")).await.unwrap();

        let key = DedupMatch::single("phone", FieldValue::Text("9820000001".to_string()));
        assert_eq!(tx.find_by_dedup_key(EntityKind::Owner, &key).await.unwrap(), Some(id));
        assert_eq!(tx.find_by_dedup_key(EntityKind::Client, &key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_overwrites_only_present_fields() {
        let store = MemoryImportStore::new();
        let mut tx = store.begin(&ctx()).await.unwrap();
        let mut first = owner(1, "Mehta", "9820000001");
        first.set("address", FieldValue::Text("Bandra".to_string()));
        let id = tx.insert(EntityKind::Owner, &first).await.unwrap();

        tx.update(EntityKind::Owner, id, &owner(2, "R. Mehta", "9820000001"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = store.find(EntityKind::Owner, "phone", "9820000001").unwrap();
        assert_eq!(stored.text("name"), Some("R. Mehta"));
        assert_eq!(stored.text("address"), Some("Bandra"));
    }

    #[tokio::test]
    async fn test_email_lookup_ignores_case() {
        let store = MemoryImportStore::new();
        let mut tx = store.begin(&ctx()).await.unwrap();
        let mut client = CandidateRecord::new(EntityKind::Client, 1);
        client.set("name", FieldValue::Text("Asha".to_string()));
        client.set("email", FieldValue::Text("Asha@Example.com".to_string()));
        let id = tx.insert(EntityKind::Client, &client).await.unwrap();

        let key = DedupMatch::single("email", FieldValue::Text("asha@example.com".to_string()));
        assert_eq!(tx.find_by_dedup_key(EntityKind::Client, &key).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_fail_when_rejects_matching_write() {
        let store = MemoryImportStore::new();
        store.fail_when(EntityKind::Owner, "phone", "9820000055");
        let mut tx = store.begin(&ctx()).await.unwrap();

        let err = tx
            .insert(EntityKind::Owner, &owner(55, "Bad", "9820000055"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(tx.insert(EntityKind::Owner, &owner(56, "Ok", "9820000056")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let store = MemoryImportStore::new();
        let mut tx = store.begin(&ctx()).await.unwrap();
        let err = tx
            .update(EntityKind::Owner, Uuid::new_v4(), &owner(1, "x", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_finished_transaction_rejects_use() {
        let store = MemoryImportStore::new();
        let mut tx = store.begin(&ctx()).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Finished)));
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_insert_stamps_creator() {
        let store = MemoryImportStore::new();
        let ctx = ctx();
        let mut tx = store.begin(&ctx).await.unwrap();
        tx.insert(EntityKind::Owner, &owner(1, "Mehta", "1")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.entities(EntityKind::Owner)[0].created_by, ctx.user_id);
    }
}
