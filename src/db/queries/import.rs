//! Import-related database queries
//!
//! Column names come from the static field configuration, never from
//! spreadsheet headers, so they are pushed into the SQL text directly.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::db::store::{ImportStore, ImportTx, StoreError};
use crate::types::{CandidateRecord, DedupMatch, EntityKind, FieldValue, ImportContext};

/// Postgres-backed import store
#[derive(Debug, Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn begin(&self, ctx: &ImportContext) -> Result<Box<dyn ImportTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgImportTx {
            tx: Some(tx),
            user_id: ctx.user_id,
        }))
    }
}

/// Open batch transaction. Dropping it without commit rolls back.
struct PgImportTx {
    tx: Option<Transaction<'static, Postgres>>,
    user_id: Uuid,
}

impl PgImportTx {
    fn conn(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::Finished)
    }
}

// =============================================================================
// SQL BUILDING
// =============================================================================

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Text(s) => {
            qb.push_bind(s.clone());
        }
        FieldValue::Decimal(s) => {
            qb.push_bind(s.clone()).push("::numeric");
        }
        FieldValue::DateTime(dt) => {
            qb.push_bind(*dt);
        }
        FieldValue::Id(id) => {
            qb.push_bind(*id);
        }
    }
}

fn push_match(qb: &mut QueryBuilder<'static, Postgres>, field: &str, value: &FieldValue) {
    if field == "email" {
        qb.push("LOWER(email) = LOWER(");
        push_value(qb, value);
        qb.push(")");
    } else {
        qb.push(field).push(" = ");
        push_value(qb, value);
    }
}

fn find_query(kind: EntityKind, key: &DedupMatch) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT id FROM {} WHERE ", kind.table()));
    for (i, (field, value)) in key.fields.iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        push_match(&mut qb, field, value);
    }
    qb.push(" ORDER BY created_at LIMIT 1");
    qb
}

fn insert_query(kind: EntityKind, user_id: Uuid, record: &CandidateRecord) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} (created_by", kind.table()));
    for field in record.fields.keys() {
        qb.push(", ").push(*field);
    }
    qb.push(") VALUES (");
    qb.push_bind(user_id);
    for value in record.fields.values() {
        qb.push(", ");
        push_value(&mut qb, value);
    }
    qb.push(") RETURNING id");
    qb
}

fn update_query(kind: EntityKind, id: Uuid, record: &CandidateRecord) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET updated_at = NOW()", kind.table()));
    for (field, value) in &record.fields {
        qb.push(", ").push(*field).push(" = ");
        push_value(&mut qb, value);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb
}

/// Integrity violations (class 23) become `Constraint`
fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().is_some_and(|code| code.starts_with("23")) {
            return StoreError::Constraint(db_err.message().to_string());
        }
    }
    StoreError::Database(err)
}

// =============================================================================
// TRANSACTION
// =============================================================================

#[async_trait]
impl ImportTx for PgImportTx {
    async fn find_by_dedup_key(
        &mut self,
        kind: EntityKind,
        key: &DedupMatch,
    ) -> Result<Option<Uuid>, StoreError> {
        if key.fields.is_empty() {
            return Ok(None);
        }
        let mut qb = find_query(kind, key);
        let id: Option<Uuid> = qb
            .build_query_scalar::<Uuid>()
            .fetch_optional(&mut **self.conn()?)
            .await
            .map_err(map_db_error)?;
        Ok(id)
    }

    async fn insert(&mut self, kind: EntityKind, record: &CandidateRecord) -> Result<Uuid, StoreError> {
        let mut qb = insert_query(kind, self.user_id, record);
        let id: Uuid = qb
            .build_query_scalar::<Uuid>()
            .fetch_one(&mut **self.conn()?)
            .await
            .map_err(map_db_error)?;
        debug!("Inserted {} {} from row {}", kind, id, record.row);
        Ok(id)
    }

    async fn update(
        &mut self,
        kind: EntityKind,
        id: Uuid,
        record: &CandidateRecord,
    ) -> Result<(), StoreError> {
        let mut qb = update_query(kind, id, record);
        let result = qb
            .build()
            .execute(&mut **self.conn()?)
            .await
            .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { kind, id });
        }
        debug!("Updated {} {} from row {}", kind, id, record.row);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn property() -> CandidateRecord {
        let mut record = CandidateRecord::new(EntityKind::Property, 3);
        record.set("title", FieldValue::Text("Sea View 2BHK".to_string()));
        record.set("location", FieldValue::Text("Bandra West".to_string()));
        record.set("price", FieldValue::Decimal("25000000".to_string()));
        record.set(
            "available_from",
            FieldValue::DateTime(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
        );
        record
    }

    #[test]
    fn test_insert_sql_lists_present_fields_only() {
        let qb = insert_query(EntityKind::Property, Uuid::nil(), &property());
        assert_eq!(
            qb.sql(),
            "INSERT INTO properties (created_by, available_from, location, price, title) \
             VALUES ($1, $2, $3, $4::numeric, $5) RETURNING id"
        );
    }

    #[test]
    fn test_update_sql_bumps_updated_at() {
        let qb = update_query(EntityKind::Property, Uuid::nil(), &property());
        assert_eq!(
            qb.sql(),
            "UPDATE properties SET updated_at = NOW(), available_from = $1, location = $2, \
             price = $3::numeric, title = $4 WHERE id = $5"
        );
    }

    #[test]
    fn test_find_sql_composite_key() {
        let key = DedupMatch {
            fields: vec![
                ("title", FieldValue::Text("Sea View 2BHK".to_string())),
                ("location", FieldValue::Text("Bandra West".to_string())),
            ],
        };
        let qb = find_query(EntityKind::Property, &key);
        assert_eq!(
            qb.sql(),
            "SELECT id FROM properties WHERE title = $1 AND location = $2 ORDER BY created_at LIMIT 1"
        );
    }

    #[test]
    fn test_find_sql_email_is_case_insensitive() {
        let key = DedupMatch::single("email", FieldValue::Text("a@b.in".to_string()));
        let qb = find_query(EntityKind::Client, &key);
        assert_eq!(
            qb.sql(),
            "SELECT id FROM clients WHERE LOWER(email) = LOWER($1) ORDER BY created_at LIMIT 1"
        );
    }
}
