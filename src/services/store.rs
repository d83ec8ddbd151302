use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// Entity Store - one committed transaction per write
// ============================================================================
//
// Every method returns only after its transaction has committed (or been
// rolled back on error). Event publishing happens afterwards, in the
// service layer, and is not part of the transaction.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid entity name '{0}': expected [a-z][a-z0-9_]*")]
    InvalidEntityName(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Validated entity name. Doubles as the table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityName(String);

impl EntityName {
    pub fn new(name: &str) -> Result<Self, StoreError> {
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && name.len() <= 63;

        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(StoreError::InvalidEntityName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted table identifier. Reserved words such as `user` or
    /// `order` are valid entity names and must be quoted in SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for EntityName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: Uuid,
    pub entity: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert(&self, entity: &EntityName, data: Value) -> Result<EntityRecord, StoreError>;

    /// `None` when no row has this id
    async fn update(
        &self,
        entity: &EntityName,
        id: Uuid,
        data: Value,
    ) -> Result<Option<EntityRecord>, StoreError>;

    /// Returns the deleted row, `None` when no row has this id
    async fn delete(
        &self,
        entity: &EntityName,
        id: Uuid,
    ) -> Result<Option<EntityRecord>, StoreError>;
}

// ============================================================================
// Postgres
// ============================================================================

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        tracing::info!("Connected to Postgres");
        Ok(Self::new(pool))
    }

    pub async fn ensure_table(&self, entity: &EntityName) -> Result<(), StoreError> {
        let sql = create_table_sql(entity);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn insert(&self, entity: &EntityName, data: Value) -> Result<EntityRecord, StoreError> {
        let now = Utc::now();
        let record = EntityRecord {
            id: Uuid::now_v7(),
            entity: entity.to_string(),
            data,
            created_at: now,
            updated_at: now,
        };

        let sql = insert_sql(entity);

        // Dropping `tx` without commit rolls it back
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.data)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(entity = %entity, id = %record.id, "Inserted entity");
        Ok(record)
    }

    async fn update(
        &self,
        entity: &EntityName,
        id: Uuid,
        data: Value,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let now = Utc::now();
        let sql = update_sql(entity);

        let mut tx = self.pool.begin().await?;
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(&sql)
            .bind(id)
            .bind(&data)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(row.map(|(created_at,)| EntityRecord {
            id,
            entity: entity.to_string(),
            data,
            created_at,
            updated_at: now,
        }))
    }

    async fn delete(
        &self,
        entity: &EntityName,
        id: Uuid,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let sql = delete_sql(entity);

        let mut tx = self.pool.begin().await?;
        let row: Option<(Value, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(row.map(|(data, created_at, updated_at)| EntityRecord {
            id,
            entity: entity.to_string(),
            data,
            created_at,
            updated_at,
        }))
    }
}

fn create_table_sql(entity: &EntityName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id UUID PRIMARY KEY,
            data JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        entity.quoted()
    )
}

fn insert_sql(entity: &EntityName) -> String {
    format!(
        "INSERT INTO {} (id, data, created_at, updated_at) VALUES ($1, $2, $3, $3)",
        entity.quoted()
    )
}

fn update_sql(entity: &EntityName) -> String {
    format!(
        "UPDATE {} SET data = $2, updated_at = $3 WHERE id = $1 RETURNING created_at",
        entity.quoted()
    )
}

fn delete_sql(entity: &EntityName) -> String {
    format!(
        "DELETE FROM {} WHERE id = $1 RETURNING data, created_at, updated_at",
        entity.quoted()
    )
}

// ============================================================================
// In-memory
// ============================================================================

/// Map-backed store for tests. `set_unavailable(true)` makes every write fail.
#[derive(Default)]
pub struct InMemoryEntityStore {
    rows: Mutex<HashMap<(String, Uuid), EntityRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, entity: &EntityName, id: Uuid) -> Option<EntityRecord> {
        self.rows()
            .get(&(entity.to_string(), id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<(String, Uuid), EntityRecord>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert(&self, entity: &EntityName, data: Value) -> Result<EntityRecord, StoreError> {
        self.check_available()?;
        let now = Utc::now();
        let record = EntityRecord {
            id: Uuid::now_v7(),
            entity: entity.to_string(),
            data,
            created_at: now,
            updated_at: now,
        };
        self.rows()
            .insert((entity.to_string(), record.id), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        entity: &EntityName,
        id: Uuid,
        data: Value,
    ) -> Result<Option<EntityRecord>, StoreError> {
        self.check_available()?;
        let mut rows = self.rows();
        let updated = rows.get_mut(&(entity.to_string(), id)).map(|row| {
            row.data = data;
            row.updated_at = Utc::now();
            row.clone()
        });
        Ok(updated)
    }

    async fn delete(
        &self,
        entity: &EntityName,
        id: Uuid,
    ) -> Result<Option<EntityRecord>, StoreError> {
        self.check_available()?;
        Ok(self.rows().remove(&(entity.to_string(), id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_name_validation() {
        assert!(EntityName::new("auth").is_ok());
        assert!(EntityName::new("user_profiles2").is_ok());
        assert!(EntityName::new("").is_err());
        assert!(EntityName::new("2fa").is_err());
        assert!(EntityName::new("Users").is_err());
        assert!(EntityName::new("auth; DROP TABLE auth").is_err());
    }

    #[test]
    fn test_reserved_word_entities_are_quoted() {
        for name in ["user", "order", "select"] {
            let entity = EntityName::new(name).unwrap();
            let quoted = format!("\"{}\"", name);

            assert!(create_table_sql(&entity)
                .starts_with(&format!("CREATE TABLE IF NOT EXISTS {} (", quoted)));
            assert!(insert_sql(&entity).starts_with(&format!("INSERT INTO {} (", quoted)));
            assert!(update_sql(&entity).starts_with(&format!("UPDATE {} SET", quoted)));
            assert!(delete_sql(&entity).starts_with(&format!("DELETE FROM {} WHERE", quoted)));
        }
    }

    #[tokio::test]
    async fn test_in_memory_store_crud() {
        let store = InMemoryEntityStore::new();
        let auth = EntityName::new("auth").unwrap();

        let created = store.insert(&auth, json!({"email": "a@b.c"})).await.unwrap();
        assert_eq!(created.entity, "auth");
        assert_eq!(store.get(&auth, created.id), Some(created.clone()));

        let updated = store
            .update(&auth, created.id, json!({"email": "x@y.z"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.data["email"], "x@y.z");
        assert_eq!(updated.created_at, created.created_at);

        assert!(store.update(&auth, Uuid::new_v4(), json!({})).await.unwrap().is_none());

        let deleted = store.delete(&auth, created.id).await.unwrap().unwrap();
        assert_eq!(deleted.id, created.id);
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let record = EntityRecord {
            id: Uuid::nil(),
            entity: "auth".into(),
            data: json!({}),
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
    }
}
