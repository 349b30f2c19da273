//! SQLite-backed checkpoint store.
//!
//! Schema lives under `migrations/`; enable the `sqlite-migrations` feature
//! (default) to run them automatically on connect. A checkpoint and its
//! pending writes are committed transactionally, so a reader never observes
//! a partial checkpoint.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::runtime::Handle;
use tracing::instrument;

use super::serializer::{JsonSerializer, Serializer, SerializerError};
use super::store::{CheckpointStore, StoreError, StoredRef};
use super::{Checkpoint, CheckpointMetadata, CheckpointTuple, PendingWrite};

/// Durable [`CheckpointStore`] over a SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
    serializer: Arc<dyn Serializer>,
}

impl SqliteStore {
    /// Connect to `database_url` (e.g. `sqlite://checkpoints.db`), creating
    /// the file if missing and applying migrations when the
    /// `sqlite-migrations` feature is enabled.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        #[cfg(feature = "sqlite-migrations")]
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::with_pool(pool))
    }

    /// Wrap an existing pool (caller manages the schema).
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            serializer: Arc::new(JsonSerializer),
        }
    }

    /// Replace the value codec, e.g. with an encrypting wrapper.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Blocking variant of [`put`](CheckpointStore::put).
    ///
    /// `handle` must belong to a running runtime, and the call must happen
    /// off that runtime's worker threads (a dedicated thread or
    /// `spawn_blocking`).
    pub fn put_blocking(
        &self,
        handle: &Handle,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: FxHashMap<String, u64>,
    ) -> Result<StoredRef, StoreError> {
        handle.block_on(self.put(thread_id, checkpoint, metadata, new_versions))
    }

    /// Blocking variant of [`put_writes`](CheckpointStore::put_writes).
    pub fn put_writes_blocking(
        &self,
        handle: &Handle,
        thread_id: &str,
        checkpoint_id: u64,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        handle.block_on(self.put_writes(thread_id, checkpoint_id, task_id, writes))
    }

    /// Blocking variant of [`get`](CheckpointStore::get).
    pub fn get_blocking(
        &self,
        handle: &Handle,
        thread_id: &str,
        checkpoint_id: Option<u64>,
    ) -> Result<Option<CheckpointTuple>, StoreError> {
        handle.block_on(self.get(thread_id, checkpoint_id))
    }

    /// Blocking variant of [`list`](CheckpointStore::list).
    pub fn list_blocking(
        &self,
        handle: &Handle,
        thread_id: &str,
        before: Option<u64>,
        limit: Option<usize>,
        filter: Option<FxHashMap<String, Value>>,
    ) -> Result<Vec<CheckpointTuple>, StoreError> {
        handle.block_on(self.list(thread_id, before, limit, filter))
    }

    /// Blocking variant of [`delete_thread`](CheckpointStore::delete_thread).
    pub fn delete_thread_blocking(
        &self,
        handle: &Handle,
        thread_id: &str,
    ) -> Result<(), StoreError> {
        handle.block_on(self.delete_thread(thread_id))
    }

    fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
        serde_json::to_string(value)
            .map_err(|e| SerializerError::Encode(e.to_string()).into())
    }

    fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
        serde_json::from_str(raw).map_err(|e| SerializerError::Decode(e.to_string()).into())
    }

    fn row_to_tuple(&self, row: &SqliteRow) -> Result<(Checkpoint, CheckpointMetadata), StoreError> {
        let values_blob: Vec<u8> = row.try_get("channel_values")?;
        let values: FxHashMap<String, Value> =
            serde_json::from_value(self.serializer.from_bytes(&values_blob)?)
                .map_err(|e| SerializerError::Decode(e.to_string()))?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        let checkpoint = Checkpoint {
            id: row.try_get::<i64, _>("checkpoint_id")? as u64,
            thread_id: row.try_get("thread_id")?,
            parents: Self::decode_json(row.try_get::<String, _>("parents")?.as_str())?,
            round: row.try_get("round")?,
            values,
            versions: Self::decode_json(row.try_get::<String, _>("channel_versions")?.as_str())?,
            versions_seen: Self::decode_json(
                row.try_get::<String, _>("versions_seen")?.as_str(),
            )?,
            created_at,
        };
        let metadata: CheckpointMetadata =
            Self::decode_json(row.try_get::<String, _>("metadata")?.as_str())?;
        Ok((checkpoint, metadata))
    }

    async fn load_writes(
        &self,
        thread_id: &str,
        checkpoint_id: u64,
    ) -> Result<Vec<PendingWrite>, StoreError> {
        let rows = sqlx::query(
            "SELECT task_id, channel, value FROM pending_writes \
             WHERE thread_id = ? AND checkpoint_id = ? \
             ORDER BY task_id, idx",
        )
        .bind(thread_id)
        .bind(checkpoint_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.try_get("value")?;
                Ok(PendingWrite {
                    task_id: row.try_get("task_id")?,
                    channel: row.try_get("channel")?,
                    value: self.serializer.from_bytes(&blob)?,
                })
            })
            .collect()
    }

    async fn tuple_from_row(&self, row: &SqliteRow) -> Result<CheckpointTuple, StoreError> {
        let (checkpoint, metadata) = self.row_to_tuple(row)?;
        let pending_writes = self
            .load_writes(&checkpoint.thread_id, checkpoint.id)
            .await?;
        Ok(CheckpointTuple {
            checkpoint,
            metadata,
            pending_writes,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    #[instrument(skip(self, checkpoint, metadata, _new_versions), fields(thread_id, id = checkpoint.id))]
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: FxHashMap<String, u64>,
    ) -> Result<StoredRef, StoreError> {
        let id = checkpoint.id;
        let mut tx = self.pool.begin().await?;

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(checkpoint_id) FROM checkpoints WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_one(&mut *tx)
                .await?;
        if let Some(latest) = latest {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM checkpoints WHERE thread_id = ? AND checkpoint_id = ?)",
            )
            .bind(thread_id)
            .bind(id as i64)
            .fetch_one(&mut *tx)
            .await?;
            if (id as i64) <= latest && !exists {
                return Err(StoreError::NonMonotonicId {
                    thread_id: thread_id.to_string(),
                    id,
                    latest: latest as u64,
                });
            }
        }

        let values_blob = self
            .serializer
            .to_bytes(&serde_json::to_value(&checkpoint.values).map_err(|e| {
                SerializerError::Encode(e.to_string())
            })?)?;

        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints \
             (thread_id, checkpoint_id, parents, round, source, metadata, \
              channel_values, channel_versions, versions_seen, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(id as i64)
        .bind(Self::encode_json(&checkpoint.parents)?)
        .bind(checkpoint.round)
        .bind(metadata.source.to_string())
        .bind(Self::encode_json(&metadata)?)
        .bind(values_blob)
        .bind(Self::encode_json(&checkpoint.versions)?)
        .bind(Self::encode_json(&checkpoint.versions_seen)?)
        .bind(checkpoint.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(StoredRef {
            thread_id: thread_id.to_string(),
            checkpoint_id: id,
        })
    }

    async fn put_writes(
        &self,
        thread_id: &str,
        checkpoint_id: u64,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM pending_writes WHERE thread_id = ? AND checkpoint_id = ? AND task_id = ?",
        )
        .bind(thread_id)
        .bind(checkpoint_id as i64)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        for (idx, (channel, value)) in writes.iter().enumerate() {
            sqlx::query(
                "INSERT INTO pending_writes \
                 (thread_id, checkpoint_id, task_id, idx, channel, value) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(thread_id)
            .bind(checkpoint_id as i64)
            .bind(task_id)
            .bind(idx as i64)
            .bind(channel)
            .bind(self.serializer.to_bytes(value)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<u64>,
    ) -> Result<Option<CheckpointTuple>, StoreError> {
        let row = match checkpoint_id {
            Some(id) => {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE thread_id = ? AND checkpoint_id = ?",
                )
                .bind(thread_id)
                .bind(id as i64)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE thread_id = ? \
                     ORDER BY checkpoint_id DESC LIMIT 1",
                )
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        match row {
            Some(row) => Ok(Some(self.tuple_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        thread_id: &str,
        before: Option<u64>,
        limit: Option<usize>,
        filter: Option<FxHashMap<String, Value>>,
    ) -> Result<Vec<CheckpointTuple>, StoreError> {
        let rows = match before {
            Some(before) => {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE thread_id = ? AND checkpoint_id < ? \
                     ORDER BY checkpoint_id DESC",
                )
                .bind(thread_id)
                .bind(before as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE thread_id = ? \
                     ORDER BY checkpoint_id DESC",
                )
                .bind(thread_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut tuples = Vec::new();
        for row in &rows {
            let tuple = self.tuple_from_row(row).await?;
            if filter
                .as_ref()
                .is_none_or(|f| tuple.metadata.matches(f))
            {
                tuples.push(tuple);
            }
            if limit.is_some_and(|l| tuples.len() >= l) {
                break;
            }
        }
        Ok(tuples)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pending_writes WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
