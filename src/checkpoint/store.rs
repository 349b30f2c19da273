//! The pluggable checkpoint store contract.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use super::serializer::SerializerError;
use super::{Checkpoint, CheckpointMetadata, CheckpointTuple};

/// Handle to a stored checkpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRef {
    pub thread_id: String,
    pub checkpoint_id: u64,
}

/// Backend failures and contract violations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("checkpoint id {id} is not newer than latest id {latest} for thread `{thread_id}`")]
    #[diagnostic(
        code(loomgraph::store::non_monotonic_id),
        help("Checkpoint ids must strictly increase per thread; re-putting an existing id is only valid with identical content.")
    )]
    NonMonotonicId {
        thread_id: String,
        id: u64,
        latest: u64,
    },

    #[error("checkpoint {checkpoint_id} not found for thread `{thread_id}`")]
    #[diagnostic(code(loomgraph::store::checkpoint_not_found))]
    CheckpointNotFound {
        thread_id: String,
        checkpoint_id: u64,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serializer(#[from] SerializerError),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    #[diagnostic(code(loomgraph::store::database))]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "sqlite")]
    #[error("migration error: {0}")]
    #[diagnostic(code(loomgraph::store::migration))]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("store backend error: {0}")]
    #[diagnostic(code(loomgraph::store::backend))]
    Backend(String),
}

/// Durable, append-only, branchable checkpoint history keyed by thread.
///
/// Contract, beyond the signatures:
/// - `put` appends with a strictly increasing id per thread; re-putting an
///   existing id replaces it (idempotent retry), anything older fails.
/// - `put_writes` is atomic and idempotent per `(checkpoint, task)`: a retry
///   replaces that task's writes wholesale, and a reader never observes a
///   partial set.
/// - `get` with `None` returns the most recent checkpoint.
/// - `list` returns most-recent-first, honoring `before` (exclusive) and
///   `limit`, filtered by metadata equality when a filter is given.
///
/// This async trait is the canonical surface; [`InMemoryStore`]
/// additionally exposes blocking inherent methods with identical semantics.
///
/// [`InMemoryStore`]: super::InMemoryStore
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: FxHashMap<String, u64>,
    ) -> Result<StoredRef, StoreError>;

    async fn put_writes(
        &self,
        thread_id: &str,
        checkpoint_id: u64,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError>;

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<u64>,
    ) -> Result<Option<CheckpointTuple>, StoreError>;

    async fn list(
        &self,
        thread_id: &str,
        before: Option<u64>,
        limit: Option<usize>,
        filter: Option<FxHashMap<String, Value>>,
    ) -> Result<Vec<CheckpointTuple>, StoreError>;

    async fn delete_thread(&self, thread_id: &str) -> Result<(), StoreError>;
}
