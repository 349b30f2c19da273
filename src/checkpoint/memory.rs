//! Volatile checkpoint store for tests and single-process runs.

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::store::{CheckpointStore, StoreError, StoredRef};
use super::{Checkpoint, CheckpointMetadata, CheckpointTuple, PendingWrite};

struct Entry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    /// task id → writes, replaced wholesale on retry.
    writes: FxHashMap<String, Vec<(String, Value)>>,
}

impl Entry {
    fn to_tuple(&self) -> CheckpointTuple {
        let mut task_ids: Vec<&String> = self.writes.keys().collect();
        task_ids.sort();
        let pending_writes = task_ids
            .into_iter()
            .flat_map(|task_id| {
                self.writes[task_id]
                    .iter()
                    .map(move |(channel, value)| PendingWrite {
                        task_id: task_id.clone(),
                        channel: channel.clone(),
                        value: value.clone(),
                    })
            })
            .collect();
        CheckpointTuple {
            checkpoint: self.checkpoint.clone(),
            metadata: self.metadata.clone(),
            pending_writes,
        }
    }
}

/// In-memory [`CheckpointStore`].
///
/// Thread histories live in a `RwLock`ed map; guards are never held across
/// an await, so the blocking inherent methods and the async trait methods
/// share one implementation.
#[derive(Default)]
pub struct InMemoryStore {
    threads: RwLock<FxHashMap<String, Vec<Entry>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_blocking(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: FxHashMap<String, u64>,
    ) -> Result<StoredRef, StoreError> {
        let mut threads = self.threads.write().expect("store lock poisoned");
        let entries = threads.entry(thread_id.to_string()).or_default();

        let id = checkpoint.id;
        if let Some(existing) = entries.iter_mut().find(|e| e.checkpoint.id == id) {
            // Idempotent retry of the same id.
            existing.checkpoint = checkpoint;
            existing.metadata = metadata;
        } else {
            let latest = entries.last().map(|e| e.checkpoint.id).unwrap_or(0);
            if id <= latest {
                return Err(StoreError::NonMonotonicId {
                    thread_id: thread_id.to_string(),
                    id,
                    latest,
                });
            }
            entries.push(Entry {
                checkpoint,
                metadata,
                writes: FxHashMap::default(),
            });
        }
        Ok(StoredRef {
            thread_id: thread_id.to_string(),
            checkpoint_id: id,
        })
    }

    pub fn put_writes_blocking(
        &self,
        thread_id: &str,
        checkpoint_id: u64,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let mut threads = self.threads.write().expect("store lock poisoned");
        let entry = threads
            .get_mut(thread_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.checkpoint.id == checkpoint_id))
            .ok_or(StoreError::CheckpointNotFound {
                thread_id: thread_id.to_string(),
                checkpoint_id,
            })?;
        entry.writes.insert(task_id.to_string(), writes);
        Ok(())
    }

    pub fn get_blocking(
        &self,
        thread_id: &str,
        checkpoint_id: Option<u64>,
    ) -> Result<Option<CheckpointTuple>, StoreError> {
        let threads = self.threads.read().expect("store lock poisoned");
        let Some(entries) = threads.get(thread_id) else {
            return Ok(None);
        };
        let entry = match checkpoint_id {
            Some(id) => entries.iter().find(|e| e.checkpoint.id == id),
            None => entries.last(),
        };
        Ok(entry.map(Entry::to_tuple))
    }

    pub fn list_blocking(
        &self,
        thread_id: &str,
        before: Option<u64>,
        limit: Option<usize>,
        filter: Option<FxHashMap<String, Value>>,
    ) -> Result<Vec<CheckpointTuple>, StoreError> {
        let threads = self.threads.read().expect("store lock poisoned");
        let Some(entries) = threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        let tuples = entries
            .iter()
            .rev()
            .filter(|e| before.is_none_or(|b| e.checkpoint.id < b))
            .filter(|e| {
                filter
                    .as_ref()
                    .is_none_or(|f| e.metadata.matches(f))
            })
            .take(limit.unwrap_or(usize::MAX))
            .map(Entry::to_tuple)
            .collect();
        Ok(tuples)
    }

    pub fn delete_thread_blocking(&self, thread_id: &str) -> Result<(), StoreError> {
        self.threads
            .write()
            .expect("store lock poisoned")
            .remove(thread_id);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: FxHashMap<String, u64>,
    ) -> Result<StoredRef, StoreError> {
        self.put_blocking(thread_id, checkpoint, metadata, new_versions)
    }

    async fn put_writes(
        &self,
        thread_id: &str,
        checkpoint_id: u64,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        self.put_writes_blocking(thread_id, checkpoint_id, task_id, writes)
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<u64>,
    ) -> Result<Option<CheckpointTuple>, StoreError> {
        self.get_blocking(thread_id, checkpoint_id)
    }

    async fn list(
        &self,
        thread_id: &str,
        before: Option<u64>,
        limit: Option<usize>,
        filter: Option<FxHashMap<String, Value>>,
    ) -> Result<Vec<CheckpointTuple>, StoreError> {
        self.list_blocking(thread_id, before, limit, filter)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        self.delete_thread_blocking(thread_id)
    }
}
