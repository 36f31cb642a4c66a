//! Collection cache mirror
//!
//! Per-collection snapshot of the last known good records, held in memory
//! and persisted through the obfuscated store under one key per
//! collection. The mirror is the fallback source of truth whenever the
//! remote service is unavailable, and is reconciled after every
//! successful remote operation.
//!
//! Local inserts prepend newest-first regardless of each collection's
//! canonical remote ordering; the next remote snapshot re-imposes it.
//! Mirror operations never surface errors: persistence failures are
//! logged and the in-memory state stands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::store::ObfuscatedStore;

/// Mirror configuration
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Storage key prefix; collections persist under `<prefix>_<name>`
    pub key_prefix: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "practica".to_string(),
        }
    }
}

/// Monotonic timestamp-based id source.
///
/// Ids are millisecond timestamps, bumped past the previous value when
/// two assignments land in the same millisecond.
#[derive(Debug, Default)]
struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    fn next(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Merge `patch`'s top-level fields into `existing`; fields not named in
/// the patch are preserved.
fn shallow_merge(existing: &mut Value, patch: &Value) {
    if let Value::Object(fields) = patch {
        if let Value::Object(base) = existing {
            for (key, value) in fields {
                base.insert(key.clone(), value.clone());
            }
            return;
        }
    }
    *existing = patch.clone();
}

/// Local snapshot cache over all collections
pub struct CollectionMirror {
    store: Arc<ObfuscatedStore>,
    key_prefix: String,
    snapshots: RwLock<HashMap<String, Vec<Value>>>,
    ids: IdGenerator,
}

impl CollectionMirror {
    pub fn new(store: Arc<ObfuscatedStore>, config: MirrorConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix,
            snapshots: RwLock::new(HashMap::new()),
            ids: IdGenerator::default(),
        }
    }

    fn storage_key(&self, collection: &str) -> String {
        format!("{}_{}", self.key_prefix, collection)
    }

    /// Assign a fresh collection-scoped id
    pub(crate) fn next_id(&self) -> String {
        self.ids.next()
    }

    /// Ensure the collection's persisted snapshot is loaded into memory
    async fn loaded(&self, collection: &str) {
        if self.snapshots.read().contains_key(collection) {
            return;
        }

        let records = match self.store.get(&self.storage_key(collection)).await {
            Ok(Some(Value::Array(records))) => records,
            Ok(Some(_)) => {
                tracing::warn!(collection, "Persisted snapshot is not an array, ignoring");
                Vec::new()
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(collection, error = %e, "Failed to load persisted snapshot");
                Vec::new()
            }
        };

        self.snapshots
            .write()
            .entry(collection.to_string())
            .or_insert(records);
    }

    async fn persist(&self, collection: &str, snapshot: Vec<Value>) {
        let key = self.storage_key(collection);
        if let Err(e) = self.store.put(&key, &Value::Array(snapshot)).await {
            tracing::error!(collection, error = %e, "Failed to persist snapshot");
        }
    }

    /// Stored snapshot of the collection, or empty if none
    pub async fn records(&self, collection: &str) -> Vec<Value> {
        self.loaded(collection).await;
        self.snapshots
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert a record, assigning an id when missing. Any existing record
    /// with the same id is replaced rather than duplicated.
    pub async fn insert(&self, collection: &str, mut record: Value) -> Value {
        self.loaded(collection).await;

        let id = match record_id(&record) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = self.next_id();
                if let Value::Object(fields) = &mut record {
                    fields.insert("id".to_string(), Value::String(id.clone()));
                }
                id
            }
        };

        let snapshot = {
            let mut snapshots = self.snapshots.write();
            let records = snapshots.entry(collection.to_string()).or_default();
            records.retain(|existing| record_id(existing) != Some(id.as_str()));
            records.insert(0, record.clone());
            records.clone()
        };

        self.persist(collection, snapshot).await;
        record
    }

    /// Shallow-merge a partial record into the record matching its id and
    /// return the patch. A patch with no matching record persists nothing.
    pub async fn update(&self, collection: &str, patch: Value) -> Value {
        self.loaded(collection).await;

        let Some(id) = record_id(&patch).map(str::to_string) else {
            tracing::warn!(collection, "Update patch carries no id, ignoring");
            return patch;
        };

        let snapshot = {
            let mut snapshots = self.snapshots.write();
            let records = snapshots.entry(collection.to_string()).or_default();
            match records
                .iter_mut()
                .find(|record| record_id(record) == Some(id.as_str()))
            {
                Some(existing) => shallow_merge(existing, &patch),
                None => {
                    tracing::debug!(collection, id = %id, "Update target not cached");
                }
            }
            records.clone()
        };

        self.persist(collection, snapshot).await;
        patch
    }

    /// Remove the record matching `id`. Idempotent.
    pub async fn delete(&self, collection: &str, id: &str) {
        self.loaded(collection).await;

        let snapshot = {
            let mut snapshots = self.snapshots.write();
            let records = snapshots.entry(collection.to_string()).or_default();
            records.retain(|record| record_id(record) != Some(id));
            records.clone()
        };

        self.persist(collection, snapshot).await;
    }

    /// Overwrite the collection wholesale with an authoritative snapshot
    pub async fn replace(&self, collection: &str, records: Vec<Value>) {
        self.snapshots
            .write()
            .insert(collection.to_string(), records.clone());
        self.persist(collection, records).await;
    }
}
