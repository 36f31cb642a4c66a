//! Shared test fixtures: an in-memory remote service and a fully wired
//! orchestrator stack over a temporary store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Notify;

use practica_sync::{
    ActorIdentity, CollectionQuery, Connectivity, ObfuscatedStore, OrchestratorConfig,
    OrderDirection, RemoteError, RemoteTransport, RemoteWrite, SnapshotPage, StoreConfig,
    SyncOrchestrator,
};

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn compare_field(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => a.cmp(b),
        _ => a
            .as_f64()
            .unwrap_or(0.0)
            .total_cmp(&b.as_f64().unwrap_or(0.0)),
    }
}

/// In-memory stand-in for the push-capable remote data service, with
/// per-call failure injection.
pub struct MemoryTransport {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    version: AtomicU64,
    notify: Notify,
    fetch_calls: AtomicUsize,
    watch_calls: AtomicUsize,
    fail_all: Mutex<Option<RemoteError>>,
    fail_updates_of: Mutex<HashMap<String, RemoteError>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
            notify: Notify::new(),
            fetch_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
            fail_all: Mutex::new(None),
            fail_updates_of: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a collection as if written by another actor
    pub fn seed(&self, collection: &str, records: Vec<Value>) {
        self.collections
            .lock()
            .insert(collection.to_string(), records);
        self.bump();
    }

    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail every call with `error` until cleared
    pub fn fail_all(&self, error: RemoteError) {
        *self.fail_all.lock() = Some(error);
    }

    pub fn clear_failures(&self) {
        *self.fail_all.lock() = None;
        self.fail_updates_of.lock().clear();
    }

    /// Fail every update targeting `id` with `error`
    pub fn fail_updates_of(&self, id: &str, error: RemoteError) {
        self.fail_updates_of.lock().insert(id.to_string(), error);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn injected_failure(&self) -> Option<RemoteError> {
        self.fail_all.lock().clone()
    }

    fn snapshot_for(&self, query: &CollectionQuery) -> Vec<Value> {
        let mut records = self.records(&query.collection);
        records.sort_by(|a, b| {
            let ordering = compare_field(&a[query.order_by.as_str()], &b[query.order_by.as_str()]);
            match query.direction {
                OrderDirection::Ascending => ordering,
                OrderDirection::Descending => ordering.reverse(),
            }
        });
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        records
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn fetch(&self, query: &CollectionQuery) -> Result<Vec<Value>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected_failure() {
            return Err(error);
        }
        Ok(self.snapshot_for(query))
    }

    async fn apply(
        &self,
        collection: &str,
        write: &RemoteWrite,
    ) -> Result<Option<Value>, RemoteError> {
        if let Some(error) = self.injected_failure() {
            return Err(error);
        }

        let result = match write {
            RemoteWrite::Insert(record) => {
                let mut collections = self.collections.lock();
                let records = collections.entry(collection.to_string()).or_default();
                if let Some(id) = record_id(record) {
                    records.retain(|existing| record_id(existing) != Some(id));
                }
                records.push(record.clone());
                Some(record.clone())
            }
            RemoteWrite::Update(patch) => {
                let id = record_id(patch).unwrap_or_default().to_string();
                if let Some(error) = self.fail_updates_of.lock().get(&id) {
                    return Err(error.clone());
                }
                let mut collections = self.collections.lock();
                let records = collections.entry(collection.to_string()).or_default();
                if let Some(existing) = records
                    .iter_mut()
                    .find(|record| record_id(record) == Some(id.as_str()))
                {
                    if let (Value::Object(base), Value::Object(fields)) = (existing, patch) {
                        for (key, value) in fields {
                            base.insert(key.clone(), value.clone());
                        }
                    }
                }
                Some(patch.clone())
            }
            RemoteWrite::Delete { id } => {
                let mut collections = self.collections.lock();
                let records = collections.entry(collection.to_string()).or_default();
                records.retain(|record| record_id(record) != Some(id.as_str()));
                None
            }
        };

        self.bump();
        Ok(result)
    }

    async fn watch(
        &self,
        query: &CollectionQuery,
        cursor: Option<&str>,
    ) -> Result<SnapshotPage, RemoteError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected_failure() {
            return Err(error);
        }

        loop {
            let notified = self.notify.notified();
            let current = self.version.load(Ordering::SeqCst).to_string();
            if cursor != Some(current.as_str()) {
                return Ok(SnapshotPage {
                    records: self.snapshot_for(query),
                    cursor: Some(current),
                });
            }
            notified.await;
        }
    }
}

/// A fully wired orchestrator over a temporary store and the in-memory
/// remote service.
pub struct TestStack {
    pub orchestrator: SyncOrchestrator,
    pub transport: Arc<MemoryTransport>,
    pub connectivity: Arc<Connectivity>,
    pub store: Arc<ObfuscatedStore>,
    _db: NamedTempFile,
}

pub fn test_actor() -> ActorIdentity {
    ActorIdentity {
        id: "u1".to_string(),
        name: "Dr. Moreau".to_string(),
    }
}

async fn build(connectivity: Connectivity) -> TestStack {
    let db = NamedTempFile::new().unwrap();
    let store_config = StoreConfig {
        db_path: db.path().to_str().unwrap().to_string(),
        ..StoreConfig::default()
    };
    let store = Arc::new(ObfuscatedStore::new(store_config).await.unwrap());
    let transport = Arc::new(MemoryTransport::new());
    let connectivity = Arc::new(connectivity);

    let orchestrator = SyncOrchestrator::new(
        Arc::clone(&transport) as Arc<dyn RemoteTransport>,
        Arc::clone(&store),
        Arc::clone(&connectivity),
        test_actor(),
        OrchestratorConfig::default(),
    );

    TestStack {
        orchestrator,
        transport,
        connectivity,
        store,
        _db: db,
    }
}

pub async fn stack_online() -> TestStack {
    build(Connectivity::new()).await
}

pub async fn stack_offline() -> TestStack {
    build(Connectivity::offline()).await
}

/// Poll `condition` until it holds or the test times out
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}
