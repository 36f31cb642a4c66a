//! Synchronization orchestrator
//!
//! The single entry point the application layer talks to. Owns the
//! collection registry, fans out one push subscription per collection at
//! startup, and routes every mutation through one unified write
//! algorithm:
//!
//! 1. Offline short-circuits straight to the cache mirror.
//! 2. Online attempts the gateway; success reconciles the mirror with the
//!    remote result using the mirror's own merge rules.
//! 3. Failure is classified (connectivity-class latches the session
//!    offline), then the same action runs against the mirror and the
//!    local result is returned instead.
//!
//! Write failures therefore never reach the caller as errors; they
//! degrade silently to local persistence and the next authoritative
//! snapshot self-heals any divergence.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinSet;

use crate::audit::{AuditAction, AuditConfig, AuditEmitter};
use crate::connectivity::Connectivity;
use crate::gateway::{CollectionGateway, GatewayConfig, SnapshotSink, SubscriptionHandle};
use crate::mirror::{CollectionMirror, MirrorConfig};
use crate::session::ActorIdentity;
use crate::store::ObfuscatedStore;
use crate::transport::{CollectionQuery, OrderDirection, RemoteTransport, RemoteWrite};

/// Collection receiving sale invoices
pub const INVOICES: &str = "invoices";
/// Collection holding sellable stock
pub const MEDICINES: &str = "medicines";
/// Collection holding the audit trail
pub const AUDIT_COLLECTION: &str = "audit_log";

/// One collection the layer synchronizes
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub order_by: &'static str,
    pub direction: OrderDirection,
    pub limit: Option<usize>,
}

impl CollectionSpec {
    const fn by_name(name: &'static str) -> Self {
        Self {
            name,
            order_by: "name",
            direction: OrderDirection::Ascending,
            limit: None,
        }
    }

    const fn by_date(name: &'static str) -> Self {
        Self {
            name,
            order_by: "date",
            direction: OrderDirection::Descending,
            limit: None,
        }
    }

    pub fn query(&self) -> CollectionQuery {
        CollectionQuery {
            collection: self.name.to_string(),
            order_by: self.order_by.to_string(),
            direction: self.direction,
            limit: self.limit,
        }
    }
}

/// Every collection the suite synchronizes. The audit trail is capped to
/// the most recent entries on read-back; its local growth is unbounded.
pub const COLLECTIONS: &[CollectionSpec] = &[
    CollectionSpec::by_name("patients"),
    CollectionSpec::by_name("staff"),
    CollectionSpec::by_name("suppliers"),
    CollectionSpec::by_name("medicines"),
    CollectionSpec::by_name("services"),
    CollectionSpec::by_date("appointments"),
    CollectionSpec::by_date("treatments"),
    CollectionSpec::by_date("prescriptions"),
    CollectionSpec::by_date("vaccinations"),
    CollectionSpec::by_date("invoices"),
    CollectionSpec::by_date("purchases"),
    CollectionSpec::by_date("expenses"),
    CollectionSpec {
        name: AUDIT_COLLECTION,
        order_by: "timestamp",
        direction: OrderDirection::Descending,
        limit: Some(100),
    },
];

pub fn collection_spec(name: &str) -> Option<&'static CollectionSpec> {
    COLLECTIONS.iter().find(|spec| spec.name == name)
}

/// One stock decrement of a sale
#[derive(Debug, Clone)]
pub struct SaleItem {
    pub record_id: String,
    pub quantity_delta: i64,
    pub known_stock: i64,
}

impl SaleItem {
    /// Partial stock record applied to the medicines collection.
    /// Stock never goes below zero.
    fn stock_patch(&self) -> Value {
        json!({
            "id": self.record_id,
            "stock": (self.known_stock - self.quantity_delta).max(0),
        })
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub mirror: MirrorConfig,
    pub gateway: GatewayConfig,
    pub audit: AuditConfig,
}

/// Gateway + mirror + connectivity behind the unified write algorithm.
/// Shared with the audit worker so trail entries take the same path.
pub(crate) struct SyncCore {
    gateway: CollectionGateway,
    mirror: CollectionMirror,
    connectivity: Arc<Connectivity>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SyncCore {
    pub(crate) fn new(
        gateway: CollectionGateway,
        mirror: CollectionMirror,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        Self {
            gateway,
            mirror,
            connectivity,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// One-shot read: authoritative snapshot when online (replacing the
    /// mirror), last known good otherwise.
    pub(crate) async fn snapshot(&self, collection: &str) -> Vec<Value> {
        let Some(spec) = collection_spec(collection) else {
            tracing::warn!(collection, "Unknown collection");
            return self.mirror.records(collection).await;
        };

        if self.connectivity.is_offline() {
            return self.mirror.records(collection).await;
        }

        match self.gateway.read(&spec.query()).await {
            Ok(records) => {
                self.mirror.replace(collection, records.clone()).await;
                records
            }
            Err(e) => {
                tracing::warn!(collection, error = %e, "Remote read failed, serving cached snapshot");
                self.mirror.records(collection).await
            }
        }
    }

    /// Unified write algorithm. Mutation handlers serialize here so no
    /// two run their merge sections interleaved.
    pub(crate) async fn write_through(&self, collection: &str, write: RemoteWrite) -> Option<Value> {
        let _guard = self.write_lock.lock().await;

        if self.connectivity.is_offline() {
            return self.apply_local(collection, write).await;
        }

        match self.gateway.write(collection, &write).await {
            Ok(result) => self.reconcile(collection, write, result).await,
            Err(e) => {
                tracing::warn!(collection, error = %e, "Remote write failed, falling back to cache");
                self.apply_local(collection, write).await
            }
        }
    }

    /// Patch the mirror with the gateway's result using the same
    /// per-action merge rules as the offline path.
    async fn reconcile(
        &self,
        collection: &str,
        write: RemoteWrite,
        result: Option<Value>,
    ) -> Option<Value> {
        match write {
            RemoteWrite::Insert(record) => {
                let committed = result.unwrap_or(record);
                Some(self.mirror.insert(collection, committed).await)
            }
            RemoteWrite::Update(patch) => {
                let committed = result.unwrap_or(patch);
                Some(self.mirror.update(collection, committed).await)
            }
            RemoteWrite::Delete { id } => {
                self.mirror.delete(collection, &id).await;
                None
            }
        }
    }

    async fn apply_local(&self, collection: &str, write: RemoteWrite) -> Option<Value> {
        match write {
            RemoteWrite::Insert(record) => Some(self.mirror.insert(collection, record).await),
            RemoteWrite::Update(patch) => Some(self.mirror.update(collection, patch).await),
            RemoteWrite::Delete { id } => {
                self.mirror.delete(collection, &id).await;
                None
            }
        }
    }
}

/// Callback receiving `(collection, snapshot)` pairs from the fan-out
pub type CollectionSink = Arc<dyn Fn(&'static str, Vec<Value>) + Send + Sync>;

/// The synchronization layer's public surface
pub struct SyncOrchestrator {
    core: Arc<SyncCore>,
    audit: AuditEmitter,
    actor: ActorIdentity,
    subscriptions: parking_lot::Mutex<Vec<SubscriptionHandle>>,
}

impl SyncOrchestrator {
    /// Build the orchestrator over its collaborators. Must be called
    /// from within a tokio runtime (the audit worker starts here).
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        store: Arc<ObfuscatedStore>,
        connectivity: Arc<Connectivity>,
        actor: ActorIdentity,
        config: OrchestratorConfig,
    ) -> Self {
        let gateway =
            CollectionGateway::new(transport, Arc::clone(&connectivity), config.gateway);
        let mirror = CollectionMirror::new(store, config.mirror);
        let core = Arc::new(SyncCore::new(gateway, mirror, connectivity));
        let audit = AuditEmitter::spawn(Arc::clone(&core), actor.clone(), config.audit);

        Self {
            core,
            audit,
            actor,
            subscriptions: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn actor(&self) -> &ActorIdentity {
        &self.actor
    }

    /// One-shot snapshot of a collection
    pub async fn records(&self, collection: &str) -> Vec<Value> {
        self.core.snapshot(collection).await
    }

    /// Insert a record, assigning an id when absent, and return the
    /// committed record.
    pub async fn insert(&self, collection: &str, mut record: Value) -> Value {
        // Assign the id up front so the remote and fallback paths commit
        // the same record.
        if record
            .get("id")
            .and_then(Value::as_str)
            .map_or(true, str::is_empty)
        {
            let id = self.core.mirror.next_id();
            if let Value::Object(fields) = &mut record {
                fields.insert("id".to_string(), Value::String(id));
            }
        }

        let committed = self
            .core
            .write_through(collection, RemoteWrite::Insert(record.clone()))
            .await
            .unwrap_or(record);

        self.audit
            .emit(AuditAction::Created, collection, id_of(&committed));
        committed
    }

    /// Shallow-merge a partial record and return the applied patch
    pub async fn update(&self, collection: &str, patch: Value) -> Value {
        let applied = self
            .core
            .write_through(collection, RemoteWrite::Update(patch.clone()))
            .await
            .unwrap_or(patch);

        self.audit
            .emit(AuditAction::Updated, collection, id_of(&applied));
        applied
    }

    /// Delete the record matching `id`
    pub async fn delete(&self, collection: &str, id: &str) {
        self.core
            .write_through(collection, RemoteWrite::Delete { id: id.to_string() })
            .await;

        self.audit
            .emit(AuditAction::Deleted, collection, id.to_string());
    }

    /// Record a sale: one invoice plus stock decrements, written
    /// together but not atomically.
    ///
    /// Online, the invoice is written first; its stock updates then go
    /// out concurrently and the local mirrors are written regardless of
    /// their outcomes, so a partial remote failure leaves a divergence
    /// the next authoritative snapshot resolves. An invoice failure (or
    /// an offline session) records the whole sale locally. The sale
    /// succeeds from the caller's perspective in every path.
    pub async fn create_sale(&self, mut invoice: Value, items: &[SaleItem]) -> bool {
        if invoice
            .get("id")
            .and_then(Value::as_str)
            .map_or(true, str::is_empty)
        {
            let id = self.core.mirror.next_id();
            if let Value::Object(fields) = &mut invoice {
                fields.insert("id".to_string(), Value::String(id));
            }
        }
        let invoice_id = id_of(&invoice);

        {
            let _guard = self.core.write_lock.lock().await;

            if self.core.connectivity.is_offline() {
                self.record_sale_locally(invoice, items).await;
            } else {
                match self
                    .core
                    .gateway
                    .write(INVOICES, &RemoteWrite::Insert(invoice.clone()))
                    .await
                {
                    Ok(result) => {
                        let committed = result.unwrap_or(invoice);

                        let mut stock_writes = JoinSet::new();
                        for item in items {
                            let gateway = self.core.gateway.clone();
                            let write = RemoteWrite::Update(item.stock_patch());
                            stock_writes.spawn(async move {
                                gateway.write(MEDICINES, &write).await
                            });
                        }
                        while let Some(joined) = stock_writes.join_next().await {
                            match joined {
                                Ok(Err(e)) => {
                                    tracing::warn!(error = %e, "Stock update failed during sale");
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Stock update task failed");
                                }
                                Ok(Ok(_)) => {}
                            }
                        }

                        // Mirror both sides regardless of stock outcomes.
                        self.core.mirror.insert(INVOICES, committed).await;
                        for item in items {
                            self.core.mirror.update(MEDICINES, item.stock_patch()).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Invoice write failed, recording sale locally");
                        self.record_sale_locally(invoice, items).await;
                    }
                }
            }
        }

        self.audit.emit(
            AuditAction::SaleRecorded,
            INVOICES,
            format!("invoice {} with {} items", invoice_id, items.len()),
        );
        true
    }

    async fn record_sale_locally(&self, invoice: Value, items: &[SaleItem]) {
        self.core.mirror.insert(INVOICES, invoice).await;
        for item in items {
            self.core.mirror.update(MEDICINES, item.stock_patch()).await;
        }
    }

    /// Establish the push subscription for one collection. Snapshots
    /// replace the mirror before reaching the sink. While offline the
    /// cached snapshot is delivered once and the handle stays inactive.
    pub async fn subscribe(&self, collection: &str, sink: SnapshotSink) -> SubscriptionHandle {
        let Some(spec) = collection_spec(collection) else {
            tracing::warn!(collection, "Unknown collection, subscription not established");
            return SubscriptionHandle::disconnected();
        };

        if !self.core.connectivity.should_attempt_remote() {
            sink(self.core.mirror.records(collection).await);
            return SubscriptionHandle::disconnected();
        }

        let core = Arc::clone(&self.core);
        let name = spec.name;
        let reconciling: SnapshotSink = Arc::new(move |records: Vec<Value>| {
            let core = Arc::clone(&core);
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                core.mirror.replace(name, records.clone()).await;
                sink(records);
            });
        });

        self.core.gateway.subscribe(spec.query(), reconciling)
    }

    /// Fan out subscriptions for every collection in the registry
    pub async fn start(&self, sink: CollectionSink) {
        for spec in COLLECTIONS {
            let per_collection: SnapshotSink = {
                let sink = Arc::clone(&sink);
                let name = spec.name;
                Arc::new(move |records: Vec<Value>| sink(name, records))
            };
            let handle = self.subscribe(spec.name, per_collection).await;
            self.subscriptions.lock().push(handle);
        }
        tracing::info!(collections = COLLECTIONS.len(), "Subscription fan-out complete");
    }

    /// Tear down every standing subscription
    pub fn stop(&self) {
        for handle in self.subscriptions.lock().drain(..) {
            handle.unsubscribe();
        }
    }
}

fn id_of(record: &Value) -> String {
    record
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
