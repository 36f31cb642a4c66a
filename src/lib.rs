//! Offline-first data synchronization layer for the Practica
//! practice-management suite
//!
//! Keeps every record collection (patients, medicines, appointments,
//! invoices, …) consistent across three sources of truth: the remote
//! push-based data service, an obfuscated local store, and in-memory
//! application state.
//!
//! Provides:
//! - Obfuscated key → JSON blob store with silent legacy-format migration
//! - Per-collection cache mirrors of the last known good snapshots
//! - Push subscriptions delivering full ordered snapshots per change
//! - One-way online → offline resilience mode with failure classification
//! - A unified write path that degrades to local persistence instead of
//!   surfacing remote errors
//! - Multi-record sale writes (invoice plus stock decrements)
//! - A hash-chained, append-only audit trail

pub mod audit;
pub mod connectivity;
pub mod error;
pub mod gateway;
pub mod mirror;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod transport;

pub use audit::{AuditAction, AuditConfig, AuditEntry};
pub use connectivity::{Connectivity, SyncMode};
pub use error::{SyncError, SyncResult};
pub use gateway::{GatewayConfig, SnapshotSink, SubscriptionHandle};
pub use mirror::{CollectionMirror, MirrorConfig};
pub use orchestrator::{
    collection_spec, CollectionSink, CollectionSpec, OrchestratorConfig, SaleItem,
    SyncOrchestrator, COLLECTIONS,
};
pub use session::{resolve_actor, ActorIdentity, IdentityProvider, SessionStore};
pub use store::{ObfuscatedStore, StoreConfig};
pub use transport::{
    CollectionQuery, HttpTransport, HttpTransportConfig, OrderDirection, RemoteError,
    RemoteTransport, RemoteWrite, SnapshotPage,
};
