//! Remote collection gateway
//!
//! One-shot reads and writes plus long-lived push subscriptions against
//! the remote data service. Every failure passes through classification:
//! connectivity-class failures flip the resilience controller to offline
//! before the error propagates, so callers can fall back locally knowing
//! the mode is already settled.
//!
//! Subscriptions deliver the entire current ordered snapshot on every
//! remote change, not a diff. While the session is offline no
//! subscription is attempted; callers get an inactive no-op handle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::connectivity::Connectivity;
use crate::transport::{CollectionQuery, RemoteError, RemoteTransport, RemoteWrite};

/// Callback receiving each full collection snapshot
pub type SnapshotSink = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Delay before retrying a watch after a non-connectivity failure
    pub watch_backoff_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            watch_backoff_ms: 1000,
        }
    }
}

/// Handle to a push subscription
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// No-op handle for subscriptions that were never attempted
    pub fn disconnected() -> Self {
        Self { task: None }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    pub fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Gateway over the remote transport with failure classification
#[derive(Clone)]
pub struct CollectionGateway {
    transport: Arc<dyn RemoteTransport>,
    connectivity: Arc<Connectivity>,
    config: GatewayConfig,
}

impl CollectionGateway {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        connectivity: Arc<Connectivity>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            transport,
            connectivity,
            config,
        }
    }

    /// Latch the session offline when the failure is connectivity-class
    fn classify(&self, err: &RemoteError) {
        if err.is_connectivity() {
            self.connectivity.go_offline(&err.to_string());
        }
    }

    /// One-shot read of the full ordered snapshot
    pub async fn read(&self, query: &CollectionQuery) -> Result<Vec<Value>, RemoteError> {
        match self.transport.fetch(query).await {
            Ok(records) => Ok(records),
            Err(e) => {
                self.classify(&e);
                Err(e)
            }
        }
    }

    /// Apply a single write
    pub async fn write(
        &self,
        collection: &str,
        write: &RemoteWrite,
    ) -> Result<Option<Value>, RemoteError> {
        match self.transport.apply(collection, write).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.classify(&e);
                Err(e)
            }
        }
    }

    /// Establish a push subscription delivering full snapshots to `sink`.
    ///
    /// Returns an inactive handle without touching the transport when
    /// remote attempts are not allowed. The watch loop ends itself on a
    /// connectivity-class failure (after latching the controller) and
    /// retries with a backoff on per-call failures.
    pub fn subscribe(&self, query: CollectionQuery, sink: SnapshotSink) -> SubscriptionHandle {
        if !self.connectivity.should_attempt_remote() {
            tracing::debug!(
                collection = %query.collection,
                "Subscription not attempted while offline"
            );
            return SubscriptionHandle::disconnected();
        }

        let transport = Arc::clone(&self.transport);
        let connectivity = Arc::clone(&self.connectivity);
        let backoff = Duration::from_millis(self.config.watch_backoff_ms);

        let task = tokio::spawn(async move {
            let mut cursor: Option<String> = None;
            loop {
                if connectivity.is_offline() {
                    break;
                }
                match transport.watch(&query, cursor.as_deref()).await {
                    Ok(page) => {
                        cursor = page.cursor;
                        sink(page.records);
                    }
                    Err(e) if e.is_connectivity() => {
                        connectivity.go_offline(&e.to_string());
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            collection = %query.collection,
                            error = %e,
                            "Watch failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
            tracing::debug!(collection = %query.collection, "Subscription ended");
        });

        SubscriptionHandle { task: Some(task) }
    }
}
