//! Audit trail emission
//!
//! Appends one immutable action record after every successful mutation.
//! Entries are hash-chained for tamper evidence and written through the
//! same unified write path as every other collection, so they reach the
//! remote service when online and the local mirror when not.
//!
//! Emission is fire-and-forget relative to the triggering mutation: a
//! bounded queue feeds a worker task, and when the queue is full the
//! entry is dropped with a warning rather than blocking the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::orchestrator::{SyncCore, AUDIT_COLLECTION};
use crate::session::ActorIdentity;
use crate::transport::RemoteWrite;

/// First link of the hash chain
const GENESIS_HASH: &str = "0";

/// Action verb recorded per mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    SaleRecorded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
            AuditAction::SaleRecorded => "sale_recorded",
        }
    }
}

/// One immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub actor_id: String,
    pub actor_name: String,
    pub action: AuditAction,
    pub entity_kind: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    /// Hash of the previous entry in the chain
    pub prev_hash: String,
    /// Hash of this entry
    pub entry_hash: String,
}

impl AuditEntry {
    pub fn new(
        actor: &ActorIdentity,
        action: AuditAction,
        entity_kind: &str,
        details: &str,
        prev_hash: String,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4().to_string(),
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            action,
            entity_kind: entity_kind.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        entry
    }

    fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.actor_id.as_bytes());
        hasher.update(self.actor_name.as_bytes());
        hasher.update(self.action.as_str().as_bytes());
        hasher.update(self.entity_kind.as_bytes());
        hasher.update(self.details.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.prev_hash.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether this entry is intact and links to `prev`
    pub fn chains_from(&self, prev: &AuditEntry) -> bool {
        self.prev_hash == prev.entry_hash && self.entry_hash == self.calculate_hash()
    }
}

/// Audit emitter configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Whether audit emission is enabled
    pub enabled: bool,
    /// Bounded queue capacity; overflow drops entries instead of blocking
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 256,
        }
    }
}

struct AuditEvent {
    action: AuditAction,
    entity_kind: String,
    details: String,
}

/// Fire-and-forget audit emitter
#[derive(Clone)]
pub struct AuditEmitter {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditEmitter {
    /// Start the worker task writing entries through the unified path.
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(core: Arc<SyncCore>, actor: ActorIdentity, config: AuditConfig) -> Self {
        if !config.enabled {
            return Self { tx: None };
        }

        let (tx, mut rx) = mpsc::channel::<AuditEvent>(config.queue_capacity);

        tokio::spawn(async move {
            let mut last_hash = GENESIS_HASH.to_string();
            while let Some(event) = rx.recv().await {
                let entry = AuditEntry::new(
                    &actor,
                    event.action,
                    &event.entity_kind,
                    &event.details,
                    last_hash.clone(),
                );
                last_hash = entry.entry_hash.clone();

                match serde_json::to_value(&entry) {
                    Ok(value) => {
                        let _ = core
                            .write_through(AUDIT_COLLECTION, RemoteWrite::Insert(value))
                            .await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Audit entry not serializable, skipping");
                    }
                }
            }
        });

        Self { tx: Some(tx) }
    }

    /// Queue one audit event. Never blocks the triggering mutation.
    pub fn emit(&self, action: AuditAction, entity_kind: &str, details: String) {
        let Some(tx) = &self.tx else {
            return;
        };

        let event = AuditEvent {
            action,
            entity_kind: entity_kind.to_string(),
            details,
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(entity_kind, "Audit queue full, dropping entry");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(entity_kind, "Audit worker stopped, dropping entry");
            }
        }
    }
}
