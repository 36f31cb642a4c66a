//! Session actor identity
//!
//! The authentication service is an external collaborator returning a
//! stable actor identity. The current actor is persisted through the
//! obfuscated store under its own key so audit attribution keeps working
//! across restarts and while offline. Transport failures during
//! authentication are classified exactly like gateway failures.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::connectivity::Connectivity;
use crate::error::SyncResult;
use crate::store::ObfuscatedStore;
use crate::transport::RemoteError;

/// Stable authenticated actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorIdentity {
    pub id: String,
    pub name: String,
}

/// External authentication collaborator
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_actor(&self) -> Result<ActorIdentity, RemoteError>;
}

/// Persistence of the current session's actor
pub struct SessionStore {
    store: Arc<ObfuscatedStore>,
    key: String,
}

impl SessionStore {
    pub fn new(store: Arc<ObfuscatedStore>, key_prefix: &str) -> Self {
        Self {
            store,
            key: format!("{}_session_actor", key_prefix),
        }
    }

    pub async fn save(&self, actor: &ActorIdentity) -> SyncResult<()> {
        let value = serde_json::to_value(actor)?;
        self.store.put(&self.key, &value).await
    }

    pub async fn load(&self) -> Option<ActorIdentity> {
        match self.store.get(&self.key).await {
            Ok(Some(value)) => serde_json::from_value(value).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load stored actor");
                None
            }
        }
    }

    pub async fn clear(&self) -> SyncResult<()> {
        self.store.remove(&self.key).await
    }
}

/// Resolve the session actor: ask the authentication service when remote
/// attempts are allowed, persisting a fresh identity; otherwise (or on
/// failure) fall back to the stored one.
pub async fn resolve_actor(
    provider: &dyn IdentityProvider,
    session: &SessionStore,
    connectivity: &Connectivity,
) -> Option<ActorIdentity> {
    if connectivity.should_attempt_remote() {
        match provider.current_actor().await {
            Ok(actor) => {
                if let Err(e) = session.save(&actor).await {
                    tracing::warn!(error = %e, "Failed to persist session actor");
                }
                return Some(actor);
            }
            Err(e) => {
                if e.is_connectivity() {
                    connectivity.go_offline(&e.to_string());
                }
                tracing::warn!(error = %e, "Authentication failed, falling back to stored actor");
            }
        }
    }

    session.load().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    struct StaticProvider {
        result: Result<ActorIdentity, RemoteError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn current_actor(&self) -> Result<ActorIdentity, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    async fn create_session() -> (SessionStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let config = StoreConfig {
            db_path: temp_file.path().to_str().unwrap().to_string(),
            ..StoreConfig::default()
        };
        let store = Arc::new(ObfuscatedStore::new(config).await.unwrap());
        (SessionStore::new(store, "practica"), temp_file)
    }

    fn actor() -> ActorIdentity {
        ActorIdentity {
            id: "u1".to_string(),
            name: "Dr. Moreau".to_string(),
        }
    }

    #[tokio::test]
    async fn test_actor_round_trip() {
        let (session, _guard) = create_session().await;

        session.save(&actor()).await.unwrap();
        assert_eq!(session.load().await, Some(actor()));

        session.clear().await.unwrap();
        assert_eq!(session.load().await, None);
    }

    #[tokio::test]
    async fn test_resolve_persists_fresh_identity() {
        let (session, _guard) = create_session().await;
        let connectivity = Connectivity::new();
        let provider = StaticProvider {
            result: Ok(actor()),
            calls: AtomicUsize::new(0),
        };

        let resolved = resolve_actor(&provider, &session, &connectivity).await;

        assert_eq!(resolved, Some(actor()));
        assert_eq!(session.load().await, Some(actor()));
    }

    #[tokio::test]
    async fn test_auth_transport_failure_latches_and_falls_back() {
        let (session, _guard) = create_session().await;
        session.save(&actor()).await.unwrap();

        let connectivity = Connectivity::new();
        let provider = StaticProvider {
            result: Err(RemoteError::Unavailable("dns".to_string())),
            calls: AtomicUsize::new(0),
        };

        let resolved = resolve_actor(&provider, &session, &connectivity).await;

        assert_eq!(resolved, Some(actor()));
        assert!(connectivity.is_offline());
    }

    #[tokio::test]
    async fn test_offline_session_never_asks_the_provider() {
        let (session, _guard) = create_session().await;
        let connectivity = Connectivity::offline();
        let provider = StaticProvider {
            result: Ok(actor()),
            calls: AtomicUsize::new(0),
        };

        let resolved = resolve_actor(&provider, &session, &connectivity).await;

        assert_eq!(resolved, None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
