//! Obfuscated local store
//!
//! Durable key → JSON blob storage backing the collection mirrors.
//! Values are serialized, passed through a reversible byte-wise transform
//! keyed by a shared secret, and written to a local SQLite table.
//!
//! The on-disk format is inferred, not tagged: `get` first tries to
//! reverse the transform, then falls back to parsing the raw value so
//! that entries written before obfuscation existed keep working. Legacy
//! entries are rewritten through `put` on first read. Unreadable entries
//! are treated as absent, never as errors.
//!
//! The transform is an at-rest obfuscation measure, not a cryptographic
//! guarantee.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{SyncError, SyncResult};

/// Shared secret keying the byte-wise transform. Stable across releases;
/// changing it would orphan every existing entry.
const OBFUSCATION_SECRET: &[u8] = b"practica.store.v1";

/// Configuration for the local store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "practica_local.db".to_string(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

/// Reversible byte-wise transform keyed by a shared secret.
///
/// Keystream blocks are SHA-256 digests of the secret concatenated with a
/// little-endian block counter; the serialized value is XORed against the
/// stream and base64-encoded.
struct Codec {
    secret: Vec<u8>,
}

impl Codec {
    fn new(secret: &[u8]) -> SyncResult<Self> {
        if secret.is_empty() {
            return Err(SyncError::Internal(
                "obfuscation secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    fn keystream_block(&self, index: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(index.to_le_bytes());
        hasher.finalize().into()
    }

    fn xor(&self, bytes: &mut [u8]) {
        for (block_index, chunk) in bytes.chunks_mut(32).enumerate() {
            let block = self.keystream_block(block_index as u64);
            for (byte, key) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= key;
            }
        }
    }

    fn conceal(&self, plain: &str) -> String {
        let mut bytes = plain.as_bytes().to_vec();
        self.xor(&mut bytes);
        BASE64.encode(bytes)
    }

    fn reveal(&self, stored: &str) -> Result<String, String> {
        let mut bytes = BASE64
            .decode(stored)
            .map_err(|e| format!("base64: {}", e))?;
        self.xor(&mut bytes);
        String::from_utf8(bytes).map_err(|e| format!("utf8: {}", e))
    }
}

/// Local obfuscated key/value store
pub struct ObfuscatedStore {
    pool: SqlitePool,
    codec: Codec,
}

impl ObfuscatedStore {
    /// Open (or create) the store at the configured path
    pub async fn new(config: StoreConfig) -> SyncResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        if config.enable_wal {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await?;
        }

        let store = Self {
            pool,
            codec: Codec::new(OBFUSCATION_SECRET)?,
        };
        store.initialize_schema().await?;

        tracing::debug!(db_path = %config.db_path, "Opened local store");

        Ok(store)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write a value under `key`.
    ///
    /// Obfuscation failures degrade to storing the plain serialized form;
    /// only database errors propagate.
    pub async fn put(&self, key: &str, value: &Value) -> SyncResult<()> {
        let plain = match serde_json::to_string(value) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::warn!(key, error = %e, "Value not serializable, skipping write");
                return Ok(());
            }
        };

        let stored = self.codec.conceal(&plain);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO store_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(stored)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read the value under `key`, or `None` when absent or unreadable.
    ///
    /// Entries written before obfuscation existed parse directly and are
    /// rewritten through `put` so future reads take the fast path.
    pub async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        let row = sqlx::query("SELECT value FROM store_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("value")?;

        if let Ok(plain) = self.codec.reveal(&raw) {
            if let Ok(value) = serde_json::from_str::<Value>(&plain) {
                return Ok(Some(value));
            }
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                tracing::debug!(key, "Rewriting legacy plain entry");
                self.put(key, &value).await?;
                Ok(Some(value))
            }
            Err(_) => {
                tracing::warn!(key, "Discarding unreadable entry");
                Ok(None)
            }
        }
    }

    /// Remove the value under `key`
    pub async fn remove(&self, key: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM store_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
