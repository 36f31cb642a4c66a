//! Remote service transport
//!
//! Wire types and the transport seam for the push-capable remote data
//! service, plus the HTTP implementation used in production. The gateway
//! sits on top of this boundary and owns failure classification and the
//! subscription loops; the transport only moves snapshots and writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{SyncError, SyncResult};

/// Ordering direction of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "asc",
            OrderDirection::Descending => "desc",
        }
    }
}

/// An ordered, optionally limited collection read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub collection: String,
    pub order_by: String,
    pub direction: OrderDirection,
    pub limit: Option<usize>,
}

/// A single-document write against a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum RemoteWrite {
    Insert(Value),
    Update(Value),
    Delete { id: String },
}

/// One full ordered snapshot of a collection, with the cursor to watch
/// for the next change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub records: Vec<Value>,
    pub cursor: Option<String>,
}

/// Remote failure taxonomy.
///
/// `Unavailable` and `Denied` are connectivity-class: they degrade the
/// whole session to offline mode. Everything else is a per-call failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Whether this failure should latch the session offline
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Denied(_))
    }
}

/// Classify an HTTP status into the remote failure taxonomy
pub fn classify_http_status(status: u16) -> RemoteError {
    match status {
        401 | 403 => RemoteError::Denied(format!("status {}", status)),
        408 | 429 => RemoteError::Unavailable(format!("status {}", status)),
        500..=599 => RemoteError::Unavailable(format!("status {}", status)),
        _ => RemoteError::Rejected(format!("status {}", status)),
    }
}

/// Transport seam for the remote data service
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// One-shot read of the full ordered collection snapshot
    async fn fetch(&self, query: &CollectionQuery) -> Result<Vec<Value>, RemoteError>;

    /// Apply a single write and return its result document, if any
    async fn apply(&self, collection: &str, write: &RemoteWrite)
        -> Result<Option<Value>, RemoteError>;

    /// Block until the collection changes past `cursor` (or the server's
    /// poll window elapses) and return the current snapshot
    async fn watch(
        &self,
        query: &CollectionQuery,
        cursor: Option<&str>,
    ) -> Result<SnapshotPage, RemoteError>;
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Server base URL
    pub base_url: String,
    /// Authentication token
    pub auth_token: Option<String>,
    /// Per-request timeout in seconds; the watch endpoint holds the
    /// request open up to this long
    pub request_timeout_secs: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            auth_token: None,
            request_timeout_secs: 30,
        }
    }
}

/// HTTP implementation of the remote transport
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Internal(format!("http client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn query_params(query: &CollectionQuery, cursor: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            ("order_by".to_string(), query.order_by.clone()),
            ("direction".to_string(), query.direction.as_str().to_string()),
        ];
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor".to_string(), cursor.to_string()));
        }
        params
    }

    fn map_transport_error(err: reqwest::Error) -> RemoteError {
        if err.is_connect() || err.is_timeout() {
            RemoteError::Unavailable(err.to_string())
        } else {
            RemoteError::Rejected(err.to_string())
        }
    }

    fn checked(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(classify_http_status(status.as_u16()))
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn fetch(&self, query: &CollectionQuery) -> Result<Vec<Value>, RemoteError> {
        let url = format!("{}/collections/{}", self.config.base_url, query.collection);
        let request = self
            .authorize(self.client.get(&url))
            .query(&Self::query_params(query, None));

        let response = request.send().await.map_err(Self::map_transport_error)?;
        let response = Self::checked(response)?;

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    async fn apply(
        &self,
        collection: &str,
        write: &RemoteWrite,
    ) -> Result<Option<Value>, RemoteError> {
        let (action, body) = match write {
            RemoteWrite::Insert(record) => ("insert", record.clone()),
            RemoteWrite::Update(patch) => ("update", patch.clone()),
            RemoteWrite::Delete { id } => ("delete", serde_json::json!({ "id": id })),
        };

        let url = format!(
            "{}/collections/{}/{}",
            self.config.base_url, collection, action
        );
        let request = self.authorize(self.client.post(&url)).json(&body);

        let response = request.send().await.map_err(Self::map_transport_error)?;
        let response = Self::checked(response)?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;

        Ok(match value {
            Value::Null => None,
            value => Some(value),
        })
    }

    async fn watch(
        &self,
        query: &CollectionQuery,
        cursor: Option<&str>,
    ) -> Result<SnapshotPage, RemoteError> {
        let url = format!(
            "{}/collections/{}/watch",
            self.config.base_url, query.collection
        );
        let request = self
            .authorize(self.client.get(&url))
            .query(&Self::query_params(query, cursor));

        let response = request.send().await.map_err(Self::map_transport_error)?;
        let response = Self::checked(response)?;

        response
            .json::<SnapshotPage>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_status() {
        assert!(classify_http_status(401).is_connectivity());
        assert!(classify_http_status(403).is_connectivity());
        assert!(classify_http_status(503).is_connectivity());
        assert!(classify_http_status(429).is_connectivity());
        assert!(!classify_http_status(400).is_connectivity());
        assert!(!classify_http_status(409).is_connectivity());
    }

    #[test]
    fn test_remote_write_wire_shape() {
        let write = RemoteWrite::Delete { id: "42".to_string() };
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["op"], "delete");
        assert_eq!(json["payload"]["id"], "42");

        let round: RemoteWrite = serde_json::from_value(json).unwrap();
        match round {
            RemoteWrite::Delete { id } => assert_eq!(id, "42"),
            other => panic!("unexpected write: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_page_round_trip() {
        let page = SnapshotPage {
            records: vec![serde_json::json!({"id": "1"})],
            cursor: Some("7".to_string()),
        };
        let json = serde_json::to_string(&page).unwrap();
        let round: SnapshotPage = serde_json::from_str(&json).unwrap();
        assert_eq!(round.records.len(), 1);
        assert_eq!(round.cursor.as_deref(), Some("7"));
    }

    #[test]
    fn test_query_params_include_limit_and_cursor() {
        let query = CollectionQuery {
            collection: "audit_log".to_string(),
            order_by: "timestamp".to_string(),
            direction: OrderDirection::Descending,
            limit: Some(100),
        };

        let params = HttpTransport::query_params(&query, Some("9"));
        assert!(params.contains(&("limit".to_string(), "100".to_string())));
        assert!(params.contains(&("cursor".to_string(), "9".to_string())));
        assert!(params.contains(&("direction".to_string(), "desc".to_string())));
    }
}
