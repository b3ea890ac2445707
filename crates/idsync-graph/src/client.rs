//! HTTP transport for the Dgraph alpha API.
//!
//! One client is constructed per process and shared (it is cheap to clone).
//! Every call is a single HTTP round-trip; nothing here retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};

/// User agent for backend requests.
const USER_AGENT_VALUE: &str = concat!("idsync-graph/", env!("CARGO_PKG_VERSION"));

/// Header carrying the ACL access token.
pub const ACCESS_TOKEN_HEADER: &str = "X-Dgraph-AccessToken";

/// Transaction bookkeeping returned in `extensions.txn`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxnContext {
    #[serde(default)]
    pub start_ts: u64,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub preds: Vec<String>,
    #[serde(default)]
    pub aborted: bool,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ServerError>,
    #[serde(default)]
    extensions: Option<Extensions>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct Extensions {
    txn: Option<TxnContext>,
}

/// `data` of a mutation response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct MutationData {
    #[serde(default)]
    pub uids: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(rename = "accessJWT")]
    access_jwt: String,
}

/// Structural operations sent to `/alter`.
#[derive(Debug, Clone)]
pub enum AlterOp {
    /// Apply schema text (predicates, indexes, types).
    Schema(String),
    /// Drop everything, schema included.
    DropAll,
    /// Drop data, keep the schema.
    DropData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationKind {
    Set,
    Delete,
}

/// Client for one Dgraph alpha.
#[derive(Debug, Clone)]
pub struct DgraphClient {
    client: reqwest::Client,
    base_url: String,
    config: GraphConfig,
    access_token: Arc<RwLock<Option<String>>>,
}

impl DgraphClient {
    /// Create a client; no connection is made until the first call.
    pub fn new(config: GraphConfig) -> GraphResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| GraphError::transport(format!("failed to create HTTP client: {}", e)))?;

        let base_url = config.url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            config,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Create a client from `DGRAPH_*` environment variables.
    pub fn from_env() -> GraphResult<Self> {
        Self::new(GraphConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn alter(&self, op: AlterOp) -> GraphResult<()> {
        let url = format!("{}/alter", self.base_url);
        debug!(url = %url, op = ?op, "alter");

        let request = match op {
            AlterOp::Schema(schema) => self.client.post(&url).body(schema),
            AlterOp::DropAll => self.client.post(&url).json(&json!({ "drop_all": true })),
            AlterOp::DropData => self.client.post(&url).json(&json!({ "drop_op": "DATA" })),
        };

        self.send::<Value>(request).await.map(|_| ())
    }

    /// Run a parameterized query, optionally pinned to a transaction snapshot.
    pub(crate) async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        vars: &[(&str, &str)],
        start_ts: Option<u64>,
    ) -> GraphResult<(T, Option<TxnContext>)> {
        let url = format!("{}/query", self.base_url);
        let variables: HashMap<&str, &str> = vars.iter().copied().collect();

        let mut request = self
            .client
            .post(&url)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(ts) = start_ts {
            request = request.query(&[("startTs", ts)]);
        }

        let (data, txn) = self.send::<T>(request).await?;
        let data = data.ok_or_else(|| GraphError::decode("query response carried no data"))?;
        Ok((data, txn))
    }

    pub(crate) async fn mutate(
        &self,
        kind: MutationKind,
        document: &Value,
        start_ts: Option<u64>,
        commit_now: bool,
    ) -> GraphResult<(MutationData, Option<TxnContext>)> {
        let url = format!("{}/mutate", self.base_url);
        let body = match kind {
            MutationKind::Set => json!({ "set": document }),
            MutationKind::Delete => json!({ "delete": document }),
        };
        debug!(url = %url, kind = ?kind, start_ts = ?start_ts, commit_now, "mutate");

        let mut request = self.client.post(&url).json(&body);
        if let Some(ts) = start_ts {
            request = request.query(&[("startTs", ts)]);
        }
        if commit_now {
            request = request.query(&[("commitNow", "true")]);
        }

        let (data, txn) = self.send::<MutationData>(request).await?;
        Ok((data.unwrap_or_default(), txn))
    }

    pub(crate) async fn commit(
        &self,
        start_ts: u64,
        keys: &[String],
        preds: &[String],
    ) -> GraphResult<()> {
        let url = format!("{}/commit", self.base_url);
        debug!(start_ts, keys = keys.len(), "commit");

        let request = self
            .client
            .post(&url)
            .query(&[("startTs", start_ts)])
            .json(&json!({ "keys": keys, "preds": preds }));

        let (_, txn) = self.send::<Value>(request).await?;
        if txn.is_some_and(|t| t.aborted) {
            return Err(GraphError::transport(format!(
                "transaction {} aborted on commit",
                start_ts
            )));
        }
        Ok(())
    }

    pub(crate) async fn abort(&self, start_ts: u64) -> GraphResult<()> {
        let url = format!("{}/commit", self.base_url);
        debug!(start_ts, "abort");

        let request = self
            .client
            .post(&url)
            .query(&[("startTs", start_ts.to_string()), ("abort", "true".to_string())]);

        self.send::<Value>(request).await.map(|_| ())
    }

    /// Send one request and unwrap the `{data, errors, extensions}` envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> GraphResult<(Option<T>, Option<TxnContext>)> {
        let request = self.authorize(request).await?;
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GraphError::transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            warn!(component = "dgraph", error = %e, "malformed response");
            GraphError::decode(format!("malformed response: {}", e))
        })?;

        if !envelope.errors.is_empty() {
            let message = envelope
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GraphError::transport(message));
        }

        Ok((envelope.data, envelope.extensions.and_then(|e| e.txn)))
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> GraphResult<reqwest::RequestBuilder> {
        if self.config.credentials().is_none() {
            return Ok(request);
        }
        let token = self.access_token().await?;
        Ok(request.header(ACCESS_TOKEN_HEADER, token))
    }

    /// Log in once and reuse the access token.
    async fn access_token(&self) -> GraphResult<String> {
        if let Some(token) = self.access_token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut slot = self.access_token.write().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        let Some((user, password)) = self.config.credentials() else {
            return Err(GraphError::transport("no credentials configured"));
        };

        let url = format!("{}/login", self.base_url);
        debug!(url = %url, user, "login");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "userid": user, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GraphError::transport(format!(
                "login failed: HTTP {}",
                status.as_u16()
            )));
        }

        let envelope: Envelope<LoginData> = serde_json::from_str(&body)
            .map_err(|e| GraphError::decode(format!("malformed login response: {}", e)))?;
        if let Some(err) = envelope.errors.first() {
            return Err(GraphError::transport(format!("login failed: {}", err.message)));
        }
        let login = envelope
            .data
            .ok_or_else(|| GraphError::decode("login response carried no token"))?;

        *slot = Some(login.access_jwt.clone());
        Ok(login.access_jwt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client =
            DgraphClient::new(GraphConfig::default().with_url("http://localhost:8080/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_envelope_with_errors_and_null_data() {
        let body = r#"{"data":null,"errors":[{"message":"line 1: bad query"}]}"#;
        let envelope: Envelope<Value> = serde_json::from_str(body).unwrap();
        assert!(envelope.data.is_none());
        assert_eq!(envelope.errors[0].message, "line 1: bad query");
    }

    #[test]
    fn test_mutation_envelope() {
        let body = r#"{"data":{"code":"Success","message":"Done","uids":{"cookie":"0x4e21"}},
            "extensions":{"txn":{"start_ts":42,"keys":["2b1z7"],"preds":["1-0-cookie"]}}}"#;
        let envelope: Envelope<MutationData> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.data.unwrap().uids["cookie"], "0x4e21");
        let txn = envelope.extensions.unwrap().txn.unwrap();
        assert_eq!(txn.start_ts, 42);
        assert_eq!(txn.keys, vec!["2b1z7"]);
    }
}
