//! Graph backend connection settings.

use serde::{Deserialize, Serialize};

/// Connection settings for the Dgraph HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Base URL of the Dgraph alpha HTTP API.
    #[serde(default = "default_graph_url")]
    pub url: String,

    /// ACL user; login is skipped when unset.
    #[serde(default)]
    pub user: Option<String>,

    /// ACL password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_graph_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: default_graph_url(),
            user: None,
            password: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl GraphConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `DGRAPH_URL` | Alpha HTTP base URL |
    /// | `DGRAPH_USER` | ACL user |
    /// | `DGRAPH_PASS` | ACL password |
    /// | `DGRAPH_TIMEOUT` | Request timeout in seconds |
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DGRAPH_URL").unwrap_or_else(|_| default_graph_url()),
            user: std::env::var("DGRAPH_USER").ok().filter(|v| !v.is_empty()),
            password: std::env::var("DGRAPH_PASS").ok().filter(|v| !v.is_empty()),
            timeout_secs: std::env::var("DGRAPH_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
        }
    }

    /// Set the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set ACL credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }
}
