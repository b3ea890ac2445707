//! Error types for the identity graph store.

use crate::model::Cookie;

/// Graph store errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No node matched the lookup. Expected on first sight of an identity.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// A lookup on a unique key matched more than one cookie.
    ///
    /// The first match is carried along so callers can still act on it.
    #[error("duplicate data for cookie {cookie_id}: {count} matches")]
    DuplicateData {
        cookie_id: String,
        count: usize,
        first: Box<Cookie>,
    },

    /// Backend unreachable, rejected the request, or reported an error.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Backend response (or an outgoing document) could not be (de)serialized.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Caller passed something the store cannot act on.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl GraphError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Whether this is the expected "absent" case that drives the create path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode {
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
