//! Collaborator seams for the fetch layer.
//!
//! The orchestrator only talks to the network, the host's connectivity signal
//! and the persistence backend through these traits, so tests can swap in
//! scripted implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FetchError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure of a single GET attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    Status(u16),
    /// Connection, DNS or timeout failure.
    Network(String),
    /// The body was not valid JSON.
    Decode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Status(status) => write!(f, "HTTP {status}"),
            TransportError::Network(reason) => write!(f, "network: {reason}"),
            TransportError::Decode(reason) => write!(f, "decode: {reason}"),
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status(status) => FetchError::from_status(status),
            TransportError::Network(reason) => FetchError::Transport(reason),
            TransportError::Decode(reason) => FetchError::Transport(format!("invalid JSON body: {reason}")),
        }
    }
}

/// Issues idempotent GET requests against the upstream API.
///
/// The fetch layer is agnostic to response shape: whatever JSON the transport
/// yields is cached and returned as-is.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one GET and returns the parsed JSON body.
    async fn get_json(&self, url: &str) -> std::result::Result<Value, TransportError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONNECTIVITY TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Reports whether the host currently has network connectivity.
pub trait Connectivity: Send + Sync {
    /// Returns false when the host knows it is offline.
    fn is_online(&self) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable string key/value backend for the cache.
///
/// The backend may hold keys that do not belong to the cache; the cache only
/// touches keys under its own namespace and must write everything else back
/// unchanged.
///
/// Implementations might use:
/// - Nothing at all (ephemeral, for tests)
/// - A JSON file on disk
#[async_trait]
pub trait Storage: Send + Sync {
    /// Loads every persisted item.
    async fn load(&self) -> Result<HashMap<String, String>>;

    /// Replaces the persisted items with `items`.
    async fn save(&self, items: &HashMap<String, String>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(FetchError::from(TransportError::Status(429)), FetchError::RateLimited);
        assert_eq!(
            FetchError::from(TransportError::Status(503)),
            FetchError::Upstream { status: 503 }
        );
        assert!(matches!(
            FetchError::from(TransportError::Decode("eof".into())),
            FetchError::Transport(_)
        ));
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Status(404).to_string(), "HTTP 404");
        assert!(TransportError::Network("refused".into()).to_string().contains("refused"));
    }
}
