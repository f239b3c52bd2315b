//! Error types for fabric control plane operations.
//!
//! Every crate in the workspace reports failures through [`FabricError`].
//! The variants follow the failure classes callers act on: unknown entities,
//! malformed requests, exhausted VLAN ranges, allocator bounds, persistence
//! failures and transport failures towards switches.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for fabric operations.
pub type FabricResult<T> = Result<T, FabricError>;

/// Errors that can occur in the fabric control plane.
#[derive(Debug, Error)]
pub enum FabricError {
    /// A referenced entity does not exist.
    #[error("{kind} '{key}' not found")]
    NotFound {
        /// Entity kind (e.g. "network", "port", "host").
        kind: String,
        /// The key that was looked up.
        key: String,
    },

    /// The request is malformed or incomplete.
    #[error("Bad input: {0}")]
    BadInput(String),

    /// The VLAN range for a sharing class on a switch is exhausted.
    #[error("No free {class} VLAN on switch {switch}")]
    NoCapacity {
        /// Switch management IP.
        switch: String,
        /// Sharing class name.
        class: String,
    },

    /// A bit index fell outside the allocator bounds.
    #[error("Index {id} outside allocator range [{min}, {max}]")]
    Range { id: u32, min: u32, max: u32 },

    /// Persistence failure.
    #[error("Store operation failed: {operation}: {message}")]
    Store {
        /// The operation that failed (e.g. "insert", "find", "hgetall").
        operation: String,
        /// Error message.
        message: String,
    },

    /// A switch or agent could not be reached.
    #[error("Connection to {target} failed: {message}")]
    Connect { target: String, message: String },

    /// A switch or agent did not answer in time.
    #[error("Request to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    /// Invalid configuration.
    #[error("Invalid configuration for {field}: {message}")]
    Config { field: String, message: String },

    /// A value could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] fabric_types::ParseError),
}

impl FabricError {
    /// Creates a not found error.
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Creates a bad input error.
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    /// Creates a store error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a connection error.
    pub fn connect(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(target: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            target: target.into(),
            after,
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FabricError::Store { .. } | FabricError::Connect { .. } | FabricError::Timeout { .. }
        )
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            FabricError::NotFound { .. } => "not_found",
            FabricError::BadInput(_) | FabricError::Parse(_) => "bad_input",
            FabricError::NoCapacity { .. } => "no_capacity",
            FabricError::Range { .. } => "range",
            FabricError::Store { .. } => "store",
            FabricError::Connect { .. } => "connect",
            FabricError::Timeout { .. } => "timeout",
            FabricError::Config { .. } => "config",
        }
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(e: serde_json::Error) -> Self {
        FabricError::BadInput(format!("invalid JSON: {}", e))
    }
}

impl From<reqwest::Error> for FabricError {
    fn from(e: reqwest::Error) -> Self {
        let target = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "device agent".to_string());
        FabricError::connect(target, e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for FabricError {
    fn from(e: redis::RedisError) -> Self {
        let operation = e.code().unwrap_or("redis").to_string();
        FabricError::store(operation, e.to_string())
    }
}
