//! Error types for the linkharvest engine.
//!
//! Errors fall into four groups: input errors (bad addresses, empty batches),
//! transport errors (isolated per address), delivery errors (results cannot be
//! handed back to the host) and configuration/internal errors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for linkharvest operations.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// A candidate string is not a fetchable address.
    #[error("Invalid address: '{0}'")]
    InvalidAddress(String),

    /// A batch contained no valid addresses.
    #[error("Batch contains no valid addresses ({rejected} rejected)")]
    EmptyBatch {
        /// Number of candidates rejected by validation.
        rejected: usize,
    },

    /// A single fetch failed.
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// The final result could not be handed to the host.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Creates a delivery error.
    #[must_use]
    pub fn delivery(reason: impl Into<String>) -> Self {
        Self::Delivery(reason.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let kind = match self {
            Self::InvalidAddress(_) => "InvalidAddress",
            Self::EmptyBatch { .. } => "EmptyBatch",
            Self::Fetch(_) => "Fetch",
            Self::Delivery(_) => "Delivery",
            Self::Config(_) => "Config",
            Self::Internal(_) => "Internal",
            Self::Serialization(_) => "Serialization",
            Self::Io(_) => "Io",
        };

        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Self::Fetch(err) = self {
            map.insert("fetch".to_string(), serde_json::json!(err.kind()));
        }
        map
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Connection, DNS or TLS failure.
    Transport,
    /// The server answered with a non-2xx status.
    Status,
    /// The fetch exceeded its timeout.
    Timeout,
    /// The body exceeded the configured size limit.
    TooLarge,
    /// The fetch task died before producing a result.
    Aborted,
}

/// Errors produced by a single fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Connection-level failure.
    #[error("Transport error for {url}: {reason}")]
    Transport {
        /// The requested address.
        url: String,
        /// The underlying failure.
        reason: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    Status {
        /// The requested address.
        url: String,
        /// The status code returned.
        status: u16,
    },

    /// The fetch did not finish in time.
    #[error("Timed out after {timeout_ms}ms fetching {url}")]
    Timeout {
        /// The requested address.
        url: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The body was larger than allowed.
    #[error("Response from {url} exceeded {limit} bytes")]
    TooLarge {
        /// The requested address.
        url: String,
        /// The configured limit in bytes.
        limit: usize,
    },

    /// The fetch task panicked or was cancelled.
    #[error("Fetch task for {url} aborted: {reason}")]
    Aborted {
        /// The requested address.
        url: String,
        /// Why the task ended.
        reason: String,
    },
}

impl FetchError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a status error.
    #[must_use]
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        Self::Status {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(url: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            url: url.into(),
            timeout_ms,
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Transport { .. } => FetchErrorKind::Transport,
            Self::Status { .. } => FetchErrorKind::Status,
            Self::Timeout { .. } => FetchErrorKind::Timeout,
            Self::TooLarge { .. } => FetchErrorKind::TooLarge,
            Self::Aborted { .. } => FetchErrorKind::Aborted,
        }
    }

    /// Returns the address the error refers to.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. }
            | Self::Status { url, .. }
            | Self::Timeout { url, .. }
            | Self::TooLarge { url, .. }
            | Self::Aborted { url, .. } => url,
        }
    }
}
