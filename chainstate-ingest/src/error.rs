// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for ingestion, storage and aggregation

use std::collections::BTreeMap;

/// A single raw event could not be turned into a record. Always skip-and-count.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed {module} key {key:?}: {reason}")]
    MalformedKey {
        module: String,
        key: String,
        reason: String,
    },

    #[error("malformed {module} value for key {key:?}: {reason}")]
    MalformedValue {
        module: String,
        key: String,
        reason: String,
    },
}

impl DecodeError {
    pub fn malformed_key(module: &str, key: &str, reason: impl Into<String>) -> Self {
        DecodeError::MalformedKey {
            module: module.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed_value(module: &str, key: &str, reason: impl Into<String>) -> Self {
        DecodeError::MalformedValue {
            module: module.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            DecodeError::MalformedKey { .. } => "malformed_key",
            DecodeError::MalformedValue { .. } => "malformed_value",
        }
    }
}

/// Errors surfaced by a source adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    Connectivity(String),

    #[error("source call timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid source response: {0}")]
    InvalidResponse(String),

    #[error("operation not supported by source: {0}")]
    Unsupported(String),

    #[error("source stream closed")]
    Closed,
}

impl SourceError {
    /// The endpoint could not be reached at all, as opposed to answering with garbage
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SourceError::Connectivity(_) | SourceError::Timeout(_))
    }

    /// Whether the next cycle may succeed without operator action
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SourceError::Unsupported(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            SourceError::Connectivity(_) => "connectivity",
            SourceError::Timeout(_) => "timeout",
            SourceError::InvalidResponse(_) => "invalid_response",
            SourceError::Unsupported(_) => "unsupported",
            SourceError::Closed => "closed",
        }
    }
}

/// Errors surfaced by a canonical store backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage query failed: {0}")]
    Query(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn error_type(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Query(_) => "query",
            StoreError::Corrupt(_) => "corrupt",
        }
    }
}

/// Pipeline-level error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("[{chain}] connectivity failure: {source}")]
    Connectivity { chain: String, source: SourceError },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("chain disabled: {0}")]
    ChainDisabled(String),

    #[error("chain already enabled: {0}")]
    AlreadyEnabled(String),

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("no requested chain could be read: {}", format_failures(.failures))]
    TotalFailure { failures: BTreeMap<String, String> },

    #[error("cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether retrying on the next cycle is expected to help
    pub fn is_recoverable(&self) -> bool {
        match self {
            IngestError::Connectivity { source, .. } => source.is_recoverable(),
            IngestError::Decode(_) => true,
            IngestError::Storage(_) => false,
            IngestError::TotalFailure { .. } => true,
            _ => false,
        }
    }

    /// Short static label for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            IngestError::Connectivity { .. } => "connectivity",
            IngestError::Decode(e) => e.error_type(),
            IngestError::Storage(_) => "storage",
            IngestError::UnknownChain(_) => "unknown_chain",
            IngestError::ChainDisabled(_) => "chain_disabled",
            IngestError::AlreadyEnabled(_) => "already_enabled",
            IngestError::InvalidBatch(_) => "invalid_batch",
            IngestError::TotalFailure { .. } => "total_failure",
            IngestError::Cancelled => "cancelled",
        }
    }
}

fn format_failures(failures: &BTreeMap<String, String>) -> String {
    if failures.is_empty() {
        return "no chains requested".to_string();
    }
    failures
        .iter()
        .map(|(chain, reason)| format!("{}: {}", chain, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type IngestResult<T> = Result<T, IngestError>;
