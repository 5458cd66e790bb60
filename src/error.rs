use thiserror::Error;

use crate::models::EventKind;

/// Failures while turning subgraph payloads into typed records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error(
        "malformed transaction {}: field `{field}` {reason}",
        .transaction_id.as_deref().unwrap_or("<unknown>")
    )]
    MalformedTransaction {
        transaction_id: Option<String>,
        field: String,
        reason: String,
    },

    #[error("malformed {kind} #{index} in transaction {transaction_id}: field `{field}` {reason}")]
    MalformedEvent {
        transaction_id: String,
        kind: EventKind,
        index: usize,
        field: String,
        reason: String,
    },

    #[error("malformed subgraph response: {0}")]
    MalformedResponse(String),

    #[error("subgraph returned errors: {}", .0.join("; "))]
    SubgraphErrors(Vec<String>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("invalid partition window [{start}, {end}): {reason}")]
    Range { start: i64, end: i64, reason: String },

    /// An existing relation carries the partition name but not the expected bound.
    #[error("partition {partition} exists with bound {found}, expected {expected}")]
    Conflict {
        partition: String,
        expected: String,
        found: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("unknown base table: {0}")]
    UnknownTable(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
