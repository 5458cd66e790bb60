//! Normalizes DEX subgraph activity into typed swap, mint, burn, collect and
//! flash records and manages the monthly range partitions of the PostgreSQL
//! tables that hold them.

pub mod config;
pub mod database;
pub mod error;
pub mod indexer;
pub mod models;
pub mod normalizer;
pub mod partitions;
pub mod payload;
pub mod processor;
pub mod schema;
pub mod subgraph;

pub use error::{ConfigError, NormalizeError, PartitionError};
pub use models::{EventCollections, EventKind, ParentTransaction};
pub use normalizer::{normalizer_for, EventNormalizer, Protocol};
pub use processor::{BatchSummary, BulkProcessor, ProcessedBatch};
