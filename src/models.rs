use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Unix seconds.
pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Swap,
    Mint,
    Burn,
    Collect,
    Flash,
}

impl EventKind {
    /// Key of the sub-list holding this kind inside a transaction payload.
    pub fn payload_key(&self) -> &'static str {
        match self {
            EventKind::Swap => "swaps",
            EventKind::Mint => "mints",
            EventKind::Burn => "burns",
            EventKind::Collect => "collects",
            EventKind::Flash => "flashed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Swap => "swap",
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
            EventKind::Collect => "collect",
            EventKind::Flash => "flash",
        };
        f.write_str(name)
    }
}

/// Chain transaction context shared by every event it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentTransaction {
    pub id: String,
    pub dex_id: String,
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub gas_used: String,
    pub gas_price: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub id: String,
    pub symbol: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token0: TokenRef,
    pub token1: TokenRef,
}

/// Fields every pool event carries.
///
/// Amounts are the exact decimal text received from the subgraph. The
/// optional pool attributes stay `None` when the payload omits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCommon {
    pub id: String,
    pub parent_transaction: Arc<ParentTransaction>,
    pub timestamp: Timestamp,
    pub dex_id: String,
    pub tokens: TokenPair,
    pub amount0: String,
    pub amount1: String,
    pub amount_usd: String,
    pub origin: Option<String>,
    pub fee_tier: Option<i32>,
    pub liquidity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub sender: String,
    pub recipient: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub owner: String,
    pub sender: Option<String>,
    pub amount: Option<String>,
    pub tick_lower: Option<i32>,
    pub tick_upper: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub owner: String,
    pub amount: Option<String>,
    pub tick_lower: Option<i32>,
    pub tick_upper: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub owner: String,
    pub tick_lower: Option<i32>,
    pub tick_upper: Option<i32>,
    /// Payload keys without a typed field, kept verbatim.
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub sender: String,
    pub recipient: String,
    pub amount0_paid: Option<String>,
    pub amount1_paid: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub swaps: usize,
    pub mints: usize,
    pub burns: usize,
    pub collects: usize,
    pub flashes: usize,
}

impl EventCounts {
    pub fn total(&self) -> usize {
        self.swaps + self.mints + self.burns + self.collects + self.flashes
    }
}

/// Normalized output of one transaction or one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCollections {
    pub swaps: Vec<SwapEvent>,
    pub mints: Vec<MintEvent>,
    pub burns: Vec<BurnEvent>,
    pub collects: Vec<CollectEvent>,
    pub flashes: Vec<FlashEvent>,
}

impl EventCollections {
    pub fn extend(&mut self, other: EventCollections) {
        self.swaps.extend(other.swaps);
        self.mints.extend(other.mints);
        self.burns.extend(other.burns);
        self.collects.extend(other.collects);
        self.flashes.extend(other.flashes);
    }

    pub fn counts(&self) -> EventCounts {
        EventCounts {
            swaps: self.swaps.len(),
            mints: self.mints.len(),
            burns: self.burns.len(),
            collects: self.collects.len(),
            flashes: self.flashes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    /// Timestamps of every record, in collection order.
    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.swaps
            .iter()
            .map(|e| e.common.timestamp)
            .chain(self.mints.iter().map(|e| e.common.timestamp))
            .chain(self.burns.iter().map(|e| e.common.timestamp))
            .chain(self.collects.iter().map(|e| e.common.timestamp))
            .chain(self.flashes.iter().map(|e| e.common.timestamp))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Flat `swaps` row as stored.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SwapRow {
    pub id: String,
    pub timestamp: i32,
    pub dex_id: String,
    pub token0_symbol: String,
    pub token1_symbol: String,
    pub amount0: String,
    pub amount1: String,
    pub amount_usd: String,
    pub sender: String,
    pub recipient: String,
    pub origin: Option<String>,
    pub fee_tier: Option<i32>,
    pub parent_transaction: sqlx::types::Json<ParentTransaction>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStats {
    pub total_swaps: i64,
    pub total_mints: i64,
    pub total_burns: i64,
    pub total_tokens: i64,
    pub partitions: i64,
    pub earliest_timestamp: Option<i64>,
    pub latest_timestamp: Option<i64>,
}
