//! Per-protocol conversion of one subgraph transaction into typed events.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, error, trace};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, NormalizeError};
use crate::models::{
    BurnEvent, CollectEvent, EventCollections, EventCommon, EventKind, FlashEvent, MintEvent,
    ParentTransaction, SwapEvent, TokenPair, TokenRef,
};
use crate::payload::{Fields, Scope};

/// Normalization strategy for one DEX protocol.
///
/// Implementations are pure: the same payload always yields the same
/// collections, and a malformed payload yields an error with no records.
pub trait EventNormalizer: Send + Sync {
    fn dex_id(&self) -> &str;

    fn normalize(&self, payload: &Value) -> Result<EventCollections, NormalizeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    UniswapV3,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniswap_v3" | "uniswap-v3" => Ok(Protocol::UniswapV3),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::UniswapV3 => f.write_str("uniswap_v3"),
        }
    }
}

pub fn normalizer_for(protocol: Protocol, dex_id: impl Into<String>) -> Box<dyn EventNormalizer> {
    match protocol {
        Protocol::UniswapV3 => Box::new(UniswapV3Normalizer::new(dex_id)),
    }
}

/// Builds the shared transaction context from the payload's top-level fields.
pub fn parent_transaction(
    payload: &Value,
    dex_id: &str,
) -> Result<ParentTransaction, NormalizeError> {
    let id = Fields::new(payload, Scope::Transaction { id: None })?.text_ref("id")?;
    let fields = Fields::new(payload, Scope::Transaction { id: Some(id) })?;

    Ok(ParentTransaction {
        id: id.to_string(),
        dex_id: dex_id.to_string(),
        block_number: fields.integer("blockNumber")?,
        timestamp: fields.integer("timestamp")?,
        gas_used: fields.decimal("gasUsed")?,
        gas_price: fields.decimal("gasPrice")?,
    })
}

/// The elements of one event sub-list. Absent or `null` lists are empty.
fn event_list<'p>(
    payload: &'p Value,
    kind: EventKind,
    transaction_id: &str,
) -> Result<&'p [Value], NormalizeError> {
    match payload.get(kind.payload_key()) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(NormalizeError::MalformedTransaction {
            transaction_id: Some(transaction_id.to_string()),
            field: kind.payload_key().to_string(),
            reason: "is not a list".to_string(),
        }),
    }
}

fn token(fields: &Fields<'_>, prefix: &str) -> Result<TokenRef, NormalizeError> {
    Ok(TokenRef {
        id: fields.text(&format!("{prefix}.id"))?,
        symbol: fields.text(&format!("{prefix}.symbol"))?,
        name: fields.text(&format!("{prefix}.name"))?,
    })
}

fn common(
    fields: &Fields<'_>,
    parent: &Arc<ParentTransaction>,
) -> Result<EventCommon, NormalizeError> {
    Ok(EventCommon {
        id: fields.text("id")?,
        parent_transaction: Arc::clone(parent),
        timestamp: parent.timestamp,
        dex_id: parent.dex_id.clone(),
        tokens: TokenPair {
            token0: token(fields, "pool.token0")?,
            token1: token(fields, "pool.token1")?,
        },
        amount0: fields.decimal("amount0")?,
        amount1: fields.decimal("amount1")?,
        amount_usd: fields.decimal("amountUSD")?,
        origin: fields.optional_text("origin")?,
        fee_tier: fields.optional_integer("pool.feeTier")?,
        liquidity: fields.optional_decimal("pool.liquidity")?,
    })
}

// Keys consumed by `common`, plus the back-references to the parent that
// the subgraph may embed in each event.
const COMMON_KEYS: &[&str] = &[
    "id",
    "pool",
    "amount0",
    "amount1",
    "amountUSD",
    "origin",
    "transaction",
    "timestamp",
];

fn swap_event(
    fields: &Fields<'_>,
    parent: &Arc<ParentTransaction>,
) -> Result<SwapEvent, NormalizeError> {
    Ok(SwapEvent {
        common: common(fields, parent)?,
        sender: fields.text("sender")?,
        recipient: fields.text("recipient")?,
    })
}

fn mint_event(
    fields: &Fields<'_>,
    parent: &Arc<ParentTransaction>,
) -> Result<MintEvent, NormalizeError> {
    Ok(MintEvent {
        common: common(fields, parent)?,
        owner: fields.text("owner")?,
        sender: fields.optional_text("sender")?,
        amount: fields.optional_decimal("amount")?,
        tick_lower: fields.optional_integer("tickLower")?,
        tick_upper: fields.optional_integer("tickUpper")?,
    })
}

fn burn_event(
    fields: &Fields<'_>,
    parent: &Arc<ParentTransaction>,
) -> Result<BurnEvent, NormalizeError> {
    Ok(BurnEvent {
        common: common(fields, parent)?,
        owner: fields.text("owner")?,
        amount: fields.optional_decimal("amount")?,
        tick_lower: fields.optional_integer("tickLower")?,
        tick_upper: fields.optional_integer("tickUpper")?,
    })
}

fn collect_event(
    fields: &Fields<'_>,
    parent: &Arc<ParentTransaction>,
) -> Result<CollectEvent, NormalizeError> {
    let consumed: Vec<&str> = COMMON_KEYS
        .iter()
        .copied()
        .chain(["owner", "tickLower", "tickUpper"])
        .collect();

    Ok(CollectEvent {
        common: common(fields, parent)?,
        owner: fields.text("owner")?,
        tick_lower: fields.optional_integer("tickLower")?,
        tick_upper: fields.optional_integer("tickUpper")?,
        extra: fields.remaining(&consumed),
    })
}

fn flash_event(
    fields: &Fields<'_>,
    parent: &Arc<ParentTransaction>,
) -> Result<FlashEvent, NormalizeError> {
    let consumed: Vec<&str> = COMMON_KEYS
        .iter()
        .copied()
        .chain(["sender", "recipient", "amount0Paid", "amount1Paid"])
        .collect();

    Ok(FlashEvent {
        common: common(fields, parent)?,
        sender: fields.text("sender")?,
        recipient: fields.text("recipient")?,
        amount0_paid: fields.optional_decimal("amount0Paid")?,
        amount1_paid: fields.optional_decimal("amount1Paid")?,
        extra: fields.remaining(&consumed),
    })
}

/// Uniswap V3 subgraph layout: events nest their pool, and the pool nests
/// `token0`/`token1`, `feeTier` and `liquidity`.
pub struct UniswapV3Normalizer {
    dex_id: String,
    log_target: String,
}

impl UniswapV3Normalizer {
    pub fn new(dex_id: impl Into<String>) -> Self {
        let dex_id = dex_id.into();
        let log_target = format!("dex_event_indexer::normalizer::{dex_id}");
        debug!(target: log_target.as_str(), "Initialized Uniswap V3 normalizer for {}", dex_id);
        Self { dex_id, log_target }
    }

    fn extract<T, F>(
        &self,
        payload: &Value,
        kind: EventKind,
        parent: &Arc<ParentTransaction>,
        build: F,
    ) -> Result<Vec<T>, NormalizeError>
    where
        F: Fn(&Fields<'_>, &Arc<ParentTransaction>) -> Result<T, NormalizeError>,
    {
        let items = event_list(payload, kind, &parent.id)?;
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let scope = Scope::Event {
                    transaction_id: &parent.id,
                    kind,
                    index,
                };
                build(&Fields::new(item, scope)?, parent)
            })
            .collect::<Result<Vec<T>, NormalizeError>>()
            .map_err(|e| {
                error!(
                    target: self.log_target.as_str(),
                    "Error processing {} events for transaction {}: {}", kind, parent.id, e
                );
                e
            })
    }
}

impl EventNormalizer for UniswapV3Normalizer {
    fn dex_id(&self) -> &str {
        &self.dex_id
    }

    fn normalize(&self, payload: &Value) -> Result<EventCollections, NormalizeError> {
        let parent = Arc::new(parent_transaction(payload, &self.dex_id)?);

        let events = EventCollections {
            swaps: self.extract(payload, EventKind::Swap, &parent, swap_event)?,
            mints: self.extract(payload, EventKind::Mint, &parent, mint_event)?,
            burns: self.extract(payload, EventKind::Burn, &parent, burn_event)?,
            collects: self.extract(payload, EventKind::Collect, &parent, collect_event)?,
            flashes: self.extract(payload, EventKind::Flash, &parent, flash_event)?,
        };

        let counts = events.counts();
        trace!(
            target: self.log_target.as_str(),
            "Transaction {} at block {}: swaps={}, mints={}, burns={}, collects={}, flashes={}",
            parent.id,
            parent.block_number,
            counts.swaps,
            counts.mints,
            counts.burns,
            counts.collects,
            counts.flashes
        );

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool() -> Value {
        json!({
            "feeTier": "3000",
            "liquidity": "98765432109876543210",
            "token0": {"id": "0xa0b8", "symbol": "USDC", "name": "USD Coin"},
            "token1": {"id": "0xc02a", "symbol": "WETH", "name": "Wrapped Ether"}
        })
    }

    fn swap(id: &str) -> Value {
        json!({
            "id": id,
            "pool": pool(),
            "amount0": "-2500.123456",
            "amount1": "1.000000000000000001",
            "amountUSD": "2500.12",
            "sender": "0xrouter",
            "recipient": "0xtrader",
            "origin": "0xeoa"
        })
    }

    fn transaction() -> Value {
        json!({
            "id": "0xtx",
            "blockNumber": "17000000",
            "timestamp": "1704100000",
            "gasUsed": "152000",
            "gasPrice": "31000000000",
            "swaps": [swap("0xtx#1")],
            "mints": [],
            "burns": []
        })
    }

    fn normalizer() -> UniswapV3Normalizer {
        UniswapV3Normalizer::new("uniswap_v3")
    }

    #[test]
    fn parent_fields() {
        let parent = parent_transaction(&transaction(), "uniswap_v3").unwrap();
        assert_eq!(parent.id, "0xtx");
        assert_eq!(parent.block_number, 17_000_000);
        assert_eq!(parent.timestamp, 1_704_100_000);
        assert_eq!(parent.gas_price, "31000000000");
        assert_eq!(parent.dex_id, "uniswap_v3");
    }

    #[test]
    fn swap_reaches_into_pool() {
        let events = normalizer().normalize(&transaction()).unwrap();
        let swap = &events.swaps[0];

        assert_eq!(swap.common.tokens.token0.symbol, "USDC");
        assert_eq!(swap.common.tokens.token1.name, "Wrapped Ether");
        assert_eq!(swap.common.fee_tier, Some(3000));
        assert_eq!(swap.common.liquidity.as_deref(), Some("98765432109876543210"));
        assert_eq!(swap.common.amount1, "1.000000000000000001");
        assert_eq!(swap.sender, "0xrouter");
        assert_eq!(swap.common.timestamp, swap.common.parent_transaction.timestamp);
    }

    #[test]
    fn missing_sub_lists_are_empty() {
        let events = normalizer().normalize(&transaction()).unwrap();
        assert!(events.collects.is_empty());
        assert!(events.flashes.is_empty());
    }

    #[test]
    fn sub_list_of_wrong_type_fails_the_transaction() {
        let mut payload = transaction();
        payload["burns"] = json!({"id": "0xtx#9"});

        let err = normalizer().normalize(&payload).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MalformedTransaction {
                transaction_id: Some("0xtx".to_string()),
                field: "burns".to_string(),
                reason: "is not a list".to_string(),
            }
        );
    }

    #[test]
    fn missing_gas_price_fails_with_transaction_id() {
        let mut payload = transaction();
        payload.as_object_mut().unwrap().remove("gasPrice");

        match normalizer().normalize(&payload).unwrap_err() {
            NormalizeError::MalformedTransaction {
                transaction_id,
                field,
                ..
            } => {
                assert_eq!(transaction_id.as_deref(), Some("0xtx"));
                assert_eq!(field, "gasPrice");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_id_has_no_transaction_id() {
        let mut payload = transaction();
        payload.as_object_mut().unwrap().remove("id");

        match normalizer().normalize(&payload).unwrap_err() {
            NormalizeError::MalformedTransaction {
                transaction_id,
                field,
                ..
            } => {
                assert_eq!(transaction_id, None);
                assert_eq!(field, "id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mint_optional_fields() {
        let mut payload = transaction();
        payload["mints"] = json!([{
            "id": "0xtx#2",
            "pool": pool(),
            "amount0": "10",
            "amount1": "0",
            "amountUSD": "10",
            "owner": "0xnpm",
            "amount": "5000",
            "tickLower": "-887220",
            "tickUpper": 887220
        }]);

        let mint = &normalizer().normalize(&payload).unwrap().mints[0];
        assert_eq!(mint.owner, "0xnpm");
        assert_eq!(mint.sender, None);
        assert_eq!(mint.common.origin, None);
        assert_eq!(mint.amount.as_deref(), Some("5000"));
        assert_eq!(mint.tick_lower, Some(-887_220));
        assert_eq!(mint.tick_upper, Some(887_220));
    }

    #[test]
    fn collect_is_explicit_and_keeps_unknown_keys() {
        let mut payload = transaction();
        payload["collects"] = json!([{
            "id": "0xtx#3",
            "pool": pool(),
            "amount0": "1",
            "amount1": "2",
            "amountUSD": "3",
            "owner": "0xnpm",
            "logIndex": "44",
            "transaction": {"id": "0xtx"}
        }]);

        let collect = &normalizer().normalize(&payload).unwrap().collects[0];
        assert_eq!(collect.owner, "0xnpm");
        assert_eq!(collect.extra.len(), 1);
        assert_eq!(collect.extra["logIndex"], json!("44"));
    }

    #[test]
    fn collect_without_owner_fails_fast() {
        let mut payload = transaction();
        payload["collects"] = json!([{
            "id": "0xtx#3",
            "pool": pool(),
            "amount0": "1",
            "amount1": "2",
            "amountUSD": "3"
        }]);

        match normalizer().normalize(&payload).unwrap_err() {
            NormalizeError::MalformedEvent { kind, field, .. } => {
                assert_eq!(kind, EventKind::Collect);
                assert_eq!(field, "owner");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn flash_reads_the_flashed_list() {
        let mut payload = transaction();
        payload["flashed"] = json!([{
            "id": "0xtx#4",
            "pool": pool(),
            "amount0": "100",
            "amount1": "0",
            "amountUSD": "100",
            "sender": "0xbot",
            "recipient": "0xbot",
            "amount0Paid": "100.05"
        }]);

        let flash = &normalizer().normalize(&payload).unwrap().flashes[0];
        assert_eq!(flash.amount0_paid.as_deref(), Some("100.05"));
        assert_eq!(flash.amount1_paid, None);
        assert!(flash.extra.is_empty());
    }

    #[test]
    fn non_numeric_gas_price_fails_the_transaction() {
        let mut payload = transaction();
        payload["gasPrice"] = json!("not-a-number");

        match normalizer().normalize(&payload).unwrap_err() {
            NormalizeError::MalformedTransaction {
                transaction_id,
                field,
                ..
            } => {
                assert_eq!(transaction_id.as_deref(), Some("0xtx"));
                assert_eq!(field, "gasPrice");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_or_non_numeric_amounts_fail_the_event() {
        for (path, bad) in [("amount0", ""), ("amount1", "abc"), ("amountUSD", "NaN")] {
            let mut payload = transaction();
            payload["swaps"][0][path] = json!(bad);

            match normalizer().normalize(&payload).unwrap_err() {
                NormalizeError::MalformedEvent {
                    kind, index, field, ..
                } => {
                    assert_eq!(kind, EventKind::Swap);
                    assert_eq!(index, 0);
                    assert_eq!(field, path);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    fn position(owner: Option<&str>) -> Value {
        let mut event = json!({
            "id": "0xtx#5",
            "pool": pool(),
            "amount0": "1",
            "amount1": "2",
            "amountUSD": "3"
        });
        if let Some(owner) = owner {
            event["owner"] = json!(owner);
        }
        event
    }

    fn missing_field(payload: &Value) -> (EventKind, String) {
        match normalizer().normalize(payload).unwrap_err() {
            NormalizeError::MalformedEvent { kind, field, .. } => (kind, field),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_kind_requires_its_participants() {
        let mut payload = transaction();
        payload["swaps"][0].as_object_mut().unwrap().remove("recipient");
        assert_eq!(missing_field(&payload), (EventKind::Swap, "recipient".to_string()));

        let mut payload = transaction();
        payload["swaps"][0].as_object_mut().unwrap().remove("sender");
        assert_eq!(missing_field(&payload), (EventKind::Swap, "sender".to_string()));

        let mut payload = transaction();
        payload["mints"] = json!([position(None)]);
        assert_eq!(missing_field(&payload), (EventKind::Mint, "owner".to_string()));

        let mut payload = transaction();
        payload["burns"] = json!([position(None)]);
        assert_eq!(missing_field(&payload), (EventKind::Burn, "owner".to_string()));

        let mut flash = position(None);
        flash["recipient"] = json!("0xbot");
        let mut payload = transaction();
        payload["flashed"] = json!([flash]);
        assert_eq!(missing_field(&payload), (EventKind::Flash, "sender".to_string()));

        let mut flash = position(None);
        flash["sender"] = json!("0xbot");
        let mut payload = transaction();
        payload["flashed"] = json!([flash]);
        assert_eq!(missing_field(&payload), (EventKind::Flash, "recipient".to_string()));
    }

    #[test]
    fn position_events_with_owner_pass() {
        let mut payload = transaction();
        payload["mints"] = json!([position(Some("0xnpm"))]);
        payload["burns"] = json!([position(Some("0xnpm"))]);

        let events = normalizer().normalize(&payload).unwrap();
        assert_eq!(events.mints[0].owner, "0xnpm");
        assert_eq!(events.burns[0].owner, "0xnpm");
    }

    #[test]
    fn protocol_names() {
        assert_eq!("uniswap_v3".parse::<Protocol>(), Ok(Protocol::UniswapV3));
        assert!("curve".parse::<Protocol>().is_err());
        assert_eq!(normalizer_for(Protocol::UniswapV3, "uni_arb").dex_id(), "uni_arb");
    }
}
