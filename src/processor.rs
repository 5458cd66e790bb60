use log::{debug, error};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{ConfigError, NormalizeError};
use crate::models::{EventCollections, EventCounts, TokenMetadata};
use crate::normalizer::{normalizer_for, EventNormalizer};
use crate::payload::{Fields, Scope};
use crate::subgraph::{SubgraphResponse, TokensData, TransactionsData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub transactions: usize,
    #[serde(flatten)]
    pub counts: EventCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBatch {
    pub events: EventCollections,
    pub summary: BatchSummary,
}

/// Runs whole batches through one normalizer.
///
/// A batch is all-or-nothing: the first failing transaction aborts the call
/// and nothing accumulated so far is returned.
pub struct BulkProcessor {
    normalizer: Box<dyn EventNormalizer>,
    log_target: String,
}

impl BulkProcessor {
    pub fn new(normalizer: Box<dyn EventNormalizer>) -> Self {
        let log_target = format!("dex_event_indexer::processor::{}", normalizer.dex_id());
        Self {
            normalizer,
            log_target,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let protocol = config.protocol()?;
        Ok(Self::new(normalizer_for(protocol, config.dex_id.clone())))
    }

    pub fn dex_id(&self) -> &str {
        self.normalizer.dex_id()
    }

    pub fn process_batch(&self, transactions: &[Value]) -> Result<ProcessedBatch, NormalizeError> {
        debug!(
            target: self.log_target.as_str(),
            "Processing {} transactions on {}",
            transactions.len(),
            self.dex_id()
        );

        let mut events = EventCollections::default();
        for payload in transactions {
            let normalized = self.normalizer.normalize(payload).map_err(|e| {
                error!(target: self.log_target.as_str(), "Aborting batch: {}", e);
                e
            })?;
            events.extend(normalized);
        }

        let summary = BatchSummary {
            transactions: transactions.len(),
            counts: events.counts(),
        };
        debug!(
            target: self.log_target.as_str(),
            "Processed {} swaps, {} mints, {} burns, {} collects, {} flashes ({} events)",
            summary.counts.swaps,
            summary.counts.mints,
            summary.counts.burns,
            summary.counts.collects,
            summary.counts.flashes,
            summary.counts.total()
        );

        Ok(ProcessedBatch { events, summary })
    }

    pub fn process_response(
        &self,
        response: SubgraphResponse<TransactionsData>,
    ) -> Result<ProcessedBatch, NormalizeError> {
        let data = response.into_data()?;
        self.process_batch(&data.transactions)
    }

    /// Token metadata rows from a `{data: {tokens}}` response. `created_at`
    /// is left for the store to default.
    pub fn process_tokens(
        &self,
        response: SubgraphResponse<TokensData>,
    ) -> Result<Vec<TokenMetadata>, NormalizeError> {
        let data = response.into_data()?;
        let tokens = data
            .tokens
            .iter()
            .enumerate()
            .map(|(index, token)| -> Result<TokenMetadata, NormalizeError> {
                let fields = Fields::new(token, Scope::Token { index })?;
                Ok(TokenMetadata {
                    id: fields.text("id")?,
                    symbol: fields.text("symbol")?,
                    name: fields.text("name")?,
                    created_at: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(target: self.log_target.as_str(), "Processed {} tokens", tokens.len());
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Protocol;
    use serde_json::json;

    fn processor() -> BulkProcessor {
        BulkProcessor::new(normalizer_for(Protocol::UniswapV3, "uniswap_v3"))
    }

    fn burn(id: &str) -> Value {
        json!({
            "id": id,
            "pool": {
                "token0": {"id": "0x1", "symbol": "DAI", "name": "Dai"},
                "token1": {"id": "0x2", "symbol": "USDC", "name": "USD Coin"}
            },
            "amount0": "1",
            "amount1": "1",
            "amountUSD": "2",
            "owner": "0xlp"
        })
    }

    fn transaction(id: &str, timestamp: i64, burns: Vec<Value>) -> Value {
        json!({
            "id": id,
            "blockNumber": 1,
            "timestamp": timestamp,
            "gasUsed": "21000",
            "gasPrice": "1",
            "burns": burns
        })
    }

    #[test]
    fn batch_accumulates_across_transactions() {
        let batch = vec![
            transaction("0xa", 100, vec![burn("0xa#1"), burn("0xa#2")]),
            transaction("0xb", 200, vec![burn("0xb#1")]),
        ];

        let result = processor().process_batch(&batch).unwrap();
        assert_eq!(result.summary.transactions, 2);
        assert_eq!(result.summary.counts.burns, 3);
        assert_eq!(result.events.burns[2].common.timestamp, 200);
    }

    #[test]
    fn one_bad_transaction_aborts_the_batch() {
        let mut broken = transaction("0xb", 200, vec![]);
        broken.as_object_mut().unwrap().remove("timestamp");
        let batch = vec![transaction("0xa", 100, vec![burn("0xa#1")]), broken];

        let err = processor().process_batch(&batch).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedTransaction { .. }));
    }

    #[test]
    fn empty_batch() {
        let result = processor().process_batch(&[]).unwrap();
        assert!(result.events.is_empty());
        assert_eq!(result.summary.transactions, 0);
    }

    #[test]
    fn tokens_require_every_field() {
        let response = SubgraphResponse::from_value(json!({"data": {"tokens": [
            {"id": "0x1", "symbol": "DAI", "name": "Dai"},
            {"id": "0x2", "name": "Nameless"}
        ]}}))
        .unwrap();

        match processor().process_tokens(response).unwrap_err() {
            NormalizeError::MalformedResponse(message) => {
                assert!(message.contains("token #1"));
                assert!(message.contains("symbol"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tokens_are_read_in_order() {
        let response = SubgraphResponse::from_value(json!({"data": {"tokens": [
            {"id": "0x1", "symbol": "DAI", "name": "Dai"},
            {"id": "0x2", "symbol": "USDC", "name": "USD Coin"}
        ]}}))
        .unwrap();

        let tokens = processor().process_tokens(response).unwrap();
        assert_eq!(tokens[1].symbol, "USDC");
        assert_eq!(tokens[0].created_at, None);
    }
}
