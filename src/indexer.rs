use anyhow::Result;
use log::info;
use serde::Serialize;

use crate::{
    config::Config,
    database::{check_timestamps, Database, InsertSummary},
    models::EventCollections,
    partitions::{checked_window, compute_partitions, window_for_timestamps, PartitionSpec},
    processor::{BatchSummary, BulkProcessor},
    subgraph::{SubgraphResponse, TokensData, TransactionsData},
};

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub batch: BatchSummary,
    pub partitions: usize,
    pub inserted: InsertSummary,
}

/// One ingestion run: a subgraph response in, one database transaction out.
pub struct Indexer {
    processor: BulkProcessor,
    database: Database,
    config: Config,
}

impl Indexer {
    pub fn new(config: Config, database: Database) -> Result<Self> {
        let processor = BulkProcessor::from_config(&config)?;

        Ok(Self {
            processor,
            database,
            config,
        })
    }

    /// Normalizes the whole batch first, creates the partitions its
    /// timestamps need, then writes. A malformed transaction stops the run
    /// before anything touches the store.
    pub async fn ingest_transactions(
        &self,
        response: SubgraphResponse<TransactionsData>,
    ) -> Result<IngestReport> {
        let batch = self.processor.process_response(response)?;

        if batch.events.is_empty() {
            info!(
                "No events in {} transactions for {}",
                batch.summary.transactions, self.config.dex_id
            );
            return Ok(IngestReport {
                batch: batch.summary,
                partitions: 0,
                inserted: InsertSummary::default(),
            });
        }

        let partitions = self.prepare_partitions(&batch.events).await?;
        let inserted = self.database.insert_events(&batch.events).await?;

        info!(
            "Ingested {} transactions for {}: {} swaps, {} mints, {} burns written",
            batch.summary.transactions,
            self.config.dex_id,
            inserted.swaps,
            inserted.mints,
            inserted.burns
        );

        Ok(IngestReport {
            batch: batch.summary,
            partitions,
            inserted,
        })
    }

    async fn prepare_partitions(&self, events: &EventCollections) -> Result<usize> {
        check_timestamps(events)?;
        let Some((start, end)) = window_for_timestamps(events.timestamps()) else {
            return Ok(0);
        };
        let specs = compute_partitions(start, end)?;
        self.database.ensure_partitions(&specs).await?;
        Ok(specs.len())
    }

    /// Creates partitions ahead of parallel writers covering `[start, end)`.
    pub async fn create_partitions(&self, start: i64, end: i64) -> Result<Vec<PartitionSpec>> {
        let (start, end) = checked_window(start, end)?;
        let specs = compute_partitions(start, end)?;
        self.database.ensure_partitions(&specs).await?;
        Ok(specs)
    }

    pub async fn ingest_tokens(&self, response: SubgraphResponse<TokensData>) -> Result<u64> {
        let tokens = self.processor.process_tokens(response)?;
        let written = self.database.upsert_tokens(&tokens).await?;
        info!("Upserted {} of {} tokens", written, tokens.len());
        Ok(written)
    }
}
