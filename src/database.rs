use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::types::Json;
use sqlx::{Executor, Postgres, QueryBuilder, Row, Transaction};

use crate::config::Config;
use crate::models::{
    BurnEvent, DatabaseStats, EventCollections, EventCommon, MintEvent, SwapEvent, SwapRow,
    Timestamp, TokenMetadata,
};
use crate::partitions::{verify_partition_bound, PartitionSpec};
use crate::schema::{schema_statements, BaseTable, TOKEN_METADATA_TABLE};

/// Rows written per table by one [`Database::insert_events`] call. Rows that
/// already existed are not counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InsertSummary {
    pub swaps: u64,
    pub mints: u64,
    pub burns: u64,
}

/// An event kind with a backing partitioned table.
trait StoredEvent: Sync {
    const TABLE: BaseTable;

    fn common(&self) -> &EventCommon;

    /// Binds the columns of `BaseTable::participant_columns`, in order.
    fn push_participants<'a>(&'a self, row: &mut Separated<'_, 'a, Postgres, &'static str>);
}

impl StoredEvent for SwapEvent {
    const TABLE: BaseTable = BaseTable::Swaps;

    fn common(&self) -> &EventCommon {
        &self.common
    }

    fn push_participants<'a>(&'a self, row: &mut Separated<'_, 'a, Postgres, &'static str>) {
        row.push_bind(&self.sender).push_bind(&self.recipient);
    }
}

impl StoredEvent for MintEvent {
    const TABLE: BaseTable = BaseTable::Mints;

    fn common(&self) -> &EventCommon {
        &self.common
    }

    fn push_participants<'a>(&'a self, row: &mut Separated<'_, 'a, Postgres, &'static str>) {
        row.push_bind(&self.owner);
    }
}

impl StoredEvent for BurnEvent {
    const TABLE: BaseTable = BaseTable::Burns;

    fn common(&self) -> &EventCommon {
        &self.common
    }

    fn push_participants<'a>(&'a self, row: &mut Separated<'_, 'a, Postgres, &'static str>) {
        row.push_bind(&self.owner);
    }
}

/// The `timestamp` column is a 32-bit INTEGER.
pub fn db_timestamp(ts: Timestamp) -> Result<i32> {
    i32::try_from(ts).with_context(|| format!("timestamp {ts} does not fit the INTEGER column"))
}

/// Fails on the first event whose timestamp [`db_timestamp`] rejects.
pub fn check_timestamps(events: &EventCollections) -> Result<()> {
    for ts in events.timestamps() {
        db_timestamp(ts)?;
    }
    Ok(())
}

pub struct Database {
    pool: PgPool,
    insert_chunk_size: usize,
}

impl Database {
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("failed to connect to database")?;
        let db = Self {
            pool,
            insert_chunk_size: config.insert_chunk_size,
        };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        for statement in schema_statements() {
            self.pool
                .execute(statement.as_str())
                .await
                .with_context(|| format!("schema statement failed: {statement}"))?;
        }
        debug!("Schema is up to date");
        Ok(())
    }

    /// Creates any missing partition, then checks that every named partition
    /// carries the expected bound.
    pub async fn ensure_partitions(&self, specs: &[PartitionSpec]) -> Result<()> {
        for spec in specs {
            self.pool
                .execute(spec.creation_sql().as_str())
                .await
                .with_context(|| format!("failed to create partition {}", spec.name()))?;

            let bound: Option<Option<String>> = sqlx::query_scalar(
                r#"
                SELECT pg_get_expr(c.relpartbound, c.oid)
                FROM pg_class c
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE c.relname = $1 AND n.nspname = current_schema()
                "#,
            )
            .bind(spec.name())
            .fetch_optional(&self.pool)
            .await?;

            verify_partition_bound(spec, bound.flatten().as_deref())?;
        }

        info!("Ensured {} partitions", specs.len());
        Ok(())
    }

    /// Writes swaps, mints and burns in one transaction. Collect and flash
    /// events have no tables yet and are skipped.
    pub async fn insert_events(&self, events: &EventCollections) -> Result<InsertSummary> {
        check_timestamps(events)?;

        let mut tx = self.pool.begin().await?;
        let summary = InsertSummary {
            swaps: self.insert_table(&mut tx, &events.swaps).await?,
            mints: self.insert_table(&mut tx, &events.mints).await?,
            burns: self.insert_table(&mut tx, &events.burns).await?,
        };
        tx.commit().await?;

        if !events.collects.is_empty() || !events.flashes.is_empty() {
            warn!(
                "Skipped {} collects and {} flashes: no backing tables",
                events.collects.len(),
                events.flashes.len()
            );
        }

        Ok(summary)
    }

    async fn insert_table<E: StoredEvent>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        events: &[E],
    ) -> Result<u64> {
        let mut inserted = 0;
        for chunk in events.chunks(self.insert_chunk_size) {
            inserted += insert_chunk(tx, chunk).await?;
        }
        Ok(inserted)
    }

    pub async fn upsert_tokens(&self, tokens: &[TokenMetadata]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in tokens.chunks(self.insert_chunk_size) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {TOKEN_METADATA_TABLE} (id, symbol, name, created_at) "
            ));
            builder.push_values(chunk, |mut row, token| {
                row.push_bind(&token.id)
                    .push_bind(&token.symbol)
                    .push_bind(&token.name)
                    .push("COALESCE(")
                    .push_bind_unseparated(token.created_at.map(|t| t.naive_utc()))
                    .push_unseparated(", CURRENT_TIMESTAMP)");
            });
            builder.push(
                " ON CONFLICT (id) DO UPDATE SET symbol = EXCLUDED.symbol, name = EXCLUDED.name",
            );

            affected += builder
                .build()
                .execute(&mut *tx)
                .await
                .context("failed to upsert token metadata")?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    pub async fn query_swaps(
        &self,
        dex_id: Option<&str>,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        limit: i64,
    ) -> Result<Vec<SwapRow>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, timestamp, dex_id, token0_symbol, token1_symbol, amount0, amount1, \
             amount_usd, sender, recipient, origin, fee_tier, parent_transaction \
             FROM swaps WHERE 1=1",
        );

        if let Some(dex_id) = dex_id {
            builder.push(" AND dex_id = ").push_bind(dex_id);
        }
        if let Some(from) = from {
            builder.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(to) = to {
            builder.push(" AND timestamp < ").push_bind(to);
        }

        builder
            .push(" ORDER BY timestamp DESC, id ASC LIMIT ")
            .push_bind(limit);

        let swaps = builder
            .build_query_as::<SwapRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(swaps)
    }

    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let counts = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM swaps) AS swaps,
                (SELECT COUNT(*) FROM mints) AS mints,
                (SELECT COUNT(*) FROM burns) AS burns,
                (SELECT COUNT(*) FROM token_metadata) AS tokens
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let partitions: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM pg_inherits i
            JOIN pg_class p ON p.oid = i.inhparent
            WHERE p.relname IN ('swaps', 'mints', 'burns')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let range = sqlx::query(
            r#"
            SELECT MIN(timestamp)::BIGINT AS earliest, MAX(timestamp)::BIGINT AS latest
            FROM (
                SELECT timestamp FROM swaps
                UNION ALL
                SELECT timestamp FROM mints
                UNION ALL
                SELECT timestamp FROM burns
            ) events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            total_swaps: counts.try_get("swaps")?,
            total_mints: counts.try_get("mints")?,
            total_burns: counts.try_get("burns")?,
            total_tokens: counts.try_get("tokens")?,
            partitions,
            earliest_timestamp: range.try_get("earliest")?,
            latest_timestamp: range.try_get("latest")?,
        })
    }
}

fn insert_prefix(table: BaseTable) -> String {
    format!(
        "INSERT INTO {} ({}) ",
        table.as_str(),
        table.column_names().join(", ")
    )
}

async fn insert_chunk<E: StoredEvent>(
    tx: &mut Transaction<'_, Postgres>,
    events: &[E],
) -> Result<u64> {
    if events.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(insert_prefix(E::TABLE));
    builder.push_values(events, |mut row, event| {
        let common = event.common();
        // Range checked by `insert_events` before the transaction opened.
        let timestamp = common.timestamp as i32;

        row.push_bind(&common.id)
            .push_bind(Json(common.parent_transaction.as_ref()))
            .push_bind(timestamp)
            .push_bind(&common.dex_id)
            .push_bind(&common.tokens.token0.symbol)
            .push_bind(&common.tokens.token1.symbol)
            .push_bind(&common.tokens.token0.id)
            .push_bind(&common.tokens.token1.id)
            .push_bind(&common.tokens.token0.name)
            .push_bind(&common.tokens.token1.name)
            .push_bind(&common.amount0)
            .push_bind(&common.amount1)
            .push_bind(&common.amount_usd);
        event.push_participants(&mut row);
        row.push_bind(common.origin.as_deref())
            .push_bind(common.fee_tier)
            .push_bind(common.liquidity.as_deref());
    });
    builder.push(" ON CONFLICT (timestamp, id) DO NOTHING");

    let result = builder
        .build()
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to insert into {}", E::TABLE))?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{normalizer_for, Protocol};
    use crate::processor::BulkProcessor;
    use serde_json::json;

    #[test]
    fn insert_prefix_lists_columns_in_layout_order() {
        assert_eq!(
            insert_prefix(BaseTable::Mints),
            "INSERT INTO mints (id, parent_transaction, timestamp, dex_id, token0_symbol, \
             token1_symbol, token0_id, token1_id, token0_name, token1_name, amount0, amount1, \
             amount_usd, owner, origin, fee_tier, liquidity) "
        );
    }

    #[test]
    fn timestamps_must_fit_integer_column() {
        assert_eq!(db_timestamp(1_704_067_200).unwrap(), 1_704_067_200);
        assert!(db_timestamp(i64::from(i32::MAX) + 1).is_err());
    }

    #[test]
    fn batch_check_names_the_offending_timestamp() {
        let processor = BulkProcessor::new(normalizer_for(Protocol::UniswapV3, "uniswap_v3"));
        let transaction = |timestamp: i64| {
            json!({
                "id": format!("0x{timestamp}"),
                "blockNumber": 1,
                "timestamp": timestamp,
                "gasUsed": "21000",
                "gasPrice": "1",
                "burns": [{
                    "id": "0x1#0",
                    "pool": {
                        "token0": {"id": "0xa", "symbol": "A", "name": "A"},
                        "token1": {"id": "0xb", "symbol": "B", "name": "B"}
                    },
                    "amount0": "1",
                    "amount1": "1",
                    "amountUSD": "1",
                    "owner": "0xowner"
                }]
            })
        };

        let fits = processor.process_batch(&[transaction(1_704_067_200)]).unwrap();
        assert!(check_timestamps(&fits.events).is_ok());

        let too_late = i64::from(i32::MAX) + 1;
        let batch = processor
            .process_batch(&[transaction(1_704_067_200), transaction(too_late)])
            .unwrap();
        let err = check_timestamps(&batch.events).unwrap_err();
        assert!(err.to_string().contains(&too_late.to_string()));
        assert!(check_timestamps(&EventCollections::default()).is_ok());
    }
}
