use std::path::PathBuf;

use chrono::{DateTime, NaiveDate};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dex-event-indexer")]
#[command(about = "Normalize DEX subgraph activity into a monthly-partitioned PostgreSQL store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create tables and indexes
    Schema {
        /// Print the statements instead of executing them
        #[arg(long)]
        print: bool,
    },
    /// Create the monthly partitions covering a time window
    Partitions {
        /// Unix seconds, YYYY-MM-DD or RFC 3339
        #[arg(short, long, value_parser = parse_time)]
        start: i64,
        #[arg(short, long, value_parser = parse_time)]
        end: i64,
        #[arg(long)]
        print: bool,
    },
    /// Ingest a `{data: {transactions}}` subgraph response
    Ingest {
        /// Response file; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Normalize and report counts without touching the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Upsert token metadata from a `{data: {tokens}}` subgraph response
    Tokens {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    Query {
        #[arg(short, long)]
        dex: Option<String>,
        #[arg(long, value_parser = parse_time)]
        from: Option<i64>,
        #[arg(long, value_parser = parse_time)]
        to: Option<i64>,
        #[arg(short, long)]
        limit: Option<i64>,
    },
    Stats,
}

pub fn parse_time(value: &str) -> Result<i64, String> {
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .map_err(|_| format!("`{value}` is not unix seconds, YYYY-MM-DD or RFC 3339"))
}
