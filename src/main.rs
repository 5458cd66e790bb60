mod cli;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use dex_event_indexer::config::Config;
use dex_event_indexer::database::Database;
use dex_event_indexer::indexer::Indexer;
use dex_event_indexer::partitions::{checked_window, compute_partitions, emit_creation_statements};
use dex_event_indexer::processor::BulkProcessor;
use dex_event_indexer::schema::schema_statements;
use dex_event_indexer::subgraph::SubgraphResponse;
use serde::de::DeserializeOwned;

fn read_response<T: DeserializeOwned>(input: Option<&Path>) -> Result<SubgraphResponse<T>> {
    let response = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            SubgraphResponse::from_reader(BufReader::new(file))?
        }
        None => SubgraphResponse::from_reader(io::stdin().lock())?,
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Schema { print } => {
            if print {
                for statement in schema_statements() {
                    println!("{};\n", statement);
                }
            } else {
                Database::new(&config).await?;
                println!("Schema is up to date");
            }
        }
        Commands::Partitions { start, end, print } => {
            if print {
                let (start, end) = checked_window(start, end)?;
                for statement in emit_creation_statements(&compute_partitions(start, end)?) {
                    println!("{}\n", statement);
                }
            } else {
                let database = Database::new(&config).await?;
                let indexer = Indexer::new(config, database)?;
                let specs = indexer.create_partitions(start, end).await?;
                for spec in &specs {
                    println!(
                        "{} [{}, {})",
                        spec.name(),
                        spec.range_start(),
                        spec.range_end()
                    );
                }
                println!("Ensured {} partitions", specs.len());
            }
        }
        Commands::Ingest { input, dry_run } => {
            let response = read_response(input.as_deref())?;
            if dry_run {
                let processor = BulkProcessor::from_config(&config)?;
                let batch = processor.process_response(response)?;
                println!("{}", serde_json::to_string_pretty(&batch.summary)?);
            } else {
                let database = Database::new(&config).await?;
                let indexer = Indexer::new(config, database)?;
                let report = indexer.ingest_transactions(response).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Tokens { input } => {
            let response = read_response(input.as_deref())?;
            let database = Database::new(&config).await?;
            let indexer = Indexer::new(config, database)?;
            let written = indexer.ingest_tokens(response).await?;
            println!("Upserted {} tokens", written);
        }
        Commands::Query {
            dex,
            from,
            to,
            limit,
        } => {
            let database = Database::new(&config).await?;
            let swaps = database
                .query_swaps(dex.as_deref(), from, to, limit.unwrap_or(100))
                .await?;

            for swap in swaps {
                println!("{}", serde_json::to_string_pretty(&swap)?);
            }
        }
        Commands::Stats => {
            let database = Database::new(&config).await?;
            let stats = database.get_stats().await?;
            println!("Database Statistics:");
            println!("Swaps: {}", stats.total_swaps);
            println!("Mints: {}", stats.total_mints);
            println!("Burns: {}", stats.total_burns);
            println!("Tokens: {}", stats.total_tokens);
            println!("Partitions: {}", stats.partitions);
            println!("Earliest timestamp: {}", stats.earliest_timestamp.unwrap_or(0));
            println!("Latest timestamp: {}", stats.latest_timestamp.unwrap_or(0));
        }
    }

    Ok(())
}
