//! Table layout of the partitioned event store.
//!
//! Every event table is range-partitioned on the integer `timestamp`
//! column. PostgreSQL requires the partition column in every unique key, so
//! the primary key is `(timestamp, id)`.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

pub const TOKEN_METADATA_TABLE: &str = "token_metadata";
pub const PARTITION_COLUMN: &str = "timestamp";

/// The partitioned event tables. Table names only reach statement text
/// through this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseTable {
    Swaps,
    Mints,
    Burns,
}

impl BaseTable {
    pub const ALL: [BaseTable; 3] = [BaseTable::Swaps, BaseTable::Mints, BaseTable::Burns];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaseTable::Swaps => "swaps",
            BaseTable::Mints => "mints",
            BaseTable::Burns => "burns",
        }
    }

    pub fn participant_columns(&self) -> &'static [&'static str] {
        match self {
            BaseTable::Swaps => &["sender", "recipient"],
            BaseTable::Mints | BaseTable::Burns => &["owner"],
        }
    }

    /// Column names in declaration order, as used by inserts.
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }

    pub fn columns(&self) -> Vec<Column> {
        let mut columns: Vec<Column> = COMMON_COLUMNS.to_vec();
        columns.extend(
            self.participant_columns()
                .iter()
                .map(|&name| Column::new(name, "TEXT", false)),
        );
        columns.extend_from_slice(OPTIONAL_COLUMNS);
        columns
    }

    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self.columns().iter().map(Column::definition).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {},\n    PRIMARY KEY ({}, id)\n) \
             PARTITION BY RANGE ({})",
            self.as_str(),
            columns.join(",\n    "),
            PARTITION_COLUMN,
            PARTITION_COLUMN
        )
    }

    pub fn create_index_statements(&self) -> Vec<String> {
        let table = self.as_str();
        let mut statements = vec![
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_tokens \
                 ON {table} (token0_symbol, token1_symbol)"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_dex ON {table} (dex_id)"),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_parent_tx \
                 ON {table} USING GIN (parent_transaction)"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table} (timestamp DESC)"),
        ];
        for column in self.participant_columns() {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})"
            ));
        }
        statements
    }
}

impl fmt::Display for BaseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseTable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "swaps" => Ok(BaseTable::Swaps),
            "mints" => Ok(BaseTable::Mints),
            "burns" => Ok(BaseTable::Burns),
            other => Err(ConfigError::UnknownTable(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub nullable: bool,
}

impl Column {
    const fn new(name: &'static str, sql_type: &'static str, nullable: bool) -> Self {
        Self {
            name,
            sql_type,
            nullable,
        }
    }

    fn definition(&self) -> String {
        let not_null = if self.nullable { "" } else { " NOT NULL" };
        format!("{} {}{}", self.name, self.sql_type, not_null)
    }
}

const COMMON_COLUMNS: &[Column] = &[
    Column::new("id", "TEXT", false),
    Column::new("parent_transaction", "JSONB", false),
    Column::new("timestamp", "INTEGER", false),
    Column::new("dex_id", "TEXT", false),
    Column::new("token0_symbol", "TEXT", false),
    Column::new("token1_symbol", "TEXT", false),
    Column::new("token0_id", "TEXT", false),
    Column::new("token1_id", "TEXT", false),
    Column::new("token0_name", "TEXT", false),
    Column::new("token1_name", "TEXT", false),
    Column::new("amount0", "TEXT", false),
    Column::new("amount1", "TEXT", false),
    Column::new("amount_usd", "TEXT", false),
];

const OPTIONAL_COLUMNS: &[Column] = &[
    Column::new("origin", "TEXT", true),
    Column::new("fee_tier", "INTEGER", true),
    Column::new("liquidity", "TEXT", true),
];

fn token_metadata_sql() -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {TOKEN_METADATA_TABLE} (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)"#
    )
}

/// Every statement needed to bring up an empty store, in execution order.
/// All of them are safe to run again.
pub fn schema_statements() -> Vec<String> {
    let mut statements = vec!["CREATE EXTENSION IF NOT EXISTS btree_gist".to_string()];
    statements.extend(BaseTable::ALL.iter().map(BaseTable::create_table_sql));
    statements.push(token_metadata_sql());
    for table in BaseTable::ALL {
        statements.extend(table.create_index_statements());
    }
    statements
}
