//! Monthly range partitions for the event tables.
//!
//! A window `[start, end)` is widened to whole calendar months (UTC) and
//! split into one partition per month for each base table. Partition names
//! are `{table}_p{YYYY_MM}` and must stay stable across releases because
//! creation is keyed on the name.

use chrono::{DateTime, Datelike, NaiveDate};

use crate::error::PartitionError;
use crate::models::Timestamp;
use crate::schema::BaseTable;

/// One monthly partition of a base table. Only [`compute_partitions`] builds
/// these, so the relation name is always `{table}_p{YYYY_MM}` with a
/// four-digit year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    table: BaseTable,
    month: YearMonth,
    range_start: Timestamp,
    range_end: Timestamp,
}

impl PartitionSpec {
    fn new(table: BaseTable, month: YearMonth) -> Option<Self> {
        Some(Self {
            table,
            month,
            range_start: month.first_second()?,
            range_end: month.next().first_second()?,
        })
    }

    pub fn table(&self) -> BaseTable {
        self.table
    }

    pub fn name(&self) -> String {
        format!("{}_p{}", self.table.as_str(), self.month.suffix())
    }

    pub fn range_start(&self) -> Timestamp {
        self.range_start
    }

    pub fn range_end(&self) -> Timestamp {
        self.range_end
    }

    /// Bound clause as PostgreSQL reports it through `pg_get_expr`.
    pub fn expected_bound(&self) -> String {
        format!(
            "FOR VALUES FROM ({}) TO ({})",
            self.range_start, self.range_end
        )
    }

    /// Idempotent creation block. A concurrent creator winning the race
    /// surfaces as `duplicate_table` (or a catalog `unique_violation`) and is
    /// treated as success.
    pub fn creation_sql(&self) -> String {
        format!(
            r#"DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relname = '{name}'
          AND n.nspname = current_schema()
    ) THEN
        CREATE TABLE {name}
        PARTITION OF {table}
        {bound};
    END IF;
EXCEPTION
    WHEN duplicate_table OR unique_violation THEN
        NULL;
END $$;"#,
            name = self.name(),
            table = self.table.as_str(),
            bound = self.expected_bound(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// `None` outside years 0000..=9999, which keeps partition suffixes at
    /// `YYYY_MM`.
    fn containing(ts: Timestamp) -> Option<Self> {
        let dt = DateTime::from_timestamp(ts, 0)?;
        (0..=9999).contains(&dt.year()).then(|| Self {
            year: dt.year(),
            month: dt.month(),
        })
    }

    fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    fn first_second(self) -> Option<Timestamp> {
        let start = NaiveDate::from_ymd_opt(self.year, self.month, 1)?.and_hms_opt(0, 0, 0)?;
        Some(start.and_utc().timestamp())
    }

    fn suffix(self) -> String {
        format!("{:04}_{:02}", self.year, self.month)
    }
}

fn out_of_range(start: Timestamp, end: Timestamp, which: Timestamp) -> PartitionError {
    PartitionError::Range {
        start,
        end,
        reason: format!("timestamp {which} is outside the supported calendar range"),
    }
}

/// Partitions covering `[floor_to_month(start), ceil_to_month(end))`,
/// ordered by month, then by table.
///
/// An empty window after widening yields no partitions.
pub fn compute_partitions(
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<PartitionSpec>, PartitionError> {
    let first = YearMonth::containing(start).ok_or_else(|| out_of_range(start, end, start))?;
    let stop = YearMonth::containing(end)
        .ok_or_else(|| out_of_range(start, end, end))?
        .next();

    let mut specs = Vec::new();
    let mut current = first;
    while current < stop {
        for table in BaseTable::ALL {
            let spec = PartitionSpec::new(table, current)
                .ok_or_else(|| out_of_range(start, end, end))?;
            specs.push(spec);
        }
        current = current.next();
    }

    Ok(specs)
}

pub fn emit_creation_statements(specs: &[PartitionSpec]) -> Vec<String> {
    specs.iter().map(PartitionSpec::creation_sql).collect()
}

/// Rejects windows whose end precedes their start. Used where the window
/// comes from a caller rather than from observed data.
pub fn checked_window(
    start: Timestamp,
    end: Timestamp,
) -> Result<(Timestamp, Timestamp), PartitionError> {
    if end < start {
        return Err(PartitionError::Range {
            start,
            end,
            reason: "end precedes start".to_string(),
        });
    }
    Ok((start, end))
}

/// Smallest and largest timestamp of a batch.
pub fn window_for_timestamps<I>(timestamps: I) -> Option<(Timestamp, Timestamp)>
where
    I: IntoIterator<Item = Timestamp>,
{
    timestamps.into_iter().fold(None, |acc, ts| match acc {
        None => Some((ts, ts)),
        Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
    })
}

/// Compares the bound of an existing relation against the spec. `found` is
/// `None` when a relation with the partition's name exists but is not a
/// partition.
pub fn verify_partition_bound(
    spec: &PartitionSpec,
    found: Option<&str>,
) -> Result<(), PartitionError> {
    let expected = spec.expected_bound();
    let matches = found.map(|bound| normalize_bound(bound) == normalize_bound(&expected));

    match matches {
        Some(true) => Ok(()),
        _ => Err(PartitionError::Conflict {
            partition: spec.name(),
            expected,
            found: found.unwrap_or("<not a partition>").to_string(),
        }),
    }
}

fn normalize_bound(bound: &str) -> String {
    bound
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\'', "")
}
