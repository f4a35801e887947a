//! Statistics Snapshot Module
//!
//! The heart of statdiff - detecting what changed in the database.
//! This module provides:
//! - Statistics snapshots (point-in-time captures of table counters)
//! - Snapshot storage keyed by correlation key
//! - The diff engine comparing two snapshots
//! - Row-level refinement for tables with inserts or updates

pub mod diff;
pub mod refine;
pub mod store;

pub use diff::{DataDiff, Diff, DiffEngine, DiffValue};
pub use refine::Refiner;
pub use store::SnapshotStore;

use crate::error::AppError;
use crate::stats::{StatRow, StatSource};
use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Raw statistics of one table, carried opaquely apart from the counters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableStat(StatRow);

impl TableStat {
    pub fn new(fields: StatRow) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Integer value of a counter field
    pub fn counter(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    /// Fields in source order
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Point-in-time capture of per-table statistics.
///
/// Immutable once built; the JSON form uses `targetTimestamp` and
/// `statistics` as top-level keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "targetTimestamp")]
    captured_at: DateTime<Utc>,
    #[serde(rename = "statistics")]
    tables: IndexMap<String, TableStat>,
}

impl Snapshot {
    pub fn from_parts(captured_at: DateTime<Utc>, tables: IndexMap<String, TableStat>) -> Self {
        Self {
            captured_at,
            tables,
        }
    }

    /// Read current statistics from `source`. The capture instant is taken
    /// before the query, at microsecond precision.
    pub async fn capture<S>(source: &S) -> Result<Self, AppError>
    where
        S: StatSource + ?Sized,
    {
        let captured_at = Utc::now().trunc_subsecs(6);
        let rows = source.table_stats().await?;

        let mut tables = IndexMap::with_capacity(rows.len());
        for row in rows {
            let Some(name) = row.get("relname").and_then(Value::as_str) else {
                warn!("Skipping statistics row without relname");
                continue;
            };
            tables.insert(name.to_string(), TableStat::new(row));
        }

        debug!("Captured statistics for {} tables at {}", tables.len(), captured_at);
        Ok(Self::from_parts(captured_at, tables))
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn tables(&self) -> &IndexMap<String, TableStat> {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableStat> {
        self.tables.get(name)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
