//! Statistics Source Module
//!
//! Read-only access to the live database: per-table activity counters,
//! timestamp-typed columns of a table, and rows touched after an instant.

pub mod postgres;

#[cfg(test)]
pub mod fixture;

pub use postgres::PostgresStatSource;

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// One row of per-table statistics, column name -> value
pub type StatRow = Map<String, Value>;

/// Port: live statistics and row access (implemented by PostgresStatSource)
#[async_trait]
pub trait StatSource: Send + Sync {
    /// One row per user table; each row carries at least `relname` and the
    /// tracked counters
    async fn table_stats(&self) -> Result<Vec<StatRow>, AppError>;

    /// Names of the columns of `table` whose type is a timestamp type
    async fn timestamp_columns(&self, table: &str) -> Result<Vec<String>, AppError>;

    /// Full rows of `table` where any of `columns` is at or after `since`
    async fn rows_touched_since(
        &self,
        table: &str,
        columns: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>, AppError>;
}
