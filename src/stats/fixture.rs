//! In-memory statistics source for tests

use super::{StatRow, StatSource};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// A fake database: stats rows, per-table timestamp columns and row data.
/// Records every row query it answers.
#[derive(Default)]
pub struct MemoryStatSource {
    stats: Vec<StatRow>,
    columns: HashMap<String, Vec<String>>,
    rows: HashMap<String, Vec<Value>>,
    fail_stats: bool,
    pub row_queries: Mutex<Vec<(String, Vec<String>, DateTime<Utc>)>>,
}

/// Build a stats row from the three tracked counters
pub fn stat_row(table: &str, ins: i64, upd: i64, del: i64) -> StatRow {
    match json!({
        "relid": 16384,
        "schemaname": "public",
        "relname": table,
        "seq_scan": 1,
        "idx_scan": 0,
        "n_tup_ins": ins,
        "n_tup_upd": upd,
        "n_tup_del": del,
        "n_live_tup": ins - del,
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

impl MemoryStatSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stats(mut self, stats: Vec<StatRow>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_table(mut self, table: &str, columns: &[&str], rows: Vec<Value>) -> Self {
        self.columns.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self.rows.insert(table.to_string(), rows);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_stats: true,
            ..Self::default()
        }
    }

    pub fn row_query_count(&self) -> usize {
        self.row_queries.lock().unwrap().len()
    }
}

#[async_trait]
impl StatSource for MemoryStatSource {
    async fn table_stats(&self) -> Result<Vec<StatRow>, AppError> {
        if self.fail_stats {
            return Err(AppError::Connection("connection refused".to_string()));
        }
        Ok(self.stats.clone())
    }

    async fn timestamp_columns(&self, table: &str) -> Result<Vec<String>, AppError> {
        Ok(self.columns.get(table).cloned().unwrap_or_default())
    }

    /// Mimics the OR-chain: a row matches if any listed column, read as
    /// RFC 3339, is at or after `since`
    async fn rows_touched_since(
        &self,
        table: &str,
        columns: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>, AppError> {
        self.row_queries
            .lock()
            .unwrap()
            .push((table.to_string(), columns.to_vec(), since));

        let rows = self.rows.get(table).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| {
                columns.iter().any(|col| {
                    row.get(col)
                        .and_then(Value::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|ts| ts.with_timezone(&Utc) >= since)
                        .unwrap_or(false)
                })
            })
            .collect())
    }
}
