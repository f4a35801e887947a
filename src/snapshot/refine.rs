//! Row-level refinement
//!
//! For a table whose insert or update counter moved, look for rows whose
//! lifecycle timestamp columns are at or after the start snapshot. Without a
//! recognized lifecycle column there is nothing to filter on and the result is
//! the empty marker.

use super::diff::DataDiff;
use crate::catalog::CounterCatalog;
use crate::error::AppError;
use crate::stats::StatSource;
use chrono::{DateTime, Utc};
use tracing::debug;

pub struct Refiner<'a> {
    catalog: &'a CounterCatalog,
}

impl<'a> Refiner<'a> {
    pub fn new(catalog: &'a CounterCatalog) -> Self {
        Self { catalog }
    }

    pub async fn refine<S>(
        &self,
        table: &str,
        since: DateTime<Utc>,
        source: &S,
    ) -> Result<DataDiff, AppError>
    where
        S: StatSource + ?Sized,
    {
        let available = source.timestamp_columns(table).await?;
        let columns = self.catalog.recognized_columns(&available);

        if columns.is_empty() {
            debug!(
                "{}: no lifecycle column among {:?}, rows not attributable",
                table, available
            );
            return Ok(DataDiff::NoLifecycleColumns);
        }

        let rows = source.rows_touched_since(table, &columns, since).await?;
        debug!(
            "{}: {} rows touched since {} via {}",
            table,
            rows.len(),
            since,
            columns.join(" OR ")
        );

        Ok(DataDiff::Rows(rows))
    }
}
