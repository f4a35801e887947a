//! Statistics Diff Engine
//!
//! Compares two statistics snapshots table by table. A table that appears or
//! disappears is a schema change. A table present on both sides is compared
//! counter by counter; when an insert or update counter moved, the rows
//! behind the change are looked up through [`Refiner`].

use super::{Refiner, Snapshot, TableStat};
use crate::catalog::CounterCatalog;
use crate::error::AppError;
use crate::stats::StatSource;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, info};

/// Category key for table added/removed messages
pub const SCHEMA_KEY: &str = "schema";
/// Category key for refined rows
pub const DATA_KEY: &str = "data";

/// Rows attributed to a dirty table
#[derive(Debug, Clone, PartialEq)]
pub enum DataDiff {
    /// Rows touched after the start snapshot (possibly none)
    Rows(Vec<Value>),
    /// The table has no lifecycle column to filter on.
    /// Serialized as `{"dataDiff": []}`.
    NoLifecycleColumns,
}

impl Serialize for DataDiff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DataDiff::Rows(rows) => rows.serialize(serializer),
            DataDiff::NoLifecycleColumns => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("dataDiff", &[] as &[Value])?;
                map.end()
            }
        }
    }
}

/// Payload of one diff category
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DiffValue {
    /// Table created / removed message
    Schema(String),
    /// Signed counter delta, new minus old
    Delta(i64),
    /// Refined rows
    Data(DataDiff),
}

/// Table -> category -> payload, in the order changes were found
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diff {
    tables: IndexMap<String, IndexMap<String, DiffValue>>,
}

impl Diff {
    pub fn add(&mut self, table: &str, key: &str, value: DiffValue) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn tables(&self) -> &IndexMap<String, IndexMap<String, DiffValue>> {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Counter and schema comparison before any row lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub diff: Diff,
    /// Tables whose insert or update counters moved, in discovery order
    pub dirty: Vec<String>,
}

/// The diff engine that compares statistics snapshots
pub struct DiffEngine<'a> {
    catalog: &'a CounterCatalog,
}

impl<'a> DiffEngine<'a> {
    pub fn new(catalog: &'a CounterCatalog) -> Self {
        Self { catalog }
    }

    /// Compare `old` against `new`, then refine dirty tables against the live
    /// `source` using the old capture instant as lower bound
    pub async fn compute<S>(
        &self,
        old: &Snapshot,
        new: &Snapshot,
        source: &S,
    ) -> Result<Diff, AppError>
    where
        S: StatSource + ?Sized,
    {
        let classification = self.classify(old, new);
        self.refine_dirty(classification, old, new, source).await
    }

    /// Attach refined rows to every dirty table of `classification`
    async fn refine_dirty<S>(
        &self,
        classification: Classification,
        old: &Snapshot,
        new: &Snapshot,
        source: &S,
    ) -> Result<Diff, AppError>
    where
        S: StatSource + ?Sized,
    {
        let Classification { mut diff, dirty } = classification;
        let refiner = Refiner::new(self.catalog);

        for table in &dirty {
            if new.table(table).is_none() {
                return Err(AppError::InternalConsistency(format!(
                    "refinement requested for {} which is absent from the new snapshot",
                    table
                )));
            }

            let data = refiner.refine(table, old.captured_at(), source).await?;
            diff.add(table, DATA_KEY, DiffValue::Data(data));
        }

        info!(
            "Diff computed: {} tables changed, {} refined",
            diff.tables().len(),
            dirty.len()
        );
        Ok(diff)
    }

    /// Schema and counter changes only. Pure: the same inputs always give the
    /// same classification.
    pub fn classify(&self, old: &Snapshot, new: &Snapshot) -> Classification {
        let mut diff = Diff::default();
        let mut dirty = Vec::new();

        for (table, old_stat) in old.tables() {
            let Some(new_stat) = new.table(table) else {
                diff.add(
                    table,
                    SCHEMA_KEY,
                    DiffValue::Schema(format!("{} has been removed or renamed.", table)),
                );
                continue;
            };

            if self.diff_counters(table, old_stat, new_stat, &mut diff) {
                dirty.push(table.clone());
            }
        }

        for table in new.tables().keys() {
            if !old.tables().contains_key(table) {
                diff.add(
                    table,
                    SCHEMA_KEY,
                    DiffValue::Schema(format!("{} has been created.", table)),
                );
            }
        }

        Classification { diff, dirty }
    }

    /// Record deltas of tracked counters; true if a row-diff counter moved
    fn diff_counters(
        &self,
        table: &str,
        old_stat: &TableStat,
        new_stat: &TableStat,
        diff: &mut Diff,
    ) -> bool {
        let mut needs_rows = false;

        for (field, old_value) in old_stat.fields() {
            // index-like keys are never counters
            if is_numeric_key(field) {
                continue;
            }
            let Some(spec) = self.catalog.tracked(field) else {
                continue;
            };

            let new_value = new_stat.get(field);
            if new_value == Some(old_value) {
                continue;
            }

            // a missing or non-integer value counts as zero
            let new_count = new_stat.counter(field).unwrap_or(0);
            let old_count = old_value.as_i64().unwrap_or(0);
            let delta = new_count.saturating_sub(old_count);

            debug!("{}.{}: {} -> {} ({:+})", table, field, old_count, new_count, delta);
            diff.add(table, &spec.display_name, DiffValue::Delta(delta));

            if spec.triggers_row_diff {
                needs_rows = true;
            }
        }

        needs_rows
    }
}

fn is_numeric_key(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::fixture::{stat_row, MemoryStatSource};
    use crate::stats::StatRow;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn snapshot_at(at: DateTime<Utc>, rows: Vec<StatRow>) -> Snapshot {
        let tables = rows
            .into_iter()
            .map(|row| {
                let name = row["relname"].as_str().unwrap().to_string();
                (name, TableStat::new(row))
            })
            .collect();
        Snapshot::from_parts(at, tables)
    }

    fn old(rows: Vec<StatRow>) -> Snapshot {
        snapshot_at(t0(), rows)
    }

    fn new(rows: Vec<StatRow>) -> Snapshot {
        snapshot_at(Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap(), rows)
    }

    fn compute(
        old: &Snapshot,
        new: &Snapshot,
        source: &MemoryStatSource,
    ) -> Result<Diff, AppError> {
        let catalog = CounterCatalog::default();
        tokio_test::block_on(DiffEngine::new(&catalog).compute(old, new, source))
    }

    fn as_json(diff: &Diff) -> Value {
        serde_json::to_value(diff).unwrap()
    }

    #[test]
    fn test_unchanged_table_not_reported() {
        let source = MemoryStatSource::new();
        let diff = compute(
            &old(vec![stat_row("orders", 10, 2, 0)]),
            &new(vec![stat_row("orders", 10, 2, 0)]),
            &source,
        )
        .unwrap();

        assert!(diff.is_empty());
        assert_eq!(source.row_query_count(), 0);
    }

    #[test]
    fn test_untracked_fields_ignored() {
        let mut changed = stat_row("orders", 10, 2, 0);
        changed.insert("seq_scan".into(), json!(99));
        changed.insert("n_live_tup".into(), json!(1234));
        changed.insert("last_autovacuum".into(), json!("2024-03-01T12:10:00Z"));

        let diff = compute(
            &old(vec![stat_row("orders", 10, 2, 0)]),
            &new(vec![changed]),
            &MemoryStatSource::new(),
        )
        .unwrap();

        assert!(diff.is_empty());
    }

    #[test]
    fn test_removed_table_only_schema_entry() {
        let diff = compute(
            &old(vec![stat_row("legacy", 10, 2, 0)]),
            &new(vec![]),
            &MemoryStatSource::new(),
        )
        .unwrap();

        assert_eq!(
            as_json(&diff),
            json!({"legacy": {"schema": "legacy has been removed or renamed."}})
        );
    }

    #[test]
    fn test_created_table_only_schema_entry() {
        let diff = compute(
            &old(vec![]),
            &new(vec![stat_row("invoices", 4, 0, 0)]),
            &MemoryStatSource::new(),
        )
        .unwrap();

        assert_eq!(
            as_json(&diff),
            json!({"invoices": {"schema": "invoices has been created."}})
        );
    }

    #[test]
    fn test_insert_with_lifecycle_column_fetches_rows() {
        let source = MemoryStatSource::new().with_table(
            "orders",
            &["created_at"],
            vec![
                json!({"id": 10, "created_at": "2024-02-28T09:00:00Z"}),
                json!({"id": 11, "created_at": "2024-03-01T12:00:00Z"}),
                json!({"id": 12, "created_at": "2024-03-01T12:05:00Z"}),
                json!({"id": 13, "created_at": "2024-03-01T12:50:00Z"}),
            ],
        );

        let diff = compute(
            &old(vec![stat_row("orders", 10, 2, 0)]),
            &new(vec![stat_row("orders", 13, 2, 0)]),
            &source,
        )
        .unwrap();

        assert_eq!(
            as_json(&diff),
            json!({
                "orders": {
                    "insert_count": 3,
                    "data": [
                        {"id": 11, "created_at": "2024-03-01T12:00:00Z"},
                        {"id": 12, "created_at": "2024-03-01T12:05:00Z"},
                        {"id": 13, "created_at": "2024-03-01T12:50:00Z"},
                    ]
                }
            })
        );

        let queries = source.row_queries.lock().unwrap();
        assert_eq!(queries[0].0, "orders");
        assert_eq!(queries[0].2, t0());
    }

    #[test]
    fn test_insert_without_lifecycle_column_gives_marker() {
        let source = MemoryStatSource::new().with_table("tags", &["valid_until"], vec![]);

        let diff = compute(
            &old(vec![stat_row("tags", 1, 0, 0)]),
            &new(vec![stat_row("tags", 2, 0, 0)]),
            &source,
        )
        .unwrap();

        assert_eq!(
            as_json(&diff),
            json!({"tags": {"insert_count": 1, "data": {"dataDiff": []}}})
        );
    }

    #[test]
    fn test_delete_only_has_no_data_entry() {
        let source = MemoryStatSource::new().with_table("orders", &["created_at"], vec![]);

        let diff = compute(
            &old(vec![stat_row("orders", 10, 2, 0)]),
            &new(vec![stat_row("orders", 10, 2, 4)]),
            &source,
        )
        .unwrap();

        assert_eq!(as_json(&diff), json!({"orders": {"delete_count": 4}}));
        assert_eq!(source.row_query_count(), 0);
    }

    #[test]
    fn test_update_triggers_refinement() {
        let source = MemoryStatSource::new().with_table(
            "users",
            &["updated_at"],
            vec![json!({"id": 1, "updated_at": "2024-03-01T12:30:00Z"})],
        );

        let diff = compute(
            &old(vec![stat_row("users", 5, 1, 0)]),
            &new(vec![stat_row("users", 5, 2, 1)]),
            &source,
        )
        .unwrap();

        assert_eq!(
            as_json(&diff),
            json!({
                "users": {
                    "update_count": 1,
                    "delete_count": 1,
                    "data": [{"id": 1, "updated_at": "2024-03-01T12:30:00Z"}]
                }
            })
        );
    }

    #[test]
    fn test_negative_delta_kept() {
        let diff = compute(
            &old(vec![stat_row("orders", 10, 2, 5)]),
            &new(vec![stat_row("orders", 10, 2, 0)]),
            &MemoryStatSource::new(),
        )
        .unwrap();

        assert_eq!(as_json(&diff), json!({"orders": {"delete_count": -5}}));
    }

    #[test]
    fn test_missing_new_counter_counts_as_zero() {
        let mut stripped = stat_row("orders", 10, 2, 3);
        stripped.remove("n_tup_del");

        let diff = compute(
            &old(vec![stat_row("orders", 10, 2, 3)]),
            &new(vec![stripped]),
            &MemoryStatSource::new(),
        )
        .unwrap();

        assert_eq!(as_json(&diff), json!({"orders": {"delete_count": -3}}));
    }

    #[test]
    fn test_numeric_keys_skipped_even_if_cataloged() {
        let mut catalog = CounterCatalog::default();
        catalog.counters.insert(
            "0".to_string(),
            crate::catalog::CounterSpec {
                display_name: "zero".to_string(),
                triggers_row_diff: true,
                enabled: true,
            },
        );

        let mut before = stat_row("orders", 1, 0, 0);
        before.insert("0".into(), json!(1));
        let mut after = stat_row("orders", 1, 0, 0);
        after.insert("0".into(), json!(2));

        let classification =
            DiffEngine::new(&catalog).classify(&old(vec![before]), &new(vec![after]));
        assert!(classification.diff.is_empty());
        assert!(classification.dirty.is_empty());
    }

    #[test]
    fn test_enabled_scan_counter_never_dirty() {
        let mut catalog = CounterCatalog::default();
        catalog.counters.get_mut("seq_scan").unwrap().enabled = true;

        let mut after = stat_row("orders", 10, 2, 0);
        after.insert("seq_scan".into(), json!(8));

        let classification = DiffEngine::new(&catalog).classify(
            &old(vec![stat_row("orders", 10, 2, 0)]),
            &new(vec![after]),
        );

        assert_eq!(
            as_json(&classification.diff),
            json!({"orders": {"sequence_scan_count": 7}})
        );
        assert!(classification.dirty.is_empty());
    }

    #[test]
    fn test_table_order_old_then_created() {
        let diff = compute(
            &old(vec![stat_row("b", 1, 0, 0), stat_row("a", 1, 0, 0)]),
            &new(vec![stat_row("c", 0, 0, 0), stat_row("a", 1, 0, 1)]),
            &MemoryStatSource::new(),
        )
        .unwrap();

        assert_eq!(diff.tables().keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let catalog = CounterCatalog::default();
        let engine = DiffEngine::new(&catalog);
        let before = old(vec![stat_row("orders", 10, 2, 0), stat_row("legacy", 1, 1, 1)]);
        let after = new(vec![stat_row("orders", 13, 5, 1), stat_row("fresh", 0, 0, 0)]);

        let first = serde_json::to_vec(&engine.classify(&before, &after).diff).unwrap();
        let second = serde_json::to_vec(&engine.classify(&before, &after).diff).unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.classify(&before, &after).dirty, vec!["orders".to_string()]);
    }

    #[test]
    fn test_refinement_failure_aborts_diff() {
        struct Broken;

        #[async_trait::async_trait]
        impl StatSource for Broken {
            async fn table_stats(&self) -> Result<Vec<StatRow>, AppError> {
                Ok(vec![])
            }
            async fn timestamp_columns(&self, _table: &str) -> Result<Vec<String>, AppError> {
                Err(AppError::Connection("server closed the connection".to_string()))
            }
            async fn rows_touched_since(
                &self,
                _table: &str,
                _columns: &[String],
                _since: DateTime<Utc>,
            ) -> Result<Vec<Value>, AppError> {
                Ok(vec![])
            }
        }

        let catalog = CounterCatalog::default();
        let err = tokio_test::block_on(DiffEngine::new(&catalog).compute(
            &old(vec![stat_row("orders", 1, 0, 0)]),
            &new(vec![stat_row("orders", 2, 0, 0)]),
            &Broken,
        ))
        .unwrap_err();

        assert_eq!(err.code(), "DATA_SOURCE_ERROR");
    }

    #[test]
    fn test_dirty_table_missing_from_new_snapshot_is_inconsistent() {
        let catalog = CounterCatalog::default();
        let engine = DiffEngine::new(&catalog);
        let before = old(vec![stat_row("orders", 1, 0, 0)]);
        let after = new(vec![]);
        let source = MemoryStatSource::new();

        let classification = Classification {
            diff: Diff::default(),
            dirty: vec!["orders".to_string()],
        };
        let refined = engine.refine_dirty(classification, &before, &after, &source);
        let err = tokio_test::block_on(refined).unwrap_err();

        assert!(matches!(err, AppError::InternalConsistency(_)));
        assert_eq!(err.code(), "INTERNAL_CONSISTENCY_ERROR");
        assert_eq!(source.row_query_count(), 0);
    }
}
