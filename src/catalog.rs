//! Counter and lifecycle-column catalog
//!
//! Which `pg_stat_user_tables` counters are compared, what they are called in
//! the diff, which of them justify a row-level lookup, and which timestamp
//! column names are trusted as lifecycle markers. Loaded once at startup and
//! never mutated afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a single raw statistics column takes part in the diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CounterSpec {
    /// Key used for the delta in the diff output
    pub display_name: String,
    /// A change of this counter marks the table dirty
    #[serde(default)]
    pub triggers_row_diff: bool,
    /// Disabled counters are carried in the snapshot but never compared
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl CounterSpec {
    fn new(display_name: &str, triggers_row_diff: bool, enabled: bool) -> Self {
        Self {
            display_name: display_name.to_string(),
            triggers_row_diff,
            enabled,
        }
    }
}

/// Configuration table for the diff engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CounterCatalog {
    /// Raw statistics column -> counter spec
    pub counters: IndexMap<String, CounterSpec>,
    /// Recognized lifecycle timestamp columns, in predicate order
    pub lifecycle_columns: Vec<String>,
}

impl Default for CounterCatalog {
    fn default() -> Self {
        let mut counters = IndexMap::new();
        counters.insert("n_tup_ins".to_string(), CounterSpec::new("insert_count", true, true));
        counters.insert("n_tup_upd".to_string(), CounterSpec::new("update_count", true, true));
        counters.insert("n_tup_del".to_string(), CounterSpec::new("delete_count", false, true));
        counters.insert(
            "seq_scan".to_string(),
            CounterSpec::new("sequence_scan_count", false, false),
        );
        counters.insert("idx_scan".to_string(), CounterSpec::new("index_scan_count", false, false));

        let lifecycle_columns = [
            "created",
            "created_at",
            "created_on",
            "updated",
            "updated_at",
            "updated_on",
            "modified",
            "modified_at",
            "modified_on",
            "deleted",
            "deleted_at",
            "deleted_on",
            "started",
            "finished",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();

        Self {
            counters,
            lifecycle_columns,
        }
    }
}

impl CounterCatalog {
    /// Spec for a raw column name, only if it is compared at all
    pub fn tracked(&self, raw_name: &str) -> Option<&CounterSpec> {
        self.counters.get(raw_name).filter(|spec| spec.enabled)
    }

    /// Lifecycle columns present in `available`, in catalog order.
    /// Matching is exact and case-sensitive.
    pub fn recognized_columns(&self, available: &[String]) -> Vec<String> {
        self.lifecycle_columns
            .iter()
            .filter(|name| available.iter().any(|col| col == *name))
            .cloned()
            .collect()
    }
}
