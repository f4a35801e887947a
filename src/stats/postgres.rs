//! PostgreSQL statistics source
//!
//! Reads `pg_stat_user_tables` and `information_schema.columns`, and fetches
//! touched rows as JSON through `to_jsonb`. All values are bound parameters;
//! only quoted identifiers are spliced into SQL.

use super::{StatRow, StatSource};
use crate::config::DatabaseConfig;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Per-table activity counters, one JSON object per table
const TABLE_STATS: &str = r#"
    SELECT to_jsonb(s) AS stat
    FROM pg_stat_user_tables s
    ORDER BY s.relname
"#;

/// Timestamp-family columns of a table
const TIMESTAMP_COLUMNS: &str = r#"
    SELECT c.column_name::text AS column_name
    FROM information_schema.columns c
    WHERE c.table_name = $1
      AND c.data_type LIKE 'timestamp%'
    ORDER BY c.ordinal_position
"#;

/// Statistics source backed by a PostgreSQL connection pool
pub struct PostgresStatSource {
    pool: Pool,
}

impl PostgresStatSource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the pool and verify the server answers
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = create_pool(config)?;

        let client = pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect: {}", e)))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| AppError::Connection(format!("Connection test failed: {}", e)))?;
        drop(client);

        info!(
            "Connected to {} (TLS: {})",
            config.to_display_string(),
            config.require_tls
        );
        Ok(Self::new(pool))
    }
}

/// Create a connection pool, with rustls when the URL asks for TLS
fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));

    if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `SELECT` for rows of `table` touched via any of `columns`. Placeholder
/// `$n` belongs to the n-th column.
pub fn touched_rows_query(table: &str, columns: &[String]) -> String {
    let predicate = columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("t.{} >= ${}::timestamptz", quote_ident(col), i + 1))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!(
        "SELECT to_jsonb(t) AS data FROM {} t WHERE {}",
        quote_ident(table),
        predicate
    )
}

#[async_trait]
impl StatSource for PostgresStatSource {
    async fn table_stats(&self) -> Result<Vec<StatRow>, AppError> {
        let client = self.pool.get().await?;
        let rows = client.query(TABLE_STATS, &[]).await?;

        let stats = rows
            .iter()
            .filter_map(|row| match row.get::<_, Value>("stat") {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect::<Vec<_>>();

        debug!("Read statistics for {} tables", stats.len());
        Ok(stats)
    }

    async fn timestamp_columns(&self, table: &str) -> Result<Vec<String>, AppError> {
        let client = self.pool.get().await?;
        let rows = client.query(TIMESTAMP_COLUMNS, &[&table]).await?;

        Ok(rows.iter().map(|row| row.get("column_name")).collect())
    }

    async fn rows_touched_since(
        &self,
        table: &str,
        columns: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>, AppError> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let sql = touched_rows_query(table, columns);
        let params: Vec<&(dyn ToSql + Sync)> = columns
            .iter()
            .map(|_| &since as &(dyn ToSql + Sync))
            .collect();

        debug!(table, %since, "{}", sql);

        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &params).await?;

        Ok(rows.iter().map(|row| row.get::<_, Value>("data")).collect())
    }
}
