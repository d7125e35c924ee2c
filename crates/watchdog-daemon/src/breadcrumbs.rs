//! SQLite breadcrumb store.
//!
//! Every built-in job leaves one row in `ai_ops_breadcrumbs` per run. The
//! table is created on connect if missing.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use watchdog_scheduler::jobs::BreadcrumbStore;
use watchdog_scheduler::JobError;

use crate::error::DaemonError;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ai_ops_breadcrumbs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_name TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
)
"#;

const CREATE_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_ai_ops_breadcrumbs_job \
    ON ai_ops_breadcrumbs (job_name, created_at)";

pub struct SqliteBreadcrumbStore {
    pool: SqlitePool,
}

impl SqliteBreadcrumbStore {
    /// Open (creating if needed) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, DaemonError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DaemonError::Config(format!("breadcrumb directory: {}", e)))?;
            }
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self::from_pool(pool).await?;
        info!(url = %database_url, "Breadcrumb store ready");
        Ok(store)
    }

    /// Wrap an existing pool, creating the table if missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, DaemonError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;
        sqlx::query(CREATE_INDEX_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl BreadcrumbStore for SqliteBreadcrumbStore {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, JobError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64()),
                },
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| JobError::Backend(format!("database error: {e}")))?;
        Ok(result.rows_affected())
    }
}
