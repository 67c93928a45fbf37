//! PostgreSQL-backed storage.
//!
//! One table of opaque byte values keyed by path. The schema is created on
//! connect when missing.

use super::{immediate_children, Storage};
use crate::config::StorageConfig;
use crate::errors::{ApprovalError, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS approved_secrets_kv (
    key TEXT PRIMARY KEY,
    value BYTEA NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %sanitize_url(&config.url), "Failed to create database pool");
                ApprovalError::storage_with_source(
                    format!("Failed to connect to database: {}", sanitize_url(&config.url)),
                    Box::new(e),
                )
            })?;

        let storage = Self::from_pool(pool);
        storage.ensure_schema().await?;

        tracing::info!(
            database_type = "postgresql",
            max_connections = config.max_connections,
            "Database pool created"
        );
        Ok(storage)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM approved_secrets_kv WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<Vec<u8>, _>("value")?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        sqlx::query(
            "INSERT INTO approved_secrets_kv (key, value, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT key FROM approved_secrets_kv WHERE left(key, length($1)) = $1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        let keys = rows
            .iter()
            .map(|row| row.try_get::<String, _>("key"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(immediate_children(prefix, keys.iter().map(String::as_str)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM approved_secrets_kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Strip credentials from a connection URL before logging it
fn sanitize_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_url_hides_credentials() {
        assert_eq!(
            sanitize_url("postgresql://user:pw@localhost:5432/db"),
            "postgresql://***@localhost:5432/db"
        );
        assert_eq!(sanitize_url("postgresql://localhost/db"), "postgresql://localhost/db");
    }
}
