//! SQLite pool bootstrap and schema migration.

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Instant};

/// Schema for the `documents` table, embedded at build time.
const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open the metadata pool and verify it answers `SELECT 1`.
///
/// Creates the database file (and its parent directory) when missing.
pub async fn connect(cfg: &DatabaseConfig) -> Result<SqlitePool> {
    let db_path = cfg
        .url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let in_memory = db_path.starts_with(":memory:") || db_path.contains("mode=memory");

    if !in_memory {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&cfg.url)
        .with_context(|| format!("parsing database URL `{}`", cfg.url))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .max_lifetime(cfg.max_lifetime)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", cfg.url))?;

    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&pool)
        .await
        .context("database ping")?;

    Ok(pool)
}

/// Create the schema unless the `documents` table already exists.
pub async fn ensure_migrated(db: &SqlitePool) -> Result<()> {
    let start = Instant::now();

    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
    )
    .fetch_one(db)
    .await
    .context("checking for documents table")?;

    if tables > 0 {
        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "schema already exists, skipping migration"
        );
        return Ok(());
    }

    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for (step, stmt) in statements.iter().enumerate() {
        let step_start = Instant::now();
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("migration step {} failed", step + 1))?;
        tracing::debug!(
            step = step + 1,
            step_duration_ms = step_start.elapsed().as_millis() as u64,
            "migration step applied"
        );
    }

    tracing::info!(
        duration_ms = start.elapsed().as_millis() as u64,
        "Database migration complete."
    );
    Ok(())
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    ensure_migrated(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migration_is_idempotent() {
        let pool = test_pool().await;
        ensure_migrated(&pool).await.unwrap();

        let indexes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'documents' AND name LIKE 'idx_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(indexes, 3);
    }

    #[tokio::test]
    async fn connect_creates_missing_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta").join("documents.db");
        let cfg = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..DatabaseConfig::default()
        };

        let pool = connect(&cfg).await.unwrap();
        ensure_migrated(&pool).await.unwrap();
        assert!(path.exists());
    }
}
