use anyhow::Context;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;

/// Open (or create) the SQLite database at `path`.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .context("create database directory")?;
    }

    let url = format!("sqlite:{}?mode=rwc", path.display());
    SqlitePool::connect(&url)
        .await
        .context("open SQLite database")
}

/// Open an in-memory database (useful for tests).
///
/// Capped at a single connection so every handle sees the same data —
/// each pooled in-memory connection would otherwise get its own database.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("open in-memory SQLite")
}
