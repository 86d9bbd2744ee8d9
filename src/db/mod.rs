mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

/// Open a pool against `url` and bring the schema up to date.
///
/// In-memory databases must use a single connection, otherwise every
/// connection sees its own empty database.
pub async fn connect(url: &str, max_connections: u32) -> Result<DbPool> {
    info!("Initializing database at {}", url);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .idle_timeout(None)
        .max_lifetime(None)
        .connect(url)
        .await?;

    if !url.contains(":memory:") {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
    }
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Profiles, directory, calendar and site content
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Commission payments and their action history
    execute_sql(pool, include_str!("../../migrations/002_payments.sql")).await?;

    // Migration 003: Invitations, metrics, match events, admin audit logs
    execute_sql(
        pool,
        include_str!("../../migrations/003_onboarding_and_tracking.sql"),
    )
    .await?;

    // Migration 004: At most one completion per notification stage
    execute_sql(pool, include_str!("../../migrations/004_payment_stage_once.sql")).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    connect("sqlite::memory:", 1)
        .await
        .expect("in-memory database")
}
