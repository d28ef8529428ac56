mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
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

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("chat-ping.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    init_pool(&pool).await?;
    Ok(pool)
}

/// Connect to an in-memory database. Test use only.
pub async fn init_in_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_pool(&pool).await?;
    Ok(pool)
}

async fn init_pool(pool: &SqlitePool) -> Result<()> {
    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    run_migrations(pool).await?;

    info!("Database initialized successfully");
    Ok(())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Initial schema
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Users and sessions
    execute_sql(pool, include_str!("../../migrations/002_users.sql")).await?;

    // Migration 003: Classes and enrollments
    let has_classes_table: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='classes'")
            .fetch_optional(pool)
            .await?;
    if has_classes_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/003_classes.sql")).await?;
    }

    // Migration 004: QR attendance sessions
    let has_sessions_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='attendance_sessions'",
    )
    .fetch_optional(pool)
    .await?;
    if has_sessions_table.is_none() {
        execute_sql(
            pool,
            include_str!("../../migrations/004_attendance_sessions.sql"),
        )
        .await?;
    }

    info!("Migrations completed");
    Ok(())
}
