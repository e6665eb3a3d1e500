use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Opens the SQLite record store and makes sure its tables exist.
///
/// In-memory URLs get a single connection so every caller sees the same database.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    info!("Opening record store at {database_url}");

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?
    };

    init_tables(&pool).await?;

    info!("Record store ready");
    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            document_id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            document_id TEXT NOT NULL,
            dimension TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (document_id, dimension)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            phase TEXT NOT NULL,
            dataset_version TEXT NOT NULL,
            document_count INTEGER NOT NULL,
            failed_count INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (phase, dataset_version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Stores created before partial checkpoints existed lack the column.
    let (has_failed_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM pragma_table_info('checkpoints') WHERE name = 'failed_count'",
    )
    .fetch_one(pool)
    .await?;
    if has_failed_count == 0 {
        sqlx::query("ALTER TABLE checkpoints ADD COLUMN failed_count INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vocabularies (
            dimension TEXT PRIMARY KEY,
            dataset_version TEXT NOT NULL,
            sample_size INTEGER NOT NULL,
            labels TEXT NOT NULL,
            discovered_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
