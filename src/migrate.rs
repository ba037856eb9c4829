use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Raw captured evidence, written by the gateway
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence (
            id TEXT PRIMARY KEY,
            metadata_id TEXT NOT NULL,
            href TEXT NOT NULL,
            public_key TEXT NOT NULL,
            client_time INTEGER NOT NULL,
            saving_time INTEGER NOT NULL,
            html TEXT NOT NULL,
            size INTEGER NOT NULL,
            selector TEXT NOT NULL,
            incremental INTEGER NOT NULL DEFAULT 0,
            packet INTEGER NOT NULL,
            is_product INTEGER NOT NULL DEFAULT 0,
            tag TEXT,
            processed INTEGER,
            url_shape TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // One merged document per capture session
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            id TEXT PRIMARY KEY,
            public_key TEXT NOT NULL,
            href TEXT NOT NULL,
            url_shape TEXT NOT NULL,
            query TEXT,
            selector TEXT NOT NULL,
            client_time INTEGER NOT NULL,
            saving_time INTEGER NOT NULL,
            fields_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            public_key TEXT PRIMARY KEY,
            creation_time INTEGER NOT NULL,
            pseudonym TEXT NOT NULL,
            tag TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidence_cursor ON evidence(saving_time, id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidence_metadata_id ON evidence(metadata_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metadata_owner ON metadata(public_key, saving_time DESC)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
