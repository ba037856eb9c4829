//! Metadata retrieval by ID for `evd get`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::Metadata;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Fetches one metadata document, failing when it does not exist.
pub async fn get_metadata(config: &Config, id: &str) -> Result<Metadata> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let found = store.get_metadata(id).await;
    pool.close().await;

    match found? {
        Some(doc) => Ok(doc),
        None => bail!("metadata not found: {}", id),
    }
}

/// CLI entry point: prints a summary header and the document as JSON.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let doc = get_metadata(config, id).await?;

    println!("--- Metadata ---");
    println!("id:          {}", doc.id);
    println!("shape:       {}", doc.url_shape);
    println!("href:        {}", doc.href);
    if let Some(ref query) = doc.query {
        println!("query:       {}", query);
    }
    println!("selector:    {}", doc.selector);
    println!("client_time: {}", doc.client_time.to_rfc3339());
    println!("saved:       {}", doc.saving_time.to_rfc3339());
    println!();
    println!("{}", serde_json::to_string_pretty(&doc)?);

    Ok(())
}
