//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as microseconds since the epoch so that the
//! scheduler cursor can order rows received within the same second.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Account, Evidence, Metadata, UrlShape, WriteResult};

use super::{merge_fields, EvidenceFilter, EvidencePage, ProcessedFilter, Store, StoreStats};

/// SQLite implementation of the [`Store`] trait.
///
/// Wraps a [`SqlitePool`] and maps every `Store` method onto the schema
/// created by [`crate::migrate`] (`evidence`, `metadata`, `accounts`).
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| anyhow!("timestamp out of range: {}", us))
}

fn row_to_evidence(row: &SqliteRow) -> Result<Evidence> {
    let processed: Option<i64> = row.get("processed");
    let url_shape: Option<String> = row.get("url_shape");
    let size: i64 = row.get("size");
    let packet: i64 = row.get("packet");
    let is_product: i64 = row.get("is_product");

    Ok(Evidence {
        id: row.get("id"),
        metadata_id: row.get("metadata_id"),
        href: row.get("href"),
        public_key: row.get("public_key"),
        client_time: from_micros(row.get("client_time"))?,
        saving_time: from_micros(row.get("saving_time"))?,
        html: row.get("html"),
        size: size as usize,
        selector: row.get("selector"),
        incremental: row.get("incremental"),
        packet: packet as usize,
        is_product: is_product != 0,
        tag: row.get("tag"),
        processed: processed.map(|p| p != 0),
        url_shape: url_shape.map(|s| s.parse()).transpose()?,
    })
}

fn row_to_metadata(row: &SqliteRow) -> Result<Metadata> {
    let url_shape: String = row.get("url_shape");
    let fields_json: String = row.get("fields_json");

    Ok(Metadata {
        id: row.get("id"),
        public_key: row.get("public_key"),
        href: row.get("href"),
        url_shape: url_shape.parse::<UrlShape>()?,
        query: row.get("query"),
        selector: row.get("selector"),
        client_time: from_micros(row.get("client_time"))?,
        saving_time: from_micros(row.get("saving_time"))?,
        fields: serde_json::from_str(&fields_json)?,
    })
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    Ok(Account {
        public_key: row.get("public_key"),
        creation_time: from_micros(row.get("creation_time"))?,
        pseudonym: row.get("pseudonym"),
        tag: row.get("tag"),
    })
}

const EVIDENCE_COLUMNS: &str = "id, metadata_id, href, public_key, client_time, saving_time, html, size, \
     selector, incremental, packet, is_product, tag, processed, url_shape";

const METADATA_COLUMNS: &str =
    "id, public_key, href, url_shape, query, selector, client_time, saving_time, fields_json";

#[async_trait]
impl Store for SqliteStore {
    async fn find_account(&self, public_key: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT public_key, creation_time, pseudonym, tag FROM accounts WHERE public_key = ?",
        )
        .bind(public_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn insert_account(&self, account: &Account) -> Result<Account> {
        sqlx::query(
            "INSERT OR IGNORE INTO accounts (public_key, creation_time, pseudonym, tag) VALUES (?, ?, ?, ?)",
        )
        .bind(&account.public_key)
        .bind(to_micros(account.creation_time))
        .bind(&account.pseudonym)
        .bind(&account.tag)
        .execute(&self.pool)
        .await?;

        self.find_account(&account.public_key)
            .await?
            .ok_or_else(|| anyhow!("account vanished after insert: {}", account.public_key))
    }

    async fn write_evidence(&self, batch: &[Evidence]) -> Result<WriteResult> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for e in batch {
            let done = sqlx::query(
                r#"
                INSERT OR IGNORE INTO evidence (id, metadata_id, href, public_key, client_time, saving_time,
                                                html, size, selector, incremental, packet, is_product,
                                                tag, processed, url_shape)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&e.id)
            .bind(&e.metadata_id)
            .bind(&e.href)
            .bind(&e.public_key)
            .bind(to_micros(e.client_time))
            .bind(to_micros(e.saving_time))
            .bind(&e.html)
            .bind(e.size as i64)
            .bind(&e.selector)
            .bind(e.incremental)
            .bind(e.packet as i64)
            .bind(e.is_product as i64)
            .bind(&e.tag)
            .bind(e.processed.map(|p| p as i64))
            .bind(e.url_shape.map(|s| s.as_str()))
            .execute(&mut *tx)
            .await?;
            written += done.rows_affected();
        }

        tx.commit().await?;
        Ok(WriteResult {
            written,
            duplicates: batch.len() as u64 - written,
        })
    }

    async fn read_evidence(&self, filter: &EvidenceFilter, limit: usize) -> Result<EvidencePage> {
        let mut sql = format!("SELECT {} FROM evidence WHERE 1 = 1", EVIDENCE_COLUMNS);
        match (filter.saved_after, &filter.after_id) {
            (Some(_), Some(_)) => sql.push_str(" AND (saving_time > ? OR (saving_time = ? AND id > ?))"),
            (Some(_), None) => sql.push_str(" AND saving_time > ?"),
            (None, _) => {}
        }
        if filter.processed == ProcessedFilter::Unprocessed {
            sql.push_str(" AND processed IS NULL");
        }
        if filter.metadata_id.is_some() {
            sql.push_str(" AND metadata_id = ?");
        }
        sql.push_str(" ORDER BY saving_time ASC, id ASC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(after) = filter.saved_after {
            query = query.bind(to_micros(after));
            if let Some(ref id) = filter.after_id {
                query = query.bind(to_micros(after)).bind(id);
            }
        }
        if let Some(ref id) = filter.metadata_id {
            query = query.bind(id);
        }
        let rows = query
            .bind(limit as i64 + 1)
            .fetch_all(&self.pool)
            .await?;

        let evidence = rows.iter().map(row_to_evidence).collect::<Result<Vec<_>>>()?;
        Ok(EvidencePage::from_overfetch(evidence, limit))
    }

    async fn update_evidence(&self, evidence: &Evidence) -> Result<()> {
        let done = sqlx::query("UPDATE evidence SET processed = ?, url_shape = ? WHERE id = ?")
            .bind(evidence.processed.map(|p| p as i64))
            .bind(evidence.url_shape.map(|s| s.as_str()))
            .bind(&evidence.id)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            anyhow::bail!("evidence not found: {}", evidence.id);
        }
        Ok(())
    }

    async fn upsert_metadata(&self, metadata: &Metadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT fields_json FROM metadata WHERE id = ?")
                .bind(&metadata.id)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some(json) => {
                let mut fields: Value = serde_json::from_str(&json)?;
                merge_fields(&mut fields, metadata.fields.clone());
                sqlx::query("UPDATE metadata SET fields_json = ? WHERE id = ?")
                    .bind(serde_json::to_string(&fields)?)
                    .bind(&metadata.id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO metadata (id, public_key, href, url_shape, query, selector,
                                          client_time, saving_time, fields_json)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&metadata.id)
                .bind(&metadata.public_key)
                .bind(&metadata.href)
                .bind(metadata.url_shape.as_str())
                .bind(&metadata.query)
                .bind(&metadata.selector)
                .bind(to_micros(metadata.client_time))
                .bind(to_micros(metadata.saving_time))
                .bind(serde_json::to_string(&metadata.fields)?)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<Metadata>> {
        let sql = format!("SELECT {} FROM metadata WHERE id = ?", METADATA_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_metadata).transpose()
    }

    async fn metadata_by_owner(
        &self,
        public_key: &str,
        amount: usize,
        skip: usize,
    ) -> Result<Vec<Metadata>> {
        let sql = format!(
            "SELECT {} FROM metadata WHERE public_key = ? ORDER BY saving_time DESC LIMIT ? OFFSET ?",
            METADATA_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(public_key)
            .bind(amount as i64)
            .bind(skip as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_metadata).collect()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS evidence,
                COALESCE(SUM(CASE WHEN processed IS NULL THEN 1 ELSE 0 END), 0) AS unprocessed,
                COALESCE(SUM(CASE WHEN processed = 1 THEN 1 ELSE 0 END), 0) AS processed,
                COALESCE(SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END), 0) AS failed
            FROM evidence
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let metadata: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metadata")
            .fetch_one(&self.pool)
            .await?;
        let accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            evidence: row.get("evidence"),
            unprocessed: row.get("unprocessed"),
            processed: row.get("processed"),
            failed: row.get("failed"),
            metadata,
            accounts,
        })
    }
}
