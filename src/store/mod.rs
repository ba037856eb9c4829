//! Storage abstraction for Evidence Harness.
//!
//! The [`Store`] trait defines every storage operation the gateway and the
//! scheduler rely on, enabling pluggable backends (SQLite for deployments,
//! in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::{Account, Evidence, Metadata, WriteResult};

/// Which `processed` states an evidence query accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedFilter {
    /// Only rows the scheduler has never looked at.
    Unprocessed,
    /// Any row, regardless of its `processed` flag.
    Any,
}

/// Selection filter for [`Store::read_evidence`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceFilter {
    /// Strict lower bound on `saving_time`.
    pub saved_after: Option<DateTime<Utc>>,
    /// Tie-breaker for `saved_after`: rows stamped exactly `saved_after`
    /// are still selected when their id sorts after this one.
    pub after_id: Option<String>,
    pub processed: ProcessedFilter,
    pub metadata_id: Option<String>,
}

impl EvidenceFilter {
    pub fn matches(&self, evidence: &Evidence) -> bool {
        if let Some(after) = self.saved_after {
            let past = match self.after_id {
                Some(ref id) => (evidence.saving_time, &evidence.id) > (after, id),
                None => evidence.saving_time > after,
            };
            if !past {
                return false;
            }
        }
        if self.processed == ProcessedFilter::Unprocessed && evidence.processed.is_some() {
            return false;
        }
        if let Some(ref id) = self.metadata_id {
            if &evidence.metadata_id != id {
                return false;
            }
        }
        true
    }
}

/// A bounded page of evidence, ordered by `(saving_time, id)` ascending.
#[derive(Debug, Clone, Default)]
pub struct EvidencePage {
    pub rows: Vec<Evidence>,
    /// More matching rows exist beyond this page.
    pub overflow: bool,
}

impl EvidencePage {
    /// Builds a page from a query that fetched up to `limit + 1` rows.
    pub fn from_overfetch(mut rows: Vec<Evidence>, limit: usize) -> Self {
        let overflow = rows.len() > limit;
        rows.truncate(limit);
        Self { rows, overflow }
    }
}

/// Row counts reported by `evd stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub evidence: i64,
    pub unprocessed: i64,
    pub processed: i64,
    pub failed: i64,
    pub metadata: i64,
    pub accounts: i64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_account`](Store::find_account) | Look up an account by public key |
/// | [`insert_account`](Store::insert_account) | Insert an account unless one exists |
/// | [`write_evidence`](Store::write_evidence) | Persist a whole batch in one call |
/// | [`read_evidence`](Store::read_evidence) | Fetch a page of matching evidence |
/// | [`update_evidence`](Store::update_evidence) | Persist scheduler-owned fields |
/// | [`upsert_metadata`](Store::upsert_metadata) | Insert or deep-merge a metadata document |
/// | [`get_metadata`](Store::get_metadata) | Retrieve a metadata document by id |
/// | [`metadata_by_owner`](Store::metadata_by_owner) | Most recent metadata for a key |
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_account(&self, public_key: &str) -> Result<Option<Account>>;

    /// Insert `account` unless the key is already known.
    ///
    /// Returns the stored record, which is the pre-existing one when two
    /// callers race on the same unseen key.
    async fn insert_account(&self, account: &Account) -> Result<Account>;

    /// Persist a batch. Rows whose id already exists are left untouched.
    async fn write_evidence(&self, batch: &[Evidence]) -> Result<WriteResult>;

    /// Fetch at most `limit` matching rows ordered by `saving_time` ascending.
    async fn read_evidence(&self, filter: &EvidenceFilter, limit: usize) -> Result<EvidencePage>;

    /// Write back `processed` and `url_shape` for an existing row.
    async fn update_evidence(&self, evidence: &Evidence) -> Result<()>;

    /// Insert the document, or merge its `fields` into the stored one.
    async fn upsert_metadata(&self, metadata: &Metadata) -> Result<()>;

    async fn get_metadata(&self, id: &str) -> Result<Option<Metadata>>;

    async fn metadata_by_owner(
        &self,
        public_key: &str,
        amount: usize,
        skip: usize,
    ) -> Result<Vec<Metadata>>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Deep-merges `incoming` into `target`.
///
/// Objects merge key by key, arrays gain the elements they do not already
/// contain, `null` never erases a stored value, and any other value replaces
/// the stored one.
pub fn merge_fields(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(stored), Value::Object(update)) => {
            for (key, value) in update {
                match stored.get_mut(&key) {
                    Some(existing) => merge_fields(existing, value),
                    None if value.is_null() => {}
                    None => {
                        stored.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(stored), Value::Array(update)) => {
            for value in update {
                if !stored.contains(&value) {
                    stored.push(value);
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_fields_from_both_sides() {
        let mut stored = json!({ "productName": "Kettle", "sections": [{ "category": "A" }] });
        merge_fields(
            &mut stored,
            json!({ "sections": [{ "category": "B" }], "footer": "f" }),
        );
        assert_eq!(stored["productName"], "Kettle");
        assert_eq!(stored["footer"], "f");
        assert_eq!(
            stored["sections"],
            json!([{ "category": "A" }, { "category": "B" }])
        );
    }

    #[test]
    fn merge_does_not_duplicate_identical_array_entries() {
        let mut stored = json!({ "related": [1, 2] });
        merge_fields(&mut stored, json!({ "related": [2, 3] }));
        assert_eq!(stored["related"], json!([1, 2, 3]));
    }

    #[test]
    fn merge_ignores_null_and_overwrites_scalars() {
        let mut stored = json!({ "title": "old", "views": 1 });
        merge_fields(&mut stored, json!({ "title": null, "views": 2 }));
        assert_eq!(stored, json!({ "title": "old", "views": 2 }));
    }

    #[test]
    fn overfetch_sets_overflow_only_past_limit() {
        let page = EvidencePage::from_overfetch(Vec::new(), 3);
        assert!(!page.overflow);
    }
}
