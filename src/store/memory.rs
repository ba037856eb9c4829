//! In-memory [`Store`] implementation for tests and one-off runs.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Evidence keeps
//! insertion order; reads sort by `saving_time` like the SQLite backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Account, Evidence, Metadata, WriteResult};

use super::{merge_fields, EvidenceFilter, EvidencePage, Store, StoreStats};

/// In-memory store for tests.
pub struct InMemoryStore {
    evidence: RwLock<Vec<Evidence>>,
    metadata: RwLock<HashMap<String, Metadata>>,
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            evidence: RwLock::new(Vec::new()),
            metadata: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of every stored evidence row, in insertion order.
    pub fn evidence(&self) -> Result<Vec<Evidence>> {
        Ok(read(&self.evidence)?.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_account(&self, public_key: &str) -> Result<Option<Account>> {
        Ok(read(&self.accounts)?.get(public_key).cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<Account> {
        let mut accounts = write(&self.accounts)?;
        Ok(accounts
            .entry(account.public_key.clone())
            .or_insert_with(|| account.clone())
            .clone())
    }

    async fn write_evidence(&self, batch: &[Evidence]) -> Result<WriteResult> {
        let mut stored = write(&self.evidence)?;
        let mut result = WriteResult::default();
        for evidence in batch {
            if stored.iter().any(|e| e.id == evidence.id) {
                result.duplicates += 1;
            } else {
                stored.push(evidence.clone());
                result.written += 1;
            }
        }
        Ok(result)
    }

    async fn read_evidence(&self, filter: &EvidenceFilter, limit: usize) -> Result<EvidencePage> {
        let stored = read(&self.evidence)?;
        let mut rows: Vec<Evidence> = stored.iter().filter(|e| filter.matches(e)).cloned().collect();
        rows.sort_by(|a, b| (a.saving_time, &a.id).cmp(&(b.saving_time, &b.id)));
        rows.truncate(limit + 1);
        Ok(EvidencePage::from_overfetch(rows, limit))
    }

    async fn update_evidence(&self, evidence: &Evidence) -> Result<()> {
        let mut stored = write(&self.evidence)?;
        let row = stored
            .iter_mut()
            .find(|e| e.id == evidence.id)
            .ok_or_else(|| anyhow!("evidence not found: {}", evidence.id))?;
        row.processed = evidence.processed;
        row.url_shape = evidence.url_shape;
        Ok(())
    }

    async fn upsert_metadata(&self, metadata: &Metadata) -> Result<()> {
        let mut docs = write(&self.metadata)?;
        match docs.get_mut(&metadata.id) {
            Some(existing) => merge_fields(&mut existing.fields, metadata.fields.clone()),
            None => {
                docs.insert(metadata.id.clone(), metadata.clone());
            }
        }
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<Metadata>> {
        Ok(read(&self.metadata)?.get(id).cloned())
    }

    async fn metadata_by_owner(
        &self,
        public_key: &str,
        amount: usize,
        skip: usize,
    ) -> Result<Vec<Metadata>> {
        let docs = read(&self.metadata)?;
        let mut owned: Vec<Metadata> = docs
            .values()
            .filter(|m| m.public_key == public_key)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.saving_time.cmp(&a.saving_time));
        Ok(owned.into_iter().skip(skip).take(amount).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let evidence = read(&self.evidence)?;
        Ok(StoreStats {
            evidence: evidence.len() as i64,
            unprocessed: evidence.iter().filter(|e| e.processed.is_none()).count() as i64,
            processed: evidence.iter().filter(|e| e.processed == Some(true)).count() as i64,
            failed: evidence.iter().filter(|e| e.processed == Some(false)).count() as i64,
            metadata: read(&self.metadata)?.len() as i64,
            accounts: read(&self.accounts)?.len() as i64,
        })
    }
}
