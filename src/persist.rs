//! Persistence consistency for scheduler results.
//!
//! All scheduler writes go through one [`Committer`], which holds a write
//! lock for the duration of each apply. Results are applied one at a time,
//! in page order, so packets sharing a `metadata_id` merge in the order they
//! were received and never race each other.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::models::{Evidence, Metadata};
use crate::store::Store;

/// Counters for one batch of applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub upserted: usize,
    pub write_errors: usize,
}

/// Serialized write path for evidence updates and metadata upserts.
pub struct Committer {
    store: Arc<dyn Store>,
    write_lock: Mutex<()>,
}

impl Committer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Marks `evidence` processed and merges its metadata, if any.
    ///
    /// `processed` becomes `true` when `metadata` is present and `false`
    /// otherwise. The metadata document is only touched when its stamped id
    /// matches the evidence's `metadata_id`. Returns whether it was upserted.
    pub async fn apply_extraction(
        &self,
        evidence: &Evidence,
        metadata: Option<&Metadata>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut updated = evidence.clone();
        updated.processed = Some(metadata.is_some());
        self.store.update_evidence(&updated).await?;

        match metadata {
            Some(m) if m.id == evidence.metadata_id => {
                self.store.upsert_metadata(m).await?;
                Ok(true)
            }
            Some(m) => {
                warn!(
                    evidence = %evidence.id,
                    metadata = %m.id,
                    expected = %evidence.metadata_id,
                    "metadata id mismatch, not upserting"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Applies results strictly in order, continuing past failed writes.
    pub async fn apply_all(&self, results: &[(Evidence, Option<Metadata>)]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (evidence, metadata) in results {
            match self.apply_extraction(evidence, metadata.as_ref()).await {
                Ok(upserted) => {
                    report.applied += 1;
                    if upserted {
                        report.upserted += 1;
                    }
                }
                Err(err) => {
                    report.write_errors += 1;
                    error!(evidence = %evidence.id, error = %err, "failed to apply extraction");
                }
            }
        }
        report
    }
}
