//! Replication utility for `evd mirror`.
//!
//! Drains the mirror ring of a running gateway and replays each captured
//! batch against another gateway's ingestion endpoint. Batches are replayed
//! one at a time, in capture order, with their original headers and body so
//! the client signature still verifies on the destination.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::gateway::{IngestResponse, MirroredRequest};
use crate::server::{MirrorResponse, HEADER_OPERATOR_KEY};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11000";

/// Headers recomputed by the HTTP client instead of being copied.
const HOP_HEADERS: &[&str] = &["content-length", "host", "transfer-encoding", "connection"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub fetched: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// The captured headers that are forwarded on replay.
pub fn replay_headers(headers: &BTreeMap<String, String>) -> Vec<(&str, &str)> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect()
}

/// Fetches the source ring. The read clears it on the source side.
pub async fn fetch_mirror(
    client: &reqwest::Client,
    source: &str,
    key: &str,
) -> Result<Vec<MirroredRequest>> {
    let url = format!("{}/api/v1/mirror", source.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .header(HEADER_OPERATOR_KEY, key)
        .send()
        .await
        .with_context(|| format!("Failed to reach mirror source {}", source))?;

    if !resp.status().is_success() {
        bail!("Mirror read failed (HTTP {}) from {}", resp.status(), source);
    }

    let body: MirrorResponse = resp.json().await.context("Malformed mirror response")?;
    Ok(body.content)
}

/// Sends one captured batch to `dest` exactly as it was received.
pub async fn replay(
    client: &reqwest::Client,
    dest: &str,
    request: &MirroredRequest,
) -> Result<IngestResponse> {
    let url = format!("{}/api/v2/events", dest.trim_end_matches('/'));
    let mut builder = client.post(&url);
    for (name, value) in replay_headers(&request.headers) {
        builder = builder.header(name, value);
    }

    let resp = builder
        .body(request.body.clone())
        .send()
        .await
        .with_context(|| format!("Failed to replay batch to {}", dest))?;

    if !resp.status().is_success() {
        bail!("Replay failed (HTTP {}) on {}", resp.status(), dest);
    }

    Ok(resp.json().await?)
}

pub async fn mirror_once(
    client: &reqwest::Client,
    source: &str,
    dest: &str,
    key: &str,
) -> Result<MirrorReport> {
    let batches = fetch_mirror(client, source, key).await?;
    let mut report = MirrorReport {
        fetched: batches.len(),
        ..Default::default()
    };

    for batch in &batches {
        match replay(client, dest, batch).await {
            Ok(response) if response.is_ok() => report.accepted += 1,
            Ok(response) => {
                report.rejected += 1;
                warn!(info = ?response.info, "destination rejected a mirrored batch");
            }
            Err(err) => {
                report.rejected += 1;
                warn!(error = %err, "could not replay a mirrored batch");
            }
        }
    }

    info!(
        fetched = report.fetched,
        accepted = report.accepted,
        rejected = report.rejected,
        "mirror pass complete"
    );
    Ok(report)
}

/// CLI entry point.
pub async fn run_mirror(key: &str, source: &str, dest: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let report = mirror_once(&client, source, dest, key).await?;
    println!(
        "Mirrored {} batch(es) from {} to {}: {} accepted, {} rejected",
        report.fetched, source, dest, report.accepted, report.rejected
    );
    Ok(())
}
