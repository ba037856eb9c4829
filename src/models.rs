//! Core data models used throughout Evidence Harness.
//!
//! These types represent the captured evidence, the structured metadata
//! extracted from it, and the accounts that submit it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One packet of a client batch, as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingPacket {
    /// Captured outer HTML of the selected element.
    pub element: String,
    pub href: String,
    pub selector: String,
    #[serde(rename = "clientTime")]
    pub client_time: DateTime<Utc>,
    /// Random token shared by every packet of one capture session.
    #[serde(rename = "randomUUID")]
    pub random_uuid: String,
    #[serde(default)]
    pub incremental: i64,
}

/// Shape of a captured page, derived from its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlShape {
    Video,
    Product,
    Search,
    Home,
    Other,
}

impl UrlShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlShape::Video => "video",
            UrlShape::Product => "product",
            UrlShape::Search => "search",
            UrlShape::Home => "home",
            UrlShape::Other => "other",
        }
    }
}

impl fmt::Display for UrlShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UrlShape {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(UrlShape::Video),
            "product" => Ok(UrlShape::Product),
            "search" => Ok(UrlShape::Search),
            "home" => Ok(UrlShape::Home),
            "other" => Ok(UrlShape::Other),
            other => anyhow::bail!("unknown url shape: '{}'", other),
        }
    }
}

/// A captured DOM fragment, as persisted by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    pub metadata_id: String,
    pub href: String,
    pub public_key: String,
    pub client_time: DateTime<Utc>,
    /// Server receipt time. The scheduler cursor walks this field.
    pub saving_time: DateTime<Utc>,
    pub html: String,
    pub size: usize,
    pub selector: String,
    pub incremental: i64,
    pub packet: usize,
    pub is_product: bool,
    pub tag: Option<String>,
    /// `None` until the scheduler has looked at the row.
    pub processed: Option<bool>,
    /// Classification stamped by the scheduler at apply time.
    pub url_shape: Option<UrlShape>,
}

/// Structured record extracted from one or more evidence rows.
///
/// `id` is the shared `metadata_id` of the capture session. `fields` holds
/// the extractor output and is deep-merged across sibling packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    pub public_key: String,
    pub href: String,
    pub url_shape: UrlShape,
    pub query: Option<String>,
    pub selector: String,
    pub client_time: DateTime<Utc>,
    pub saving_time: DateTime<Utc>,
    pub fields: serde_json::Value,
}

/// Trust-on-first-use record for a client public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub public_key: String,
    pub creation_time: DateTime<Utc>,
    /// Human-readable name derived from the key.
    pub pseudonym: String,
    pub tag: Option<String>,
}

/// Outcome of a batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub written: u64,
    /// Rows whose id already existed; they are left untouched.
    pub duplicates: u64,
}
