//! Extractor dispatch.
//!
//! Evidence is routed to an [`Extractor`] by the pair
//! `(selector, url shape)`. The table is explicit: a pair nobody registered
//! resolves to a skip, never to a default branch.
//!
//! ```text
//! evidence ─▶ classify_url ─▶ resolve(selector, shape) ─┬─▶ none        → Skipped
//!                                                        └─▶ extractor ─┬─▶ Ok(None)     → Skipped
//!                                                                       ├─▶ Ok(Some(v))  → Extracted
//!                                                                       └─▶ Err / panic  → Failed
//! ```
//!
//! Faults never leave [`ExtractorRegistry::dispatch`]: errors and panics
//! raised inside a variant are converted to [`Dispatch::Failed`].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use scraper::Html;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::ExtractionError;
use crate::models::{Evidence, Metadata, UrlShape};

/// An extraction variant: a pure function from a parsed document to fields.
///
/// Returning `Ok(None)` means "nothing worth recording"; returning an empty
/// object or list is a valid, degenerate result that is still stored.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, document: &Html, evidence: &Evidence)
        -> Result<Option<Value>, ExtractionError>;
}

/// Selector half of a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectorKey {
    Exact(String),
    /// Matches any selector for the given shape.
    Any,
}

impl SelectorKey {
    pub fn exact(selector: &str) -> Self {
        SelectorKey::Exact(selector.to_string())
    }
}

/// URL classification computed during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlInfo {
    pub shape: UrlShape,
    /// Canonical href stored on the metadata document.
    pub href: String,
    /// Search terms, for search result pages.
    pub query: Option<String>,
}

/// Classifies a captured URL by its path shape.
///
/// Hrefs that do not parse as absolute URLs are `Other`.
pub fn classify_url(href: &str) -> UrlInfo {
    let other = |shape: UrlShape| UrlInfo {
        shape,
        href: href.to_string(),
        query: None,
    };
    let Ok(url) = Url::parse(href) else {
        return other(UrlShape::Other);
    };

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        ["watch"] => {
            if let Some(id) = query_value(&url, "v").filter(|v| !v.is_empty()) {
                let mut canonical = url.clone();
                canonical.set_fragment(None);
                canonical.query_pairs_mut().clear().append_pair("v", &id);
                return UrlInfo {
                    shape: UrlShape::Video,
                    href: canonical.into(),
                    query: None,
                };
            }
            other(UrlShape::Other)
        }
        ["s"] => match query_value(&url, "k") {
            Some(terms) => UrlInfo {
                shape: UrlShape::Search,
                href: href.to_string(),
                query: Some(terms),
            },
            None => other(UrlShape::Other),
        },
        [] => other(UrlShape::Home),
        segs if segs.contains(&"dp") => other(UrlShape::Product),
        _ => other(UrlShape::Other),
    }
}

/// First value of query parameter `name`, percent-decoded.
pub fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Strips newline-plus-indentation runs left by pretty-printed captures.
fn collapse_indentation(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' && chars.peek() == Some(&' ') {
            while chars.peek() == Some(&' ') {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// DOM-parsing collaborator.
pub fn parse_document(html: &str) -> Result<Html, ExtractionError> {
    let cleaned = collapse_indentation(html);
    if !cleaned.contains('<') {
        return Err(ExtractionError::Parse("no markup in captured element".to_string()));
    }
    Ok(Html::parse_document(&cleaned))
}

/// Result of dispatching one evidence row.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Extracted(Metadata),
    /// Unsupported shape, or the variant found nothing worth recording.
    Skipped,
    Failed(ExtractionError),
}

impl Dispatch {
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Dispatch::Extracted(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_metadata(self) -> Option<Metadata> {
        match self {
            Dispatch::Extracted(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub url: UrlInfo,
    pub outcome: Dispatch,
}

/// Table of extraction capabilities keyed by `(selector, url shape)`.
pub struct ExtractorRegistry {
    entries: HashMap<(SelectorKey, UrlShape), Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in video and shopping variants.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::extractors::register_builtins(&mut registry);
        registry
    }

    /// Register a variant, replacing any previous one under the same key.
    pub fn register(&mut self, selector: SelectorKey, shape: UrlShape, extractor: Box<dyn Extractor>) {
        self.entries.insert((selector, shape), extractor);
    }

    /// Exact selector first, then the shape-wide entry.
    pub fn resolve(&self, selector: &str, shape: UrlShape) -> Option<&dyn Extractor> {
        self.entries
            .get(&(SelectorKey::exact(selector), shape))
            .or_else(|| self.entries.get(&(SelectorKey::Any, shape)))
            .map(|e| e.as_ref())
    }

    /// Registered keys, sorted, for auditing coverage.
    pub fn keys(&self) -> Vec<(String, UrlShape)> {
        let mut keys: Vec<(String, UrlShape)> = self
            .entries
            .keys()
            .map(|(selector, shape)| {
                let s = match selector {
                    SelectorKey::Exact(s) => s.clone(),
                    SelectorKey::Any => "*".to_string(),
                };
                (s, *shape)
            })
            .collect();
        keys.sort_by(|a, b| (a.1.as_str(), &a.0).cmp(&(b.1.as_str(), &b.0)));
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the matching variant for `evidence`, containing every fault.
    pub fn dispatch(&self, evidence: &Evidence) -> DispatchResult {
        let url = classify_url(&evidence.href);

        let Some(extractor) = self.resolve(&evidence.selector, url.shape) else {
            debug!(
                selector = %evidence.selector,
                shape = %url.shape,
                href = %evidence.href,
                "unsupported capture, skipping"
            );
            return DispatchResult {
                url,
                outcome: Dispatch::Skipped,
            };
        };

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            let document = parse_document(&evidence.html)?;
            extractor.extract(&document, evidence)
        }));

        let outcome = match attempt {
            Ok(Ok(Some(fields))) => Dispatch::Extracted(stamp(evidence, &url, fields)),
            Ok(Ok(None)) => Dispatch::Skipped,
            Ok(Err(err)) => Dispatch::Failed(err),
            Err(payload) => Dispatch::Failed(ExtractionError::fault(
                extractor.name(),
                panic_message(payload.as_ref()),
            )),
        };

        DispatchResult { url, outcome }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn stamp(evidence: &Evidence, url: &UrlInfo, fields: Value) -> Metadata {
    Metadata {
        id: evidence.metadata_id.clone(),
        public_key: evidence.public_key.clone(),
        href: url.href.clone(),
        url_shape: url.shape,
        query: url.query.clone(),
        selector: evidence.selector.clone(),
        client_time: evidence.client_time,
        saving_time: evidence.saving_time,
        fields,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
