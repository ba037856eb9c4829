//! Error taxonomy for the ingestion and extraction paths.
//!
//! Storage and I/O seams use `anyhow::Result` throughout the crate; these
//! enums cover the outcomes callers have to branch on.

use thiserror::Error;

/// Reasons a submitted batch is rejected by the gateway.
///
/// Every variant is turned into a `{ "status": "error" }` response at the
/// gateway boundary; none of them escape as a transport-level failure.
#[derive(Debug, Error)]
pub enum IngestError {
    /// One or more required headers were absent. Lists all of them.
    #[error("missing required headers: {}", .missing.join(", "))]
    HeaderValidation { missing: Vec<String> },

    #[error("Signature does not match request body")]
    Signature,

    #[error("malformed batch body: {0}")]
    MalformedBody(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl IngestError {
    /// Machine-readable `info` payload for the JSON response.
    pub fn info(&self) -> serde_json::Value {
        match self {
            IngestError::HeaderValidation { missing } => serde_json::json!({
                "message": "missing required headers",
                "missing": missing,
            }),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

/// Per-item extraction failure. Always contained by the dispatcher.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    /// The captured markup could not be turned into a document.
    #[error("parse error: {0}")]
    Parse(String),

    /// The extraction variant returned an error or panicked.
    #[error("extraction fault in {extractor}: {message}")]
    Fault { extractor: String, message: String },
}

impl ExtractionError {
    pub fn fault(extractor: &str, message: impl Into<String>) -> Self {
        ExtractionError::Fault {
            extractor: extractor.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_error_names_every_missing_field() {
        let err = IngestError::HeaderValidation {
            missing: vec!["x-capture-build".into(), "x-capture-signature".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("x-capture-build"));
        assert!(msg.contains("x-capture-signature"));
        assert_eq!(err.info()["missing"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn signature_error_info_is_a_string() {
        assert_eq!(
            IngestError::Signature.info(),
            serde_json::json!("Signature does not match request body")
        );
    }
}
