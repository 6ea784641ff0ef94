//! Core traits and types for the harvest protocol.
//!
//! This module defines the seam between the harvest pipeline and the
//! metadata-exchange endpoint:
//! - The listing transport via [`RecordSource`]
//! - Listing state via [`ListCursor`]
//! - Explicit listing results via [`ListOutcome`]
//! - Standardized protocol errors via [`ProtocolError`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::RawRecord;
use crate::traits::MetadataFormatKind;

// ============================================================================
// Requests
// ============================================================================

/// Timestamp format for the incremental `from` bound.
pub const FROM_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parameters of one harvest run against one endpoint.
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    /// Base URL of the endpoint (without query string)
    pub endpoint: String,

    /// Schema the records are requested in
    pub metadata_format: MetadataFormatKind,

    /// Lower bound for incremental harvesting
    pub from: Option<DateTime<Utc>>,

    /// Named subset (`set`) selector
    pub set: Option<String>,
}

impl HarvestRequest {
    pub fn new(endpoint: impl Into<String>, metadata_format: MetadataFormatKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            metadata_format,
            from: None,
            set: None,
        }
    }

    pub fn with_from(mut self, from: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self
    }

    pub fn with_set(mut self, set: Option<String>) -> Self {
        self.set = set.filter(|s| !s.is_empty());
        self
    }

    /// The cursor for the first listing call of this run.
    pub fn start_cursor(&self) -> ListCursor {
        ListCursor::Start {
            metadata_prefix: self.metadata_format.metadata_prefix().to_string(),
            from: self.from.map(|ts| ts.format(FROM_FORMAT).to_string()),
            set: self.set.clone(),
        }
    }
}

/// Position within a record listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListCursor {
    /// First request of a run.
    Start {
        metadata_prefix: String,
        from: Option<String>,
        set: Option<String>,
    },

    /// Follow-up request carrying the endpoint's resumption token.
    Resume(String),
}

impl ListCursor {
    /// Query parameters for this position, `verb` first.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("verb", "ListRecords".to_string())];
        match self {
            ListCursor::Start {
                metadata_prefix,
                from,
                set,
            } => {
                pairs.push(("metadataPrefix", metadata_prefix.clone()));
                if let Some(from) = from {
                    pairs.push(("from", from.clone()));
                }
                if let Some(set) = set {
                    pairs.push(("set", set.clone()));
                }
            }
            ListCursor::Resume(token) => pairs.push(("resumptionToken", token.clone())),
        }
        pairs
    }

    pub fn is_start(&self) -> bool {
        matches!(self, ListCursor::Start { .. })
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// One page of listed records.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    /// Records in the order the endpoint returned them
    pub records: Vec<RawRecord>,

    /// Token for the next page; `None` when the listing is complete
    pub resumption_token: Option<String>,
}

/// Result of one listing call.
///
/// "No records match" is an ordinary outcome, not an error, so callers
/// inspect the variant instead of matching on error kinds.
#[derive(Debug)]
pub enum ListOutcome {
    /// The endpoint has no records for the request.
    Empty,

    /// A page of records.
    Page(RecordPage),

    /// Transport or protocol failure.
    Failed(ProtocolError),
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Transport for the record-listing verb.
///
/// Implementations perform one request per call and never retry. The
/// pipeline owns the resumption loop.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: one source instance is shared by
/// every concurrent harvest of the executor.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetches the page at `cursor` from `endpoint`.
    async fn list_records(&self, endpoint: &str, cursor: &ListCursor) -> ListOutcome;

    /// Returns a human-readable name for this source (used in logs).
    fn source_name(&self) -> &'static str;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that end a listing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Network-level failure (DNS, connect, TLS, body read)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Endpoint answered with a non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Endpoint answered with a protocol-level `<error>`
    #[error("OAI-PMH error {code}: {message}")]
    Oai { code: String, message: String },

    /// Response body is not a well-formed listing
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Listing call exceeded the configured timeout
    #[error("Listing timed out after {0}s")]
    Timeout(u64),

    /// Endpoint URL cannot be used
    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_start_cursor_carries_optional_arguments() {
        let from = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        let request = HarvestRequest::new("https://example.org/oai", MetadataFormatKind::Marc21)
            .with_from(Some(from))
            .with_set(Some("books".to_string()));

        assert_eq!(
            request.start_cursor().query_pairs(),
            vec![
                ("verb", "ListRecords".to_string()),
                ("metadataPrefix", "marc21".to_string()),
                ("from", "2023-04-05T06:07:08Z".to_string()),
                ("set", "books".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_set_is_dropped() {
        let request = HarvestRequest::new("https://example.org/oai", MetadataFormatKind::DublinCore)
            .with_set(Some(String::new()));
        assert_eq!(
            request.start_cursor().query_pairs(),
            vec![
                ("verb", "ListRecords".to_string()),
                ("metadataPrefix", "oai_dc".to_string()),
            ]
        );
    }

    #[test]
    fn test_resume_cursor_sends_only_token() {
        let cursor = ListCursor::Resume("abc|100".to_string());
        assert!(!cursor.is_start());
        assert_eq!(
            cursor.query_pairs(),
            vec![
                ("verb", "ListRecords".to_string()),
                ("resumptionToken", "abc|100".to_string()),
            ]
        );
    }
}
