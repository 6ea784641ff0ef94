//! Harvest module - OAI-PMH listing, metadata extraction and indexing runs.
//!
//! This module provides the write path of the system:
//! - **Traits**: [`RecordSource`] for the listing transport
//! - **Client**: the HTTP implementation via [`oai::OaiClient`]
//! - **Formats**: extractors for `oai_dc` and `marc21` records
//! - **Pipeline**: page-by-page harvest runs via [`pipeline::HarvestPipeline`]

pub mod formats;
pub mod oai;
pub mod pipeline;
pub mod traits;
pub mod xml;

// Re-export commonly used types
pub use traits::{
    HarvestRequest, ListCursor, ListOutcome, ProtocolError, RecordPage, RecordSource, FROM_FORMAT,
};

pub use oai::OaiClient;

pub use pipeline::{
    hostname_of, HarvestPipeline, HarvestReport, HarvestStats, PipelineError, RecordFailure, RunOutcome,
    SharedWriter,
};
