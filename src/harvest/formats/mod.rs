//! Metadata format implementations.
//!
//! Each module implements [`MetadataFormat`](crate::traits::MetadataFormat)
//! for one schema an OAI-PMH endpoint can serve:
//! - `dublin_core` - flat `oai_dc` records, passed through by element name
//! - `marc21` - MARC21 slim XML, mapped through a fixed datafield table

pub mod dublin_core;
pub mod marc21;

pub use dublin_core::DublinCoreFormat;
pub use marc21::Marc21Format;

use crate::harvest::xml::XmlElement;
use crate::model::RawRecord;
use crate::traits::{ExtractionError, MetadataFormat, MetadataFormatKind};

/// Returns the extractor for a metadata schema.
pub fn for_kind(kind: MetadataFormatKind) -> Box<dyn MetadataFormat> {
    match kind {
        MetadataFormatKind::DublinCore => Box::new(DublinCoreFormat),
        MetadataFormatKind::Marc21 => Box::new(Marc21Format::new()),
    }
}

/// The first `<metadata>` block of a record. Later blocks are ignored.
pub(crate) fn first_metadata_block(record: &RawRecord) -> Result<&XmlElement, ExtractionError> {
    if record.metadata.len() > 1 {
        tracing::debug!(
            identifier = %record.identifier,
            blocks = record.metadata.len(),
            "Record has several metadata blocks, using the first"
        );
    }
    record
        .metadata
        .first()
        .ok_or_else(|| ExtractionError::MissingMetadata(record.identifier.clone()))
}
