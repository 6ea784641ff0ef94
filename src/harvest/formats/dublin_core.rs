use crate::model::{NormalizedRecord, RawRecord};
use crate::traits::{ExtractionError, MetadataFormat, MetadataFormatKind};

use super::first_metadata_block;

/// Flat Dublin Core extractor.
///
/// `oai_dc` elements already use the canonical field names (`title`,
/// `creator`, `subject`, ...), so every non-empty leaf element of the
/// `<oai_dc:dc>` container becomes one value under its local name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DublinCoreFormat;

impl MetadataFormat for DublinCoreFormat {
    fn kind(&self) -> MetadataFormatKind {
        MetadataFormatKind::DublinCore
    }

    fn extract(&self, record: &RawRecord) -> Result<NormalizedRecord, ExtractionError> {
        let block = first_metadata_block(record)?;
        let container = block
            .children
            .first()
            .ok_or_else(|| ExtractionError::Malformed {
                identifier: record.identifier.clone(),
                reason: "metadata block is empty".to_string(),
            })?;

        let mut out = NormalizedRecord::new();
        for leaf in container.leaves() {
            if !leaf.text.is_empty() {
                out.push(&leaf.name, leaf.text.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::xml::parse_document;

    fn record_with(metadata_xml: &str) -> RawRecord {
        RawRecord {
            identifier: "oai:example.org:1".to_string(),
            deleted: false,
            datestamp: None,
            set_specs: vec![],
            metadata: vec![parse_document(metadata_xml).unwrap()],
        }
    }

    #[test]
    fn test_passthrough_keeps_names_and_order() {
        let record = record_with(
            r#"<metadata><oai_dc:dc xmlns:oai_dc="x" xmlns:dc="y">
                <dc:title>On Liberty</dc:title>
                <dc:creator>Mill, John Stuart</dc:creator>
                <dc:subject>Philosophy</dc:subject>
                <dc:subject>Politics</dc:subject>
                <dc:description/>
                <dc:identifier>https://example.org/item/1</dc:identifier>
            </oai_dc:dc></metadata>"#,
        );
        let out = DublinCoreFormat.extract(&record).unwrap();
        assert_eq!(out.get("title"), Some(&["On Liberty".to_string()][..]));
        assert_eq!(
            out.get("subject"),
            Some(&["Philosophy".to_string(), "Politics".to_string()][..])
        );
        assert_eq!(out.get("description"), None);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_missing_metadata_is_an_error() {
        let mut record = record_with("<metadata/>");
        assert!(matches!(
            DublinCoreFormat.extract(&record),
            Err(ExtractionError::Malformed { .. })
        ));
        record.metadata.clear();
        assert_eq!(
            DublinCoreFormat.extract(&record),
            Err(ExtractionError::MissingMetadata("oai:example.org:1".to_string()))
        );
    }
}
