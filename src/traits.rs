use crate::model::{NormalizedRecord, RawRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Record {0} carries no metadata block")]
    MissingMetadata(String),
    #[error("Record {identifier} has malformed metadata: {reason}")]
    Malformed { identifier: String, reason: String },
    #[error("Unknown metadata format: {0}")]
    UnknownFormat(String),
}

/// Metadata schemas a source can expose records in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataFormatKind {
    /// Flat Dublin Core (`oai_dc`).
    #[serde(rename = "oai_dc")]
    DublinCore,
    /// MARC21 slim XML (`marc21`).
    #[serde(rename = "marc21")]
    Marc21,
}

impl MetadataFormatKind {
    /// The `metadataPrefix` sent to the endpoint.
    pub fn metadata_prefix(&self) -> &'static str {
        match self {
            MetadataFormatKind::DublinCore => "oai_dc",
            MetadataFormatKind::Marc21 => "marc21",
        }
    }
}

impl fmt::Display for MetadataFormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metadata_prefix())
    }
}

impl FromStr for MetadataFormatKind {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oai_dc" => Ok(MetadataFormatKind::DublinCore),
            "marc21" => Ok(MetadataFormatKind::Marc21),
            other => Err(ExtractionError::UnknownFormat(other.to_string())),
        }
    }
}

pub trait MetadataFormat: Send + Sync {
    /// Returns the schema this extractor handles.
    fn kind(&self) -> MetadataFormatKind;

    /// Converts one raw record into the canonical field model.
    fn extract(&self, record: &RawRecord) -> Result<NormalizedRecord, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_kind_round_trips_through_prefix() {
        for kind in [MetadataFormatKind::DublinCore, MetadataFormatKind::Marc21] {
            assert_eq!(kind.metadata_prefix().parse::<MetadataFormatKind>(), Ok(kind));
        }
        assert_eq!(
            "mods".parse::<MetadataFormatKind>(),
            Err(ExtractionError::UnknownFormat("mods".to_string()))
        );
    }

    #[test]
    fn test_format_kind_deserializes_from_prefix() {
        let kind: MetadataFormatKind = serde_json::from_str(r#""marc21""#).unwrap();
        assert_eq!(kind, MetadataFormatKind::Marc21);
    }
}
