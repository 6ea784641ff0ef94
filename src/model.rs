use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::harvest::xml::XmlElement;

/// Field holding the source hostname, injected before indexing.
pub const HOSTNAME_FIELD: &str = "hostname";
/// Field holding the protocol identifier, injected before indexing.
pub const OAI_IDENTIFIER_FIELD: &str = "oai_pmh_identifier";
pub const IDENTIFIER_FIELD: &str = "identifier";
pub const LANGUAGE_FIELD: &str = "language";

/// One harvested item as returned by the listing verb.
///
/// Consumed by an extractor immediately after it is fetched.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub identifier: String,
    pub deleted: bool,
    pub datestamp: Option<String>,
    pub set_specs: Vec<String>,
    /// `<metadata>` wrapper elements, normally exactly one.
    pub metadata: Vec<XmlElement>,
}

/// Canonical field name → ordered values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    fields: BTreeMap<String, Vec<String>>,
}

impl NormalizedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for `field`, or `None` when the field is absent.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// Appends one value, creating the field if needed.
    pub fn push(&mut self, field: &str, value: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(value.into());
    }

    /// Ensures `field` is present, possibly with no values.
    pub fn ensure_field(&mut self, field: &str) {
        self.fields.entry(field.to_string()).or_default();
    }

    /// Replaces all values of `field`.
    pub fn set(&mut self, field: &str, values: Vec<String>) {
        self.fields.insert(field.to_string(), values);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<String>)> for NormalizedRecord {
    fn from_iter<I: IntoIterator<Item = (K, Vec<String>)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_as_plain_object() {
        let mut record = NormalizedRecord::new();
        record.push("title", "Dune");
        record.push("creator", "Herbert, Frank");
        record.ensure_field("subject");

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"creator":["Herbert, Frank"],"subject":[],"title":["Dune"]}"#
        );

        let back: NormalizedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_absent_field_differs_from_empty_field() {
        let mut record = NormalizedRecord::new();
        record.ensure_field("subject");
        assert_eq!(record.get("subject"), Some(&[][..]));
        assert_eq!(record.get("title"), None);
    }
}
