use crate::harvest::xml::XmlElement;
use crate::model::{NormalizedRecord, RawRecord};
use crate::traits::{ExtractionError, MetadataFormat, MetadataFormatKind};

use super::first_metadata_block;

/// One row of the MARC21 mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatafieldRule {
    /// Canonical field the joined text is appended to.
    pub target: &'static str,
    /// MARC datafield tag.
    pub tag: &'static str,
    /// Subfield codes read in this order.
    pub codes: &'static [&'static str],
}

const fn rule(
    target: &'static str,
    tag: &'static str,
    codes: &'static [&'static str],
) -> DatafieldRule {
    DatafieldRule { target, tag, codes }
}

/// Datafield → canonical field mapping. Several rows may feed the same
/// field; their values accumulate in table order.
///
/// 720a covers both authors and contributors, so contributors are folded
/// into `creator`.
pub const MARC21_RULES: &[DatafieldRule] = &[
    rule("coverage", "500", &["a"]),
    rule("creator", "100", &["a"]),
    rule("creator", "720", &["a"]),
    rule("date", "260", &["c"]),
    rule("date", "363", &["i"]),
    rule("date", "264", &["c"]),
    rule("description", "300", &["a", "b", "c", "e"]),
    rule("description", "500", &["a"]),
    rule("description", "520", &["a"]),
    rule("format", "856", &["q"]),
    rule("identifier", "024", &["a"]),
    rule("identifier", "856", &["u"]),
    rule("language", "546", &["a"]),
    rule("language", "041", &["a"]),
    rule("publisher", "260", &["b"]),
    rule("publisher", "264", &["b"]),
    // place + date of publication
    rule("publisher", "264", &["a", "c"]),
    rule("relation", "787", &["n"]),
    rule("rights", "540", &["a"]),
    rule("source", "786", &["n"]),
    rule("subject", "653", &["a"]),
    rule("title", "245", &["a", "b"]),
    rule("title", "246", &["a"]),
    rule("type", "655", &["a"]),
    rule("type", "336", &["a"]),
];

/// MARC21 slim XML extractor driven by a datafield table.
#[derive(Debug, Clone)]
pub struct Marc21Format {
    rules: &'static [DatafieldRule],
}

impl Marc21Format {
    pub fn new() -> Self {
        Self::with_rules(MARC21_RULES)
    }

    pub fn with_rules(rules: &'static [DatafieldRule]) -> Self {
        Self { rules }
    }
}

impl Default for Marc21Format {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataFormat for Marc21Format {
    fn kind(&self) -> MetadataFormatKind {
        MetadataFormatKind::Marc21
    }

    fn extract(&self, record: &RawRecord) -> Result<NormalizedRecord, ExtractionError> {
        let block = first_metadata_block(record)?;
        let datafields = block.descendants_named("datafield");

        let mut out = NormalizedRecord::new();
        for rule in self.rules {
            out.ensure_field(rule.target);
            for field in datafields.iter().filter(|f| f.attr("tag") == Some(rule.tag)) {
                if let Some(joined) = join_subfields(field, rule.codes) {
                    out.push(rule.target, joined);
                }
            }
        }
        Ok(out)
    }
}

/// Joins the texts of the listed subfields with single spaces, codes in
/// table order. `None` when no listed subfield carries text.
fn join_subfields(datafield: &XmlElement, codes: &[&str]) -> Option<String> {
    let subfields = datafield.descendants_named("subfield");
    let parts: Vec<&str> = codes
        .iter()
        .flat_map(|code| {
            subfields
                .iter()
                .filter(move |sf| sf.attr("code") == Some(*code))
                .map(|sf| sf.text.as_str())
        })
        .filter(|text| !text.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}
