use std::collections::{BTreeMap, BTreeSet};

use tantivy::schema::Facet;
use tantivy::tokenizer::{PreTokenizedString, Token};
use tantivy::TantivyDocument;

use super::store::IndexFields;
use super::tokenizer::tokenize;

/// Gap left between independently indexed texts so that the last word of
/// one and the first word of the next never form a phrase.
pub const TERMPOS_GAP: u32 = 100;

/// A document as handed to the index engine.
///
/// Boolean terms are matched exactly and carry no positions. Positional
/// terms keep the order and position they were generated with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDocument {
    pub boolean_terms: BTreeSet<String>,
    pub postings: Vec<(String, u32)>,
    pub values: BTreeMap<u32, String>,
    pub data: String,
}

impl IndexDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exact, non-positional term.
    pub fn add_boolean_term(&mut self, term: impl Into<String>) {
        self.boolean_terms.insert(term.into());
    }

    pub fn add_posting(&mut self, term: impl Into<String>, position: u32) {
        self.postings.push((term.into(), position));
    }

    pub fn add_value(&mut self, slot: u32, value: impl Into<String>) {
        self.values.insert(slot, value.into());
    }

    pub fn value(&self, slot: u32) -> Option<&str> {
        self.values.get(&slot).map(String::as_str)
    }

    pub fn set_data(&mut self, data: impl Into<String>) {
        self.data = data.into();
    }

    pub fn has_term(&self, term: &str) -> bool {
        self.boolean_terms.contains(term) || self.postings.iter().any(|(t, _)| t == term)
    }

    pub fn positions(&self, term: &str) -> Vec<u32> {
        self.postings
            .iter()
            .filter(|(t, _)| t == term)
            .map(|(_, position)| *position)
            .collect()
    }

    /// Converts to an engine document identified by `unique_term`.
    ///
    /// Every value slot becomes one facet `/<slot>/<value>`; the positional
    /// terms go in as a single pre-tokenized text so positions are kept as
    /// generated.
    pub fn into_tantivy(self, fields: &IndexFields, unique_term: &str) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(fields.id, unique_term);

        for term in &self.boolean_terms {
            doc.add_text(fields.terms, term);
        }

        if !self.postings.is_empty() {
            let tokens = self
                .postings
                .into_iter()
                .map(|(text, position)| Token {
                    offset_from: 0,
                    offset_to: 0,
                    position: position as usize,
                    text,
                    position_length: 1,
                })
                .collect();
            doc.add_pre_tokenized_text(
                fields.text,
                PreTokenizedString {
                    text: String::new(),
                    tokens,
                },
            );
        }

        for (slot, value) in self.values {
            doc.add_facet(fields.slots, Facet::from_path([slot.to_string(), value]));
        }
        doc.add_text(fields.data, &self.data);
        doc
    }
}

/// Feeds free text into a document, word by word, tracking positions.
#[derive(Debug, Default)]
pub struct TermGenerator {
    termpos: u32,
}

impl TermGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every word of `text` under `prefix` (empty for the general
    /// search surface). Consecutive calls continue the same position run.
    pub fn index_text(&mut self, doc: &mut IndexDocument, text: &str, prefix: &str) {
        for word in tokenize(text) {
            self.termpos += 1;
            doc.add_posting(format!("{prefix}{word}"), self.termpos);
        }
    }

    /// Leaves a gap so that the next text is not adjacent to the previous one.
    pub fn increase_termpos(&mut self) {
        self.termpos += TERMPOS_GAP;
    }

    pub fn termpos(&self) -> u32 {
        self.termpos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_generator_positions_and_prefix() {
        let mut doc = IndexDocument::new();
        let mut gen = TermGenerator::new();
        gen.index_text(&mut doc, "The Left Hand", "S");
        gen.index_text(&mut doc, "of Darkness", "S");

        assert_eq!(doc.positions("Sthe"), vec![1]);
        assert_eq!(doc.positions("Shand"), vec![3]);
        assert_eq!(doc.positions("Sof"), vec![4]);
        assert!(!doc.has_term("hand"));
    }

    #[test]
    fn test_increase_termpos_breaks_adjacency() {
        let mut doc = IndexDocument::new();
        let mut gen = TermGenerator::new();
        gen.index_text(&mut doc, "dune", "");
        gen.increase_termpos();
        gen.index_text(&mut doc, "messiah", "");

        let dune = doc.positions("dune")[0];
        let messiah = doc.positions("messiah")[0];
        assert!(messiah - dune > 1);
        assert_eq!(gen.termpos(), messiah);
    }

    #[test]
    fn test_boolean_terms_are_a_set() {
        let mut doc = IndexDocument::new();
        doc.add_boolean_term("XAherbert, frank");
        doc.add_boolean_term("XAherbert, frank");
        assert_eq!(doc.boolean_terms.len(), 1);
        assert!(doc.has_term("XAherbert, frank"));
        assert!(doc.positions("XAherbert, frank").is_empty());
    }
}
