use tracing::debug;

use super::document::{IndexDocument, TermGenerator};
use super::schema::{id_term, FieldMappingTable};
use super::store::{IndexWriter, Snapshot};
use super::IndexError;
use crate::language::normalize_language;
use crate::model::{NormalizedRecord, HOSTNAME_FIELD, LANGUAGE_FIELD, OAI_IDENTIFIER_FIELD};
use crate::query::expr::QueryExpr;

/// Fields that make up the unprefixed, default search surface.
pub const GENERAL_TEXT_FIELDS: &[&str] = &["title", "creator", "subject", "description"];

/// Turns normalized records into index documents.
#[derive(Debug, Clone, Default)]
pub struct Indexer {
    table: FieldMappingTable,
}

impl Indexer {
    pub fn new(table: FieldMappingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &FieldMappingTable {
        &self.table
    }

    /// Writes or removes the document for `identifier` and returns the run
    /// log line for it. Nothing is committed here.
    pub fn index_record(
        &self,
        writer: &mut IndexWriter,
        record: &NormalizedRecord,
        identifier: &str,
        deleted: bool,
    ) -> Result<String, IndexError> {
        let unique_term = id_term(identifier);

        if deleted {
            writer.delete_document(&unique_term);
            debug!(identifier, "Removed document");
            return Ok(format!("Removing document {unique_term}"));
        }

        let doc = self.build_document(record, identifier)?;
        writer.replace_document(&unique_term, doc)?;
        Ok(format!("Indexing {unique_term}"))
    }

    /// Removes every document harvested from `hostname` and returns how
    /// many of them `snapshot` holds. Nothing is removed when the table has
    /// no filterable hostname field.
    pub fn remove_host(
        &self,
        writer: &mut IndexWriter,
        snapshot: &Snapshot,
        hostname: &str,
    ) -> Result<usize, IndexError> {
        let Some(field) = self.table.get(HOSTNAME_FIELD).filter(|f| f.boolean) else {
            return Ok(0);
        };
        let term = field.boolean_term(hostname);
        let removed = snapshot.count(&QueryExpr::boolean_term(term.as_str()))?;
        writer.delete_boolean_term(&term);
        debug!(hostname, removed, "Removed documents of host");
        Ok(removed)
    }

    /// Builds the document for one record without touching the index.
    pub fn build_document(
        &self,
        record: &NormalizedRecord,
        identifier: &str,
    ) -> Result<IndexDocument, IndexError> {
        let mut doc = IndexDocument::new();
        let mut terms = TermGenerator::new();

        for field in self.table.iter() {
            let Some(raw) = record.get(&field.name) else {
                continue;
            };
            let values: Vec<String> = if field.name == LANGUAGE_FIELD {
                raw.iter()
                    .filter_map(|code| normalize_language(Some(code.as_str())))
                    .collect()
            } else {
                raw.to_vec()
            };

            for value in &values {
                if field.boolean {
                    doc.add_boolean_term(field.boolean_term(value));
                }
                terms.index_text(&mut doc, value, &field.prefix);
            }
            terms.increase_termpos();

            if !values.is_empty() {
                doc.add_value(field.slot, serde_json::to_string(&values)?);
            }
        }

        for name in GENERAL_TEXT_FIELDS {
            for value in record.get(name).unwrap_or_default() {
                terms.index_text(&mut doc, value, "");
            }
            terms.increase_termpos();
        }

        let mut payload = record.clone();
        payload.set(OAI_IDENTIFIER_FIELD, vec![identifier.to_string()]);
        doc.set_data(serde_json::to_string(&payload)?);

        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::store::SearchIndex;

    fn record() -> NormalizedRecord {
        [
            ("title", vec!["The Dispossessed".to_string()]),
            ("creator", vec!["Le Guin, Ursula".to_string()]),
            ("subject", vec!["Anarchism".to_string(), "Utopias".to_string()]),
            ("description", vec!["An ambiguous utopia".to_string()]),
            ("language", vec!["eng".to_string(), "English".to_string()]),
            ("hostname", vec!["lib.example.org".to_string()]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_document_terms_values_and_payload() {
        let indexer = Indexer::default();
        let doc = indexer.build_document(&record(), "oai:lib:1").unwrap();

        assert!(doc.has_term("XAle guin, ursula"));
        assert!(doc.has_term("XAguin"));
        assert!(doc.has_term("XKanarchism"));
        assert!(doc.has_term("Hlib.example.org"));
        assert!(doc.has_term("Sdispossessed"));
        assert!(!doc.has_term("Sthe dispossessed"));
        assert!(doc.has_term("ambiguous"));
        assert!(doc.has_term("guin"));

        assert_eq!(doc.value(3), Some(r#"["Anarchism","Utopias"]"#));
        assert_eq!(doc.value(1), Some(r#"["The Dispossessed"]"#));
        assert_eq!(doc.value(4), None);

        let payload: NormalizedRecord = serde_json::from_str(&doc.data).unwrap();
        assert_eq!(
            payload.get("oai_pmh_identifier"),
            Some(&["oai:lib:1".to_string()][..])
        );
        assert_eq!(
            payload.get("language"),
            Some(&["eng".to_string(), "English".to_string()][..])
        );
    }

    #[test]
    fn test_language_values_are_normalized_and_dropped() {
        let doc = Indexer::default()
            .build_document(&record(), "oai:lib:1")
            .unwrap();
        assert!(doc.has_term("Len"));
        assert!(!doc.has_term("Leng"));
        assert_eq!(doc.value(5), Some(r#"["en"]"#));
    }

    #[test]
    fn test_general_fields_are_not_adjacent() {
        let mut rec = NormalizedRecord::new();
        rec.push("title", "Dune");
        rec.push("creator", "Herbert");
        let doc = Indexer::default().build_document(&rec, "1").unwrap();
        let dune = doc.positions("dune")[0];
        let herbert = doc.positions("herbert")[0];
        assert!(herbert > dune + 1);
    }

    #[test]
    fn test_reindex_replaces_and_delete_removes() {
        let index = SearchIndex::in_memory().unwrap();
        let indexer = Indexer::default();
        let mut writer = index.writer().unwrap();

        let line = indexer
            .index_record(&mut writer, &record(), "oai:lib:1", false)
            .unwrap();
        assert_eq!(line, "Indexing Qoai:lib:1");

        let mut updated = record();
        updated.set("title", vec!["The Lathe of Heaven".to_string()]);
        indexer
            .index_record(&mut writer, &updated, "oai:lib:1", false)
            .unwrap();
        writer.commit().unwrap();

        let snapshot = index.reader();
        assert_eq!(snapshot.doc_count(), 1);
        assert_eq!(snapshot.count(&QueryExpr::term("lathe")).unwrap(), 1);
        assert_eq!(snapshot.count(&QueryExpr::term("dispossessed")).unwrap(), 0);

        let line = indexer
            .index_record(&mut writer, &NormalizedRecord::new(), "oai:lib:1", true)
            .unwrap();
        assert_eq!(line, "Removing document Qoai:lib:1");
        let line = indexer
            .index_record(&mut writer, &NormalizedRecord::new(), "oai:lib:2", true)
            .unwrap();
        assert_eq!(line, "Removing document Qoai:lib:2");
        writer.commit().unwrap();
        assert_eq!(index.reader().doc_count(), 0);
    }

    #[test]
    fn test_remove_host_keeps_other_hosts() {
        let index = SearchIndex::in_memory().unwrap();
        let indexer = Indexer::default();
        let mut writer = index.writer().unwrap();

        let mut other = record();
        other.set("hostname", vec!["archive.example.net".to_string()]);
        indexer
            .index_record(&mut writer, &record(), "oai:lib:1", false)
            .unwrap();
        indexer
            .index_record(&mut writer, &other, "oai:archive:1", false)
            .unwrap();
        writer.commit().unwrap();

        let removed = indexer
            .remove_host(&mut writer, &index.reader(), "lib.example.org")
            .unwrap();
        assert_eq!(removed, 1);
        writer.commit().unwrap();

        let snapshot = index.reader();
        assert_eq!(snapshot.doc_count(), 1);
        let hosts = QueryExpr::boolean_term("Harchive.example.net");
        assert_eq!(snapshot.count(&hosts).unwrap(), 1);
    }
}
