//! Index storage on tantivy.
//!
//! Readers work on [`Snapshot`]s, each pinned to the commit that was
//! current when it was taken. One [`IndexWriter`] per index directory
//! buffers changes and publishes them on [`IndexWriter::commit`], so readers
//! never observe a half-written batch. The writer lock lives in the index
//! directory, which makes the single-writer rule hold across handles.
//!
//! Field layout:
//!
//! | Field | Options | Content |
//! |---|---|---|
//! | `id` | raw, stored | `Q<identifier>` |
//! | `terms` | raw | boolean terms, e.g. `XAle guin, ursula` |
//! | `text` | positions | prefixed and general free-text terms |
//! | `slots` | facet | `/<slot>/<JSON list of values>` |
//! | `data` | stored | JSON payload |

use std::collections::BTreeMap;
use std::path::Path;

use tantivy::collector::{Count, FacetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, EmptyQuery, Occur, PhraseQuery, Query as TantivyQuery,
    RegexQuery, TermQuery,
};
use tantivy::schema::{
    Facet, FacetOptions, Field, IndexRecordOption, OwnedValue, Schema, TextFieldIndexing,
    TextOptions, STORED, STRING,
};
use tantivy::{Index, IndexReader, ReloadPolicy, Score, Searcher, TantivyDocument, TantivyError, Term};
use tracing::{debug, info, warn};

use super::document::IndexDocument;
use super::tokenizer::{text_analyzer, ANALYZER_NAME};
use super::IndexError;
use crate::query::expr::QueryExpr;

/// Indexing heap handed to the writer's single thread.
pub const WRITER_HEAP_BYTES: usize = 20_000_000;

const ID_FIELD: &str = "id";
const TERMS_FIELD: &str = "terms";
const TEXT_FIELD: &str = "text";
const SLOTS_FIELD: &str = "slots";
const DATA_FIELD: &str = "data";

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(ID_FIELD, STRING | STORED);
    builder.add_text_field(TERMS_FIELD, STRING);

    let text_indexing = TextFieldIndexing::default()
        .set_tokenizer(ANALYZER_NAME)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    builder.add_text_field(
        TEXT_FIELD,
        TextOptions::default().set_indexing_options(text_indexing),
    );

    builder.add_facet_field(SLOTS_FIELD, FacetOptions::default());
    builder.add_text_field(DATA_FIELD, STORED);
    builder.build()
}

/// Handles of the engine fields.
#[derive(Debug, Clone, Copy)]
pub struct IndexFields {
    pub id: Field,
    pub terms: Field,
    pub text: Field,
    pub slots: Field,
    pub data: Field,
}

impl IndexFields {
    fn resolve(schema: &Schema) -> Result<Self, TantivyError> {
        Ok(Self {
            id: schema.get_field(ID_FIELD)?,
            terms: schema.get_field(TERMS_FIELD)?,
            text: schema.get_field(TEXT_FIELD)?,
            slots: schema.get_field(SLOTS_FIELD)?,
            data: schema.get_field(DATA_FIELD)?,
        })
    }
}

// ============================================================================
// Index Handle
// ============================================================================

/// Handle to one index. Clones share the same index and reader.
#[derive(Clone)]
pub struct SearchIndex {
    inner: Index,
    reader: IndexReader,
    fields: IndexFields,
}

impl SearchIndex {
    /// Index that lives only as long as the process.
    pub fn in_memory() -> Result<Self, IndexError> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    /// Opens the index stored in directory `path`, creating an empty one if
    /// there is none yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let directory = MmapDirectory::open(path)?;
        let index = Self::from_index(Index::open_or_create(directory, build_schema())?)?;
        info!(path = %path.display(), documents = index.reader().doc_count(), "Opened index");
        Ok(index)
    }

    /// Opens an empty index in `path`, discarding any stored one.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_dir_all(path)?;
            info!(path = %path.display(), "Removed stored index");
        }
        Self::open(path)
    }

    fn from_index(inner: Index) -> Result<Self, IndexError> {
        inner.tokenizers().register(ANALYZER_NAME, text_analyzer());
        let fields = IndexFields::resolve(&inner.schema())?;
        let reader = inner
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            inner,
            reader,
            fields,
        })
    }

    /// Latest committed snapshot.
    pub fn reader(&self) -> Snapshot {
        Snapshot {
            searcher: self.reader.searcher(),
            fields: self.fields,
        }
    }

    /// Acquires the writer. Fails while any other writer on the same index
    /// directory is alive, whichever handle it was taken from.
    pub fn writer(&self) -> Result<IndexWriter, IndexError> {
        let inner: tantivy::IndexWriter =
            match self.inner.writer_with_num_threads(1, WRITER_HEAP_BYTES) {
                Ok(writer) => writer,
                Err(TantivyError::LockFailure(..)) => return Err(IndexError::WriterLocked),
                Err(e) => return Err(e.into()),
            };
        Ok(IndexWriter {
            inner,
            reader: self.reader.clone(),
            fields: self.fields,
            dirty: false,
            #[cfg(test)]
            fail_next_commit: false,
        })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Exclusive write access to a [`SearchIndex`].
///
/// Changes are invisible to readers until [`commit`](Self::commit).
/// Dropping the writer releases the lock and discards uncommitted changes.
pub struct IndexWriter {
    inner: tantivy::IndexWriter,
    reader: IndexReader,
    fields: IndexFields,
    dirty: bool,
    #[cfg(test)]
    pub(crate) fail_next_commit: bool,
}

impl IndexWriter {
    /// Stores `doc` as the only document carrying `unique_term`.
    pub fn replace_document(
        &mut self,
        unique_term: &str,
        doc: IndexDocument,
    ) -> Result<(), IndexError> {
        self.inner
            .delete_term(Term::from_field_text(self.fields.id, unique_term));
        self.inner
            .add_document(doc.into_tantivy(&self.fields, unique_term))?;
        self.dirty = true;
        Ok(())
    }

    /// Removes the document carrying `unique_term`, if there is one.
    pub fn delete_document(&mut self, unique_term: &str) {
        self.inner
            .delete_term(Term::from_field_text(self.fields.id, unique_term));
        self.dirty = true;
    }

    /// Removes every document carrying the boolean term `term`.
    pub fn delete_boolean_term(&mut self, term: &str) {
        self.inner
            .delete_term(Term::from_field_text(self.fields.terms, term));
        self.dirty = true;
    }

    /// Publishes pending changes to readers and to disk.
    ///
    /// A failed commit rolls the pending changes back, so the writer is
    /// clean again either way.
    pub fn commit(&mut self) -> Result<(), IndexError> {
        if !self.dirty {
            return Ok(());
        }
        self.dirty = false;
        match self.try_commit() {
            Ok(opstamp) => {
                self.reader.reload()?;
                debug!(opstamp, "Committed index changes");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Commit failed, rolling back");
                if let Err(rollback) = self.inner.rollback() {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    fn try_commit(&mut self) -> Result<u64, IndexError> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_commit) {
            return Err(TantivyError::SystemError("commit failure injected".to_string()).into());
        }
        Ok(self.inner.commit()?)
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.dirty
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if self.dirty {
            debug!("Discarding uncommitted index changes");
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub unique_term: String,
    pub score: Score,
    pub data: String,
}

/// A page of matches plus statistics over the whole match set.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    pub matches: Vec<Match>,
    /// Size of the whole match set.
    pub estimated: usize,
    /// Per spied slot: stored value → number of matching documents.
    pub spies: BTreeMap<u32, BTreeMap<String, u64>>,
}

/// Immutable view of the index at one commit.
#[derive(Clone)]
pub struct Snapshot {
    searcher: Searcher,
    fields: IndexFields,
}

impl Snapshot {
    pub fn doc_count(&self) -> u64 {
        self.searcher.num_docs()
    }

    /// Number of documents matching `query`.
    pub fn count(&self, query: &QueryExpr) -> Result<usize, IndexError> {
        let query = self.compile(query)?;
        Ok(self.searcher.search(query.as_ref(), &Count)?)
    }

    /// Runs `query` and returns up to `limit` matches starting at `offset`.
    ///
    /// Matches are ordered by descending score. Every slot in `spy_slots` is
    /// tallied over the entire match set, not just the page. An offset past
    /// the end yields an empty page with full statistics.
    pub fn enquire(
        &self,
        query: &QueryExpr,
        offset: usize,
        limit: usize,
        spy_slots: &[u32],
    ) -> Result<MatchSet, IndexError> {
        let query = self.compile(query)?;

        let mut facets = FacetCollector::for_field(SLOTS_FIELD);
        for slot in spy_slots {
            facets.add_facet(Facet::from_path([slot.to_string()]));
        }

        let available = usize::try_from(self.doc_count()).unwrap_or(usize::MAX);
        let window = limit.min(available.saturating_sub(offset));
        let (estimated, top, counts) = if window == 0 {
            let (estimated, counts) = self.searcher.search(query.as_ref(), &(Count, facets))?;
            (estimated, Vec::new(), counts)
        } else {
            let top = TopDocs::with_limit(window).and_offset(offset);
            self.searcher.search(query.as_ref(), &(Count, top, facets))?
        };

        let mut spies = BTreeMap::new();
        for &slot in spy_slots {
            let bucket: &mut BTreeMap<String, u64> = spies.entry(slot).or_default();
            for (facet, count) in counts.get(Facet::from_path([slot.to_string()])) {
                if let Some(value) = facet.to_path().last() {
                    bucket.insert((*value).to_string(), count);
                }
            }
        }

        let matches = top
            .into_iter()
            .map(|(score, address)| {
                let doc: TantivyDocument = self.searcher.doc(address)?;
                Ok(Match {
                    unique_term: stored_text(&doc, self.fields.id, ID_FIELD)?,
                    score,
                    data: stored_text(&doc, self.fields.data, DATA_FIELD)?,
                })
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        Ok(MatchSet {
            matches,
            estimated,
            spies,
        })
    }

    fn compile(&self, query: &QueryExpr) -> Result<Box<dyn TantivyQuery>, IndexError> {
        let fields = &self.fields;
        Ok(match query {
            QueryExpr::MatchAll => Box::new(AllQuery),
            QueryExpr::MatchNothing => Box::new(EmptyQuery),
            QueryExpr::Term(term) => text_term_query(fields.text, term),
            QueryExpr::BooleanTerm(term) => Box::new(TermQuery::new(
                Term::from_field_text(fields.terms, term),
                IndexRecordOption::Basic,
            )),
            QueryExpr::Phrase(terms) => match terms.as_slice() {
                [] => Box::new(EmptyQuery),
                [term] => text_term_query(fields.text, term),
                _ => Box::new(PhraseQuery::new(
                    terms
                        .iter()
                        .map(|t| Term::from_field_text(fields.text, t))
                        .collect(),
                )),
            },
            QueryExpr::Wildcard(prefix) => Box::new(RegexQuery::from_pattern(
                &format!("{}.*", escape_regex(prefix)),
                fields.text,
            )?),
            QueryExpr::And(parts) if parts.is_empty() => Box::new(AllQuery),
            QueryExpr::And(parts) => Box::new(BooleanQuery::new(self.clauses(Occur::Must, parts)?)),
            QueryExpr::Or(parts) if parts.is_empty() => Box::new(EmptyQuery),
            QueryExpr::Or(parts) => Box::new(BooleanQuery::new(self.clauses(Occur::Should, parts)?)),
            QueryExpr::AndNot(left, right) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, self.compile(left)?),
                (Occur::MustNot, self.compile(right)?),
            ])),
            QueryExpr::Filter(left, filter) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, self.compile(left)?),
                (
                    Occur::Must,
                    Box::new(BoostQuery::new(self.compile(filter)?, 0.0)),
                ),
            ])),
        })
    }

    fn clauses(
        &self,
        occur: Occur,
        parts: &[QueryExpr],
    ) -> Result<Vec<(Occur, Box<dyn TantivyQuery>)>, IndexError> {
        parts
            .iter()
            .map(|part| Ok((occur, self.compile(part)?)))
            .collect()
    }
}

fn text_term_query(field: Field, term: &str) -> Box<dyn TantivyQuery> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, term),
        IndexRecordOption::WithFreqs,
    ))
}

fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn stored_text(doc: &TantivyDocument, field: Field, name: &'static str) -> Result<String, IndexError> {
    doc.get_first(field)
        .and_then(|v| {
            let owned: OwnedValue = v.into();
            match owned {
                OwnedValue::Str(s) => Some(s),
                _ => None,
            }
        })
        .ok_or(IndexError::MissingStoredField(name))
}
