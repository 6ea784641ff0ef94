//! Write side of the search index.
//!
//! - [`schema::FieldMappingTable`]: how each field is stored and filtered
//! - [`indexer::Indexer`]: normalized record → index document
//! - [`store::SearchIndex`]: the tantivy index with one writer and
//!   snapshot readers

pub mod document;
pub mod indexer;
pub mod schema;
pub mod store;
pub mod tokenizer;

use thiserror::Error;

pub use document::{IndexDocument, TermGenerator};
pub use indexer::Indexer;
pub use schema::{FieldMappingTable, FieldSpec, SchemaError};
pub use store::{IndexWriter, Match, MatchSet, SearchIndex, Snapshot};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index is already open for writing")]
    WriterLocked,
    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Index directory error: {0}")]
    Directory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("Index engine error: {0}")]
    Engine(#[from] tantivy::TantivyError),
    #[error("Index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Stored document lacks field {0}")]
    MissingStoredField(&'static str),
    #[error("Invalid field mapping: {0}")]
    Schema(#[from] SchemaError),
}
