//! Read side: query parsing, filtering, faceting and result assembly.

pub mod engine;
pub mod expr;
pub mod facets;
pub mod parser;

pub use engine::{DisplayRecord, SearchEngine, SearchError, SearchQuery, SearchResults};
pub use expr::QueryExpr;
pub use facets::{Facet, FacetValue};
pub use parser::{QueryParseError, QueryParser};
