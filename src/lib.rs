pub mod config;
pub mod executor;
pub mod harvest;
pub mod index;
pub mod language;
pub mod ledger;
pub mod model;
pub mod pager;
pub mod query;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use language::normalize_language;
pub use model::*;
pub use pager::{paginator, PageLink, Pager};
pub use traits::*;
