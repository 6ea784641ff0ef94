use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use super::expr::QueryExpr;
use super::facets::{build_facet, Facet};
use super::parser::{QueryParseError, QueryParser};
use crate::index::{IndexError, Snapshot};
use crate::index::schema::FieldMappingTable;
use crate::model::{NormalizedRecord, IDENTIFIER_FIELD, OAI_IDENTIFIER_FIELD};
use crate::pager::{paginator, PageLink, Pager, PAGE_NUMBER_PARAM};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_PAGE_NUMBER: usize = 1;

/// Prefix of the repeatable per-field filter parameters.
pub const FILTER_PARAM_PREFIX: &str = "filter_";

/// Separator used when a multi-valued field is shown as one string.
pub const DISPLAY_SEPARATOR: &str = " | ";

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    Parse(#[from] QueryParseError),
    #[error("Document {unique_term} has an unreadable payload: {source}")]
    CorruptDocument {
        unique_term: String,
        source: serde_json::Error,
    },
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: Option<String>,
    /// Selected filter values per field.
    pub filters: BTreeMap<String, Vec<String>>,
    pub page_number: usize,
    pub page_size: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: None,
            filters: BTreeMap::new(),
            page_number: DEFAULT_PAGE_NUMBER,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SearchQuery {
    pub fn new(query: Option<String>) -> Self {
        Self {
            query: query.filter(|q| !q.trim().is_empty()),
            ..Self::default()
        }
    }

    /// Adds one selected value; empty values are ignored.
    pub fn with_filter(mut self, field: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.filters
                .entry(field.to_string())
                .or_default()
                .push(value.to_string());
        }
        self
    }

    /// Values below 1 fall back to the defaults.
    pub fn with_page(mut self, page_number: usize, page_size: usize) -> Self {
        self.page_number = if page_number < 1 {
            DEFAULT_PAGE_NUMBER
        } else {
            page_number
        };
        self.page_size = if page_size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }

    /// Reads `query`, `page_size`, `page_number` and `filter_<field>`
    /// request parameters. Missing, non-numeric or non-positive page
    /// values fall back to the defaults.
    pub fn from_params(params: &[(String, String)]) -> Self {
        let number = |name: &str, default: usize| {
            params
                .iter()
                .rev()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.trim().parse::<i64>().ok())
                .filter(|n| *n >= 1)
                .map_or(default, |n| n as usize)
        };

        let mut query = Self::new(
            params
                .iter()
                .find(|(k, _)| k == "query")
                .map(|(_, v)| v.clone()),
        )
        .with_page(
            number(PAGE_NUMBER_PARAM, DEFAULT_PAGE_NUMBER),
            number("page_size", DEFAULT_PAGE_SIZE),
        );

        for (key, value) in params {
            if let Some(field) = key.strip_prefix(FILTER_PARAM_PREFIX) {
                query = query.with_filter(field, value);
            }
        }
        query
    }

    /// Request parameters reproducing this query, without the page number.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(query) = &self.query {
            params.push(("query".to_string(), query.clone()));
        }
        for (field, values) in &self.filters {
            for value in values {
                params.push((format!("{FILTER_PARAM_PREFIX}{field}"), value.clone()));
            }
        }
        params.push(("page_size".to_string(), self.page_size.to_string()));
        params
    }
}

// ============================================================================
// Results
// ============================================================================

/// A matched record prepared for display.
///
/// `url` and `identifiers` are set together, and only when one of the
/// record's identifiers is an `http`/`https` link; a record whose
/// identifiers are all non-web (ISBNs, URNs) shows neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplayRecord {
    /// First `http`/`https` identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub oai_pmh_identifier: Vec<String>,
    /// Every other non-empty field, values joined with [`DISPLAY_SEPARATOR`].
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl DisplayRecord {
    pub fn from_payload(payload: &NormalizedRecord) -> Self {
        let mut record = DisplayRecord::default();
        for (field, values) in payload.iter() {
            if values.is_empty() {
                continue;
            }
            match field {
                IDENTIFIER_FIELD => {
                    if let Some(url) = values.iter().find(|v| is_web_link(v)) {
                        record.url = Some(url.clone());
                        record.identifiers = values.to_vec();
                    }
                }
                OAI_IDENTIFIER_FIELD => record.oai_pmh_identifier = values.to_vec(),
                _ => {
                    record
                        .fields
                        .insert(field.to_string(), values.join(DISPLAY_SEPARATOR));
                }
            }
        }
        record
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

fn is_web_link(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub querystring: Option<String>,
    pub matches: Vec<DisplayRecord>,
    pub facets: Vec<Facet>,
    /// Applied filter values per field.
    pub filters: BTreeMap<String, Vec<String>>,
    pub pager: Pager,
    #[serde(skip)]
    params: Vec<(String, String)>,
}

impl SearchResults {
    /// Pagination links for these results under `base_url`.
    pub fn paginator(&self, base_url: &str) -> Option<Vec<PageLink>> {
        paginator(&self.pager, base_url, &self.params)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Answers [`SearchQuery`]s against index snapshots.
#[derive(Debug, Clone, Default)]
pub struct SearchEngine {
    table: FieldMappingTable,
    parser: QueryParser,
}

impl SearchEngine {
    pub fn new(table: FieldMappingTable) -> Self {
        Self {
            parser: QueryParser::new(table.clone()),
            table,
        }
    }

    pub fn search(
        &self,
        snapshot: &Snapshot,
        request: &SearchQuery,
    ) -> Result<SearchResults, SearchError> {
        let text = match &request.query {
            Some(querystring) => {
                info!(query = %querystring, "Parsing query");
                self.parser.parse(querystring)?
            }
            None => QueryExpr::MatchAll,
        };

        let mut groups = Vec::new();
        let mut active = BTreeMap::new();
        for field in self.table.boolean_fields() {
            let Some(values) = request.filters.get(&field.name).filter(|v| !v.is_empty()) else {
                continue;
            };
            groups.push(QueryExpr::or(
                values
                    .iter()
                    .map(|v| QueryExpr::boolean_term(field.boolean_term(v)))
                    .collect(),
            ));
            active.insert(field.name.clone(), values.clone());
        }
        let query = text.filter(QueryExpr::and(groups));

        let spy_slots: Vec<u32> = self.table.boolean_fields().map(|f| f.slot).collect();
        // A page beyond any reachable offset is simply empty.
        let offset = request
            .page_number
            .saturating_sub(1)
            .checked_mul(request.page_size)
            .unwrap_or(usize::MAX);
        let mset = snapshot.enquire(&query, offset, request.page_size, &spy_slots)?;

        let pager = Pager::new(mset.estimated, request.page_size, request.page_number);
        info!(
            total = pager.total_entries,
            page = pager.current_page,
            last_page = pager.last_page(),
            "Search finished"
        );

        let matches = mset
            .matches
            .iter()
            .map(|m| {
                serde_json::from_str::<NormalizedRecord>(&m.data)
                    .map(|payload| DisplayRecord::from_payload(&payload))
                    .map_err(|source| SearchError::CorruptDocument {
                        unique_term: m.unique_term.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let facets = self
            .table
            .boolean_fields()
            .filter_map(|field| {
                let buckets = mset.spies.get(&field.slot)?;
                let selected = active.get(&field.name).map(Vec::as_slice).unwrap_or(&[]);
                let facet = build_facet(&field.name, buckets, selected);
                (!facet.values.is_empty()).then_some(facet)
            })
            .collect();

        let params = SearchQuery {
            filters: active.clone(),
            ..request.clone()
        }
        .to_params();

        Ok(SearchResults {
            querystring: request.query.clone(),
            matches,
            facets,
            filters: active,
            pager,
            params,
        })
    }
}
