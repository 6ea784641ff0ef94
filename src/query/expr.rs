//! Structured query expressions.
//!
//! Queries are assembled from these combinators rather than from strings,
//! so precedence between the text match and the filters is explicit.

/// A query over index terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpr {
    /// Every document.
    MatchAll,
    /// No document.
    MatchNothing,
    /// Documents containing the free-text term.
    Term(String),
    /// Documents carrying the exact boolean term.
    BooleanTerm(String),
    /// Documents containing the terms at consecutive positions.
    Phrase(Vec<String>),
    /// Documents containing any term starting with the given prefix.
    Wildcard(String),
    /// Documents matching every subquery; weights add up.
    And(Vec<QueryExpr>),
    /// Documents matching any subquery; weights add up.
    Or(Vec<QueryExpr>),
    /// Documents matching the left side but not the right side.
    AndNot(Box<QueryExpr>, Box<QueryExpr>),
    /// Documents matching both sides; only the left side is weighted.
    Filter(Box<QueryExpr>, Box<QueryExpr>),
}

impl QueryExpr {
    pub fn term(term: impl Into<String>) -> Self {
        QueryExpr::Term(term.into())
    }

    pub fn boolean_term(term: impl Into<String>) -> Self {
        QueryExpr::BooleanTerm(term.into())
    }

    pub fn phrase(terms: Vec<String>) -> Self {
        match terms.len() {
            0 => QueryExpr::MatchAll,
            1 => terms.into_iter().next().map_or(QueryExpr::MatchAll, QueryExpr::Term),
            _ => QueryExpr::Phrase(terms),
        }
    }

    pub fn wildcard(prefix: impl Into<String>) -> Self {
        QueryExpr::Wildcard(prefix.into())
    }

    /// Conjunction; nested conjunctions are flattened and `MatchAll`
    /// operands dropped.
    pub fn and(parts: Vec<QueryExpr>) -> Self {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                QueryExpr::MatchAll => {}
                QueryExpr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => QueryExpr::MatchAll,
            1 => flat.pop().unwrap_or(QueryExpr::MatchAll),
            _ => QueryExpr::And(flat),
        }
    }

    /// Disjunction; nested disjunctions are flattened and `MatchNothing`
    /// operands dropped.
    pub fn or(parts: Vec<QueryExpr>) -> Self {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                QueryExpr::MatchNothing => {}
                QueryExpr::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => QueryExpr::MatchNothing,
            1 => flat.pop().unwrap_or(QueryExpr::MatchNothing),
            _ => QueryExpr::Or(flat),
        }
    }

    pub fn and_not(self, excluded: QueryExpr) -> Self {
        QueryExpr::AndNot(Box::new(self), Box::new(excluded))
    }

    /// Narrows `self` to documents matching `filter` without changing weights.
    pub fn filter(self, filter: QueryExpr) -> Self {
        match filter {
            QueryExpr::MatchAll => self,
            filter => QueryExpr::Filter(Box::new(self), Box::new(filter)),
        }
    }
}
