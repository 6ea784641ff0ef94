//! Free-text query parser.
//!
//! Supported syntax, default operator AND:
//!
//! | Input | Meaning |
//! |---|---|
//! | `dune messiah` | both words |
//! | `"children of dune"` | phrase |
//! | `+dune`, `-messiah` | required, excluded |
//! | `a AND b`, `a OR b`, `a NOT b` | boolean operators |
//! | `(a OR b) c` | grouping |
//! | `title:dune`, `title:"a phrase"` | text search within one field |
//! | `creator:"Le Guin, Ursula"` | exact filter on a filterable field |
//! | `dun*` | prefix wildcard |
//!
//! Exact filters are pulled out of the text query: values of one field are
//! OR-ed, different fields are AND-ed, and the result narrows the whole
//! query.

use std::collections::BTreeMap;

use thiserror::Error;

use super::expr::QueryExpr;
use crate::index::schema::{FieldMappingTable, FieldSpec};
use crate::index::tokenizer::tokenize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("Unterminated phrase starting at byte {0}")]
    UnterminatedPhrase(usize),
    #[error("Unbalanced parenthesis")]
    UnbalancedParenthesis,
    #[error("Operator {0} is missing an operand")]
    DanglingOperator(&'static str),
    #[error("Field {0} has no value")]
    EmptyFieldValue(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Plus,
    Minus,
    And,
    Or,
    Not,
    Field(String),
    Word(String),
    Phrase(String),
}

fn lex(input: &str, table: &FieldMappingTable) -> Result<Vec<Token>, QueryParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    phrase.push(c);
                }
                if !closed {
                    return Err(QueryParseError::UnterminatedPhrase(start));
                }
                tokens.push(Token::Phrase(phrase));
            }
            '+' | '-' => {
                chars.next();
                // A lone sign is ignored.
                if chars.peek().is_some_and(|&(_, next)| !next.is_whitespace()) {
                    tokens.push(if c == '+' { Token::Plus } else { Token::Minus });
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }

                match word.as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    _ => match word.split_once(':') {
                        Some((name, value)) if table.get(name).is_some() => {
                            let phrase_follows = chars.peek().is_some_and(|&(_, c)| c == '"');
                            if value.is_empty() && !phrase_follows {
                                return Err(QueryParseError::EmptyFieldValue(name.to_string()));
                            }
                            tokens.push(Token::Field(name.to_string()));
                            if !value.is_empty() {
                                tokens.push(Token::Word(value.to_string()));
                            }
                        }
                        _ => tokens.push(Token::Word(word)),
                    },
                }
            }
        }
    }
    Ok(tokens)
}

/// Parser for user-entered search strings.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    table: FieldMappingTable,
}

impl QueryParser {
    pub fn new(table: FieldMappingTable) -> Self {
        Self { table }
    }

    /// Parses `input` into a query. Blank input matches everything.
    pub fn parse(&self, input: &str) -> Result<QueryExpr, QueryParseError> {
        let tokens = lex(input, &self.table)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            table: &self.table,
            filters: BTreeMap::new(),
        };

        let text = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(match parser.tokens[parser.pos] {
                Token::RParen => QueryParseError::UnbalancedParenthesis,
                Token::Or => QueryParseError::DanglingOperator("OR"),
                _ => QueryParseError::DanglingOperator("AND"),
            });
        }

        let filter = QueryExpr::and(
            parser
                .filters
                .into_values()
                .map(QueryExpr::or)
                .collect(),
        );
        Ok(text.unwrap_or(QueryExpr::MatchAll).filter(filter))
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    table: &'a FieldMappingTable,
    /// Exact filter terms keyed by the field's position in the table.
    filters: BTreeMap<usize, Vec<QueryExpr>>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_operand(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::LParen
                    | Token::Plus
                    | Token::Minus
                    | Token::Not
                    | Token::Field(_)
                    | Token::Word(_)
                    | Token::Phrase(_)
            )
        )
    }

    fn parse_or(&mut self) -> Result<Option<QueryExpr>, QueryParseError> {
        if self.peek() == Some(&Token::Or) {
            return Err(QueryParseError::DanglingOperator("OR"));
        }
        let mut parts: Vec<QueryExpr> = self.parse_and()?.into_iter().collect();
        while self.peek() == Some(&Token::Or) {
            self.next();
            if !self.at_operand() {
                return Err(QueryParseError::DanglingOperator("OR"));
            }
            parts.extend(self.parse_and()?);
        }
        Ok(if parts.is_empty() {
            None
        } else {
            Some(QueryExpr::or(parts))
        })
    }

    fn parse_and(&mut self) -> Result<Option<QueryExpr>, QueryParseError> {
        let mut required = Vec::new();
        let mut excluded = Vec::new();

        loop {
            match self.peek() {
                None | Some(Token::RParen) | Some(Token::Or) => break,
                Some(Token::And) => {
                    self.next();
                    if required.is_empty() && excluded.is_empty() {
                        return Err(QueryParseError::DanglingOperator("AND"));
                    }
                    if !self.at_operand() {
                        return Err(QueryParseError::DanglingOperator("AND"));
                    }
                }
                Some(Token::Not) => {
                    self.next();
                    excluded.extend(self.parse_operand("NOT", true)?);
                }
                Some(Token::Minus) => {
                    self.next();
                    excluded.extend(self.parse_operand("-", true)?);
                }
                Some(Token::Plus) => {
                    self.next();
                    required.extend(self.parse_operand("+", false)?);
                }
                Some(_) => required.extend(self.parse_primary(false)?),
            }
        }

        Ok(match (required.is_empty(), excluded.is_empty()) {
            (true, true) => None,
            (false, true) => Some(QueryExpr::and(required)),
            (_, false) => Some(QueryExpr::and(required).and_not(QueryExpr::or(excluded))),
        })
    }

    fn parse_operand(
        &mut self,
        operator: &'static str,
        negated: bool,
    ) -> Result<Option<QueryExpr>, QueryParseError> {
        if !self.at_operand() || self.peek() == Some(&Token::Not) {
            return Err(QueryParseError::DanglingOperator(operator));
        }
        self.parse_primary(negated)
    }

    /// One operand. `None` when it contributes nothing to the text query:
    /// no indexable words, or an exact filter that was set aside.
    fn parse_primary(&mut self, negated: bool) -> Result<Option<QueryExpr>, QueryParseError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(QueryParseError::UnbalancedParenthesis),
                }
            }
            Some(Token::Word(word)) => Ok(word_query(&word, "")),
            Some(Token::Phrase(phrase)) => Ok(phrase_query(&phrase, "")),
            Some(Token::Field(name)) => self.parse_field(&name, negated),
            Some(Token::RParen) => Err(QueryParseError::UnbalancedParenthesis),
            Some(Token::Plus) => Err(QueryParseError::DanglingOperator("+")),
            Some(Token::Minus) => Err(QueryParseError::DanglingOperator("-")),
            Some(Token::Not) => Err(QueryParseError::DanglingOperator("NOT")),
            Some(Token::And) => Err(QueryParseError::DanglingOperator("AND")),
            Some(Token::Or) => Err(QueryParseError::DanglingOperator("OR")),
            None => Ok(None),
        }
    }

    fn parse_field(&mut self, name: &str, negated: bool) -> Result<Option<QueryExpr>, QueryParseError> {
        let table = self.table;
        let (position, field) = match table
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
        {
            Some(found) => found,
            None => return Ok(None),
        };
        let value = match self.next() {
            Some(Token::Word(value)) | Some(Token::Phrase(value)) => value,
            _ => return Err(QueryParseError::EmptyFieldValue(name.to_string())),
        };

        if field.boolean {
            let term = boolean_term(field, &value);
            if negated {
                return Ok(Some(term));
            }
            self.filters.entry(position).or_default().push(term);
            return Ok(None);
        }

        Ok(if value.contains(char::is_whitespace) {
            phrase_query(&value, &field.prefix)
        } else {
            word_query(&value, &field.prefix)
        })
    }
}

fn boolean_term(field: &FieldSpec, value: &str) -> QueryExpr {
    QueryExpr::boolean_term(field.boolean_term(value))
}

fn prefixed(prefix: &str, words: Vec<String>) -> Vec<String> {
    words.into_iter().map(|w| format!("{prefix}{w}")).collect()
}

/// A single word; several tokens (`sci-fi`) form a phrase, a trailing `*`
/// expands the last token.
fn word_query(word: &str, prefix: &str) -> Option<QueryExpr> {
    if let Some(stem) = word.strip_suffix('*') {
        let mut words = prefixed(prefix, tokenize(stem));
        let last = words.pop()?;
        let mut parts: Vec<QueryExpr> = words.into_iter().map(QueryExpr::Term).collect();
        parts.push(QueryExpr::wildcard(last));
        return Some(QueryExpr::and(parts));
    }
    phrase_query(word, prefix)
}

fn phrase_query(text: &str, prefix: &str) -> Option<QueryExpr> {
    let words = prefixed(prefix, tokenize(text));
    if words.is_empty() {
        None
    } else {
        Some(QueryExpr::phrase(words))
    }
}
