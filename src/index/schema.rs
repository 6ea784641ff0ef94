//! Field mapping table shared by the indexer and the query engine.
//!
//! Each indexed field has a value slot (stores the JSON list of its values),
//! a term prefix (free-text and boolean terms), and a flag saying whether the
//! field is filterable and faceted. Both the write path and the read path
//! are built from the same table value, so they cannot drift apart.

use std::collections::HashSet;

use thiserror::Error;

/// Prefix of the unique identity term of every document.
pub const ID_TERM_PREFIX: &str = "Q";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),
    #[error("Value slot {slot} is used by both {first} and {second}")]
    DuplicateSlot {
        slot: u32,
        first: String,
        second: String,
    },
    #[error("Term prefix '{prefix}' is used by both {first} and {second}")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },
    #[error("Invalid prefix '{prefix}' for field {field}: {reason}")]
    InvalidPrefix {
        field: String,
        prefix: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub slot: u32,
    pub prefix: String,
    /// Filterable/faceted field: exact boolean terms plus free text.
    pub boolean: bool,
}

impl FieldSpec {
    pub fn new(name: &str, slot: u32, prefix: &str, boolean: bool) -> Self {
        Self {
            name: name.to_string(),
            slot,
            prefix: prefix.to_string(),
            boolean,
        }
    }

    /// Boolean term for an exact value of this field.
    pub fn boolean_term(&self, value: &str) -> String {
        format!("{}{}", self.prefix, value.to_lowercase())
    }
}

/// Ordered, validated, immutable set of [`FieldSpec`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMappingTable {
    fields: Vec<FieldSpec>,
}

impl FieldMappingTable {
    /// Validates uniqueness of names, slots and prefixes.
    ///
    /// Prefixes must be non-empty upper-case ASCII so that prefixed terms
    /// never collide with the lower-case unprefixed terms, and no prefix may
    /// be a prefix of another or shadow the identity term prefix.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        let mut names = HashSet::new();
        for (i, field) in fields.iter().enumerate() {
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if field.prefix.is_empty() || !field.prefix.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(SchemaError::InvalidPrefix {
                    field: field.name.clone(),
                    prefix: field.prefix.clone(),
                    reason: "must be non-empty upper-case ASCII",
                });
            }
            if field.prefix.starts_with(ID_TERM_PREFIX) {
                return Err(SchemaError::InvalidPrefix {
                    field: field.name.clone(),
                    prefix: field.prefix.clone(),
                    reason: "reserved for identity terms",
                });
            }
            for other in &fields[..i] {
                if other.slot == field.slot {
                    return Err(SchemaError::DuplicateSlot {
                        slot: field.slot,
                        first: other.name.clone(),
                        second: field.name.clone(),
                    });
                }
                if other.prefix.starts_with(&field.prefix) || field.prefix.starts_with(&other.prefix)
                {
                    return Err(SchemaError::DuplicatePrefix {
                        prefix: field.prefix.clone(),
                        first: other.name.clone(),
                        second: field.name.clone(),
                    });
                }
            }
        }
        Ok(Self { fields })
    }

    /// The bibliographic table: title is free text only; creator, subject,
    /// date, language and hostname are filterable and faceted.
    pub fn standard() -> Self {
        Self {
            fields: vec![
                FieldSpec::new("title", 1, "S", false),
                FieldSpec::new("creator", 2, "XA", true),
                FieldSpec::new("subject", 3, "XK", true),
                FieldSpec::new("date", 4, "XP", true),
                FieldSpec::new("language", 5, "L", true),
                FieldSpec::new("hostname", 6, "H", true),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn boolean_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.boolean)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FieldMappingTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Unique identity term for a record identifier.
pub fn id_term(identifier: &str) -> String {
    format!("{ID_TERM_PREFIX}{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_is_valid() {
        let standard = FieldMappingTable::standard();
        let rebuilt = FieldMappingTable::new(standard.iter().cloned().collect()).unwrap();
        assert_eq!(rebuilt, standard);
        assert_eq!(standard.boolean_fields().count(), 5);
        assert!(!standard.get("title").unwrap().boolean);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let err = FieldMappingTable::new(vec![
            FieldSpec::new("title", 1, "S", false),
            FieldSpec::new("creator", 1, "XA", true),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateSlot { slot: 1, .. }));

        let err = FieldMappingTable::new(vec![
            FieldSpec::new("creator", 1, "XA", true),
            FieldSpec::new("author", 2, "X", true),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicatePrefix { .. }));

        let err = FieldMappingTable::new(vec![
            FieldSpec::new("title", 1, "S", false),
            FieldSpec::new("title", 2, "T", false),
        ])
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateField("title".to_string()));
    }

    #[test]
    fn test_invalid_prefixes_are_rejected() {
        for prefix in ["", "xa", "QX"] {
            let err = FieldMappingTable::new(vec![FieldSpec::new("creator", 2, prefix, true)])
                .unwrap_err();
            assert!(matches!(err, SchemaError::InvalidPrefix { .. }), "{prefix}");
        }
    }

    #[test]
    fn test_boolean_term_lowercases_value() {
        let creator = FieldSpec::new("creator", 2, "XA", true);
        assert_eq!(creator.boolean_term("Le Guin, Ursula"), "XAle guin, ursula");
        assert_eq!(id_term("oai:x:1"), "Qoai:x:1");
    }
}
