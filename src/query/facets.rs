//! Facet computation.
//!
//! Value slots hold a field's whole value list as a JSON array, so slot
//! counts are keyed by lists, not values. Each bucket is decoded back into
//! its values and the bucket's count is added to every one of them.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetValue {
    pub term: String,
    pub count: u64,
    /// Whether the value is among the selected filters.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Facet {
    pub name: String,
    pub values: Vec<FacetValue>,
}

/// Per-value totals from per-list bucket counts.
pub fn decompose(buckets: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    let mut totals = BTreeMap::new();
    for (key, count) in buckets {
        let values = match serde_json::from_str::<Vec<String>>(key) {
            Ok(values) => values,
            Err(e) => {
                debug!(key = %key, error = %e, "Slot value is not a JSON list");
                vec![key.clone()]
            }
        };
        for value in values {
            *totals.entry(value).or_insert(0) += count;
        }
    }
    totals
}

/// Builds one field's facet: descending count, then ascending term.
pub fn build_facet(name: &str, buckets: &BTreeMap<String, u64>, selected: &[String]) -> Facet {
    let mut values: Vec<FacetValue> = decompose(buckets)
        .into_iter()
        .map(|(term, count)| FacetValue {
            active: selected.contains(&term),
            term,
            count,
        })
        .collect();
    values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));

    Facet {
        name: name.to_string(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_buckets_are_decomposed_into_values() {
        let totals = decompose(&buckets(&[(r#"["alpha","beta"]"#, 1), (r#"["alpha"]"#, 1)]));
        assert_eq!(totals["alpha"], 2);
        assert_eq!(totals["beta"], 1);
    }

    #[test]
    fn test_facet_order_and_active_flag() {
        let facet = build_facet(
            "subject",
            &buckets(&[
                (r#"["gamma","beta"]"#, 2),
                (r#"["alpha"]"#, 2),
                (r#"["beta"]"#, 1),
            ]),
            &["alpha".to_string()],
        );
        let summary: Vec<(&str, u64, bool)> = facet
            .values
            .iter()
            .map(|v| (v.term.as_str(), v.count, v.active))
            .collect();
        assert_eq!(
            summary,
            vec![("beta", 3, false), ("alpha", 2, true), ("gamma", 2, false)]
        );
    }

    #[test]
    fn test_non_json_bucket_counts_as_single_value() {
        let totals = decompose(&buckets(&[("plain", 4)]));
        assert_eq!(totals["plain"], 4);
    }
}
