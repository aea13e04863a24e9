//! Extraction driver with first-write-wins deduplication.
//!
//! Runs the [`fragment`](crate::fragment) scanner and the
//! [`normalize`](crate::normalize) step over a whole input and keeps the
//! first record seen for each id. Later fragments with an id already seen
//! are discarded even when they carry different (or more complete) data.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::fragment::fragments;
use crate::models::InstitutionRecord;
use crate::normalize::normalize_fragment;

/// Counters collected during one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    /// Fragments found by the scanner.
    pub fragments: usize,
    /// Anchors whose object never closed.
    pub unterminated: usize,
    /// Fragments that yielded no record (missing id or name).
    pub malformed: usize,
    /// Records discarded because their id was already seen.
    pub duplicates: usize,
    /// Records kept.
    pub unique: usize,
}

/// Result of [`extract_institutions`].
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Deduplicated records in first-occurrence order.
    pub records: Vec<InstitutionRecord>,
    pub stats: ExtractionStats,
}

impl Extraction {
    /// Records that ended up with a non-empty URL.
    pub fn with_url(&self) -> usize {
        self.records.iter().filter(|r| !r.url.is_empty()).count()
    }
}

/// Insertion-ordered id → record map.
#[derive(Debug, Default)]
struct OrderedRecords {
    index: HashMap<i64, usize>,
    records: Vec<InstitutionRecord>,
}

impl OrderedRecords {
    /// Keep `record` unless its id is already present. Returns whether it was kept.
    fn insert_first(&mut self, record: InstitutionRecord) -> bool {
        if self.index.contains_key(&record.id) {
            return false;
        }
        self.index.insert(record.id, self.records.len());
        self.records.push(record);
        true
    }
}

/// Extract, normalize and deduplicate every institution in `text`.
pub fn extract_institutions(text: &str) -> Extraction {
    let mut stats = ExtractionStats::default();
    let mut seen = OrderedRecords::default();
    let mut iter = fragments(text);

    for fragment in iter.by_ref() {
        stats.fragments += 1;
        match normalize_fragment(fragment.as_str()) {
            Ok(record) => {
                if !seen.insert_first(record) {
                    stats.duplicates += 1;
                }
            }
            Err(e) => {
                stats.malformed += 1;
                debug!(offset = fragment.start, error = %e, "skipping fragment");
            }
        }
    }

    stats.unterminated = iter.unterminated();
    stats.unique = seen.records.len();

    Extraction {
        records: seen.records,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acme_scenario() {
        let text = r#"{"institution":{"id":42,"name":"Acme Bank","urlLogonApp":"https://acme/login","urlHomeApp":"https://acme/home"}} garbage {"institution":{"id":42,"name":"Acme Bank 2"}}"#;
        let ex = extract_institutions(text);
        assert_eq!(
            ex.records,
            vec![InstitutionRecord::new(42, "Acme Bank", "https://acme/login")]
        );
        assert_eq!(ex.stats.fragments, 2);
        assert_eq!(ex.stats.duplicates, 1);
        assert_eq!(ex.stats.unique, 1);
    }

    #[test]
    fn test_brace_in_name_scenario() {
        let ex = extract_institutions(r#"{"institution":{"id":7,"name":"A{B}C"}}"#);
        assert_eq!(ex.records, vec![InstitutionRecord::new(7, "A{B}C", "")]);
    }

    #[test]
    fn test_missing_id_scenario() {
        let ex = extract_institutions(r#"{"institution":{"name":"NoId"}}"#);
        assert!(ex.records.is_empty());
        assert_eq!(ex.stats.malformed, 1);
        assert_eq!(ex.stats.fragments, 1);
    }

    #[test]
    fn test_first_write_wins_even_without_url() {
        let text = r#"{"institution":{"id":5,"name":"Early"}}
{"institution":{"id":5,"name":"Late","urlLogonApp":"https://late"}}"#;
        let ex = extract_institutions(text);
        assert_eq!(ex.records, vec![InstitutionRecord::new(5, "Early", "")]);
    }

    #[test]
    fn test_order_is_first_occurrence() {
        let text = r#"{"institution":{"id":3,"name":"C"}} {"institution":{"id":1,"name":"A"}} {"institution":{"id":3,"name":"C2"}} {"institution":{"id":2,"name":"B"}}"#;
        let ids: Vec<i64> = extract_institutions(text).records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_counts_are_consistent() {
        let text = r#"{"institution":{"id":1,"name":"A"}} {"institution":{"name":"x"}} {"institution":{"id":1,"name":"A"}} {"institution":{"id":2,"name":"B"}} {"institution":{"id":9"#;
        let ex = extract_institutions(text);
        let s = ex.stats;
        assert!(ex.records.len() <= s.fragments);
        assert_eq!(s.fragments, s.malformed + s.duplicates + s.unique);
        assert_eq!(s.unique, 2);
        assert_eq!(s.unterminated, 1);
    }

    #[test]
    fn test_with_url_count() {
        let text = r#"{"institution":{"id":1,"name":"A","urlHomeApp":"https://a"}} {"institution":{"id":2,"name":"B"}}"#;
        assert_eq!(extract_institutions(text).with_url(), 1);
    }

    #[test]
    fn test_empty_input() {
        let ex = extract_institutions("");
        assert!(ex.records.is_empty());
        assert_eq!(ex.stats, ExtractionStats::default());
    }
}
