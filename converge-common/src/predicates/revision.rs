//! Revision counters and "has it rolled forward yet" comparisons.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{Predicate, SnapshotParseError};
use crate::fetch::Summarize;
use crate::poll::Decision;

/// Node or replica identifier → integer revision (or generation).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionSnapshot {
    revisions: BTreeMap<String, i64>,
}

impl RevisionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, revision: i64) -> Self {
        self.revisions.insert(name.into(), revision);
        self
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.revisions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.revisions.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn sum(&self) -> i64 {
        self.revisions.values().copied().fold(0i64, i64::saturating_add)
    }

    /// Parse two-column text: one `name revision` pair per line.
    /// Blank lines are skipped.
    pub fn parse(input: &str) -> Result<Self, SnapshotParseError> {
        let mut snapshot = Self::new();
        for (idx, line) in input.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(name) = fields.next() else {
                continue;
            };
            let line_no = idx + 1;
            let raw = fields.next().ok_or_else(|| SnapshotParseError::Line {
                line: line_no,
                message: format!("missing revision for '{}'", name),
            })?;
            if fields.next().is_some() {
                return Err(SnapshotParseError::Line {
                    line: line_no,
                    message: format!("expected two columns, got '{}'", line.trim()),
                });
            }
            let revision = raw.parse::<i64>().map_err(|e| SnapshotParseError::Line {
                line: line_no,
                message: format!("invalid revision '{}': {}", raw, e),
            })?;
            snapshot.revisions.insert(name.to_string(), revision);
        }
        Ok(snapshot)
    }
}

impl fmt::Display for RevisionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, revision) in &self.revisions {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", name, revision)?;
            first = false;
        }
        Ok(())
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for RevisionSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, i64)>>(iter: I) -> Self {
        Self {
            revisions: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Summarize for RevisionSnapshot {
    fn summarize(&self) -> String {
        if self.is_empty() {
            "<no revisions>".to_string()
        } else {
            self.to_string()
        }
    }
}

type CustomComparator = dyn Fn(&RevisionSnapshot, &RevisionSnapshot) -> bool + Send + Sync;

/// How the current snapshot must relate to the prior one.
#[derive(Clone)]
pub enum RevisionComparator {
    /// Every prior entry is present and strictly greater. An empty prior
    /// never satisfies.
    AllGreater,
    /// Current snapshot is non-empty and every value is identical.
    AllEqual,
    /// Sum of current values differs from the prior sum.
    SumChanged,
    /// `(prior, current) -> satisfied`.
    Custom(Arc<CustomComparator>),
}

impl RevisionComparator {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RevisionSnapshot, &RevisionSnapshot) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn holds(&self, prior: &RevisionSnapshot, current: &RevisionSnapshot) -> bool {
        match self {
            Self::AllGreater => {
                !prior.is_empty()
                    && prior
                        .iter()
                        .all(|(name, old)| current.get(name).is_some_and(|new| new > old))
            }
            Self::AllEqual => {
                let mut values = current.revisions.values();
                match values.next() {
                    Some(first) => values.all(|v| v == first),
                    None => false,
                }
            }
            Self::SumChanged => current.sum() != prior.sum(),
            Self::Custom(f) => f(prior, current),
        }
    }
}

impl fmt::Debug for RevisionComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllGreater => write!(f, "AllGreater"),
            Self::AllEqual => write!(f, "AllEqual"),
            Self::SumChanged => write!(f, "SumChanged"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Compares each fetched snapshot against one captured before polling began.
#[derive(Debug, Clone)]
pub struct RevisionDelta {
    prior: RevisionSnapshot,
    comparator: RevisionComparator,
}

impl RevisionDelta {
    pub fn new(prior: RevisionSnapshot, comparator: RevisionComparator) -> Self {
        Self { prior, comparator }
    }

    pub fn prior(&self) -> &RevisionSnapshot {
        &self.prior
    }
}

impl Predicate<RevisionSnapshot> for RevisionDelta {
    fn decide(&self, current: &RevisionSnapshot) -> Decision {
        if self.comparator.holds(&self.prior, current) {
            Decision::Satisfied
        } else {
            Decision::NotYet
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, i64)]) -> RevisionSnapshot {
        entries.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_all_greater() {
        let delta = RevisionDelta::new(snap(&[("a", 1), ("b", 2)]), RevisionComparator::AllGreater);
        assert_eq!(delta.decide(&snap(&[("a", 2), ("b", 3)])), Decision::Satisfied);
        assert_eq!(delta.decide(&snap(&[("a", 2), ("b", 2)])), Decision::NotYet);
    }

    #[test]
    fn test_all_greater_requires_every_prior_entry() {
        let delta = RevisionDelta::new(snap(&[("a", 1), ("b", 2)]), RevisionComparator::AllGreater);
        assert_eq!(delta.decide(&snap(&[("a", 5)])), Decision::NotYet);
    }

    #[test]
    fn test_all_greater_empty_prior_never_satisfies() {
        let delta = RevisionDelta::new(RevisionSnapshot::new(), RevisionComparator::AllGreater);
        assert_eq!(delta.decide(&snap(&[("a", 5)])), Decision::NotYet);
    }

    #[test]
    fn test_all_equal() {
        let delta = RevisionDelta::new(RevisionSnapshot::new(), RevisionComparator::AllEqual);
        assert_eq!(
            delta.decide(&snap(&[("master-0", 7), ("master-1", 7), ("master-2", 7)])),
            Decision::Satisfied
        );
        assert_eq!(
            delta.decide(&snap(&[("master-0", 7), ("master-1", 6)])),
            Decision::NotYet
        );
        assert_eq!(delta.decide(&RevisionSnapshot::new()), Decision::NotYet);
    }

    #[test]
    fn test_sum_changed() {
        let delta = RevisionDelta::new(snap(&[("a", 1), ("b", 2)]), RevisionComparator::SumChanged);
        assert_eq!(delta.decide(&snap(&[("a", 1), ("b", 2)])), Decision::NotYet);
        assert_eq!(delta.decide(&snap(&[("a", 1), ("b", 3)])), Decision::Satisfied);
    }

    #[test]
    fn test_custom_comparator() {
        let grew = RevisionComparator::custom(|prior, current| current.len() > prior.len());
        let delta = RevisionDelta::new(snap(&[("a", 1)]), grew);
        assert_eq!(delta.decide(&snap(&[("a", 1)])), Decision::NotYet);
        assert_eq!(delta.decide(&snap(&[("a", 1), ("b", 1)])), Decision::Satisfied);
    }

    #[test]
    fn test_parse_two_column_text() {
        let parsed = RevisionSnapshot::parse("master-0 12\n\nmaster-1   13\n").unwrap();
        assert_eq!(parsed, snap(&[("master-0", 12), ("master-1", 13)]));
        assert_eq!(parsed.to_string(), "master-0:12,master-1:13");
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(matches!(
            RevisionSnapshot::parse("master-0\n"),
            Err(SnapshotParseError::Line { line: 1, .. })
        ));
        assert!(matches!(
            RevisionSnapshot::parse("a 1\nb two\n"),
            Err(SnapshotParseError::Line { line: 2, .. })
        ));
        assert!(matches!(
            RevisionSnapshot::parse("a 1 extra"),
            Err(SnapshotParseError::Line { line: 1, .. })
        ));
    }

    mod proptest_revision {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            // Test 1: Bumping every entry satisfies AllGreater
            #[test]
            fn test_bumped_snapshot_is_greater(
                entries in prop::collection::btree_map("[a-z]{1,6}", -1000i64..1000, 1..8),
                bump in 1i64..100,
            ) {
                let prior: RevisionSnapshot = entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
                let current: RevisionSnapshot = entries.iter().map(|(k, v)| (k.clone(), v + bump)).collect();
                let delta = RevisionDelta::new(prior.clone(), RevisionComparator::AllGreater);
                prop_assert_eq!(delta.decide(&current), Decision::Satisfied);
                prop_assert_eq!(delta.decide(&prior), Decision::NotYet);
            }

            // Test 2: Parsing arbitrary text never panics
            #[test]
            fn test_parse_no_panic(s in ".*") {
                let _ = RevisionSnapshot::parse(&s);
            }
        }
    }
}
