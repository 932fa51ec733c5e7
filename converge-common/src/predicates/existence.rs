//! Presence or absence of named resources in an enumeration.

use std::collections::BTreeSet;
use std::fmt;

use super::Predicate;
use crate::fetch::Summarize;
use crate::poll::Decision;

/// Resource names from an enumeration command, e.g. `get secrets -o name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    names: BTreeSet<String>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split on any whitespace; every token is one name.
    pub fn parse(input: &str) -> Self {
        input.split_whitespace().collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Exact match, or a `kind/name` entry whose name part matches.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
            || self
                .names
                .iter()
                .any(|entry| entry.rsplit_once('/').is_some_and(|(_, short)| short == name))
    }
}

impl<S: Into<String>> FromIterator<S> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        write!(f, "{}", names.join(" "))
    }
}

impl Summarize for ResourceSet {
    fn summarize(&self) -> String {
        if self.is_empty() {
            "<no resources>".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Whether the named resources must exist or be gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceMode {
    Presence,
    Absence,
}

/// Waits for every named resource to appear (or, in absence mode, for all
/// of them to be deleted).
#[derive(Debug, Clone)]
pub struct Existence {
    names: Vec<String>,
    mode: ExistenceMode,
}

impl Existence {
    pub fn present<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            mode: ExistenceMode::Presence,
        }
    }

    pub fn absent<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            mode: ExistenceMode::Absence,
        }
    }

    pub fn mode(&self) -> ExistenceMode {
        self.mode
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Predicate<ResourceSet> for Existence {
    fn decide(&self, observed: &ResourceSet) -> Decision {
        let holds = match self.mode {
            ExistenceMode::Presence => self.names.iter().all(|n| observed.contains(n)),
            ExistenceMode::Absence => !self.names.iter().any(|n| observed.contains(n)),
        };
        if holds {
            Decision::Satisfied
        } else {
            Decision::NotYet
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_requires_every_name() {
        let predicate = Existence::present(["etcd-client", "serving-cert"]);
        let partial = ResourceSet::parse("etcd-client\nother\n");
        let full = ResourceSet::parse("etcd-client serving-cert other");
        assert_eq!(predicate.decide(&partial), Decision::NotYet);
        assert_eq!(predicate.decide(&full), Decision::Satisfied);
    }

    #[test]
    fn test_absence_requires_every_name_gone() {
        let predicate = Existence::absent(["test-ns"]);
        assert_eq!(
            predicate.decide(&ResourceSet::parse("default test-ns")),
            Decision::NotYet
        );
        assert_eq!(
            predicate.decide(&ResourceSet::parse("default kube-system")),
            Decision::Satisfied
        );
    }

    #[test]
    fn test_kind_prefixed_names_match() {
        let set = ResourceSet::parse("secret/etcd-client\nsecret/serving-cert\n");
        assert!(set.contains("etcd-client"));
        assert!(set.contains("secret/etcd-client"));
        assert!(!set.contains("etcd"));
    }

    #[test]
    fn test_empty_enumeration() {
        let set = ResourceSet::parse("  \n");
        assert!(set.is_empty());
        assert_eq!(set.summarize(), "<no resources>");
        assert_eq!(Existence::present(["x"]).decide(&set), Decision::NotYet);
        assert_eq!(Existence::absent(["x"]).decide(&set), Decision::Satisfied);
    }
}
