//! "No abnormal lines" checks over command or log output.

use regex::Regex;

use super::Predicate;
use crate::fetch::FetchErrorPolicy;
use crate::poll::Decision;

/// Counts lines matching `interesting` but not `exclude`.
///
/// Satisfied iff the count is zero. A failed fetch is fatal by default:
/// an empty listing caused by a broken command must not read as "clean".
#[derive(Debug, Clone)]
pub struct RegexCount {
    interesting: Regex,
    exclude: Option<Regex>,
}

impl RegexCount {
    pub fn new(interesting: Regex) -> Self {
        Self {
            interesting,
            exclude: None,
        }
    }

    pub fn excluding(mut self, exclude: Regex) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Compile both patterns.
    pub fn from_patterns(interesting: &str, exclude: Option<&str>) -> Result<Self, regex::Error> {
        let mut predicate = Self::new(Regex::new(interesting)?);
        if let Some(exclude) = exclude {
            predicate = predicate.excluding(Regex::new(exclude)?);
        }
        Ok(predicate)
    }

    /// Lines that count against the condition.
    pub fn matching_lines<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.lines()
            .filter(|line| self.interesting.is_match(line))
            .filter(|line| !self.exclude.as_ref().is_some_and(|ex| ex.is_match(line)))
            .collect()
    }

    pub fn count(&self, text: &str) -> usize {
        self.matching_lines(text).len()
    }
}

impl Predicate<str> for RegexCount {
    fn decide(&self, text: &str) -> Decision {
        if self.count(text) == 0 {
            Decision::Satisfied
        } else {
            Decision::NotYet
        }
    }

    fn fetch_error_policy(&self) -> FetchErrorPolicy {
        FetchErrorPolicy::Fatal
    }
}

impl Predicate<String> for RegexCount {
    fn decide(&self, text: &String) -> Decision {
        Predicate::<str>::decide(self, text.as_str())
    }

    fn fetch_error_policy(&self) -> FetchErrorPolicy {
        FetchErrorPolicy::Fatal
    }
}
