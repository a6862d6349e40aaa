//! Include/exclude keyword filters over collected links.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A set of lowercase keywords; empty means "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSet(BTreeSet<String>);

impl KeywordSet {
    /// Parses a comma-separated list, trimming, lowercasing and dropping blanks.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        )
    }

    /// Whether no keyword is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keywords.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates keywords in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether any keyword occurs in `haystack` (expected lowercase).
    #[must_use]
    pub fn any_in(&self, haystack: &str) -> bool {
        self.0.iter().any(|keyword| haystack.contains(keyword.as_str()))
    }

    /// Keywords as owned strings.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// Include and exclude keyword sets, evaluated conjunctively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    /// Links must contain at least one of these (when non-empty).
    pub include: KeywordSet,
    /// Links must contain none of these (when non-empty).
    pub exclude: KeywordSet,
}

impl FilterSet {
    /// Creates an empty filter set that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the include keywords.
    #[must_use]
    pub fn with_include(mut self, include: KeywordSet) -> Self {
        self.include = include;
        self
    }

    /// Sets the exclude keywords.
    #[must_use]
    pub fn with_exclude(mut self, exclude: KeywordSet) -> Self {
        self.exclude = exclude;
        self
    }

    /// Whether both sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a single link passes both filters.
    #[must_use]
    pub fn matches(&self, link: &str) -> bool {
        let lowered = link.to_lowercase();
        if !self.include.is_empty() && !self.include.any_in(&lowered) {
            return false;
        }
        if !self.exclude.is_empty() && self.exclude.any_in(&lowered) {
            return false;
        }
        true
    }

    /// Filters a sorted, unique link set into a sorted list.
    #[must_use]
    pub fn apply(&self, links: &BTreeSet<String>) -> Vec<String> {
        links
            .iter()
            .filter(|link| self.matches(link))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn links(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_keyword_parse() {
        let set = KeywordSet::parse(" Python, ,TELEGRAM ,bot,,python ");
        assert_eq!(set.to_vec(), vec!["bot", "python", "telegram"]);
        assert!(KeywordSet::parse(" , ").is_empty());
    }

    #[test]
    fn test_empty_filters_accept_everything() {
        let filters = FilterSet::new();
        let all = links(&["http://b.test/", "http://a.test/"]);
        assert_eq!(filters.apply(&all), vec!["http://a.test/", "http://b.test/"]);
    }

    #[test]
    fn test_include_scenario() {
        let filters = FilterSet::new().with_include(KeywordSet::parse("docs"));
        let all = links(&["http://a.test/docs/1", "http://a.test/blog/2"]);
        assert_eq!(filters.apply(&all), vec!["http://a.test/docs/1"]);
    }

    #[test]
    fn test_include_and_exclude_compose_conjunctively() {
        let filters = FilterSet::new()
            .with_include(KeywordSet::parse("docs"))
            .with_exclude(KeywordSet::parse("draft"));

        assert!(filters.matches("http://a.test/docs/final"));
        assert!(!filters.matches("http://a.test/docs/draft"));
        assert!(!filters.matches("http://a.test/blog/final"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let filters = FilterSet::new().with_exclude(KeywordSet::parse("ADS"));
        assert!(!filters.matches("http://a.test/Ads/banner"));
        assert!(filters.matches("http://a.test/docs"));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let filters = FilterSet::new().with_include(KeywordSet::parse("a, c"));
        let all = links(&["http://c.test/", "http://a.test/", "http://b.test/"]);
        let first = filters.apply(&all);
        let second = filters.apply(&all);
        assert_eq!(first, second);
        assert_eq!(first, vec!["http://a.test/", "http://c.test/"]);
    }
}
