//! Compiled substring sets for referrer and slot-id matching.
//!
//! Referrer allow/deny lists, affiliate detection and web-view suppression
//! all ask the same question: does the haystack contain any of N configured
//! substrings? Each list is compiled once into an Aho-Corasick automaton.

use aho_corasick::AhoCorasick;

/// A set of literal substrings matched case-sensitively.
#[derive(Debug, Clone, Default)]
pub struct SubstringSet {
    patterns: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl SubstringSet {
    /// Compile a substring set. Empty strings are dropped.
    pub fn new<I, S>(patterns: I) -> Result<Self, aho_corasick::BuildError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.is_empty())
            .collect();
        if patterns.is_empty() {
            return Ok(Self::default());
        }
        let automaton = AhoCorasick::new(&patterns)?;
        Ok(Self {
            patterns,
            automaton: Some(automaton),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `haystack` contains at least one pattern. Always false when empty.
    #[must_use]
    pub fn matches(&self, haystack: &str) -> bool {
        self.automaton
            .as_ref()
            .is_some_and(|ac| ac.is_match(haystack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_never_matches() {
        let set = SubstringSet::new(Vec::<String>::new()).unwrap();
        assert!(set.is_empty());
        assert!(!set.matches("anything"));
    }

    #[test]
    fn empty_patterns_are_dropped() {
        let set = SubstringSet::new(["", "google"]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(!set.matches("bing.com"));
    }

    #[test]
    fn matches_any_pattern() {
        let set = SubstringSet::new(["facebook", "t.co"]).unwrap();
        assert!(set.matches("https://m.facebook.com/story"));
        assert!(set.matches("https://t.co/abc"));
        assert!(!set.matches("https://example.com"));
    }
}
