/// A URL pattern: either a single string or a set of alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    One(String),
    Any(Vec<String>),
}

impl Pattern {
    fn matches_exact(&self, url: &str) -> bool {
        match self {
            Pattern::One(s) => s == url,
            Pattern::Any(list) => list.iter().any(|s| s == url),
        }
    }

    fn matches_substring(&self, url: &str) -> bool {
        match self {
            Pattern::One(s) => url.contains(s.as_str()),
            Pattern::Any(list) => list.iter().any(|s| url.contains(s.as_str())),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::One(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::One(s)
    }
}

impl From<Vec<String>> for Pattern {
    fn from(list: Vec<String>) -> Self {
        Pattern::Any(list)
    }
}

impl From<Vec<&str>> for Pattern {
    fn from(list: Vec<&str>) -> Self {
        Pattern::Any(list.into_iter().map(str::to_string).collect())
    }
}

/// Interest filter for observed connection URLs.
///
/// A filter with neither criterion set matches nothing (fail-closed); a
/// detector configured that way observes no connections. When both criteria
/// are set, satisfying either one is a match.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    /// Exact-equality criterion.
    pub url: Option<Pattern>,
    /// Substring-containment criterion.
    pub url_contains: Option<Pattern>,
}

impl UrlFilter {
    /// Filter matching the given URL exactly.
    pub fn exact(url: impl Into<Pattern>) -> Self {
        Self {
            url: Some(url.into()),
            url_contains: None,
        }
    }

    /// Filter matching any URL that contains the given fragment(s).
    pub fn contains(fragment: impl Into<Pattern>) -> Self {
        Self {
            url: None,
            url_contains: Some(fragment.into()),
        }
    }

    /// Whether `url` satisfies this filter. Pure; no side effects.
    pub fn matches(&self, url: &str) -> bool {
        let exact = self
            .url
            .as_ref()
            .is_some_and(|p| p.matches_exact(url));
        let substring = self
            .url_contains
            .as_ref()
            .is_some_and(|p| p.matches_substring(url));
        exact || substring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── fail-closed ────────────────────────────────────────────────

    #[test]
    fn empty_filter_matches_nothing() {
        let f = UrlFilter::default();
        assert!(!f.matches("wss://ws-live-data.polymarket.com"));
        assert!(!f.matches(""));
    }

    #[test]
    fn empty_lists_match_nothing() {
        let f = UrlFilter {
            url: Some(Pattern::Any(vec![])),
            url_contains: Some(Pattern::Any(vec![])),
        };
        assert!(!f.matches("wss://x/stream"));
        assert!(!f.matches(""));
    }

    // ── exact ──────────────────────────────────────────────────────

    #[test]
    fn exact_single() {
        let f = UrlFilter::exact("wss://x/stream");
        assert!(f.matches("wss://x/stream"));
        assert!(!f.matches("wss://x/stream?a=1"));
        assert!(!f.matches("wss://x"));
    }

    #[test]
    fn exact_list_membership() {
        let f = UrlFilter::exact(vec!["wss://a", "wss://b"]);
        assert!(f.matches("wss://a"));
        assert!(f.matches("wss://b"));
        assert!(!f.matches("wss://c"));
    }

    // ── substring ──────────────────────────────────────────────────

    #[test]
    fn contains_single() {
        let f = UrlFilter::contains("stream");
        assert!(f.matches("wss://x/stream?a=1"));
        assert!(!f.matches("wss://x/book"));
    }

    #[test]
    fn contains_any_member() {
        let f = UrlFilter::contains(vec!["clob", "rtds"]);
        assert!(f.matches("wss://ws-subscriptions-clob.polymarket.com/ws/market"));
        assert!(f.matches("wss://host/rtds"));
        assert!(!f.matches("wss://host/gamma"));
    }

    #[test]
    fn contains_empty_fragment_matches_everything() {
        // "" is a substring of every string, including "".
        let f = UrlFilter::contains("");
        assert!(f.matches("wss://anything"));
        assert!(f.matches(""));
    }

    // ── combined ───────────────────────────────────────────────────

    #[test]
    fn either_rule_satisfied_is_a_match() {
        let f = UrlFilter {
            url: Some(Pattern::One("wss://exact".to_string())),
            url_contains: Some(Pattern::One("frag".to_string())),
        };
        assert!(f.matches("wss://exact"));
        assert!(f.matches("wss://host/frag/feed"));
        assert!(!f.matches("wss://other"));
    }
}
