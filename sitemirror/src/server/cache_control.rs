//! Tiered `Cache-Control` selection.
//!
//! Rules are glob patterns over the request path (no leading slash), checked
//! in order; the first match wins. `*` matches across `/` and matching is
//! case-insensitive, so `*.png` covers every PNG in the tree.

use glob::{MatchOptions, Pattern, PatternError};

/// Directive for paths no rule matches.
pub const FALLBACK_DIRECTIVE: &str = "public, max-age=3600";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

const IMMUTABLE: &str = "public, max-age=31536000, immutable";
const NO_CACHE: &str = "no-cache";
const WEEK: &str = "public, max-age=604800";
const DAY: &str = "public, max-age=86400";
const HOUR: &str = "public, max-age=3600";

/// Built-in rules, in priority order.
const DEFAULT_RULES: &[(&str, &str)] = &[
    // Build output with an 8 hex digit content hash in the name
    ("*[.-][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f][0-9a-f].*", IMMUTABLE),
    ("data/*.json", NO_CACHE),
    ("*.png", WEEK),
    ("*.jpg", WEEK),
    ("*.jpeg", WEEK),
    ("*.gif", WEEK),
    ("*.webp", WEEK),
    ("*.svg", WEEK),
    ("*.ico", WEEK),
    ("*.woff", WEEK),
    ("*.woff2", WEEK),
    ("*.wav", WEEK),
    ("*.mp3", WEEK),
    ("*.ogg", WEEK),
    ("*.js", DAY),
    ("*.css", DAY),
    ("*.html", HOUR),
    ("*.json", HOUR),
];

/// One `glob = directive` rule.
#[derive(Debug, Clone)]
pub struct CacheRule {
    pattern: Pattern,
    directive: String,
}

impl CacheRule {
    /// Compile a rule.
    pub fn new(pattern: &str, directive: impl Into<String>) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: Pattern::new(pattern)?,
            directive: directive.into(),
        })
    }

    /// The glob source text.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// The `Cache-Control` value applied on a match.
    pub fn directive(&self) -> &str {
        &self.directive
    }

    fn matches(&self, path: &str) -> bool {
        self.pattern.matches_with(path, MATCH_OPTIONS)
    }
}

/// Ordered rule list, fixed at configuration time.
#[derive(Debug, Clone)]
pub struct CacheControlPolicy {
    rules: Vec<CacheRule>,
}

impl Default for CacheControlPolicy {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(pattern, directive)| CacheRule::new(pattern, *directive).ok())
            .collect();
        Self { rules }
    }
}

impl CacheControlPolicy {
    /// A policy with exactly these rules.
    pub fn new(rules: Vec<CacheRule>) -> Self {
        Self { rules }
    }

    /// The default rules with `rules` checked first.
    pub fn with_overrides(rules: Vec<CacheRule>) -> Self {
        let mut policy = Self::new(rules);
        policy.rules.extend(Self::default().rules);
        policy
    }

    /// Rules in match order.
    pub fn rules(&self) -> &[CacheRule] {
        &self.rules
    }

    /// Directive for a request path.
    pub fn directive_for(&self, path: &str) -> &str {
        let path = path.trim_start_matches('/');
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(CacheRule::directive)
            .unwrap_or(FALLBACK_DIRECTIVE)
    }
}
