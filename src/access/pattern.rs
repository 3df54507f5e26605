//! Resource pattern matching
//!
//! Patterns are literal text with two substitutions:
//! - `*` matches any run of characters, including `/`
//! - `{USER}` is replaced by the requesting user's name, matched literally
//!
//! The whole value must match. Compiled expressions are kept in an LRU cache
//! keyed by the final regex source, so `{USER}` patterns are cached per user.

use crate::model::actions::{USER_PLACEHOLDER, WILDCARD};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::warn;

/// Shared cache of compiled resource patterns
pub struct PatternCache {
    cache: Mutex<LruCache<String, Option<Arc<Regex>>>>,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PatternCache {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Whether `value` matches `pattern` for `user`
    ///
    /// # Examples
    /// ```
    /// use persona_authz::access::PatternCache;
    ///
    /// let cache = PatternCache::new(16);
    /// assert!(cache.matches("db/*", "db/schema/table", "alice"));
    /// assert!(cache.matches("home/{USER}/*", "home/alice/notes", "alice"));
    /// assert!(!cache.matches("home/{USER}/*", "home/bob/notes", "alice"));
    /// assert!(!cache.matches("db.schema", "dbXschema", "alice"));
    /// ```
    pub fn matches(&self, pattern: &str, value: &str, user: &str) -> bool {
        if pattern == WILDCARD {
            return true;
        }
        if !pattern.contains('*') && !pattern.contains(USER_PLACEHOLDER) {
            return pattern == value;
        }

        match self.compiled(pattern, user) {
            Some(regex) => regex.is_match(value),
            None => false,
        }
    }

    /// Whether any value matches any pattern
    pub fn matches_any<'a, I>(&self, patterns: &[String], values: I, user: &str) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        values
            .into_iter()
            .any(|v| patterns.iter().any(|p| self.matches(p, v, user)))
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    fn compiled(&self, pattern: &str, user: &str) -> Option<Arc<Regex>> {
        let source = to_regex_source(pattern, user);

        if let Some(hit) = self.cache.lock().get(&source) {
            return hit.clone();
        }

        let compiled = match Regex::new(&source) {
            Ok(regex) => Some(Arc::new(regex)),
            Err(e) => {
                warn!(pattern, error = %e, "unusable resource pattern");
                None
            }
        };
        self.cache.lock().put(source, compiled.clone());
        compiled
    }
}

fn to_regex_source(pattern: &str, user: &str) -> String {
    let user = regex::escape(user);
    let body: Vec<String> = pattern
        .split(USER_PLACEHOLDER)
        .map(|part| {
            part.split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        })
        .collect();
    format!("^(?s:{})$", body.join(&user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_source() {
        assert_eq!(to_regex_source("db/*", "u"), "^(?s:db/.*)$");
        assert_eq!(to_regex_source("a.b*", "u"), "^(?s:a\\.b.*)$");
        assert_eq!(to_regex_source("{USER}/x", "j.doe"), "^(?s:j\\.doe/x)$");
    }

    #[test]
    fn test_wildcards_span_segments() {
        let cache = PatternCache::new(8);
        assert!(cache.matches("default/*", "default/snowflake/db/orders", "u"));
        assert!(cache.matches("*orders*", "default/snowflake/db/orders_v2", "u"));
        assert!(!cache.matches("default/*", "other/snowflake", "u"));
        assert!(cache.matches("*", "", "u"));
    }

    #[test]
    fn test_literal_patterns_skip_cache() {
        let cache = PatternCache::new(8);
        assert!(cache.matches("Table", "Table", "u"));
        assert!(!cache.matches("Table", "Tables", "u"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_user_placeholder_is_literal() {
        let cache = PatternCache::new(8);
        // a user name containing `*` must not widen the match
        assert!(!cache.matches("home/{USER}", "home/anything", "*"));
        assert!(cache.matches("home/{USER}", "home/*", "*"));
    }

    #[test]
    fn test_cache_is_bounded() {
        let cache = PatternCache::new(2);
        cache.matches("a*", "ab", "u");
        cache.matches("b*", "bc", "u");
        cache.matches("c*", "cd", "u");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_matches_any() {
        let cache = PatternCache::new(8);
        let patterns = vec!["Process".to_string(), "Cat*".to_string()];
        assert!(cache.matches_any(&patterns, ["Table", "Catalog"], "u"));
        assert!(!cache.matches_any(&patterns, ["Table", "Column"], "u"));
    }
}
