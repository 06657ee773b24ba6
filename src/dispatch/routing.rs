//! URL pattern matching and the frozen routing snapshot.
//!
//! Servlet mapping precedence follows the classic container rules: exact
//! match first, then the longest matching `/prefix/*` mapping, then an
//! `*.ext` extension mapping against the final path segment, and finally the
//! default mapping `/`. A `*` anywhere else in a pattern is a literal
//! character, not a wildcard.

use crate::app::{FilterMapping, FilterScope};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    /// Whole-path literal, e.g. `/orders/new`.
    Exact(String),
    /// `/prefix/*`, stored without the trailing `/*`. Matches the prefix
    /// itself and anything below it. The root pattern `/*` stores `""`.
    Prefix(String),
    /// `*.ext`, stored as the bare extension.
    Extension(String),
    /// The default mapping `/`; matches everything, lowest precedence.
    Default,
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Option<Self> {
        if pattern == "/" {
            return Some(Self::Default);
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if prefix.is_empty() || prefix.starts_with('/') {
                return Some(Self::Prefix(prefix.to_string()));
            }
            return None;
        }
        if let Some(ext) = pattern.strip_prefix("*.") {
            if !ext.is_empty() && !ext.contains('/') {
                return Some(Self::Extension(ext.to_string()));
            }
            return None;
        }
        if pattern.starts_with('/') {
            return Some(Self::Exact(pattern.to_string()));
        }
        None
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(p) => p == path,
            Self::Prefix(p) => path == p || path.starts_with(&format!("{p}/")),
            Self::Extension(ext) => last_segment_extension(path) == Some(ext.as_str()),
            Self::Default => true,
        }
    }
}

fn last_segment_extension(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// A resolved servlet mapping plus the path split it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub servlet_name: String,
    /// Path of the matched mapping, relative to the context path.
    pub servlet_path: String,
    /// Remainder below a prefix mapping, when any.
    pub path_info: Option<String>,
}

/// Immutable routing snapshot built once at application startup.
#[derive(Debug, Default)]
pub struct RoutingTable {
    exact: HashMap<String, String>,
    /// Sorted by prefix length, longest first.
    prefixes: Vec<(String, String)>,
    extensions: HashMap<String, String>,
    default_servlet: Option<String>,
    filter_mappings: Vec<FilterMapping>,
}

impl RoutingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn build(
        servlet_mappings: Vec<(UrlPattern, String)>,
        filter_mappings: Vec<FilterMapping>,
    ) -> Self {
        let mut table = Self {
            filter_mappings,
            ..Self::default()
        };
        for (pattern, servlet) in servlet_mappings {
            match pattern {
                UrlPattern::Exact(p) => {
                    table.exact.insert(p, servlet);
                }
                UrlPattern::Prefix(p) => {
                    table.prefixes.retain(|(existing, _)| *existing != p);
                    table.prefixes.push((p, servlet));
                }
                UrlPattern::Extension(ext) => {
                    table.extensions.insert(ext, servlet);
                }
                UrlPattern::Default => table.default_servlet = Some(servlet),
            }
        }
        table
            .prefixes
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        table
    }

    /// Match a context-relative path against the mappings, in precedence
    /// order.
    pub fn route(&self, path: &str) -> Option<RouteMatch> {
        if let Some(servlet) = self.exact.get(path) {
            return Some(RouteMatch {
                servlet_name: servlet.clone(),
                servlet_path: path.to_string(),
                path_info: None,
            });
        }

        for (prefix, servlet) in &self.prefixes {
            if path == prefix || path.starts_with(&format!("{prefix}/")) {
                let rest = &path[prefix.len()..];
                return Some(RouteMatch {
                    servlet_name: servlet.clone(),
                    servlet_path: prefix.clone(),
                    path_info: if rest.is_empty() {
                        None
                    } else {
                        Some(rest.to_string())
                    },
                });
            }
        }

        if let Some(ext) = last_segment_extension(path) {
            if let Some(servlet) = self.extensions.get(ext) {
                return Some(RouteMatch {
                    servlet_name: servlet.clone(),
                    servlet_path: path.to_string(),
                    path_info: None,
                });
            }
        }

        self.default_servlet.as_ref().map(|servlet| RouteMatch {
            servlet_name: servlet.clone(),
            servlet_path: path.to_string(),
            path_info: None,
        })
    }

    /// Names of filters applying to this invocation, in mapping order with
    /// duplicates removed. Chain ordering by priority happens at dispatch,
    /// where registrations are in reach.
    pub fn filters_for(&self, path: &str, servlet_name: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for mapping in &self.filter_mappings {
            let applies = match &mapping.scope {
                FilterScope::Pattern(pattern) => pattern.matches(path),
                FilterScope::Servlet(name) => name == servlet_name,
            };
            if applies && !names.iter().any(|n| *n == mapping.filter_name) {
                names.push(mapping.filter_name.clone());
            }
        }
        names
    }

    pub fn servlet_mapping_count(&self) -> usize {
        self.exact.len()
            + self.prefixes.len()
            + self.extensions.len()
            + usize::from(self.default_servlet.is_some())
    }

    pub fn filter_mapping_count(&self) -> usize {
        self.filter_mappings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(mappings: &[(&str, &str)]) -> RoutingTable {
        let parsed = mappings
            .iter()
            .map(|(p, s)| (UrlPattern::parse(p).unwrap(), s.to_string()))
            .collect();
        RoutingTable::build(parsed, Vec::new())
    }

    #[test]
    fn parse_rejects_malformed_patterns() {
        assert!(UrlPattern::parse("orders").is_none());
        assert!(UrlPattern::parse("a/*").is_none());
        assert!(UrlPattern::parse("*.").is_none());
        assert!(UrlPattern::parse("*.a/b").is_none());
        assert_eq!(UrlPattern::parse("/*"), Some(UrlPattern::Prefix(String::new())));
    }

    #[test]
    fn exact_beats_prefix_beats_extension_beats_default() {
        let table = table(&[
            ("/a/b", "exact"),
            ("/a/*", "prefix"),
            ("*.txt", "ext"),
            ("/", "default"),
        ]);

        assert_eq!(table.route("/a/b").unwrap().servlet_name, "exact");
        assert_eq!(table.route("/a/b/c.txt").unwrap().servlet_name, "prefix");
        assert_eq!(table.route("/notes.txt").unwrap().servlet_name, "ext");
        assert_eq!(table.route("/other").unwrap().servlet_name, "default");
    }

    #[test]
    fn longest_prefix_wins() {
        let table = table(&[("/a/*", "short"), ("/a/b/*", "long")]);
        assert_eq!(table.route("/a/b/c").unwrap().servlet_name, "long");
        assert_eq!(table.route("/a/x").unwrap().servlet_name, "short");
    }

    #[test]
    fn prefix_match_splits_servlet_path_and_path_info() {
        let table = table(&[("/api/*", "api")]);

        let m = table.route("/api/orders/7").unwrap();
        assert_eq!(m.servlet_path, "/api");
        assert_eq!(m.path_info.as_deref(), Some("/orders/7"));

        // The bare prefix matches with no remainder.
        let m = table.route("/api").unwrap();
        assert_eq!(m.path_info, None);

        // A shared name prefix that is not a path boundary does not match.
        assert!(table.route("/apiary").is_none());
    }

    #[test]
    fn extension_matches_only_the_last_segment() {
        let table = table(&[("*.jsp", "jsp")]);
        assert_eq!(table.route("/a/page.jsp").unwrap().servlet_name, "jsp");
        assert!(table.route("/a.jsp/page").is_none());
        assert!(table.route("/plain").is_none());
    }

    #[test]
    fn mid_pattern_star_is_literal() {
        let table = table(&[("/a*b", "star")]);
        assert_eq!(table.route("/a*b").unwrap().servlet_name, "star");
        assert!(table.route("/axb").is_none());
    }

    #[test]
    fn no_mapping_means_no_match() {
        let table = table(&[("/a", "a")]);
        assert!(table.route("/b").is_none());
    }
}
