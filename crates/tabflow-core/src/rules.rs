//! URL match rules
//!
//! Shared by flow binding rules and url-trigger specs. Matching is
//! normalized prefix/domain comparison only; no regex.

use serde::{Deserialize, Serialize};
use url::Url;

/// A normalized URL match rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UrlRule {
    /// The full URL starts with the given prefix
    UrlPrefix(String),

    /// Host equals the domain, or is a subdomain of it
    Domain(String),

    /// The URL path starts with the given prefix
    PathPrefix(String),
}

impl UrlRule {
    /// Whether the rule matches the given URL
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            Self::UrlPrefix(prefix) => url.as_str().starts_with(prefix),
            Self::Domain(domain) => match url.host_str() {
                // Safe-subdomain match: `example.com` matches `www.example.com`
                // but never `notexample.com`.
                Some(host) => host == domain || host.ends_with(&format!(".{domain}")),
                None => false,
            },
            Self::PathPrefix(prefix) => url.path().starts_with(prefix),
        }
    }
}

/// Whether any rule in the list matches; an empty list matches nothing
pub fn any_rule_matches(rules: &[UrlRule], url: &Url) -> bool {
    rules.iter().any(|r| r.matches(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn domain_matches_subdomains_safely() {
        let rule = UrlRule::Domain("example.com".to_string());
        assert!(rule.matches(&url("https://example.com/x")));
        assert!(rule.matches(&url("https://www.example.com/x")));
        assert!(rule.matches(&url("https://deep.www.example.com/")));
        assert!(!rule.matches(&url("https://notexample.com/x")));
        assert!(!rule.matches(&url("https://example.com.evil.net/")));
    }

    #[test]
    fn url_prefix_is_literal() {
        let rule = UrlRule::UrlPrefix("https://example.com/app".to_string());
        assert!(rule.matches(&url("https://example.com/app/settings")));
        assert!(!rule.matches(&url("https://example.com/other")));
    }

    #[test]
    fn path_prefix_ignores_host() {
        let rule = UrlRule::PathPrefix("/admin".to_string());
        assert!(rule.matches(&url("https://a.example/admin/users")));
        assert!(rule.matches(&url("https://b.example/admin")));
        assert!(!rule.matches(&url("https://a.example/public")));
    }

    #[test]
    fn empty_rule_list_matches_nothing() {
        assert!(!any_rule_matches(&[], &url("https://example.com/")));
    }

    #[test]
    fn rule_serialization_round_trips() {
        let rule = UrlRule::Domain("example.com".to_string());
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"kind\":\"domain\""));
        let parsed: UrlRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, parsed);
    }
}
