//! Host allow/deny policy
//!
//! The single home of the regex semantics: blacklist wins over whitelist,
//! an empty whitelist means open, and patterns are applied exactly as the
//! caller provided them.

use regex::Regex;

use crate::config::NetworkFilter;
use crate::error::{SandboxError, SandboxResult};
use crate::models::PolicyAction;

/// Compiled allow/deny policy
#[derive(Debug)]
pub struct FilterPolicy {
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
}

impl FilterPolicy {
    /// Compile a filter; an invalid pattern is a caller error.
    pub fn compile(filter: &NetworkFilter) -> SandboxResult<Self> {
        let compile = |patterns: &[String]| -> SandboxResult<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        SandboxError::BadRequest(format!("invalid filter pattern {p:?}: {e}"))
                    })
                })
                .collect()
        };
        Ok(Self {
            whitelist: compile(&filter.whitelist)?,
            blacklist: compile(&filter.blacklist)?,
        })
    }

    /// Decide whether `host` may be contacted.
    pub fn decide(&self, host: &str) -> PolicyAction {
        if self.blacklist.iter().any(|re| re.is_match(host)) {
            return PolicyAction::Block;
        }
        if self.whitelist.is_empty() {
            return PolicyAction::Allow;
        }
        if self.whitelist.iter().any(|re| re.is_match(host)) {
            PolicyAction::Allow
        } else {
            PolicyAction::Block
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(whitelist: &[&str], blacklist: &[&str]) -> FilterPolicy {
        FilterPolicy::compile(&NetworkFilter {
            whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
            blacklist: blacklist.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_empty_lists_allow_everything() {
        let p = policy(&[], &[]);
        assert_eq!(p.decide("example.com"), PolicyAction::Allow);
        assert_eq!(p.decide("pypi.org"), PolicyAction::Allow);
    }

    #[test]
    fn test_whitelist_only() {
        let p = policy(&[r"^pypi\.org$", r"^files\.pythonhosted\.org$"], &[]);
        assert_eq!(p.decide("pypi.org"), PolicyAction::Allow);
        assert_eq!(p.decide("files.pythonhosted.org"), PolicyAction::Allow);
        assert_eq!(p.decide("example.com"), PolicyAction::Block);
        // Anchoring comes from the caller's pattern
        assert_eq!(p.decide("evil-pypi.org"), PolicyAction::Block);
    }

    #[test]
    fn test_blacklist_only() {
        let p = policy(&[], &[r"^example\.com$"]);
        assert_eq!(p.decide("example.com"), PolicyAction::Block);
        assert_eq!(p.decide("other.com"), PolicyAction::Allow);
    }

    #[test]
    fn test_blacklist_precedes_whitelist() {
        let p = policy(&[r"^example\.com$"], &[r"^example\.com$"]);
        assert_eq!(p.decide("example.com"), PolicyAction::Block);
    }

    #[test]
    fn test_unanchored_pattern_matches_substring() {
        // Patterns are applied unchanged: no implicit anchoring
        let p = policy(&[], &[r"example"]);
        assert_eq!(p.decide("www.example.com"), PolicyAction::Block);
        assert_eq!(p.decide("unrelated.org"), PolicyAction::Allow);
    }

    #[test]
    fn test_invalid_pattern_is_bad_request() {
        let result = FilterPolicy::compile(&NetworkFilter {
            whitelist: vec!["(unclosed".to_string()],
            blacklist: vec![],
        });
        assert!(matches!(result, Err(SandboxError::BadRequest(_))));
    }
}
