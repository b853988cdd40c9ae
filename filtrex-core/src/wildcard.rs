//! Shell-style wildcard matching over rule text.
//!
//! `*` matches any run of characters, `?` matches exactly one; everything
//! else is literal. Patterns are compiled once per compilation and matched
//! against the full, trimmed rule text.

use regex::Regex;

use crate::error::{CompilerError, Result};

#[derive(Debug, Clone)]
pub struct WildcardPattern {
    raw: String,
    regex: Regex,
}

impl WildcardPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| CompilerError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Compiled inclusion/exclusion filter for one scope (a source or the
/// merged list).
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    inclusions: Vec<WildcardPattern>,
    exclusions: Vec<WildcardPattern>,
}

impl RuleFilter {
    pub fn compile(inclusions: &[String], exclusions: &[String]) -> Result<Self> {
        Ok(Self {
            inclusions: inclusions
                .iter()
                .map(|p| WildcardPattern::compile(p))
                .collect::<Result<_>>()?,
            exclusions: exclusions
                .iter()
                .map(|p| WildcardPattern::compile(p))
                .collect::<Result<_>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inclusions.is_empty() && self.exclusions.is_empty()
    }

    /// A rule is kept iff it matches at least one inclusion (or there are
    /// none) and matches no exclusion.
    pub fn keeps(&self, rule: &str) -> bool {
        let rule = rule.trim();
        let included = self.inclusions.is_empty()
            || self.inclusions.iter().any(|p| p.matches(rule));
        included && !self.exclusions.iter().any(|p| p.matches(rule))
    }

    pub fn apply(&self, rules: Vec<String>) -> Vec<String> {
        if self.is_empty() {
            return rules;
        }
        rules.into_iter().filter(|rule| self.keeps(rule)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(inclusions: &[&str], exclusions: &[&str]) -> RuleFilter {
        RuleFilter::compile(
            &inclusions.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &exclusions.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn star_matches_any_run() {
        let pattern = WildcardPattern::compile("*ads*").unwrap();
        assert!(pattern.matches("||ads.example.com^"));
        assert!(pattern.matches("ads"));
        assert!(!pattern.matches("||cdn.example.com^"));
    }

    #[test]
    fn question_mark_matches_exactly_one() {
        let pattern = WildcardPattern::compile("a?c").unwrap();
        assert!(pattern.matches("abc"));
        assert!(!pattern.matches("ac"));
        assert!(!pattern.matches("abbc"));
    }

    #[test]
    fn literals_are_escaped() {
        let pattern = WildcardPattern::compile("||a.com^").unwrap();
        assert!(pattern.matches("||a.com^"));
        // '.' must not behave as a regex wildcard.
        assert!(!pattern.matches("||aXcom^"));
    }

    #[test]
    fn empty_inclusions_keep_everything_not_excluded() {
        let filter = filter(&[], &["*ads*"]);
        assert!(filter.keeps("||cdn.example.com^"));
        assert!(!filter.keeps("||ads.example.com^"));
    }

    #[test]
    fn inclusion_and_exclusion_combine() {
        // Kept iff (I empty or some inclusion matches) and no exclusion matches.
        let filter = filter(&["*example*"], &["*ads*"]);
        assert!(filter.keeps("||cdn.example.com^"));
        assert!(!filter.keeps("||ads.example.com^"));
        assert!(!filter.keeps("||tracker.other.com^"));
    }

    #[test]
    fn matching_trims_rule_text_first() {
        let filter = filter(&["||a.com^"], &[]);
        assert!(filter.keeps("  ||a.com^  "));
    }

    #[test]
    fn exclusion_wildcard_scenario() {
        let rules = vec![
            "||ads.example.com^".to_string(),
            "||cdn.example.com^".to_string(),
            "||ads.other.com^".to_string(),
        ];
        let filter = filter(&[], &["*ads*"]);
        assert_eq!(filter.apply(rules), vec!["||cdn.example.com^".to_string()]);
    }
}
