//! The transformation registry: named pure functions on rule lists.
//!
//! Each application is bracketed with an operation diagnostic pair carrying
//! the input and output counts.

use std::collections::HashSet;

use serde_json::json;

use filtrex_model::diagnostics::DiagnosticCategory;
use filtrex_model::transformation::TransformationKind;

use crate::parser::{self, ParsedRule};
use crate::trace::TraceContext;

/// Apply one transformation, recording its diagnostic bracket.
pub fn apply(kind: TransformationKind, rules: Vec<String>, trace: &TraceContext) -> Vec<String> {
    let input_count = rules.len();
    let op = trace.operation_start(
        DiagnosticCategory::Transformation,
        format!("transform:{kind}"),
        Some(json!({ "inputCount": input_count })),
    );

    let output = match kind {
        TransformationKind::RemoveComments => remove_comments(rules),
        TransformationKind::RemoveEmptyLines => remove_empty_lines(rules),
        TransformationKind::TrimLines => trim_lines(rules),
        TransformationKind::Deduplicate => deduplicate(rules),
        TransformationKind::Compress => compress(rules),
        TransformationKind::RemoveModifiers => remove_modifiers(rules),
        TransformationKind::Validate => validate(rules, trace),
        TransformationKind::InvertAllow => invert_allow(rules),
        TransformationKind::InsertFinalNewLine => insert_final_newline(rules),
    };

    trace.operation_complete(op, Some(json!({ "outputCount": output.len() })));
    output
}

/// Apply an ordered transformation list.
pub fn apply_all(
    kinds: &[TransformationKind],
    mut rules: Vec<String>,
    trace: &TraceContext,
) -> Vec<String> {
    for kind in kinds {
        rules = apply(*kind, rules, trace);
    }
    rules
}

/// Drop comment lines, keeping structural metadata and preprocessor hints.
fn remove_comments(rules: Vec<String>) -> Vec<String> {
    rules
        .into_iter()
        .filter(|rule| {
            let trimmed = rule.trim_start();
            if !trimmed.starts_with('!') && !trimmed.starts_with('#') {
                return true;
            }
            matches!(
                parser::parse(trimmed),
                ParsedRule::Comment { structural: true } | ParsedRule::Cosmetic(_)
            )
        })
        .collect()
}

fn remove_empty_lines(rules: Vec<String>) -> Vec<String> {
    rules
        .into_iter()
        .filter(|rule| !rule.trim().is_empty())
        .collect()
}

fn trim_lines(rules: Vec<String>) -> Vec<String> {
    rules.into_iter().map(|rule| rule.trim().to_string()).collect()
}

/// Keep the first occurrence of each rule; stable and case-sensitive.
fn deduplicate(rules: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(rules.len());
    rules
        .into_iter()
        .filter(|rule| seen.insert(rule.clone()))
        .collect()
}

/// Merge equivalent rules: a `||domain^` network block subsumes hosts-file
/// lines for the same domain. Order of kept rules is preserved.
fn compress(rules: Vec<String>) -> Vec<String> {
    let mut blocked_domains: HashSet<String> = HashSet::new();
    for rule in &rules {
        if let ParsedRule::Network(network) = parser::parse(rule)
            && !network.exception
            && network.modifiers.is_empty()
            && let Some(domain) = network.anchored_domain()
        {
            blocked_domains.insert(domain.to_string());
        }
    }

    rules
        .into_iter()
        .filter(|rule| match parser::parse(rule) {
            ParsedRule::Host(host) if host.is_blocking() => !host
                .hostnames
                .iter()
                .all(|hostname| blocked_domains.contains(hostname)),
            _ => true,
        })
        .collect()
}

/// Strip modifiers the target syntax cannot express. A rule left without
/// any modifier and without a concrete pattern is ambiguous and dropped.
fn remove_modifiers(rules: Vec<String>) -> Vec<String> {
    rules
        .into_iter()
        .filter_map(|rule| {
            let ParsedRule::Network(mut network) = parser::parse(&rule) else {
                return Some(rule);
            };
            if network.modifiers.is_empty() {
                return Some(rule);
            }

            let had_modifiers = network.modifiers.len();
            network
                .modifiers
                .retain(|modifier| parser::is_supported_modifier(modifier));

            if network.modifiers.is_empty() && had_modifiers > 0 {
                let bare = network.pattern.trim_matches(|c| c == '*');
                if bare.is_empty() || bare == "^" {
                    return None;
                }
            }
            Some(network.to_rule_text())
        })
        .collect()
}

/// Drop rules the parser marks invalid, one diagnostic per drop. Comments
/// and blank lines pass through untouched.
fn validate(rules: Vec<String>, trace: &TraceContext) -> Vec<String> {
    rules
        .into_iter()
        .filter(|rule| {
            if rule.trim().is_empty() {
                return true;
            }
            match parser::parse(rule) {
                ParsedRule::Invalid { reason } => {
                    trace.warn(
                        DiagnosticCategory::Validation,
                        "validate",
                        format!("dropped invalid rule '{rule}': {reason}"),
                    );
                    false
                }
                _ => true,
            }
        })
        .collect()
}

/// Rewrite each exception (`@@`) rule into its blocking counterpart.
fn invert_allow(rules: Vec<String>) -> Vec<String> {
    rules
        .into_iter()
        .map(|rule| match parser::parse(&rule) {
            ParsedRule::Network(mut network) if network.exception => {
                network.exception = false;
                network.to_rule_text()
            }
            _ => rule,
        })
        .collect()
}

fn insert_final_newline(mut rules: Vec<String>) -> Vec<String> {
    if rules.last().is_none_or(|last| !last.is_empty()) {
        rules.push(String::new());
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn trim_empty_dedup_scenario() {
        // Single source supplying duplicates, padding, and a blank line.
        let input = rules(&[" ||a.com^", "||a.com^", "", "||b.com^ "]);
        let trace = TraceContext::noop();
        let output = apply_all(
            &[
                TransformationKind::TrimLines,
                TransformationKind::RemoveEmptyLines,
                TransformationKind::Deduplicate,
            ],
            input,
            &trace,
        );
        assert_eq!(output, rules(&["||a.com^", "||b.com^"]));
    }

    #[test]
    fn deduplicate_is_stable_and_case_sensitive() {
        let trace = TraceContext::noop();
        let input = rules(&["b", "a", "b", "A", "a"]);
        let output = apply(TransformationKind::Deduplicate, input, &trace);
        assert_eq!(output, rules(&["b", "a", "A"]));
    }

    #[test]
    fn deduplicate_is_idempotent() {
        let trace = TraceContext::noop();
        let input = rules(&["x", "y", "x", "z", "y"]);
        let once = apply(TransformationKind::Deduplicate, input, &trace);
        let twice = apply(TransformationKind::Deduplicate, once.clone(), &trace);
        assert_eq!(once, twice);
    }

    #[test]
    fn remove_comments_keeps_structural_headers() {
        let trace = TraceContext::noop();
        let input = rules(&[
            "! Title: Test List",
            "! just a note",
            "!#include extra.txt",
            "# hosts comment",
            "||a.com^",
            "example.com##.ad",
        ]);
        let output = apply(TransformationKind::RemoveComments, input, &trace);
        assert_eq!(
            output,
            rules(&[
                "! Title: Test List",
                "!#include extra.txt",
                "||a.com^",
                "example.com##.ad"
            ])
        );
    }

    #[test]
    fn compress_drops_subsumed_host_rules() {
        let trace = TraceContext::noop();
        let input = rules(&[
            "||tracker.example.com^",
            "0.0.0.0 tracker.example.com",
            "0.0.0.0 other.example.com",
        ]);
        let output = apply(TransformationKind::Compress, input, &trace);
        assert_eq!(
            output,
            rules(&["||tracker.example.com^", "0.0.0.0 other.example.com"])
        );
    }

    #[test]
    fn remove_modifiers_keeps_supported_and_drops_ambiguous() {
        let trace = TraceContext::noop();
        let input = rules(&[
            "||a.com^$important,third-party",
            "||b.com^$script",
            "*$popup",
        ]);
        let output = apply(TransformationKind::RemoveModifiers, input, &trace);
        assert_eq!(output, rules(&["||a.com^$important", "||b.com^"]));
    }

    #[test]
    fn validate_drops_invalid_rules_with_diagnostics() {
        let trace = TraceContext::recording();
        let input = rules(&["||a.com^", "not a rule at all", "! comment"]);
        let output = apply(TransformationKind::Validate, input, &trace);
        assert_eq!(output, rules(&["||a.com^", "! comment"]));

        let warnings: Vec<_> = trace
            .events()
            .iter()
            .filter(|e| e.severity == filtrex_model::DiagnosticSeverity::Warn)
            .cloned()
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn invert_allow_rewrites_exceptions() {
        let trace = TraceContext::noop();
        let input = rules(&["@@||cdn.example.com^", "||ads.example.com^"]);
        let output = apply(TransformationKind::InvertAllow, input, &trace);
        assert_eq!(output, rules(&["||cdn.example.com^", "||ads.example.com^"]));
    }

    #[test]
    fn insert_final_newline_is_idempotent() {
        let trace = TraceContext::noop();
        let once = apply(
            TransformationKind::InsertFinalNewLine,
            rules(&["||a.com^"]),
            &trace,
        );
        assert_eq!(once, rules(&["||a.com^", ""]));
        let twice = apply(TransformationKind::InsertFinalNewLine, once.clone(), &trace);
        assert_eq!(once, twice);
    }

    #[test]
    fn every_application_records_a_diagnostic_pair() {
        let trace = TraceContext::recording();
        apply(TransformationKind::TrimLines, rules(&[" a "]), &trace);
        let events = trace.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].parent_event_id, Some(events[0].event_id));
    }
}
