//! Minimal adblock rule parser.
//!
//! The pipeline treats rules as opaque strings; this adapter is consulted
//! only where transformations need structure: comment classification,
//! network-rule modifiers, hosts-file lines, and exception detection. It
//! intentionally covers the syntax the transformation registry interrogates
//! rather than the full adblock grammar.

/// Cosmetic rule separators, longest first so `#@#` wins over `##`.
const COSMETIC_SEPARATORS: [&str; 4] = ["#@#", "#?#", "#$#", "##"];

/// Modifiers meaningful to DNS-level blockers; everything else is dropped
/// by the `RemoveModifiers` transformation.
const SUPPORTED_MODIFIERS: [&str; 7] = [
    "important",
    "badfilter",
    "ctag",
    "dnstype",
    "dnsrewrite",
    "client",
    "denyallow",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRule {
    /// Match pattern without the exception marker or modifier list.
    pub pattern: String,
    pub modifiers: Vec<String>,
    pub exception: bool,
}

impl NetworkRule {
    /// Extract the bare domain from a `||domain^` pattern, if the pattern
    /// has that exact anchored shape.
    pub fn anchored_domain(&self) -> Option<&str> {
        let inner = self.pattern.strip_prefix("||")?.strip_suffix('^')?;
        is_plain_domain(inner).then_some(inner)
    }

    /// Render the rule back to its textual form.
    pub fn to_rule_text(&self) -> String {
        let mut out = String::new();
        if self.exception {
            out.push_str("@@");
        }
        out.push_str(&self.pattern);
        if !self.modifiers.is_empty() {
            out.push('$');
            out.push_str(&self.modifiers.join(","));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRule {
    pub ip: String,
    pub hostnames: Vec<String>,
}

impl HostRule {
    /// A hosts line pointing at an unroutable address blocks its hostnames.
    pub fn is_blocking(&self) -> bool {
        matches!(self.ip.as_str(), "0.0.0.0" | "127.0.0.1" | "::" | "::1")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmeticRule {
    pub domains: String,
    pub separator: &'static str,
    pub body: String,
}

/// Typed fact about a single rule line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRule {
    /// `!` or hosts-style `#` comment. Structural comments (preprocessor
    /// hints, `! Title:`-style metadata headers) survive `RemoveComments`.
    Comment { structural: bool },
    Network(NetworkRule),
    Host(HostRule),
    Cosmetic(CosmeticRule),
    Invalid { reason: String },
}

impl ParsedRule {
    pub fn is_comment(&self) -> bool {
        matches!(self, ParsedRule::Comment { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ParsedRule::Invalid { .. })
    }
}

/// Parse one trimmed rule line into a typed fact.
pub fn parse(line: &str) -> ParsedRule {
    let line = line.trim();
    if line.is_empty() {
        return ParsedRule::Invalid {
            reason: "empty line".to_string(),
        };
    }

    if let Some(rest) = line.strip_prefix('!') {
        return ParsedRule::Comment {
            structural: is_structural_comment(rest),
        };
    }

    if let Some(cosmetic) = parse_cosmetic(line) {
        return ParsedRule::Cosmetic(cosmetic);
    }

    // A leading '#' that is not a cosmetic separator is a hosts-style
    // comment; `!#`-like hints were handled above.
    if let Some(rest) = line.strip_prefix('#') {
        return ParsedRule::Comment {
            structural: rest.starts_with('#') || rest.starts_with('%'),
        };
    }

    if let Some(host) = parse_host(line) {
        return ParsedRule::Host(host);
    }

    parse_network(line)
}

/// Whether a modifier is expressible in the target syntax.
pub fn is_supported_modifier(modifier: &str) -> bool {
    let name = modifier.split('=').next().unwrap_or(modifier);
    SUPPORTED_MODIFIERS.contains(&name)
}

fn is_structural_comment(rest: &str) -> bool {
    // `!#include`/`!#if` preprocessor hints.
    if rest.starts_with('#') {
        return true;
    }
    // `! Title: ...`, `! Homepage: ...`, `! Checksum: ...` metadata headers.
    let trimmed = rest.trim_start();
    match trimmed.split_once(':') {
        Some((key, _)) => {
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphabetic() || c == ' ' || c == '-')
        }
        None => false,
    }
}

fn parse_cosmetic(line: &str) -> Option<CosmeticRule> {
    for separator in COSMETIC_SEPARATORS {
        if let Some(index) = line.find(separator) {
            let domains = &line[..index];
            let body = &line[index + separator.len()..];
            if body.is_empty() || domains.contains(' ') {
                return None;
            }
            return Some(CosmeticRule {
                domains: domains.to_string(),
                separator,
                body: body.to_string(),
            });
        }
    }
    None
}

fn parse_host(line: &str) -> Option<HostRule> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    if !is_ip_literal(first) {
        return None;
    }
    let hostnames: Vec<String> = parts
        .take_while(|part| !part.starts_with('#'))
        .map(str::to_string)
        .collect();
    if hostnames.is_empty() {
        return None;
    }
    Some(HostRule {
        ip: first.to_string(),
        hostnames,
    })
}

fn parse_network(line: &str) -> ParsedRule {
    let (exception, rest) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest),
        None => (false, line),
    };

    if rest.is_empty() {
        return ParsedRule::Invalid {
            reason: "empty pattern".to_string(),
        };
    }

    // Network rules never contain unescaped whitespace.
    if rest.contains(char::is_whitespace) {
        return ParsedRule::Invalid {
            reason: "unexpected whitespace in network rule".to_string(),
        };
    }

    // Split the modifier list at the last '$'; regex rules (`/.../`) keep
    // their dollar signs.
    let (pattern, modifiers) = if rest.starts_with('/') && rest.ends_with('/') {
        (rest.to_string(), Vec::new())
    } else {
        match rest.rsplit_once('$') {
            Some((pattern, list)) if !pattern.is_empty() => (
                pattern.to_string(),
                list.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => (rest.to_string(), Vec::new()),
        }
    };

    ParsedRule::Network(NetworkRule {
        pattern,
        modifiers,
        exception,
    })
}

fn is_ip_literal(token: &str) -> bool {
    if matches!(token, "::" | "::1") {
        return true;
    }
    let octets: Vec<&str> = token.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|octet| !octet.is_empty() && octet.parse::<u8>().is_ok())
}

fn is_plain_domain(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.contains('.')
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_comments() {
        assert_eq!(parse("! plain note"), ParsedRule::Comment { structural: false });
        assert_eq!(
            parse("! Title: My List"),
            ParsedRule::Comment { structural: true }
        );
        assert_eq!(
            parse("!#include other.txt"),
            ParsedRule::Comment { structural: true }
        );
        assert_eq!(
            parse("# hosts file comment"),
            ParsedRule::Comment { structural: false }
        );
    }

    #[test]
    fn classifies_network_rules() {
        match parse("||ads.example.com^$third-party,script") {
            ParsedRule::Network(rule) => {
                assert_eq!(rule.pattern, "||ads.example.com^");
                assert_eq!(rule.modifiers, vec!["third-party", "script"]);
                assert!(!rule.exception);
                assert_eq!(rule.anchored_domain(), Some("ads.example.com"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn classifies_exceptions() {
        match parse("@@||cdn.example.com^") {
            ParsedRule::Network(rule) => {
                assert!(rule.exception);
                assert_eq!(rule.to_rule_text(), "@@||cdn.example.com^");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn classifies_host_lines() {
        match parse("0.0.0.0 tracker.example.com ads.example.com") {
            ParsedRule::Host(rule) => {
                assert!(rule.is_blocking());
                assert_eq!(rule.hostnames.len(), 2);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        assert!(matches!(
            parse("127.0.0.1 localhost"),
            ParsedRule::Host(_)
        ));
    }

    #[test]
    fn classifies_cosmetic_rules() {
        match parse("example.com##.ad-banner") {
            ParsedRule::Cosmetic(rule) => {
                assert_eq!(rule.domains, "example.com");
                assert_eq!(rule.separator, "##");
                assert_eq!(rule.body, ".ad-banner");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        assert!(matches!(parse("##.generic"), ParsedRule::Cosmetic(_)));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse("this is not a rule").is_invalid());
        assert!(parse("").is_invalid());
    }

    #[test]
    fn modifier_support_ignores_values() {
        assert!(is_supported_modifier("important"));
        assert!(is_supported_modifier("dnstype=AAAA"));
        assert!(!is_supported_modifier("third-party"));
    }

    #[test]
    fn regex_rules_keep_their_dollars() {
        match parse("/banner\\d+$/") {
            ParsedRule::Network(rule) => {
                assert_eq!(rule.pattern, "/banner\\d+$/");
                assert!(rule.modifiers.is_empty());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}
