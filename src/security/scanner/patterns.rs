//! Pattern registry keyed by threat type.
//!
//! Patterns within a class are ordered most severe first, because matching
//! stops at the first hit per class.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    #[serde(rename = "sqli")]
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
    Ssrf,
    #[serde(rename = "nosqli")]
    NoSqlInjection,
    #[serde(rename = "ldapi")]
    LdapInjection,
}

impl ThreatType {
    pub const ALL: [ThreatType; 7] = [
        ThreatType::SqlInjection,
        ThreatType::Xss,
        ThreatType::PathTraversal,
        ThreatType::CommandInjection,
        ThreatType::Ssrf,
        ThreatType::NoSqlInjection,
        ThreatType::LdapInjection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ThreatType::SqlInjection => "sqli",
            ThreatType::Xss => "xss",
            ThreatType::PathTraversal => "path_traversal",
            ThreatType::CommandInjection => "command_injection",
            ThreatType::Ssrf => "ssrf",
            ThreatType::NoSqlInjection => "nosqli",
            ThreatType::LdapInjection => "ldapi",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ThreatType::SqlInjection => "SQL injection",
            ThreatType::Xss => "cross-site scripting",
            ThreatType::PathTraversal => "path traversal",
            ThreatType::CommandInjection => "command injection",
            ThreatType::Ssrf => "server-side request forgery",
            ThreatType::NoSqlInjection => "NoSQL injection",
            ThreatType::LdapInjection => "LDAP injection",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical findings deny the request.
    pub fn is_blocking(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ThreatPattern {
    pub regex: Regex,
    pub severity: Severity,
    pub description: &'static str,
}

type PatternDef = (&'static str, Severity, &'static str);

const SQL_INJECTION: &[PatternDef] = &[
    (r"(?i)'\s*(or|and)\s*'?[\w\s]*'?\s*=\s*'?", Severity::Critical, "SQL tautology in quoted value"),
    (r"(?i)\b(or|and)\s+\d+\s*=\s*\d+", Severity::Critical, "SQL numeric tautology"),
    (r"(?i)\bunion(\s+all)?\s+select\b", Severity::Critical, "UNION-based SQL injection"),
    (r"(?i)\b(drop|truncate|alter)\s+(table|database|schema)\b", Severity::Critical, "destructive SQL statement"),
    (r"(?i);\s*(select|insert|update|delete|drop|exec|execute)\b", Severity::Critical, "stacked SQL query"),
    (r"(?i)\b(exec|execute)\s+(xp|sp)_\w+", Severity::Critical, "stored procedure execution"),
    (r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b", Severity::High, "time-based blind SQL injection"),
    (r"(?i)\binformation_schema\b|\bsys\.(tables|objects|columns)\b", Severity::High, "schema enumeration"),
    (r"'\s*(--|#|/\*)", Severity::High, "quote followed by SQL comment"),
];

const XSS: &[PatternDef] = &[
    (r"(?i)<\s*script\b", Severity::Critical, "script tag"),
    (r"(?i)\bjavascript\s*:", Severity::High, "javascript: URI"),
    (r"(?i)\bvbscript\s*:", Severity::High, "vbscript: URI"),
    (r"(?i)\bon(error|load|click|mouseover|mouseout|focus|blur|submit|change|input|keydown|keyup|toggle|animationstart)\s*=", Severity::High, "inline event handler"),
    (r"(?i)<\s*(iframe|object|embed|applet|meta|base|svg)\b", Severity::High, "active content tag"),
    (r"(?i)data\s*:\s*text/html", Severity::High, "HTML data URI"),
    (r"(?i)\b(document\.(cookie|write|domain)|window\.location)\b", Severity::Medium, "DOM access"),
    (r"(?i)\bexpression\s*\(", Severity::Medium, "CSS expression"),
];

const PATH_TRAVERSAL: &[PatternDef] = &[
    (r"\.\./|\.\.\\", Severity::High, "parent directory reference"),
    (r"(?i)%2e%2e(%2f|%5c|/|\\)|\.\.%2f|\.\.%5c|%252e%252e", Severity::High, "encoded parent directory reference"),
    (r"(?i)/etc/(passwd|shadow|hosts|group)\b", Severity::High, "sensitive system file"),
    (r"(?i)\b[a-z]:\\(windows|winnt|boot\.ini)", Severity::High, "Windows system path"),
    (r"(?i)%00|\\x00", Severity::Medium, "null byte"),
];

const COMMAND_INJECTION: &[PatternDef] = &[
    (r"(?i)[;&|]\s*(cat|ls|id|whoami|uname|pwd|wget|curl|nc|netcat|bash|sh|zsh|powershell|cmd|ping|nslookup|rm|chmod|python|perl)(\s|$)", Severity::Critical, "shell command chaining"),
    (r"\$\([^)]*\)", Severity::Critical, "command substitution"),
    (r"`[^`]+`", Severity::High, "backtick command substitution"),
    (r"(?i)\brm\s+-rf\b|\bchmod\s+[0-7]{3,4}\b|/bin/(ba)?sh\b|\b(cmd|powershell)\.exe\b", Severity::Critical, "shell binary or destructive command"),
];

const SSRF: &[PatternDef] = &[
    (r"(?i)169\.254\.169\.254|metadata\.google\.internal|100\.100\.100\.200", Severity::Critical, "cloud metadata endpoint"),
    (r"(?i)\b(https?|ftp|gopher)://(localhost|127\.\d{1,3}\.\d{1,3}\.\d{1,3}|0\.0\.0\.0|\[::1?\])", Severity::High, "loopback address"),
    (r"(?i)\b(https?|ftp|gopher)://(10\.\d{1,3}|192\.168|172\.(1[6-9]|2\d|3[01]))\.\d{1,3}", Severity::High, "private network address"),
    (r"(?i)\b(file|gopher|dict|ldap|tftp|jar)://", Severity::High, "dangerous URL scheme"),
];

const NOSQL_INJECTION: &[PatternDef] = &[
    (r"(?i)\$(where|function|expr|accumulator)\b", Severity::Critical, "server-side JavaScript operator"),
    (r"(?i)\$(ne|eq|gt|gte|lt|lte|in|nin|regex|exists|or|and|not|nor|elemMatch)\b", Severity::High, "query operator injection"),
    (r"(?i)\bdb\.\w+\.(find|insert|update|remove|drop|aggregate)\s*\(", Severity::High, "shell collection call"),
];

const LDAP_INJECTION: &[PatternDef] = &[
    (r"\*\s*\)\s*\(\s*[\w-]+\s*[=~<>]", Severity::Medium, "wildcard filter break-out"),
    (r"\(\s*[|&!]\s*\(\s*[\w-]+\s*[=~<>]", Severity::Medium, "filter composition"),
    (r"(?i)\)\s*\(\s*(objectclass|uid|cn|mail|userpassword|samaccountname)\s*=", Severity::Medium, "attribute filter injection"),
];

fn definitions(threat: ThreatType) -> &'static [PatternDef] {
    match threat {
        ThreatType::SqlInjection => SQL_INJECTION,
        ThreatType::Xss => XSS,
        ThreatType::PathTraversal => PATH_TRAVERSAL,
        ThreatType::CommandInjection => COMMAND_INJECTION,
        ThreatType::Ssrf => SSRF,
        ThreatType::NoSqlInjection => NOSQL_INJECTION,
        ThreatType::LdapInjection => LDAP_INJECTION,
    }
}

/// Compiled patterns for every threat class.
#[derive(Debug)]
pub struct PatternRegistry {
    classes: Vec<(ThreatType, Vec<ThreatPattern>)>,
}

impl PatternRegistry {
    /// Compile the built-in rule set.
    pub fn builtin() -> Self {
        let classes = ThreatType::ALL
            .iter()
            .map(|&threat| {
                let patterns = definitions(threat)
                    .iter()
                    .filter_map(|&(pattern, severity, description)| match Regex::new(pattern) {
                        Ok(regex) => Some(ThreatPattern {
                            regex,
                            severity,
                            description,
                        }),
                        Err(e) => {
                            tracing::error!(threat = %threat, pattern, error = %e, "Skipping invalid threat pattern");
                            None
                        }
                    })
                    .collect();
                (threat, patterns)
            })
            .collect();

        Self { classes }
    }

    pub fn patterns(&self, threat: ThreatType) -> &[ThreatPattern] {
        self.classes
            .iter()
            .find(|(t, _)| *t == threat)
            .map(|(_, p)| p.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreatType, &[ThreatPattern])> {
        self.classes.iter().map(|(t, p)| (*t, p.as_slice()))
    }

    pub fn pattern_count(&self) -> usize {
        self.classes.iter().map(|(_, p)| p.len()).sum()
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtin_patterns_compile() {
        let registry = PatternRegistry::builtin();
        let defined: usize = ThreatType::ALL.iter().map(|t| definitions(*t).len()).sum();
        assert_eq!(registry.pattern_count(), defined);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::High.is_blocking());
        assert!(!Severity::Medium.is_blocking());
    }

    #[test]
    fn test_threat_type_serialization() {
        assert_eq!(serde_json::to_string(&ThreatType::SqlInjection).unwrap(), "\"sqli\"");
        assert_eq!(serde_json::to_string(&ThreatType::PathTraversal).unwrap(), "\"path_traversal\"");
    }
}
