//! Threat scanner.
//!
//! Stateless matching of request text against the [`PatternRegistry`].
//! The same registry backs URL, header and body scanning.
//!
//! # Body scanning
//! Values under safe fields (free-text form inputs) are masked with a
//! placeholder before the body is serialized and matched, so an email
//! like `o'neil@example.com` or notes containing `--` never look like SQL.

pub mod patterns;

use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;

pub use patterns::{PatternRegistry, Severity, ThreatPattern, ThreatType};

/// Headers scanned when the caller does not name its own set.
pub const DEFAULT_WATCHED_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "user-agent", "referer"];

const SAFE_PLACEHOLDER: &str = "[safe]";
const MAX_PAYLOAD_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityThreat {
    #[serde(rename = "type")]
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub description: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityScanResult {
    pub is_safe: bool,
    pub threats: Vec<SecurityThreat>,
    pub risk_level: Severity,
}

impl SecurityScanResult {
    pub fn from_threats(threats: Vec<SecurityThreat>) -> Self {
        let risk_level = threats
            .iter()
            .map(|t| t.severity)
            .max()
            .unwrap_or_default();
        Self {
            is_safe: threats.is_empty(),
            threats,
            risk_level,
        }
    }

    pub fn safe() -> Self {
        Self::from_threats(Vec::new())
    }

    /// Combine two results, recomputing the risk level.
    pub fn merge(mut self, other: SecurityScanResult) -> Self {
        self.threats.extend(other.threats);
        Self::from_threats(self.threats)
    }

    /// Whether the findings are severe enough to deny the request.
    pub fn is_blocking(&self) -> bool {
        !self.is_safe && self.risk_level.is_blocking()
    }
}

#[derive(Debug, Default)]
pub struct ThreatScanner {
    registry: PatternRegistry,
}

impl ThreatScanner {
    pub fn new() -> Self {
        Self::with_registry(PatternRegistry::builtin())
    }

    pub fn with_registry(registry: PatternRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Scan a request URL (absolute or path-and-query).
    ///
    /// The query string is also matched after form decoding so encoded
    /// payloads like `%27%20OR%20%271%27%3D%271` are caught.
    pub fn scan_url(&self, url: &str) -> SecurityScanResult {
        let mut text = url.to_string();
        if let Some((_, query)) = url.split_once('?') {
            let decoded = url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            if decoded != query {
                text.push('\n');
                text.push_str(&decoded);
            }
        }
        SecurityScanResult::from_threats(self.scan_text(&text, "url", &[]))
    }

    /// Scan the watched headers. SSRF patterns are not applied here, since
    /// a Referer of `http://localhost:3000/` or a private address in
    /// `X-Forwarded-For` is ordinary traffic.
    pub fn scan_headers(&self, headers: &HeaderMap, watched: &[&str]) -> SecurityScanResult {
        let mut threats = Vec::new();
        for name in watched {
            for value in headers.get_all(*name) {
                let text = String::from_utf8_lossy(value.as_bytes());
                let location = format!("header:{}", name.to_ascii_lowercase());
                threats.extend(self.scan_text(&text, &location, &[ThreatType::Ssrf]));
            }
        }
        SecurityScanResult::from_threats(threats)
    }

    /// Scan a JSON body, masking every value stored under a key in
    /// `safe_fields` (case-insensitive, at any depth).
    pub fn scan_body(&self, body: &Value, safe_fields: &[String]) -> SecurityScanResult {
        let serialized = if safe_fields.is_empty() {
            body.to_string()
        } else {
            let mut masked = body.clone();
            mask_safe_fields(&mut masked, safe_fields);
            masked.to_string()
        };
        SecurityScanResult::from_threats(self.scan_text(&serialized, "body", &[]))
    }

    /// First match per threat class.
    fn scan_text(&self, text: &str, location: &str, skip: &[ThreatType]) -> Vec<SecurityThreat> {
        if text.is_empty() {
            return Vec::new();
        }

        self.registry
            .iter()
            .filter(|(threat, _)| !skip.contains(threat))
            .filter_map(|(threat, patterns)| {
                patterns.iter().find_map(|pattern| {
                    pattern.regex.find(text).map(|m| SecurityThreat {
                        threat_type: threat,
                        severity: pattern.severity,
                        description: format!("{}: {}", threat.label(), pattern.description),
                        location: location.to_string(),
                        matched_payload: Some(truncate_chars(m.as_str(), MAX_PAYLOAD_CHARS)),
                    })
                })
            })
            .collect()
    }
}

fn mask_safe_fields(value: &mut Value, safe_fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if safe_fields.iter().any(|f| f.eq_ignore_ascii_case(key)) {
                    *field = Value::String(SAFE_PLACEHOLDER.to_string());
                } else {
                    mask_safe_fields(field, safe_fields);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mask_safe_fields(item, safe_fields);
            }
        }
        _ => {}
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
