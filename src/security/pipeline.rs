//! Security pipeline orchestrator.
//!
//! One ordered decision per request:
//!
//! ```text
//! whitelist? ──yes──▶ allow
//! blacklist? ──yes──▶ 403  (blacklisted_ip_attempt)
//! ddos guard ──deny─▶ 429  (ddos_protection_triggered)
//! rate limit ──deny─▶ 429  (rate_limit_exceeded)
//! url+headers ─high─▶ 400  (security_scan_<level>)    [not for lead]
//! body ───────high──▶ 400  (security_scan_<level>)    [scan_body, non-GET, not for lead]
//! csrf ───mismatch──▶ 403  (csrf_attempt)             [POST/PUT/PATCH/DELETE]
//! allow
//! ```
//!
//! Every deny enqueues a violation for the reputation store's background
//! writer. Stage failures never surface as errors: reputation reads fail
//! open and the rest of the pipeline is infallible.

use arc_swap::ArcSwap;
use axum::http::header::{HOST, ORIGIN};
use axum::http::{HeaderMap, Method, Uri};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::{Environment, ProfileConfig, RateLimitType, SecurityConfig, LEAD_SAFE_FIELDS};
use crate::observability::metrics;
use crate::security::cors::CorsPolicy;
use crate::security::ddos::{DdosDecision, DdosGuard};
use crate::security::headers::SecurityHeaderPolicy;
use crate::security::rate_limit::{RateLimitDecision, RateLimiters};
use crate::security::reputation::{ReputationBackend, ReputationStore, StoreError};
use crate::security::scanner::{SecurityScanResult, Severity, ThreatScanner, DEFAULT_WATCHED_HEADERS};
use crate::security::violations::ViolationQueue;

/// Per-request pipeline options, normally resolved from a route profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityCheckOptions {
    pub rate_limit_type: RateLimitType,
    pub scan_body: bool,
    pub safe_fields: Vec<String>,
    pub allow_credentials: bool,
}

impl SecurityCheckOptions {
    pub fn api() -> Self {
        Self {
            rate_limit_type: RateLimitType::Api,
            scan_body: true,
            safe_fields: Vec::new(),
            allow_credentials: false,
        }
    }

    pub fn auth() -> Self {
        Self {
            rate_limit_type: RateLimitType::Auth,
            scan_body: true,
            safe_fields: Vec::new(),
            allow_credentials: true,
        }
    }

    pub fn lead() -> Self {
        Self {
            rate_limit_type: RateLimitType::Lead,
            scan_body: true,
            safe_fields: LEAD_SAFE_FIELDS.iter().map(|f| f.to_string()).collect(),
            allow_credentials: false,
        }
    }

    pub fn from_profile(profile: &ProfileConfig) -> Self {
        Self {
            rate_limit_type: profile.rate_limit,
            scan_body: profile.scan_body,
            safe_fields: profile.safe_fields.clone(),
            allow_credentials: profile.allow_credentials,
        }
    }

    /// Lead submissions carry free text; pattern scanning is skipped.
    fn skips_scanning(&self) -> bool {
        self.rate_limit_type == RateLimitType::Lead
    }
}

impl Default for SecurityCheckOptions {
    fn default() -> Self {
        Self::api()
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    BlacklistedIp,
    DdosProtection,
    RateLimitExceeded,
    SecurityScan(Severity),
    CsrfAttempt,
}

impl DenyReason {
    /// Violation type recorded into the reputation store.
    pub fn violation_type(self) -> String {
        match self {
            DenyReason::BlacklistedIp => "blacklisted_ip_attempt".to_string(),
            DenyReason::DdosProtection => "ddos_protection_triggered".to_string(),
            DenyReason::RateLimitExceeded => "rate_limit_exceeded".to_string(),
            DenyReason::SecurityScan(level) => format!("security_scan_{}", level),
            DenyReason::CsrfAttempt => "csrf_attempt".to_string(),
        }
    }

    fn metric_label(self) -> &'static str {
        match self {
            DenyReason::BlacklistedIp => "blacklist",
            DenyReason::DdosProtection => "ddos",
            DenyReason::RateLimitExceeded => "rate_limit",
            DenyReason::SecurityScan(_) => "threat",
            DenyReason::CsrfAttempt => "csrf",
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            DenyReason::BlacklistedIp | DenyReason::CsrfAttempt => 403,
            DenyReason::DdosProtection | DenyReason::RateLimitExceeded => 429,
            DenyReason::SecurityScan(_) => 400,
        }
    }

    fn generic_message(self) -> &'static str {
        match self.status_code() {
            403 => "Access denied",
            429 => "Too many requests",
            _ => "Bad request",
        }
    }
}

/// The pipeline's only output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityCheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
}

impl SecurityCheckResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            status_code: None,
            message: None,
            extra_headers: None,
            deny_reason: None,
        }
    }

    fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        if !headers.is_empty() {
            self.extra_headers = Some(headers);
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.extra_headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }
}

/// The parts of a request the pipeline inspects.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub client_ip: &'a str,
    /// Parsed JSON body. `None` when absent or not JSON.
    pub body: Option<&'a Value>,
}

/// Snapshot of gateway state for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub environment: Environment,
    pub rate_limit_entries: BTreeMap<&'static str, usize>,
    pub ddos_tracked: usize,
    pub ddos_suspicious: usize,
    pub threat_patterns: usize,
    pub allowed_origins: Vec<String>,
    pub pending_violations: usize,
    pub dropped_violations: u64,
}

pub struct SecurityGateway {
    environment: Environment,
    reputation: Arc<ReputationStore>,
    limiters: RateLimiters,
    ddos: DdosGuard,
    scanner: ThreatScanner,
    cors: CorsPolicy,
    header_policy: ArcSwap<SecurityHeaderPolicy>,
    sweep_interval: Duration,
    violations: ViolationQueue,
}

impl SecurityGateway {
    /// Spawns the violation writer, so it must run inside a Tokio runtime.
    pub fn new(config: &SecurityConfig, backend: Arc<dyn ReputationBackend>) -> Self {
        let environment = config.environment;
        let reputation = Arc::new(ReputationStore::from_config(backend, &config.reputation));
        let violations = ViolationQueue::start(reputation.clone(), config.reputation.violation_queue_capacity);
        Self {
            environment,
            reputation,
            limiters: RateLimiters::new(&config.rate_limits),
            ddos: DdosGuard::new(&config.ddos),
            scanner: ThreatScanner::new(),
            cors: CorsPolicy::from_config(&config.cors, environment),
            header_policy: ArcSwap::from_pointee(SecurityHeaderPolicy::new(&config.headers, environment)),
            sweep_interval: config.rate_limits.sweep_interval(),
            violations,
        }
    }

    /// Open the configured reputation backend and build the gateway.
    pub async fn open(config: &SecurityConfig) -> Result<Self, StoreError> {
        let backend = ReputationStore::open_backend(&config.reputation).await?;
        Ok(Self::new(config, backend))
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }

    pub fn ddos(&self) -> &DdosGuard {
        &self.ddos
    }

    pub fn scanner(&self) -> &ThreatScanner {
        &self.scanner
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    pub fn header_policy(&self) -> Arc<SecurityHeaderPolicy> {
        self.header_policy.load_full()
    }

    /// Swap the hot-reloadable parts: CORS allow-list and header policy.
    pub fn reload(&self, config: &SecurityConfig) {
        if config.environment != self.environment {
            tracing::warn!(
                current = %self.environment,
                requested = %config.environment,
                "Environment changes require a restart, keeping current environment"
            );
        }
        self.cors.reload(&config.cors, self.environment);
        self.header_policy
            .store(Arc::new(SecurityHeaderPolicy::new(&config.headers, self.environment)));
    }

    /// Manual unblock: clears `identifier` from every limiter and the DDoS guard.
    pub fn reset_identifier(&self, identifier: &str) {
        self.limiters.reset_all(identifier);
        self.ddos.reset(identifier);
        tracing::info!(client = %identifier, "Rate limit state reset");
    }

    /// Expire limiter windows and forgive quiet DDoS entries.
    pub fn sweep(&self) {
        let expired = self.limiters.sweep();
        let forgiven = self.ddos.sweep();
        tracing::debug!(expired, forgiven, "Security state swept");
    }

    /// Run [`sweep`](Self::sweep) and a reputation flush every
    /// `sweep_interval` until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gateway.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        gateway.sweep();
                        if let Err(e) = gateway.reputation.flush().await {
                            tracing::warn!(error = %e, "Periodic reputation flush failed");
                            metrics::record_store_error("flush");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Sweeper stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Wait until every queued violation has been written.
    pub async fn drain_violations(&self) {
        self.violations.wait_idle().await;
    }

    /// Drain pending violation writes and flush the reputation store.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.drain_violations().await;
        self.reputation.close().await
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            environment: self.environment,
            rate_limit_entries: self.limiters.sizes().into_iter().collect(),
            ddos_tracked: self.ddos.tracked_count(),
            ddos_suspicious: self.ddos.suspicious_count(),
            threat_patterns: self.scanner.registry().pattern_count(),
            allowed_origins: self.cors.allowed_origins().as_ref().clone(),
            pending_violations: self.violations.pending(),
            dropped_violations: self.violations.dropped(),
        }
    }

    /// Evaluate one request.
    pub async fn security_check(
        &self,
        request: &InboundRequest<'_>,
        options: &SecurityCheckOptions,
    ) -> SecurityCheckResult {
        let start = Instant::now();
        let ip = request.client_ip;

        // 1. whitelist wins over everything, including a blacklist entry
        if self.reputation.is_whitelisted(ip).await {
            tracing::debug!(client = %ip, "Whitelisted client, skipping checks");
            metrics::record_decision("bypass", start);
            return SecurityCheckResult::allow();
        }

        // 2.
        if self.reputation.is_blacklisted(ip).await {
            return self.deny(ip, DenyReason::BlacklistedIp, "IP address is blacklisted".into(), BTreeMap::new(), start);
        }

        // 3.
        let flood = self.ddos.check(ip);
        if let DdosDecision::Blocked { violation_count, .. } = flood {
            let retry_after = flood.retry_after_secs();
            let headers = BTreeMap::from([("Retry-After".to_string(), retry_after.to_string())]);
            let detail = format!(
                "DDoS protection triggered ({} violations), retry in {} seconds",
                violation_count, retry_after
            );
            return self.deny(ip, DenyReason::DdosProtection, detail, headers, start);
        }

        // 4.
        let limit_type = options.rate_limit_type;
        let decision = self.limiters.get(limit_type).check(ip);
        let rate_headers = rate_limit_headers(&decision);
        if !decision.allowed {
            let mut headers = rate_headers;
            headers.insert("Retry-After".to_string(), decision.retry_after_secs().to_string());
            let detail = format!(
                "Rate limit exceeded for {} requests, retry in {} seconds",
                limit_type,
                decision.retry_after_secs()
            );
            return self.deny(ip, DenyReason::RateLimitExceeded, detail, headers, start);
        }

        if !options.skips_scanning() {
            // 5.
            let target = request
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let scan = self
                .scanner
                .scan_url(target)
                .merge(self.scanner.scan_headers(request.headers, DEFAULT_WATCHED_HEADERS));
            if let Some(result) = self.evaluate_scan(ip, &scan, &rate_headers, start) {
                return result;
            }

            // 6.
            if options.scan_body && request.method != Method::GET {
                if let Some(body) = request.body {
                    let scan = self.scanner.scan_body(body, &options.safe_fields);
                    if let Some(result) = self.evaluate_scan(ip, &scan, &rate_headers, start) {
                        return result;
                    }
                }
            }
        }

        // 7.
        if is_state_changing(request.method) {
            if let Some(origin) = request.headers.get(ORIGIN) {
                let origin = origin.to_str().unwrap_or_default();
                let host = request_host(request.headers, request.uri).unwrap_or_default();
                if !origin_matches_host(origin, host) && !self.cors.is_allowed(origin) {
                    tracing::warn!(client = %ip, origin = %origin, host = %host, "Cross-site request rejected");
                    let detail = format!("Origin {} does not match host {}", origin, host);
                    return self.deny(ip, DenyReason::CsrfAttempt, detail, rate_headers, start);
                }
            }
        }

        // 8.
        metrics::record_decision("allow", start);
        SecurityCheckResult::allow().with_headers(rate_headers)
    }

    /// Log every finding; deny on high or critical.
    fn evaluate_scan(
        &self,
        ip: &str,
        scan: &SecurityScanResult,
        rate_headers: &BTreeMap<String, String>,
        start: Instant,
    ) -> Option<SecurityCheckResult> {
        if scan.is_safe {
            return None;
        }

        for threat in &scan.threats {
            metrics::record_threat(threat.threat_type, threat.severity);
            tracing::warn!(
                client = %ip,
                threat = %threat.threat_type,
                severity = %threat.severity,
                location = %threat.location,
                payload = ?threat.matched_payload,
                "Threat detected"
            );
        }

        if !scan.is_blocking() {
            return None;
        }

        let summary = scan
            .threats
            .iter()
            .map(|t| format!("{} in {}", t.threat_type, t.location))
            .collect::<Vec<_>>()
            .join(", ");
        let detail = format!("Security scan detected {} risk: {}", scan.risk_level, summary);
        Some(self.deny(
            ip,
            DenyReason::SecurityScan(scan.risk_level),
            detail,
            rate_headers.clone(),
            start,
        ))
    }

    fn deny(
        &self,
        ip: &str,
        reason: DenyReason,
        detail: String,
        headers: BTreeMap<String, String>,
        start: Instant,
    ) -> SecurityCheckResult {
        let violation = reason.violation_type();
        tracing::warn!(
            client = %ip,
            reason = %violation,
            status = reason.status_code(),
            detail = %detail,
            "Request denied"
        );
        metrics::record_denial(reason.metric_label());
        metrics::record_decision("deny", start);

        self.violations.submit(ip, violation.clone());

        let message = if self.environment.is_production() {
            reason.generic_message().to_string()
        } else {
            detail
        };

        SecurityCheckResult {
            allowed: false,
            status_code: Some(reason.status_code()),
            message: Some(message),
            extra_headers: None,
            deny_reason: Some(violation),
        }
        .with_headers(headers)
    }

}

fn rate_limit_headers(decision: &RateLimitDecision) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("X-RateLimit-Limit".to_string(), decision.limit.to_string()),
        ("X-RateLimit-Remaining".to_string(), decision.remaining.to_string()),
        ("X-RateLimit-Reset".to_string(), decision.reset_unix_secs().to_string()),
    ])
}

fn is_state_changing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// The `Host` header, or the URI authority (HTTP/2 `:authority`).
pub fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| uri.authority().map(|a| a.as_str()))
}

/// Whether the authority of `origin` is the request `Host`.
pub fn origin_matches_host(origin: &str, host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    let Some(origin_host) = url.host_str() else {
        return false;
    };
    let authority = match url.port() {
        Some(port) => format!("{}:{}", origin_host, port),
        None => origin_host.to_string(),
    };
    authority.eq_ignore_ascii_case(host)
}
