//! Security middleware.
//! Runs every proxied request through the gateway pipeline and hardens
//! every response.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::ORIGIN, HeaderMap, HeaderValue, Request, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::http::request::{client_identifier, TrustedProxies};
use crate::http::response::{apply_headers, deny_response, error_response};
use crate::routing::ProfileRouter;
use crate::security::headers::X_CSP_NONCE;
use crate::security::limits::{buffer_body, check_content_length};
use crate::security::pipeline::{origin_matches_host, request_host};
use crate::security::{CspNonce, InboundRequest, SecurityGateway};

/// State shared by the security middleware.
#[derive(Clone)]
pub struct SecurityState {
    pub gateway: Arc<SecurityGateway>,
    pub profiles: Arc<ProfileRouter>,
    pub max_body_size: usize,
    pub trusted_proxies: Arc<TrustedProxies>,
}

pub async fn security_middleware(
    State(state): State<SecurityState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let gateway = &state.gateway;
    let profile = state.profiles.resolve(&req);
    let options = profile.options.clone();
    let profile_name = profile.name.clone();

    // 1. Preflight is answered here and never reaches the upstream.
    if let Some(mut response) =
        gateway
            .cors()
            .handle_preflight(req.method(), req.headers(), options.allow_credentials)
    {
        gateway.header_policy().apply(response.headers_mut(), None);
        return response;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = client_identifier(req.headers(), peer, &state.trusted_proxies);

    // 2. Body limit, before anything is read.
    if let Err(e) = check_content_length(req.headers(), state.max_body_size) {
        tracing::warn!(client = %client_ip, error = %e, "Request body rejected");
        return harden(gateway, error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large"), None);
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match buffer_body(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(client = %client_ip, error = %e, "Request body rejected");
            return harden(gateway, error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large"), None);
        }
    };

    // Malformed JSON is not a denial; the body scan is skipped.
    let json = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(client = %client_ip, error = %e, "Body is not JSON, skipping body scan");
                None
            }
        }
    };

    // 3. Pipeline.
    let result = gateway
        .security_check(
            &InboundRequest {
                method: &parts.method,
                uri: &parts.uri,
                headers: &parts.headers,
                client_ip: &client_ip,
                body: json.as_ref(),
            },
            &options,
        )
        .await;

    let cors = gateway.cors().cors_headers(&parts.headers, options.allow_credentials);

    if !result.allowed {
        let mut response = deny_response(&result);
        if let Some(cors) = cors {
            response.headers_mut().extend(cors);
        }
        return harden(gateway, response, None);
    }

    // 4. Cross-origin requests from unknown origins are refused. Same-origin
    // requests carry an Origin too and are let through without CORS headers.
    if cors.is_none() && !is_same_origin(&parts.headers, &parts.uri) {
        tracing::warn!(
            client = %client_ip,
            origin = ?parts.headers.get(ORIGIN),
            profile = %profile_name,
            "Origin not allowed"
        );
        return harden(gateway, error_response(StatusCode::FORBIDDEN, "Origin not allowed"), None);
    }

    let nonce = CspNonce::new();
    if let Ok(value) = HeaderValue::from_str(nonce.value()) {
        parts.headers.insert(X_CSP_NONCE, value);
    }
    parts.extensions.insert(nonce.clone());

    let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    if let Some(extra) = &result.extra_headers {
        apply_headers(response.headers_mut(), extra);
    }
    if let Some(cors) = cors {
        response.headers_mut().extend(cors);
    }
    harden(gateway, response, Some(nonce.value()))
}

fn harden(gateway: &SecurityGateway, mut response: Response, nonce: Option<&str>) -> Response {
    gateway.header_policy().apply(response.headers_mut(), nonce);
    response
}

fn is_same_origin(headers: &HeaderMap, uri: &Uri) -> bool {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    let host = request_host(headers, uri);
    match (origin, host) {
        (Some(origin), Some(host)) => origin_matches_host(origin, host),
        _ => false,
    }
}
