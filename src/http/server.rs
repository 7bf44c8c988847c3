//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, request ID, timeout, security)
//! - Bind server to listener
//! - Forward allowed requests to the upstream API
//! - Apply hot-reloaded configuration to the gateway

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum::http::uri::{Authority, Scheme};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ShieldConfig;
use crate::http::middleware::{security_middleware, SecurityState};
use crate::http::request::{TrustedProxies, X_FORWARDED_FOR, X_REQUEST_ID};
use crate::http::response::{error_response, strip_hop_by_hop};
use crate::routing::ProfileRouter;
use crate::security::SecurityGateway;

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Arc<str>,
    pub upstream_timeout: Duration,
}

/// HTTP server for the security gateway.
pub struct HttpServer {
    router: Router,
    gateway: Arc<SecurityGateway>,
}

impl HttpServer {
    /// Create a new HTTP server in front of `config.upstream`.
    pub fn new(config: &ShieldConfig, gateway: Arc<SecurityGateway>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = AppState {
            client,
            upstream: Arc::from(config.upstream.address.as_str()),
            upstream_timeout: Duration::from_secs(config.timeouts.upstream_secs),
        };

        let security = SecurityState {
            gateway: gateway.clone(),
            profiles: Arc::new(ProfileRouter::from_config(&config.security.profiles)),
            max_body_size: config.security.max_body_size,
            trusted_proxies: Arc::new(TrustedProxies::parse_lossy(&config.listener.trusted_proxies)),
        };

        let router = Self::build_router(config, state, security);
        Self { router, gateway }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ShieldConfig, state: AppState, security: SecurityState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware::from_fn_with_state(security, security_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for driving the stack without a socket.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until `shutdown` fires. Configuration updates received
    /// on `config_updates` are applied to the gateway as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ShieldConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let gateway = self.gateway.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => {
                            gateway.reload(&config.security);
                            tracing::info!("Configuration reloaded");
                        }
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Forward an allowed request to the upstream API.
async fn proxy_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    // URI rewrite
    let authority = match Authority::from_str(&state.upstream) {
        Ok(authority) => authority,
        Err(e) => {
            tracing::error!(upstream = %state.upstream, error = %e, "Invalid upstream address");
            return error_response(StatusCode::BAD_GATEWAY, "Upstream unavailable");
        }
    };
    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(authority);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(axum::http::uri::PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            return error_response(StatusCode::BAD_GATEWAY, "Upstream unavailable");
        }
    };

    strip_hop_by_hop(&mut parts.headers);
    append_forwarded_for(&mut parts.headers, &parts.extensions);

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        uri = %parts.uri,
        "Proxying request"
    );

    let upstream_request = Request::from_parts(parts, body);
    match tokio::time::timeout(state.upstream_timeout, state.client.request(upstream_request)).await {
        Ok(Ok(response)) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body)).into_response()
        }
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            error_response(StatusCode::BAD_GATEWAY, "Upstream request failed")
        }
        Err(_) => {
            tracing::error!(
                request_id = %request_id,
                timeout = ?state.upstream_timeout,
                "Upstream timed out"
            );
            error_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out")
        }
    }
}

/// Append the socket peer to `X-Forwarded-For`.
fn append_forwarded_for(headers: &mut axum::http::HeaderMap, extensions: &axum::http::Extensions) {
    let Some(ConnectInfo(peer)) = extensions.get::<ConnectInfo<SocketAddr>>() else {
        return;
    };
    let hop = peer.ip().to_string();

    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, hop),
        _ => hop,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Extensions, HeaderMap};

    #[test]
    fn test_forwarded_for_appends_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo::<SocketAddr>("10.0.0.2:5555".parse().unwrap()));

        append_forwarded_for(&mut headers, &extensions);
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.7, 10.0.0.2");
    }

    #[test]
    fn test_forwarded_for_without_peer_is_untouched() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, &Extensions::new());
        assert!(headers.get(X_FORWARDED_FOR).is_none());

        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo::<SocketAddr>("10.0.0.2:5555".parse().unwrap()));
        append_forwarded_for(&mut headers, &extensions);
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.2");
    }
}
