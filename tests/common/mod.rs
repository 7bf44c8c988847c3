//! Shared utilities for integration testing.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{request, Request, Response},
    Json, Router,
};
use request_shield::config::ShieldConfig;
use request_shield::http::HttpServer;
use request_shield::security::reputation::MemoryBackend;
use request_shield::security::SecurityGateway;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// A running mock upstream and the number of requests it has served.
#[allow(dead_code)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start an upstream that echoes what it received as JSON and announces
/// itself with identifying headers the gateway must strip.
pub async fn start_mock_upstream() -> MockUpstream {
    start_upstream_with_delay(Duration::ZERO).await
}

/// Same as [`start_mock_upstream`], answering after `delay`.
pub async fn start_upstream_with_delay(delay: Duration) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let app = Router::new().fallback(move |req: Request<Body>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let echo = json!({
                "method": req.method().as_str(),
                "path": req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
                "x-forwarded-for": header("x-forwarded-for"),
                "x-csp-nonce": header("x-csp-nonce"),
                "x-request-id": header("x-request-id"),
            });

            (
                [("server", "mock-upstream/1.0"), ("x-powered-by", "Express")],
                Json(echo),
            )
        }
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream { addr, hits }
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Socket peer of requests arriving through the trusted load balancer.
pub const LOAD_BALANCER: &str = "10.0.0.1:40000";

/// Mark a request as arriving from `peer`, as `into_make_service_with_connect_info` would.
#[allow(dead_code)]
pub fn from_peer(builder: request::Builder, peer: &str) -> request::Builder {
    let peer: SocketAddr = peer.parse().unwrap();
    builder.extension(ConnectInfo(peer))
}

/// Mark a request as forwarded by the trusted load balancer.
#[allow(dead_code)]
pub fn via_load_balancer(builder: request::Builder) -> request::Builder {
    from_peer(builder, LOAD_BALANCER)
}

/// Development config pointing at `upstream`, trusting [`LOAD_BALANCER`].
pub fn test_config(upstream: SocketAddr) -> ShieldConfig {
    let mut config = ShieldConfig::default();
    config.upstream.address = upstream.to_string();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.trusted_proxies = vec!["10.0.0.1".to_string()];
    config.timeouts.upstream_secs = 2;
    config
}

/// Gateway over an in-memory reputation backend.
pub fn memory_gateway(config: &ShieldConfig) -> Arc<SecurityGateway> {
    Arc::new(SecurityGateway::new(
        &config.security,
        Arc::new(MemoryBackend::new()),
    ))
}

/// The fully layered gateway router, for `oneshot` tests.
#[allow(dead_code)]
pub fn gateway_router(config: &ShieldConfig, gateway: Arc<SecurityGateway>) -> Router {
    HttpServer::new(config, gateway).into_router()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
