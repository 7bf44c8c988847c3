//! Request inspection.
//!
//! # Responsibilities
//! - Identify the client a request is counted against
//!
//! # Design Decisions
//! - Forwarding headers are only believed when the socket peer is a
//!   configured trusted proxy. With no trusted proxies the peer address is
//!   the client.
//! - `X-Forwarded-For` is walked right to left: each trusted proxy appends
//!   the address it saw, so the first untrusted hop from the right is the
//!   client. Anything further left was written by the client.
//! - Identification never fails: the fallback is `"unknown"`

use axum::http::HeaderMap;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, SocketAddr};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Identifier used when no source is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Networks whose forwarding headers are believed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies {
    networks: Vec<IpNet>,
}

impl TrustedProxies {
    /// Parse CIDRs (`10.0.0.0/8`) or bare addresses (`10.0.0.1`).
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, String> {
        let networks = entries
            .iter()
            .map(|entry| parse_network(entry.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    /// Like [`parse`](Self::parse), logging and skipping bad entries.
    pub fn parse_lossy<S: AsRef<str>>(entries: &[S]) -> Self {
        let networks = entries
            .iter()
            .filter_map(|entry| match parse_network(entry.as_ref()) {
                Ok(net) => Some(net),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring trusted proxy entry");
                    None
                }
            })
            .collect();
        Self { networks }
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(ip))
    }
}

fn parse_network(raw: &str) -> Result<IpNet, String> {
    let raw = raw.trim();
    if let Ok(net) = raw.parse::<IpNet>() {
        return Ok(net);
    }
    let host = match raw.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ipv4Net::new(v4, 32).map(IpNet::V4),
        Ok(IpAddr::V6(v6)) => Ipv6Net::new(v6, 128).map(IpNet::V6),
        Err(_) => return Err(format!("'{}' is not an IP address or CIDR", raw)),
    };
    host.map_err(|e| format!("'{}': {}", raw, e))
}

/// The address a request is counted against.
///
/// The socket peer, unless it is a trusted proxy. Then the rightmost
/// untrusted `X-Forwarded-For` hop, then `X-Real-IP`.
pub fn client_identifier(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return UNKNOWN_CLIENT.to_string();
    };
    if !trusted.contains(&peer) {
        return peer.to_string();
    }

    let forwarded = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>();
    if !forwarded.is_empty() {
        let mut client = peer;
        for hop in forwarded.iter().rev() {
            // garbage ends the chain; the last trusted hop is the best we know
            let Ok(ip) = hop.parse::<IpAddr>() else {
                break;
            };
            client = ip;
            if !trusted.contains(&ip) {
                break;
            }
        }
        return client.to_string();
    }

    headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
        .to_string()
}
