use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::admin::AdminState;
use crate::security::{Classification, GatewayStatus, IpRecord, StoreError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub gateway: GatewayStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub ip: String,
    pub classification: Classification,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub identifier: String,
    pub reset: bool,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    #[error("no record for {0}")]
    NotFound(String),

    #[error("reputation store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::InvalidIp(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Store(e) => {
                tracing::error!(error = %e, "Admin request failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        gateway: state.gateway.status(),
    })
}

pub async fn list_ips(State(state): State<AdminState>) -> Result<Json<Vec<IpRecord>>, AdminError> {
    let mut records = state.gateway.reputation().list().await?;
    records.sort_by(|a, b| a.ip.cmp(&b.ip));
    Ok(Json(records))
}

pub async fn classify_ip(
    State(state): State<AdminState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<(StatusCode, Json<IpRecord>), AdminError> {
    if req.ip.parse::<IpAddr>().is_err() {
        return Err(AdminError::InvalidIp(req.ip));
    }

    let record = state
        .gateway
        .reputation()
        .add(
            &req.ip,
            req.classification,
            req.reason,
            req.ttl_secs.map(Duration::from_secs),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn remove_ip(
    State(state): State<AdminState>,
    Path(ip): Path<String>,
) -> Result<StatusCode, AdminError> {
    if state.gateway.reputation().remove(&ip).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::NotFound(ip))
    }
}

pub async fn reset_identifier(
    State(state): State<AdminState>,
    Path(identifier): Path<String>,
) -> Json<ResetResponse> {
    state.gateway.reset_identifier(&identifier);
    Json(ResetResponse {
        identifier,
        reset: true,
    })
}
