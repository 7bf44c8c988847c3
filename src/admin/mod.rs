//! Admin API: reputation management and manual unblocking.
//!
//! Served on its own listener; every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::security::SecurityGateway;

#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<SecurityGateway>,
    pub api_key: Arc<str>,
}

pub fn admin_router(gateway: Arc<SecurityGateway>, api_key: &str) -> Router {
    let state = AdminState {
        gateway,
        api_key: Arc::from(api_key),
    };

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/ips", get(list_ips).post(classify_ip))
        .route("/admin/ips/{ip}", delete(remove_ip))
        .route("/admin/reset/{identifier}", post(reset_identifier))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
