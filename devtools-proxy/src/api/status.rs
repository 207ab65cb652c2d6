//! Read-only introspection of the runtime configuration.
//!
//! - `/status.json` – the configuration the proxy is running with, including
//!   which optional backends are active.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;
use crate::config::FeatureFlags;

/// Body of `GET /status.json`.
#[derive(Serialize)]
struct Status {
    chrome_host: String,
    chrome_port: u16,
    debug: bool,
    internal: FeatureFlags,
    max_clients: usize,
    proxy_hosts: Vec<String>,
    proxy_ports: Vec<u16>,
}

/// Create a router containing the status endpoint.
pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/status.json", get(status))
}

/// Reports the runtime configuration. No mutation.
async fn status(State(state): State<AppState>) -> Json<Status> {
    let config = &state.config;
    Json(Status {
        chrome_host: config.chrome_host.clone(),
        chrome_port: config.chrome_port,
        debug: config.debug,
        internal: config.internal,
        max_clients: config.max_clients,
        proxy_hosts: config.proxy_hosts.clone(),
        proxy_ports: config.proxy_ports.clone(),
    })
}
