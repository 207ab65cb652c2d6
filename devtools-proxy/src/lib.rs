#![deny(missing_docs)]
//! Fan-in/fan-out proxy for the Chrome DevTools Protocol.
//!
//! A browser exposes one WebSocket endpoint per debuggable page and accepts a
//! single client on it. [`DevtoolsProxy`] multiplexes several inspector
//! sessions onto that one socket: request ids are rewritten on the way in so
//! replies route back to the originating client, events fan out to every
//! attached client, and the HTTP discovery endpoints are proxied with their
//! URLs rewritten to the proxy's own address.
//!
//! [`DevtoolsProxy::init`] builds the shared state and
//! [`DevtoolsProxy::router`] returns the `axum::Router` to serve on however
//! many listeners the host binds. Cancelling the provided
//! `CancellationToken` stops the per-page background readers; call
//! [`DevtoolsProxy::shutdown`] afterwards for an orderly drain of all live
//! sockets.

use std::sync::Arc;

use axum::Router;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::RuntimeConfig;
use crate::services::broker_registry::BrokerRegistry;

pub mod config;
pub mod id_codec;
pub mod metrics;

pub(crate) mod api;
pub(crate) mod services;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) registry: BrokerRegistry,
    pub(crate) http: reqwest::Client,
    pub(crate) devtools_pattern: Regex,
}

/// The assembled proxy service.
pub struct DevtoolsProxy {
    state: AppState,
}

impl DevtoolsProxy {
    /// Builds the proxy state from the runtime configuration.
    ///
    /// The cancellation token is handed to every per-page upstream reader;
    /// cancel it before [`DevtoolsProxy::shutdown`] when tearing the process
    /// down.
    pub fn init(
        config: Arc<RuntimeConfig>,
        cancellation_token: CancellationToken,
    ) -> eyre::Result<Self> {
        let devtools_pattern = Regex::new(&format!(
            r"(127\.0\.0\.1|localhost|{}):{}/",
            regex::escape(&config.chrome_host),
            config.chrome_port
        ))?;
        Ok(Self {
            state: AppState {
                registry: BrokerRegistry::new(Arc::clone(&config), cancellation_token),
                http: reqwest::Client::new(),
                devtools_pattern,
                config,
            },
        })
    }

    /// The router serving the whole network surface: `/status.json`,
    /// WebSocket attaches, and the transparent HTTP proxy for everything
    /// else.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(api::status::routes())
            .fallback(api::ws::dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Closes every live client and upstream socket.
    pub async fn shutdown(&self) {
        self.state.registry.shutdown().await;
    }
}
