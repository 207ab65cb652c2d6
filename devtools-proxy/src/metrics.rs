//! Metrics definitions for the proxy.
//!
//! This module defines all metrics keys used by the service and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate. No recorder is installed here; without one the macros
//! no-op.

/// Metrics key for the number of currently attached inspector clients.
pub const METRICS_ID_PROXY_CLIENTS_ATTACHED: &str = "devtools.proxy.clients.attached";
/// Metrics key for attaches refused because a page was at capacity.
pub const METRICS_ID_PROXY_CLIENTS_REFUSED: &str = "devtools.proxy.clients.refused";
/// Metrics key for the number of live page brokers.
pub const METRICS_ID_PROXY_BROKERS_OPEN: &str = "devtools.proxy.brokers.open";
/// Metrics key for upstream WebSocket dials.
pub const METRICS_ID_PROXY_UPSTREAM_DIALS: &str = "devtools.proxy.upstream.dials";
/// Metrics key for proxied HTTP requests.
pub const METRICS_ID_PROXY_HTTP_REQUESTS: &str = "devtools.proxy.http.requests";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_PROXY_CLIENTS_ATTACHED,
        metrics::Unit::Count,
        "Number of currently attached inspector clients"
    );

    metrics::describe_counter!(
        METRICS_ID_PROXY_CLIENTS_REFUSED,
        metrics::Unit::Count,
        "Number of attaches refused because the page was at capacity"
    );

    metrics::describe_gauge!(
        METRICS_ID_PROXY_BROKERS_OPEN,
        metrics::Unit::Count,
        "Number of live page brokers"
    );

    metrics::describe_counter!(
        METRICS_ID_PROXY_UPSTREAM_DIALS,
        metrics::Unit::Count,
        "Number of WebSocket dials to the browser"
    );

    metrics::describe_counter!(
        METRICS_ID_PROXY_HTTP_REQUESTS,
        metrics::Unit::Count,
        "Number of proxied HTTP requests"
    );
}
