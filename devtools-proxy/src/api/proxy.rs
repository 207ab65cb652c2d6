//! Transparent reverse proxy for the browser's HTTP surface, plus rewriting
//! of the `/json` discovery endpoints so clients see the proxy address.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{Method, StatusCode, header};
use regex::Regex;
use serde_json::Value;

use crate::AppState;
use crate::metrics::METRICS_ID_PROXY_HTTP_REQUESTS;

/// Paths whose JSON body gets its debugger URLs rewritten.
const DISCOVERY_PATHS: [&str; 2] = ["/json", "/json/list"];

/// Forwards one HTTP request to the browser.
///
/// The browser's discovery surface is GET-only, so the upstream request is
/// always a GET regardless of the incoming method. Upstream connection errors
/// surface as 502 with the error string as body.
pub(crate) async fn forward(
    state: &AppState,
    method: Method,
    path_qs: &str,
    host: &str,
) -> Response {
    ::metrics::counter!(METRICS_ID_PROXY_HTTP_REQUESTS).increment(1);
    tracing::info!("[HTTP {method}] {path_qs}");
    let config = &state.config;
    let url = format!(
        "http://{}:{}{}",
        config.chrome_host, config.chrome_port, path_qs
    );
    let path = path_qs.split('?').next().unwrap_or(path_qs);
    let result = if DISCOVERY_PATHS.contains(&path) {
        discovery(state, &url, host).await
    } else {
        transparent(state, &url).await
    };
    result.unwrap_or_else(|err| (StatusCode::BAD_GATEWAY, err.to_string()).into_response())
}

/// Fetches the upstream tab list and rewrites debugger URLs to the proxy's
/// own authority, taken from the client's `Host` header.
async fn discovery(state: &AppState, url: &str, host: &str) -> Result<Response, reqwest::Error> {
    let response = state.http.get(url).send().await?;
    let status = response.status();
    let mut tabs: Value = response.json().await?;
    rewrite_tabs(
        &mut tabs,
        &state.devtools_pattern,
        state.config.chrome_port,
        host,
    );
    Ok((status, axum::Json(tabs)).into_response())
}

/// Forwards the upstream response as-is, keeping only the media type of
/// `Content-Type` (the value could be `text/html; charset=UTF-8`).
async fn transparent(state: &AppState, url: &str) -> Result<Response, reqwest::Error> {
    let response = state.http.get(url).send().await?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_owned());
    let body = response.bytes().await?;
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    Ok(builder
        .body(Body::from(body))
        .expect("response from valid parts"))
}

/// Applies the URL rewrite to every tab object of a discovery response.
///
/// String fields pointing at the browser (`127.0.0.1`, `localhost`, or the
/// configured chrome host, with the chrome port) are rewritten to the proxy
/// authority. Tabs with an `id` get `webSocketDebuggerUrl` and
/// `devtoolsFrontendUrl` synthesized when missing; tabs without one are
/// passed through untouched. Applying the rewrite to its own output changes
/// nothing.
fn rewrite_tabs(tabs: &mut Value, pattern: &Regex, chrome_port: u16, proxy_authority: &str) {
    let Some(tabs) = tabs.as_array_mut() else {
        return;
    };
    let needle = format!(":{chrome_port}/");
    let replacement = format!("{proxy_authority}/");
    for tab in tabs {
        let Some(fields) = tab.as_object_mut() else {
            continue;
        };
        for value in fields.values_mut() {
            if let Some(text) = value.as_str()
                && text.contains(&needle)
            {
                *value = Value::from(pattern.replace_all(text, replacement.as_str()).into_owned());
            }
        }
        let Some(id) = fields.get("id").and_then(Value::as_str).map(str::to_owned) else {
            tracing::warn!("got a tab without id (which is improbable): {fields:?}");
            continue;
        };
        let devtools_url = format!("{proxy_authority}/devtools/page/{id}");
        fields
            .entry("webSocketDebuggerUrl")
            .or_insert_with(|| Value::from(format!("ws://{devtools_url}")));
        fields
            .entry("devtoolsFrontendUrl")
            .or_insert_with(|| Value::from(format!("/devtools/inspector.html?ws={devtools_url}")));
    }
}
