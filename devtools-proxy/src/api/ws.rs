//! Front door: decides whether a request is an inspector WebSocket attach or
//! plain HTTP for the transparent proxy.
//!
//! Every path except `/status.json` lands here. Requests carrying valid
//! WebSocket upgrade headers attach a client to the page named by the URL;
//! everything else is forwarded to the browser's HTTP surface.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::response::Response;
use axum_extra::extract::Host;
use http::{Method, Uri};

use crate::AppState;
use crate::api::proxy;

/// Fallback handler for the whole network surface except `/status.json`.
///
/// The page id is the last `/`-separated segment of path+query, matching the
/// URLs the DevTools discovery endpoints hand out (`/devtools/page/<id>`).
pub(crate) async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Host(host): Host,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let path_qs = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned());
    match upgrade {
        Ok(upgrade) => {
            let page_id = path_qs
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_owned();
            let broker = state.registry.get_or_create(&page_id);
            upgrade
                .on_failed_upgrade(|err| {
                    tracing::warn!("could not establish websocket connection: {err:?}");
                })
                .on_upgrade(move |socket| broker.attach(socket, path_qs))
        }
        Err(_) => proxy::forward(&state, method, &path_qs, &host).await,
    }
}
