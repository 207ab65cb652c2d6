use std::time::Duration;

use axum::http::StatusCode;
use futures::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite;

use crate::setup::{StubBrowser, TestProxy};


#[tokio::test]
async fn a_reply_carries_the_id_the_client_sent() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);

    let mut ws = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    ws.send_json(&json!({"id": 7, "method": "Page.enable"})).await;
    let reply: Value = ws.receive_json().await;

    assert_eq!(reply["id"], 7);
    // max_clients = 2 gives one client bit; client 0 request 7 packs to 7
    assert_eq!(reply["result"]["echoedId"], 7);
}

#[tokio::test]
async fn two_clients_may_use_the_same_request_id() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);

    let mut first = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    first.send_json(&json!({"id": 7, "method": "Page.enable"})).await;
    let reply: Value = first.receive_json().await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["echoedId"], 7);

    let mut second = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    second.send_json(&json!({"id": 7, "method": "Page.enable"})).await;
    let reply: Value = second.receive_json().await;
    assert_eq!(reply["id"], 7);
    // client 1 request 7 packs to (1 << 30) | 7 on the shared socket
    assert_eq!(reply["result"]["echoedId"], (1u32 << 30) | 7);
}

#[tokio::test]
async fn events_fan_out_to_every_client_verbatim() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);

    let mut first = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    first.send_json(&json!({"id": 1, "method": "Page.enable"})).await;
    let _: Value = first.receive_json().await;

    let mut second = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    // the stub emits the event before replying to Network.enable
    second.send_json(&json!({"id": 1, "method": "Network.enable"})).await;

    let event_at_second = second.receive_text().await;
    let event_at_first = first.receive_text().await;
    assert!(event_at_first.contains("Network.requestWillBeSent"));
    assert_eq!(event_at_first, event_at_second);

    // the reply goes to the requester only
    let reply: Value = second.receive_json().await;
    assert_eq!(reply["id"], 1);
}

#[tokio::test]
async fn a_page_at_capacity_refuses_the_next_client() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);

    let mut first = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    first.send_json(&json!({"id": 1, "method": "Page.enable"})).await;
    let _: Value = first.receive_json().await;
    let mut second = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    second.send_json(&json!({"id": 1, "method": "Page.enable"})).await;
    let _: Value = second.receive_json().await;

    // the third handshake completes, then the socket closes with no frames
    let (mut third, response) = tokio_tungstenite::connect_async(proxy.page_url("test-page"))
        .await
        .expect("handshake succeeds");
    assert_eq!(response.status().as_u16(), 101);
    let frame = third.next().await;
    assert!(
        matches!(
            frame,
            None | Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_))
        ),
        "got unexpected frame: {frame:?}"
    );

    // the attached clients are unaffected
    first.send_json(&json!({"id": 2, "method": "Page.enable"})).await;
    let reply: Value = first.receive_json().await;
    assert_eq!(reply["id"], 2);
}

#[tokio::test]
async fn the_browser_may_start_after_the_first_client() {
    let browser = StubBrowser::start_delayed(Duration::from_millis(1500)).await;
    let proxy = TestProxy::start(&browser, 2);

    let mut ws = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    ws.send_json(&json!({"id": 3, "method": "Page.enable"})).await;
    let reply: Value = ws.receive_json().await;
    assert_eq!(reply["id"], 3);
}

#[tokio::test]
async fn losing_the_browser_detaches_the_sender_and_the_next_client_redials() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);

    // a raw client so the close is observable
    let (mut ws, _) = tokio_tungstenite::connect_async(proxy.page_url("test-page"))
        .await
        .expect("handshake succeeds");
    ws.send(tungstenite::Message::text(
        json!({"id": 1, "method": "Page.enable"}).to_string(),
    ))
    .await
    .unwrap();
    let reply = ws.next().await;
    assert!(matches!(reply, Some(Ok(tungstenite::Message::Text(_)))));

    // the stub drops the page socket without replying
    ws.send(tungstenite::Message::text(
        json!({"id": 2, "method": "Browser.close"}).to_string(),
    ))
    .await
    .unwrap();
    // let the broker's reader observe the closed upstream
    tokio::time::sleep(Duration::from_millis(300)).await;

    // the next send runs into the closed upstream and the proxy detaches us
    ws.send(tungstenite::Message::text(
        json!({"id": 3, "method": "Page.enable"}).to_string(),
    ))
    .await
    .unwrap();
    let frame = ws.next().await;
    assert!(
        matches!(
            frame,
            None | Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_))
        ),
        "got unexpected frame: {frame:?}"
    );

    // a fresh client triggers a redial and replies flow again
    let mut fresh = proxy
        .server
        .get_websocket("/devtools/page/test-page")
        .await
        .into_websocket()
        .await;
    fresh.send_json(&json!({"id": 9, "method": "Page.enable"})).await;
    let reply: Value = fresh.receive_json().await;
    assert_eq!(reply["id"], 9);
}

#[tokio::test]
async fn an_oversized_request_id_disconnects_the_client() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);

    let (mut ws, _) = tokio_tungstenite::connect_async(proxy.page_url("test-page"))
        .await
        .expect("handshake succeeds");
    // max_clients = 2 leaves 30 bits for request ids; 2^30 does not fit
    ws.send(tungstenite::Message::text(
        json!({"id": 1u64 << 30, "method": "Page.enable"}).to_string(),
    ))
    .await
    .unwrap();

    // the frame is dropped and the socket closes; no reply may arrive
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(tungstenite::Message::Close(_)) | Err(_) => break,
            Ok(other) => panic!("expected the socket to close, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn discovery_urls_are_rewritten_to_the_proxy_authority() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);
    let authority = proxy.authority();

    let tabs: Value = proxy.server.get("/json").await.json();
    let tab = &tabs[0];
    assert_eq!(
        tab["webSocketDebuggerUrl"],
        format!("ws://{authority}/devtools/page/test-page")
    );
    assert_eq!(tab["url"], format!("http://{authority}/page.html"));
    // synthesized because the stub does not send one
    assert_eq!(
        tab["devtoolsFrontendUrl"],
        format!("/devtools/inspector.html?ws={authority}/devtools/page/test-page")
    );
}

#[tokio::test]
async fn transparent_proxying_strips_the_charset_suffix() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 2);

    let response = proxy.server.get("/page.html").await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "text/html");
    assert_eq!(response.text(), "<html>stub</html>");
}

#[tokio::test]
async fn an_unreachable_browser_surfaces_as_bad_gateway() {
    // grab a port nothing listens on
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let proxy = TestProxy::with_chrome_port(port, 2);
    let response = proxy.server.get("/json").await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    assert!(!response.text().is_empty());
}

#[tokio::test]
async fn status_reports_the_runtime_configuration() {
    let browser = StubBrowser::start().await;
    let proxy = TestProxy::start(&browser, 3);

    let status: Value = proxy.server.get("/status.json").await.json();
    assert_eq!(status["chrome_host"], "127.0.0.1");
    assert_eq!(status["chrome_port"], browser.addr.port());
    assert_eq!(status["debug"], false);
    // 3 configured clients round up to 4
    assert_eq!(status["max_clients"], 4);
    assert_eq!(status["proxy_hosts"], json!(["127.0.0.1"]));
    assert_eq!(status["proxy_ports"], json!([9222]));
    assert_eq!(status["internal"]["simd_json"], false);
    assert_eq!(status["internal"]["multi_thread"], false);
}
