use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::util::ServiceExt;
use url::Url;
use waha_gateway::provider::WahaClient;
use waha_gateway::{AppState, Config, build_router};
use waha_relay::bridge::{Connector, Transport};
use waha_relay::{
    BridgeConfig, BridgeError, EventBus, EventEnvelope, UpstreamBridge,
};

struct Offline;

#[async_trait::async_trait]
impl Connector for Offline {
    async fn connect(
        &self,
        _url: &Url,
    ) -> Result<Box<dyn Transport>, BridgeError> {
        Err(BridgeError::Closed)
    }
}

fn app_state(api_url: &str) -> (AppState, Arc<EventBus>) {
    let config = Config {
        bridge: BridgeConfig {
            api_url: api_url.to_string(),
            api_key: Some("secret".into()),
            ..Default::default()
        },
        webhook_token: Some("hook".into()),
        ..Default::default()
    };
    let bus = Arc::new(EventBus::new(config.event_buffer_capacity));
    let bridge = Arc::new(
        UpstreamBridge::with_connector(
            config.bridge.clone(),
            bus.clone(),
            Arc::new(Offline),
        )
        .unwrap(),
    );
    let client = WahaClient::new(
        &config.bridge.api_url,
        config.bridge.api_key(),
        Duration::from_secs(5),
    )
    .unwrap();
    (AppState::new(&config, bridge, client), bus)
}

type Seen = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

/// Stand-in provider that records every call and answers with `reply`.
async fn spawn_provider(status: StatusCode, reply: Value) -> (String, Seen) {
    let seen: Seen = Default::default();
    let recorded = seen.clone();
    let app = Router::new().fallback(
        move |uri: Uri, headers: HeaderMap, Json(body): Json<Value>| {
            let recorded = recorded.clone();
            let reply = reply.clone();
            async move {
                let key = headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                recorded
                    .lock()
                    .unwrap()
                    .push((uri.path().to_string(), key, body));
                (status, Json(reply))
            }
        },
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn health_endpoints_work() {
    let (state, _) = app_state("http://localhost:3000");
    let app = build_router(state);

    let res = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ready");

    let res = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app.oneshot(get("/nope")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn config_reports_without_revealing_key() {
    let (state, _) = app_state("http://waha.local:3000");
    let app = build_router(state);

    let res = app.oneshot(get("/api/waha/config")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["apiUrl"], "http://waha.local:3000");
    assert_eq!(body["hasApiKey"], true);
    assert_eq!(body["webhookTokenSet"], true);
    assert_eq!(body["ws"]["started"], false);
    assert_eq!(body["ws"]["connected"], false);
    assert_eq!(body["ws"]["state"], "idle");
    assert_eq!(
        body["ws"]["url"],
        "ws://waha.local:3000/ws?x-api-key=***&session=*&events=*"
    );
    assert!(!body.to_string().contains("secret"));
}

#[tokio::test(flavor = "multi_thread")]
async fn send_rejects_invalid_requests() {
    let (state, _) = app_state("http://localhost:3000");
    let app = build_router(state);

    let res = app
        .clone()
        .oneshot(post_json("/api/waha/send", "{not json"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(res).await,
        json!({"ok": false, "error": "Invalid body"})
    );

    let res = app
        .oneshot(post_json(
            "/api/waha/send",
            &json!({"type": "text", "chatId": "628123",
                    "session": "default", "text": "  "})
            .to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(res).await,
        json!({"ok": false, "error": "Invalid text"})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn send_forwards_to_provider() {
    let (api_url, seen) = spawn_provider(
        StatusCode::CREATED,
        json!({"id": "true_628123@c.us_AAA"}),
    )
    .await;
    let (state, _) = app_state(&api_url);
    let app = build_router(state);

    let res = app
        .oneshot(post_json(
            "/api/waha/send",
            &json!({"type": "text", "chatId": "628123",
                    "session": "default", "text": "hello"})
            .to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        body_json(res).await,
        json!({"ok": true, "data": {"id": "true_628123@c.us_AAA"}})
    );

    let calls = seen.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (path, key, body) = &calls[0];
    assert_eq!(path, "/api/sendText");
    assert_eq!(key.as_deref(), Some("secret"));
    assert_eq!(
        body,
        &json!({"chatId": "628123@c.us", "text": "hello", "session": "default"})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_failure_maps_to_bad_gateway() {
    let (api_url, seen) = spawn_provider(
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({"message": "Session \"default\" is not ready"}),
    )
    .await;
    let (state, _) = app_state(&api_url);
    let app = build_router(state);

    let res = app
        .oneshot(post_json(
            "/api/waha/send",
            &json!({"type": "image", "chatId": "1@g.us",
                    "session": "default", "fileUrl": "https://x/y.jpg"})
            .to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        body_json(res).await,
        json!({"ok": false, "error": "Session \"default\" is not ready"})
    );
    assert_eq!(seen.lock().unwrap()[0].0, "/api/sendImage");
}

#[tokio::test(flavor = "multi_thread")]
async fn events_stream_replays_and_starts_bridge() {
    let (state, bus) = app_state("http://localhost:3000");
    let bridge = state.bridge.clone();
    bus.publish(EventEnvelope {
        id: "evt_1".into(),
        timestamp: 1_700_000_000_000,
        event_type: Some("message".into()),
        session_id: Some("default".into()),
        payload: json!({"body": "hi"}),
        metadata: None,
    });
    let app = build_router(state);

    let res = app.oneshot(get("/api/waha/events")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/event-stream");
    assert_eq!(res.headers()["cache-control"], "no-cache, no-transform");
    assert!(bridge.status().started);
    assert_eq!(bus.subscriber_count(), 1);

    let mut body = res.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text =
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.starts_with("data: {\"id\":\"evt_1\""), "got {text}");
    assert!(text.ends_with("\n\n"));

    drop(body);
    assert_eq!(bus.subscriber_count(), 0);
    bridge.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn events_stream_sends_keepalive_comment() {
    let (mut state, _bus) = app_state("http://localhost:3000");
    state.stream.keepalive = Duration::from_millis(50);
    let bridge = state.bridge.clone();
    let app = build_router(state);

    let res = app.oneshot(get("/api/waha/events")).await.unwrap();
    let mut body = res.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text =
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert_eq!(text, ": ping\n\n");

    drop(body);
    bridge.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_ends_open_streams() {
    let (state, bus) = app_state("http://localhost:3000");
    let token = state.shutdown.clone();
    let app = build_router(state);

    let res = app.oneshot(get("/api/waha/events")).await.unwrap();
    let mut body = res.into_body();
    token.cancel();
    let end = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap();
    assert!(end.is_none());
    drop(body);
    assert_eq!(bus.subscriber_count(), 0);
}
