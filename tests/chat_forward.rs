use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use geekchat_bridge::config::{AppConfig, BackendConfig, ChunkFraming, FeaturesConfig, ServerConfig};
use geekchat_bridge::routing::dispatch_request;
use geekchat_bridge::state::AppState;
use serde_json::{json, Value};

const HELLO_SSE: &str = "event: add\ndata: {\"id\":\"msg-1\",\"text\":\"Hel\"}\n\n\
event: add\ndata: {\"id\":\"msg-1\",\"text\":\"lo\"}\n\n\
event: finish\ndata: {\"id\":\"msg-1\",\"finish_reason\":\"stop\"}\n\n";

#[derive(Default)]
struct Seen {
    headers: Vec<HeaderMap>,
    bodies: Vec<Value>,
}

struct MockBackend {
    url: String,
    seen: Arc<Mutex<Seen>>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn spawn_backend(status: StatusCode, body: &'static str) -> MockBackend {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let recorder = Arc::clone(&seen);
    let app = Router::new().route(
        "/api/chat/stream",
        post(move |headers: HeaderMap, Json(request): Json<Value>| {
            let recorder = Arc::clone(&recorder);
            async move {
                {
                    let mut seen = recorder.lock().expect("seen lock");
                    seen.headers.push(headers);
                    seen.bodies.push(request);
                }
                let content_type = if status.is_success() {
                    "text/event-stream"
                } else {
                    "application/json"
                };
                (status, [("content-type", content_type)], body).into_response()
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend {
        url: format!("http://{addr}/api/chat/stream"),
        seen,
        server,
    }
}

/// Backend that waits `gap` before each of the `HELLO_SSE` records.
async fn spawn_slow_backend(gap: Duration) -> MockBackend {
    let app = Router::new().route(
        "/api/chat/stream",
        post(move || async move {
            let records: Vec<&'static str> = HELLO_SSE.split_inclusive("\n\n").collect();
            let body = futures_util::stream::unfold(records.into_iter(), move |mut records| {
                async move {
                    let record = records.next()?;
                    tokio::time::sleep(gap).await;
                    Some((Ok::<_, Infallible>(record), records))
                }
            });
            (
                StatusCode::OK,
                [("content-type", "text/event-stream")],
                Body::from_stream(body),
            )
                .into_response()
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend {
        url: format!("http://{addr}/api/chat/stream"),
        seen: Arc::new(Mutex::new(Seen::default())),
        server,
    }
}

fn build_state(backend_url: &str, features: FeaturesConfig) -> Arc<AppState> {
    build_state_with_server(backend_url, ServerConfig::default(), features)
}

fn build_state_with_server(
    backend_url: &str,
    server: ServerConfig,
    features: FeaturesConfig,
) -> Arc<AppState> {
    let mut backend = BackendConfig::new(backend_url, "code-token-secret", "geek-model");
    backend.user_id = "user-7".to_string();
    backend.talk_id = "talk-9".to_string();
    let config = AppConfig {
        server,
        backend,
        features,
    };
    Arc::new(AppState::from_config(config).expect("build state"))
}

fn chat_request(body: &Value, accept: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/openai/v1/chat/completions")
        .header("content-type", "application/json");
    if let Some(accept) = accept {
        builder = builder.header("accept", accept);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request")
}

async fn send(state: Arc<AppState>, request: Request<Body>) -> Response {
    dispatch_request(state, Arc::<str>::from("/api/openai"), request)
        .await
        .expect("dispatch")
}

async fn read_body(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn four_messages() -> Value {
    json!({
        "model": "gpt-3.5-turbo",
        "messages": [
            {"role": "system", "content": "Sys"},
            {"role": "user", "content": "Hi"},
            {"role": "assistant", "content": "Hello"},
            {"role": "user", "content": "Bye"}
        ]
    })
}

#[tokio::test]
async fn test_streaming_forwards_ndjson_chunks() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let response = send(state, chat_request(&four_messages(), Some("text/event-stream"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["connection"], "keep-alive");

    let body = read_body(response).await;
    let lines: Vec<Value> = body
        .lines()
        .map(|line| serde_json::from_str(line).expect("chunk json"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert!(body.ends_with('\n'));

    assert_eq!(lines[0]["id"], "msg-1");
    assert_eq!(lines[0]["object"], "chat.completion.chunk");
    assert_eq!(lines[0]["model"], "gpt-3.5-turbo");
    assert!(lines[0]["created"].as_u64().is_some());
    assert_eq!(lines[0]["choices"][0]["delta"]["content"], "Hel");
    assert!(lines[0]["choices"][0]["finish_reason"].is_null());
    assert_eq!(lines[1]["choices"][0]["delta"]["content"], "lo");
    assert_eq!(lines[2]["choices"][0]["delta"], json!({}));
    assert_eq!(lines[2]["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_backend_receives_translated_request() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let response = send(state, chat_request(&four_messages(), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let seen = backend.seen.lock().expect("seen lock");
    assert_eq!(seen.bodies.len(), 1);
    let headers = &seen.headers[0];
    assert_eq!(headers["code-token"], "code-token-secret");
    assert_eq!(headers["accept"], "text/event-stream");
    assert_eq!(headers["content-type"], "application/json");

    let request = &seen.bodies[0];
    assert_eq!(request["prompt"], "Bye");
    assert_eq!(
        request["history"],
        json!([
            {"query": "Sys", "answer": ""},
            {"query": "Hi", "answer": "Hello"}
        ])
    );
    assert_eq!(request["user_id"], "user-7");
    assert_eq!(request["talkId"], "talk-9");
    assert_eq!(request["model"], "geek-model");
    assert_eq!(request["user_role"], 0);
    assert_eq!(request["locale"], "zh");
    assert!(request["agent"].is_null());
}

#[tokio::test]
async fn test_aggregated_returns_concatenated_text() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let response = send(state, chat_request(&four_messages(), Some("application/json"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(read_body(response).await, "Hello");
}

#[tokio::test]
async fn test_aggregated_ndjson_framing_concatenates_chunks() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let features = FeaturesConfig {
        aggregate_framing: ChunkFraming::Ndjson,
        ..FeaturesConfig::default()
    };
    let state = build_state(&backend.url, features);

    let body = read_body(send(state, chat_request(&four_messages(), None)).await).await;
    assert_eq!(body.lines().count(), 3);
    assert!(body.contains("\"content\":\"Hel\""));
}

#[tokio::test]
async fn test_sse_framing_and_stream_flag() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let features = FeaturesConfig {
        stream_framing: ChunkFraming::Sse,
        honor_stream_flag: true,
        ..FeaturesConfig::default()
    };
    let state = build_state(&backend.url, features);

    let mut request = four_messages();
    request["stream"] = json!(true);
    let response = send(state, chat_request(&request, None)).await;
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let body = read_body(response).await;
    let records: Vec<&str> = body.split_terminator("\n\n").collect();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|record| record.starts_with("data: {")));
    assert!(!body.contains("[DONE]"));
}

#[tokio::test]
async fn test_empty_messages_is_an_error_without_backend_call() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let response = send(
        state,
        chat_request(&json!({"model": "m", "messages": []}), Some("text/event-stream")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["content-type"], "application/json");
    let payload: Value = serde_json::from_str(&read_body(response).await).expect("error json");
    assert!(payload["error"]["message"].as_str().is_some());
    assert_eq!(payload.as_object().map(serde_json::Map::len), Some(1));
    assert!(backend.seen.lock().expect("seen lock").bodies.is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_an_error() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let request = Request::builder()
        .method("POST")
        .uri("/api/openai/v1/chat/completions")
        .body(Body::from("{not json"))
        .expect("build request");
    let response = send(state, request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_backend_rejection_is_sanitized() {
    let backend = spawn_backend(
        StatusCode::UNAUTHORIZED,
        r#"{"error":{"message":"invalid code token"}}"#,
    )
    .await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let response = send(state, chat_request(&four_messages(), Some("text/event-stream"))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_str(&read_body(response).await).expect("error json");
    let message = payload["error"]["message"].as_str().expect("message");
    assert!(message.contains("invalid code token"));
    assert!(message.contains("401"));
}

#[tokio::test]
async fn test_unreachable_backend_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    let state = build_state(&format!("http://{addr}/api/chat/stream"), FeaturesConfig::default());

    let response = send(state, chat_request(&four_messages(), None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_str(&read_body(response).await).expect("error json");
    assert!(payload["error"]["message"].as_str().is_some());
}

#[tokio::test]
async fn test_stream_longer_than_timeout_completes_while_bytes_flow() {
    let backend = spawn_slow_backend(Duration::from_millis(600)).await;
    let server = ServerConfig {
        timeout: 1,
        ..ServerConfig::default()
    };
    let state = build_state_with_server(&backend.url, server, FeaturesConfig::default());

    let started = std::time::Instant::now();
    let response = send(state, chat_request(&four_messages(), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, "Hello");
    assert!(started.elapsed() > Duration::from_secs(1));
}

#[tokio::test]
async fn test_silent_backend_times_out() {
    let backend = spawn_slow_backend(Duration::from_millis(2500)).await;
    let server = ServerConfig {
        timeout: 1,
        ..ServerConfig::default()
    };
    let state = build_state_with_server(&backend.url, server, FeaturesConfig::default());

    let response = send(state, chat_request(&four_messages(), None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_truncated_backend_stream_fails_aggregation() {
    let backend = spawn_backend(
        StatusCode::OK,
        "event: add\ndata: {\"id\":\"msg-1\",\"text\":\"Hel\"}\n\n",
    )
    .await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let response = send(state, chat_request(&four_messages(), None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let health = Request::builder()
        .method("GET")
        .uri("/api/openai/")
        .body(Body::empty())
        .expect("build health request");
    let response = send(Arc::clone(&state), health).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_body(response).await;
    let payload: Value = serde_json::from_str(&body).expect("health json");
    assert_eq!(payload["config"]["backend_model"], "geek-model");
    assert!(!body.contains("code-token-secret"));

    let missing = Request::builder()
        .method("POST")
        .uri("/api/openai/v1/embeddings")
        .body(Body::empty())
        .expect("build request");
    assert_eq!(
        send(Arc::clone(&state), missing).await.status(),
        StatusCode::NOT_FOUND
    );

    let wrong_method = Request::builder()
        .method("GET")
        .uri("/api/openai/v1/chat/completions")
        .body(Body::empty())
        .expect("build request");
    assert_eq!(
        send(state, wrong_method).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let backend = spawn_backend(StatusCode::OK, HELLO_SSE).await;
    let state = build_state(&backend.url, FeaturesConfig::default());

    let request = Request::builder()
        .method("POST")
        .uri("/api/openai/v1/chat/completions")
        .body(Body::from(vec![b' '; 3 * 1024 * 1024]))
        .expect("build request");
    assert_eq!(
        send(state, request).await.status(),
        StatusCode::PAYLOAD_TOO_LARGE
    );
}
