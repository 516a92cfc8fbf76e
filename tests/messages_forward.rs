use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use msgbridge::config::{
    AppConfig, BackendConfig, FeaturesConfig, MatchType, ModelMappingConfig, ModelMappingRule,
    ServerConfig,
};
use msgbridge::routing::dispatch::dispatch_request;
use msgbridge::state::AppState;

type Captured = Arc<Mutex<Option<Value>>>;

fn build_config(base_url: String) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            max_request_body_bytes: 64 * 1024,
            ..ServerConfig::default()
        },
        backend: BackendConfig {
            base_url,
            api_key: "backend-secret".to_string(),
            timeout_secs: 5,
            connect_timeout_secs: 1,
            stream_idle_timeout_secs: 5,
            models: vec!["deepseek-chat".to_string(), "deepseek-reasoner".to_string()],
        },
        model_mapping: ModelMappingConfig {
            default: Some("deepseek-chat".to_string()),
            rules: vec![ModelMappingRule {
                pattern: "claude-opus".to_string(),
                match_type: MatchType::Prefix,
                target: "deepseek-reasoner".to_string(),
            }],
        },
        features: FeaturesConfig::default(),
    }
}

fn build_state(base_url: String) -> Arc<AppState> {
    Arc::new(AppState::from_config(build_config(base_url)).expect("build state"))
}

async fn spawn_backend(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/v1"), server)
}

fn capturing_backend(captured: Captured, reply: Value) -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(move |Json(body): Json<Value>| {
            let captured = Arc::clone(&captured);
            let reply = reply.clone();
            async move {
                *captured.lock().expect("capture lock") = Some(body);
                Json(reply)
            }
        }),
    )
}

async fn post_json(state: Arc<AppState>, uri: &str, body: &Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request");
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("json payload")
}

#[tokio::test]
async fn test_non_stream_round_trip() {
    let captured: Captured = Arc::default();
    let app = capturing_backend(
        Arc::clone(&captured),
        json!({
            "id": "chatcmpl_mock",
            "model": "deepseek-reasoner",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "reasoning_content": "<think>check the weather</think>",
                    "content": "It is sunny."
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 11, "completion_tokens": 4, "total_tokens": 15}
        }),
    );
    let (base_url, server) = spawn_backend(app).await;
    let state = build_state(base_url);

    let response = post_json(
        state,
        "/v1/messages",
        &json!({
            "model": "claude-opus-4",
            "max_tokens": 256,
            "system": [{"type": "text", "text": "Be brief."}],
            "messages": [{"role": "user", "content": "Weather?"}],
            "stop_sequences": ["END"]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response
        .headers()
        .get("request-id")
        .and_then(|v| v.to_str().ok())
        .expect("request-id header")
        .to_string();
    assert!(request_id.starts_with("req_"));

    let payload = json_body(response).await;
    assert_eq!(payload["type"], "message");
    assert_eq!(payload["role"], "assistant");
    assert_eq!(payload["model"], "claude-opus-4");
    assert!(payload["id"].as_str().expect("id").starts_with("msg_"));
    assert_eq!(payload["stop_reason"], "end_turn");
    assert_eq!(payload["usage"]["input_tokens"], 11);
    assert_eq!(payload["usage"]["output_tokens"], 4);
    let content = payload["content"].as_array().expect("content array");
    assert_eq!(content.len(), 2);
    assert_eq!(content[0], json!({"type": "text", "text": "check the weather"}));
    assert_eq!(content[1], json!({"type": "text", "text": "It is sunny."}));

    let sent = captured.lock().expect("capture lock").take().expect("backend called");
    assert_eq!(sent["model"], "deepseek-reasoner");
    assert_eq!(sent["max_tokens"], 256);
    assert_eq!(sent["stop"], json!(["END"]));
    assert_eq!(sent["messages"][0], json!({"role": "system", "content": "Be brief."}));
    assert_eq!(sent["messages"][1]["role"], "user");
    assert_eq!(sent["messages"][1]["content"], "Weather?");
    assert!(sent.get("stream").map_or(true, Value::is_null) || sent["stream"] == false);

    server.abort();
}

#[tokio::test]
async fn test_tools_and_tool_results_forwarded() {
    let captured: Captured = Arc::default();
    let app = capturing_backend(
        Arc::clone(&captured),
        json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_7",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }),
    );
    let (base_url, server) = spawn_backend(app).await;
    let state = build_state(base_url);

    let response = post_json(
        state,
        "/v1/messages",
        &json!({
            "model": "claude-3-5-haiku",
            "max_tokens": 64,
            "tools": [{
                "name": "get_weather",
                "description": "Current weather",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }],
            "tool_choice": {"type": "tool", "name": "get_weather"},
            "messages": [
                {"role": "user", "content": "Weather in Paris?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "rain"},
                    {"type": "text", "text": "And Oslo?"}
                ]}
            ]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    assert_eq!(payload["stop_reason"], "tool_use");
    assert_eq!(
        payload["content"][0],
        json!({"type": "tool_use", "id": "call_7", "name": "get_weather", "input": {"city": "Oslo"}})
    );

    let sent = captured.lock().expect("capture lock").take().expect("backend called");
    assert_eq!(sent["model"], "deepseek-chat");
    assert_eq!(
        sent["tool_choice"],
        json!({"type": "function", "function": {"name": "get_weather"}})
    );
    assert_eq!(sent["tools"][0]["type"], "function");
    assert_eq!(sent["tools"][0]["function"]["name"], "get_weather");
    let messages = sent["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["tool_calls"][0]["id"], "toolu_1");
    assert_eq!(
        messages[1]["tool_calls"][0]["function"]["arguments"],
        "{\"city\":\"Paris\"}"
    );
    assert_eq!(messages[2], json!({"role": "tool", "tool_call_id": "toolu_1", "content": "rain"}));
    assert_eq!(messages[3]["role"], "user");
    assert_eq!(messages[3]["content"], "And Oslo?");

    server.abort();
}

#[tokio::test]
async fn test_backend_error_status_passes_through() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "Invalid API key", "type": "authentication_error"}})),
            )
        }),
    );
    let (base_url, server) = spawn_backend(app).await;
    let state = build_state(base_url);

    let response = post_json(
        state,
        "/v1/messages",
        &json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("request-id"));
    let payload = json_body(response).await;
    assert_eq!(payload["type"], "error");
    assert_eq!(payload["error"]["message"], "Invalid API key");

    server.abort();
}

#[tokio::test]
async fn test_invalid_requests_never_reach_backend() {
    let captured: Captured = Arc::default();
    let app = capturing_backend(Arc::clone(&captured), json!({"choices": []}));
    let (base_url, server) = spawn_backend(app).await;
    let state = build_state(base_url);

    let cases = [
        json!({"max_tokens": 16, "messages": [{"role": "user", "content": "hi"}]}),
        json!({"model": "m", "max_tokens": 0, "messages": [{"role": "user", "content": "hi"}]}),
        json!({"model": "m", "max_tokens": 16, "messages": []}),
        json!({"model": "m", "max_tokens": 16, "messages": [{"role": "system", "content": "hi"}]}),
        json!({"model": "m", "max_tokens": 16, "messages": [{"role": "user", "content": [
            {"type": "input_audio", "data": "AAAA"}
        ]}]}),
    ];
    for case in &cases {
        let response = post_json(Arc::clone(&state), "/v1/messages", case).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{case}");
        let payload = json_body(response).await;
        assert_eq!(payload["type"], "error");
    }

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .body(Body::from("{not json"))
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = json_body(response).await;
    assert_eq!(payload["error"]["type"], "invalid_request_error");

    assert!(captured.lock().expect("capture lock").is_none());
    server.abort();
}

#[tokio::test]
async fn test_backend_unreachable_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let state = build_state(format!("http://{addr}/v1"));

    let response = post_json(
        state,
        "/v1/messages",
        &json!({
            "model": "m",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_count_tokens() {
    let state = build_state("http://127.0.0.1:9/v1".to_string());
    let response = post_json(
        state,
        "/v1/messages/count_tokens",
        &json!({
            "model": "claude-3-5-sonnet",
            "system": "You are a helpful assistant.",
            "messages": [{"role": "user", "content": "How many tokens is this message?"}]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    assert!(payload["input_tokens"].as_u64().expect("input_tokens") > 0);
}

#[tokio::test]
async fn test_health_and_routing() {
    let state = build_state("http://127.0.0.1:9/v1".to_string());

    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    assert_eq!(payload["status"], "msgbridge is running");
    assert_eq!(payload["config"]["backend_models_count"], 2);
    assert_eq!(payload["config"]["model_mapping_rules_count"], 1);
    assert_eq!(payload["config"]["features"]["image_placeholder"], true);

    let request = Request::builder()
        .method("GET")
        .uri("/v1/messages")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let state = build_state("http://127.0.0.1:9/v1".to_string());
    let text = "x".repeat(128 * 1024);
    let response = post_json(
        state,
        "/v1/messages",
        &json!({
            "model": "m",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": text}]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let request_id = response
        .headers()
        .get("request-id")
        .and_then(|value| value.to_str().ok())
        .expect("request-id header")
        .to_string();
    assert!(request_id.starts_with("req_"));
    let payload = json_body(response).await;
    assert_eq!(payload["type"], "error");
}

#[tokio::test]
async fn test_oversized_count_tokens_body_carries_request_id() {
    let state = build_state("http://127.0.0.1:9/v1".to_string());
    let text = "x".repeat(128 * 1024);
    let response = post_json(
        state,
        "/v1/messages/count_tokens",
        &json!({
            "model": "m",
            "messages": [{"role": "user", "content": text}]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(response.headers().contains_key("request-id"));
}
