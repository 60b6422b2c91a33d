use std::collections::HashMap;
use std::net::SocketAddr;

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Form, Json, Router};
use serde_json::json;

use datasight::granite::{GraniteClient, InsightError, InsightSource};
use datasight::{Credentials, GraniteConfig};

// Spin up a tiny mock upstream used by the client tests.
async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(iam: SocketAddr, chat: SocketAddr) -> GraniteConfig {
    GraniteConfig {
        credentials: Some(Credentials {
            api_key: "key-abc".to_string(),
            project_id: "proj-1".to_string(),
        }),
        iam_url: format!("http://{}/identity/token", iam),
        chat_url: format!("http://{}/ml/v1/text/chat", chat),
        model_id: "ibm/granite-3-3-8b-instruct".to_string(),
        timeout_ms: 2_000,
    }
}

// Issues a token only for the documented form body.
async fn iam_ok(Form(params): Form<HashMap<String, String>>) -> Json<serde_json::Value> {
    let good_key = params.get("apikey").map(String::as_str) == Some("key-abc");
    let good_grant = params.get("grant_type").map(String::as_str)
        == Some("urn:ibm:params:oauth:grant-type:apikey");
    if good_key && good_grant {
        Json(json!({"access_token": "tok-123", "expires_in": 3600}))
    } else {
        Json(json!({"errorMessage": "bad request"}))
    }
}

// Echoes model, project and prompt back through the completion content so
// the test can verify what was sent.
async fn chat_echo(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> axum::response::Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if auth != "Bearer tok-123" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad token"}))).into_response();
    }
    let model = body.get("model_id").and_then(|v| v.as_str()).unwrap_or("");
    let project = body.get("project_id").and_then(|v| v.as_str()).unwrap_or("");
    let role = body.pointer("/messages/0/role").and_then(|v| v.as_str()).unwrap_or("");
    let text = body
        .pointer("/messages/0/content/0/text")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let content = format!("{}|{}|{}|{}", model, project, role, text);
    Json(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
        .into_response()
}

#[tokio::test]
async fn token_exchange_and_chat_round_trip() {
    let iam = serve(Router::new().route("/identity/token", post(iam_ok))).await;
    let chat = serve(Router::new().route("/ml/v1/text/chat", post(chat_echo))).await;

    let client = GraniteClient::new(config(iam, chat));
    let insight = client.insight("Why did sales spike?").await.unwrap();
    assert_eq!(
        insight,
        "ibm/granite-3-3-8b-instruct|proj-1|user|Why did sales spike?"
    );
}

#[tokio::test]
async fn iam_http_error_is_a_token_exchange_failure() {
    async fn iam_down() -> (StatusCode, Json<serde_json::Value>) {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"errorMessage": "down"})))
    }
    let iam = serve(Router::new().route("/identity/token", post(iam_down))).await;
    let chat = serve(Router::new().route("/ml/v1/text/chat", post(chat_echo))).await;

    let client = GraniteClient::new(config(iam, chat));
    let err = client.insight("anything").await.unwrap_err();
    assert!(matches!(err, InsightError::TokenExchange(_)));
    assert!(err.to_string().starts_with("Error fetching access token: "));
}

#[tokio::test]
async fn unreachable_iam_is_a_token_exchange_failure() {
    // No listener on this port; the send itself fails.
    let chat = serve(Router::new().route("/ml/v1/text/chat", post(chat_echo))).await;
    let mut cfg = config(chat, chat);
    cfg.iam_url = "http://127.0.0.1:9/identity/token".to_string();
    cfg.timeout_ms = 300;

    let client = GraniteClient::new(cfg);
    let err = client.insight("anything").await.unwrap_err();
    assert!(matches!(err, InsightError::TokenExchange(_)));
}

#[tokio::test]
async fn missing_access_token_field_is_a_token_exchange_failure() {
    async fn iam_odd() -> Json<serde_json::Value> {
        Json(json!({"token_type": "Bearer"}))
    }
    let iam = serve(Router::new().route("/identity/token", post(iam_odd))).await;
    let chat = serve(Router::new().route("/ml/v1/text/chat", post(chat_echo))).await;

    let client = GraniteClient::new(config(iam, chat));
    let err = client.insight("anything").await.unwrap_err();
    assert!(err.to_string().contains("access_token"));
}

#[tokio::test]
async fn chat_http_error_is_a_completion_failure() {
    async fn chat_down() -> (StatusCode, Json<serde_json::Value>) {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "overloaded"})))
    }
    let iam = serve(Router::new().route("/identity/token", post(iam_ok))).await;
    let chat = serve(Router::new().route("/ml/v1/text/chat", post(chat_down))).await;

    let client = GraniteClient::new(config(iam, chat));
    let err = client.insight("anything").await.unwrap_err();
    assert!(matches!(err, InsightError::Completion(_)));
    assert!(err.to_string().starts_with("Granite API call failed: "));
}

#[tokio::test]
async fn empty_choices_is_a_completion_failure() {
    async fn chat_empty() -> Json<serde_json::Value> {
        Json(json!({"choices": []}))
    }
    let iam = serve(Router::new().route("/identity/token", post(iam_ok))).await;
    let chat = serve(Router::new().route("/ml/v1/text/chat", post(chat_empty))).await;

    let client = GraniteClient::new(config(iam, chat));
    let err = client.insight("anything").await.unwrap_err();
    assert!(matches!(err, InsightError::Completion(_)));
    assert!(err.to_string().contains("choices[0].message.content"));
}

#[tokio::test]
async fn missing_credentials_short_circuit_without_network() {
    // The IAM URL points at a closed port; if the client tried the network
    // this would surface as a TokenExchange error instead.
    let mut cfg = config(
        "127.0.0.1:9".parse().unwrap(),
        "127.0.0.1:9".parse().unwrap(),
    );
    cfg.credentials = None;

    let client = GraniteClient::new(cfg);
    let err = client.insight("anything").await.unwrap_err();
    assert!(matches!(err, InsightError::MissingCredentials));
    assert_eq!(err.to_string(), "Missing IBM credentials.");
}
