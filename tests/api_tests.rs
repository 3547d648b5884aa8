use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use netgpt::agents::{AgentError, ChatClient, ChatCompletion, ChatRequest, ChunkStream};
use netgpt::api::AppState;
use netgpt::config::Config;
use netgpt::state::SharedState;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const REPLY: &str = "Hello from the agent";
const PASSWORD: &str = "correct horse battery";

/// Always answers with the same text.
struct FixedReplyClient;

#[async_trait::async_trait]
impl ChatClient for FixedReplyClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion, AgentError> {
        Ok(ChatCompletion {
            content: REPLY.to_string(),
            model: "fixed".to_string(),
            ..ChatCompletion::default()
        })
    }

    async fn stream(&self, _request: ChatRequest) -> Result<ChunkStream, AgentError> {
        let chunks: Vec<Result<String, AgentError>> = REPLY
            .split_inclusive(' ')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

struct TestApp {
    state: Arc<AppState>,
    router: Router,
    _storage: TempDir,
}

async fn spawn_app() -> TestApp {
    let storage = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.attachments.storage_path = storage.path().display().to_string();
    config.attachments.max_size_bytes = 1024;

    let shared = SharedState::with_chat_client(config, Some(Arc::new(FixedReplyClient)))
        .await
        .expect("Failed to create shared state");
    let state = netgpt::api::create_app_state(Arc::new(shared), None);
    let router = netgpt::api::router(state.clone()).await;

    TestApp {
        state,
        router,
        _storage: storage,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref());
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn with_cookie(method: &str, uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

/// `name=value` part of the first Set-Cookie header.
fn refresh_cookie(headers: &HeaderMap) -> String {
    headers
        .get(header::SET_COOKIE)
        .expect("missing Set-Cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

async fn register_and_login(app: &Router, username: &str) -> (String, String) {
    let (status, _, _) = send(
        app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            &json!({ "username": username, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    login(app, username).await
}

async fn login(app: &Router, username: &str) -> (String, String) {
    let (status, headers, body) = send(
        app,
        json_request(
            "POST",
            "/api/auth/login",
            None,
            &json!({ "username": username, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let token = body["data"]["access_token"].as_str().unwrap().to_string();
    (token, refresh_cookie(&headers))
}

async fn create_conversation(app: &Router, token: &str) -> String {
    let (status, _, body) = send(
        app,
        json_request(
            "POST",
            "/api/conversations",
            Some(token),
            &json!({ "title": "Trip planning" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = spawn_app().await;

    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["database"], "ok");
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_protected_routes_require_bearer_token() {
    let app = spawn_app().await;

    let request = Request::builder()
        .uri("/api/conversations")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _, _) = send(&app.router, get("/api/conversations", "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app().await;

    let (token, cookie) = register_and_login(&app.router, "alice").await;
    assert!(cookie.starts_with("refresh_token="));

    let (status, _, body) = send(&app.router, get("/api/auth/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "alice");

    let (status, _, _) = send(
        &app.router,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            &json!({ "username": "alice", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = send(
        &app.router,
        json_request(
            "POST",
            "/api/auth/login",
            None,
            &json!({ "username": "alice", "password": "wrong password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotates_and_replay_revokes_family() {
    let app = spawn_app().await;
    let (_, first) = register_and_login(&app.router, "bob").await;

    let (status, headers, body) =
        send(&app.router, with_cookie("POST", "/api/auth/refresh", &first)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["access_token"].is_string());
    let second = refresh_cookie(&headers);
    assert_ne!(first, second);

    // Presenting the rotated token again is a replay
    let (status, headers, _) =
        send(&app.router, with_cookie("POST", "/api/auth/refresh", &first)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(refresh_cookie(&headers), "refresh_token=");

    // and the replay revoked the successor too
    let (status, _, _) =
        send(&app.router, with_cookie("POST", "/api/auth/refresh", &second)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_without_cookie_is_unauthorized() {
    let app = spawn_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.get(header::SET_COOKIE).is_some());
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let app = spawn_app().await;
    let (_, cookie) = register_and_login(&app.router, "carol").await;

    let (status, headers, _) =
        send(&app.router, with_cookie("POST", "/api/auth/logout", &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refresh_cookie(&headers), "refresh_token=");

    let (status, _, _) =
        send(&app.router, with_cookie("POST", "/api/auth/refresh", &cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_conversation_flow_and_ownership() {
    let app = spawn_app().await;
    let (alice, _) = register_and_login(&app.router, "alice").await;
    let (mallory, _) = register_and_login(&app.router, "mallory").await;

    let id = create_conversation(&app.router, &alice).await;

    let (status, _, body) = send(
        &app.router,
        json_request(
            "POST",
            &format!("/api/conversations/{id}/messages"),
            Some(&alice),
            &json!({ "content": "Where should I go in May?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user_message"]["role"], "user");
    assert_eq!(body["data"]["assistant_message"]["role"], "assistant");
    assert_eq!(body["data"]["assistant_message"]["content"], REPLY);

    let (status, _, body) = send(
        &app.router,
        get(&format!("/api/conversations/{id}/messages"), &alice),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _, _) = send(&app.router, get(&format!("/api/conversations/{id}"), &mallory)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = send(&app.router, get("/api/conversations", &mallory)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_count"], 0);

    let (status, _, body) = send(&app.router, get("/api/conversations/search?q=trip", &alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"][0]["id"], id.as_str());

    // `%` is a literal character, not a match-everything wildcard
    let (status, _, body) = send(&app.router, get("/api/conversations/search?q=%25", &alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_count"], 0);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/conversations/{id}"))
        .header(header::AUTHORIZATION, format!("Bearer {alice}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app.router, get(&format!("/api/conversations/{id}"), &alice)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conversation_validation() {
    let app = spawn_app().await;
    let (token, _) = register_and_login(&app.router, "dave").await;

    let (status, _, _) = send(
        &app.router,
        json_request(
            "POST",
            "/api/conversations",
            Some(&token),
            &json!({ "title": "x".repeat(501) }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app.router, get("/api/conversations?page=0", &token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app.router, get("/api/conversations/not-an-id", &token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let id = create_conversation(&app.router, &token).await;
    let (status, _, _) = send(
        &app.router,
        json_request(
            "POST",
            &format!("/api/conversations/{id}/messages"),
            Some(&token),
            &json!({ "content": "   " }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_streamed_reply_is_persisted() {
    let app = spawn_app().await;
    let (token, _) = register_and_login(&app.router, "erin").await;
    let id = create_conversation(&app.router, &token).await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/conversations/{id}/messages/stream"),
            Some(&token),
            &json!({ "content": "Say hello" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: chunk"));
    assert!(text.contains("\"is_final\":true"));

    let (_, _, body) = send(
        &app.router,
        get(&format!("/api/conversations/{id}/messages"), &token),
    )
    .await;
    let messages = body["data"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"], REPLY);
}

#[tokio::test]
async fn test_tools_list_and_invoke() {
    let app = spawn_app().await;
    let (token, _) = register_and_login(&app.router, "frank").await;

    let (status, _, body) = send(&app.router, get("/api/tools", &token)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["code_execution", "web_search"]);

    let (status, _, _) = send(&app.router, get("/api/tools/missing", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/tools/web_search/invoke",
            Some(&token),
            &json!({ "arguments": { "query": "rust" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], true);
    assert_eq!(body["data"]["result"]["query"], "rust");

    let (status, _, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/tools/web_search/invoke",
            Some(&token),
            &json!({ "arguments": {} }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["success"], false);
    assert!(body["data"]["error_message"].is_string());
}

fn multipart_upload(token: &str, file_name: &str, contents: &[u8]) -> Request<Body> {
    let boundary = "netgpt-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {}\r\n\r\n",
        mime::TEXT_PLAIN
    )
    .into_bytes();
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/attachments")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_attachment_upload_and_download() {
    let app = spawn_app().await;
    let (token, _) = register_and_login(&app.router, "grace").await;

    let (status, _, body) = send(&app.router, multipart_upload(&token, "notes.txt", b"hello")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["file_name"], "notes.txt");
    assert_eq!(body["data"]["size"], 5);
    assert_eq!(body["data"]["content_type"], "text/plain");

    let key = body["data"]["storage_key"].as_str().unwrap();
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/files/{key}"), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"hello");

    let (status, _, _) = send(&app.router, multipart_upload(&token, "big.txt", &[b'a'; 2048])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, _, _) = send(&app.router, get("/api/files/..%2Fsecret", &token)).await;
    assert!(status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_definitions_admin_create_and_execute() {
    let app = spawn_app().await;

    app.state
        .store()
        .user_repo()
        .create("root", PASSWORD, Some("Root"), &["admin".to_string()])
        .await
        .unwrap();
    let (admin, _) = login(&app.router, "root").await;
    let (user, _) = register_and_login(&app.router, "heidi").await;

    let definition = json!({
        "name": "helper",
        "kind": "Prompt",
        "content_yaml": "type: openai\nname: helper\ninstructions: Be brief\ntools:\n  - web_search\n",
    });

    let (status, _, _) = send(
        &app.router,
        json_request("POST", "/api/definitions", Some(&user), &definition),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/api/definitions", Some(&admin), &definition),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["created_by"], "Root");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app.router,
        json_request(
            "POST",
            &format!("/api/definitions/{id}/execute"),
            Some(&user),
            &json!({ "input": "hi" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["definition_id"], id.as_str());
    assert_eq!(body["data"]["result"]["content"], REPLY);

    let (status, _, body) = send(&app.router, get("/api/definitions", &user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_count"], 1);

    let (status, _, _) = send(&app.router, get("/api/definitions/unknown", &user)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_definition_rejections() {
    let app = spawn_app().await;
    app.state
        .store()
        .user_repo()
        .create("root", PASSWORD, None, &["admin".to_string()])
        .await
        .unwrap();
    let (admin, _) = login(&app.router, "root").await;

    let create = |yaml: &str| {
        json_request(
            "POST",
            "/api/definitions",
            Some(&admin),
            &json!({ "name": "broken", "kind": "Prompt", "content_yaml": yaml }),
        )
    };

    let (status, _, body) = send(&app.router, create("type: openai\nname: [unclosed\n")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"]["line"].is_number());

    let (status, _, body) = send(
        &app.router,
        create("type: openai\nname: broken\ntools:\n  - teleport\n"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("teleport"));

    let (status, _, _) = send(
        &app.router,
        create("type: openai\nname: broken\napi_key: sk-live-123\n"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
