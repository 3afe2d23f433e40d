use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sheikh_chat::api::HttpBackend;
use sheikh_chat::config::ServerConfig;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("sheikh.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// An `HttpBackend` pointed at a mock server
#[allow(dead_code)]
pub fn backend_for(server: &MockServer) -> HttpBackend {
    HttpBackend::new(&ServerConfig {
        base_url: server.uri(),
        timeout_seconds: 5,
        ..Default::default()
    })
    .expect("valid backend config")
}

/// Successful `{code, msg, data}` envelope
#[allow(dead_code)]
pub fn ok_envelope(data: Value) -> Value {
    json!({"code": 0, "msg": "success", "data": data})
}

/// Failed envelope with the given code and message
#[allow(dead_code)]
pub fn error_envelope(code: i64, msg: &str) -> Value {
    json!({"code": code, "msg": msg, "data": null})
}

/// Render `(event, data)` pairs as a `text/event-stream` body
#[allow(dead_code)]
pub fn sse_body(events: &[(&str, &str)]) -> String {
    events
        .iter()
        .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
        .collect()
}

/// Mount an SSE reply for a session's chat endpoint
///
/// `set_body_raw` keeps the `text/event-stream` content type intact.
#[allow(dead_code)]
pub async fn mount_chat_stream(server: &MockServer, session_id: &str, body: String) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/sessions/{}/chat", session_id)))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"),
        )
        .mount(server)
        .await;
}
