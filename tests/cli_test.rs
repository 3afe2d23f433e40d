#![allow(deprecated)]

//! Command-line smoke tests for the `sheikh` binary

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("sheikh").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("sessions"))
        .stdout(predicate::str::contains("send"));
}

#[test]
fn test_invalid_base_url_rejected() {
    let mut cmd = Command::cargo_bin("sheikh").unwrap();
    cmd.arg("--config")
        .arg("does-not-exist.yaml")
        .arg("--base-url")
        .arg("ftp://example.com")
        .arg("sessions");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("http or https"));
}

#[test]
fn test_invalid_config_file_rejected() {
    let (_dir, config_path) = common::temp_config_file("server:\n  timeout_seconds: 0\n");
    let mut cmd = Command::cargo_bin("sheikh").unwrap();
    cmd.arg("--config").arg(config_path).arg("sessions");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("must be greater than 0"));
}

#[tokio::test]
async fn test_sessions_command_lists_backend_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::ok_envelope(json!({
            "sessions": [
                {"session_id": "abc123", "title": "Weekend plans", "status": "active"}
            ]
        }))))
        .mount(&server)
        .await;

    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("sheikh")
            .unwrap()
            .arg("--config")
            .arg("does-not-exist.yaml")
            .arg("--base-url")
            .arg(uri)
            .arg("sessions")
            .env("NO_COLOR", "1")
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("abc123"));
    assert!(stdout.contains("Weekend plans"));
}
