//! Test utilities for the chat engine
//!
//! Helpers shared by unit tests: a context wired to the in-memory backend,
//! temporary config files and error assertions.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::api::FakeBackend;
use crate::config::StreamingConfig;
use crate::context::ChatContext;
use crate::error::{Result, SheikhError};

/// A chat context backed by a fresh [`FakeBackend`]
///
/// The returned fake shares state with the one inside the context.
pub fn fake_chat() -> (FakeBackend, ChatContext) {
    let fake = FakeBackend::new();
    let chat = ChatContext::new(Arc::new(fake.clone()), &StreamingConfig::default());
    (fake, chat)
}

/// Write `content` to a config file inside a new temporary directory
pub fn temp_config_file(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temporary directory");
    let path = dir.path().join("sheikh.yaml");
    std::fs::write(&path, content).expect("Failed to write test config");
    (dir, path)
}

/// The typed error inside an engine result
///
/// # Panics
///
/// Panics if the result is Ok or the error is not a [`SheikhError`]
pub fn expect_sheikh_error<T: std::fmt::Debug>(result: Result<T>) -> SheikhError {
    let err = result.expect_err("expected an error");
    match err.downcast::<SheikhError>() {
        Ok(e) => e,
        Err(other) => panic!("expected SheikhError, got: {:?}", other),
    }
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T: std::fmt::Debug>(result: Result<T>, expected: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{}', got Ok({:?})", expected, value),
        Err(e) => {
            let message = e.to_string();
            assert!(
                message.contains(expected),
                "Error '{}' does not contain '{}'",
                message,
                expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_config_file_is_written() {
        let (_dir, path) = temp_config_file("server:\n  timeout_seconds: 5\n");
        assert!(path.exists());
    }

    #[test]
    fn test_expect_sheikh_error() {
        let result: Result<()> = Err(SheikhError::SessionStopped("s1".into()).into());
        assert!(matches!(
            expect_sheikh_error(result),
            SheikhError::SessionStopped(_)
        ));
    }
}
