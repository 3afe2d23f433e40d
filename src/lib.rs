//! Sheikh chat engine library
//!
//! This library is the client side of the Sheikh conversation agent: it
//! keeps the list of sessions, each session's ordered message timeline, and
//! ingests assistant replies that arrive incrementally over a server-sent
//! events stream.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `api`: Backend trait, wire types, HTTP client, SSE decoding and an
//!   in-memory fake
//! - `session`: Session registry and unread counters
//! - `timeline`: Messages and the per-session message log
//! - `stream`: Stream frames, the connection consumer and the ingestor
//! - `context`: The per-application service object tying them together
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`, `commands`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use sheikh_chat::{ChatContext, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/sheikh.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let mut chat = ChatContext::from_config(&config)?;
//!     chat.load_sessions().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod session;
pub mod stream;
pub mod timeline;

// Re-export commonly used types
pub use api::{Backend, HttpBackend};
#[cfg(any(test, feature = "test-util"))]
pub use api::FakeBackend;
pub use config::Config;
pub use context::ChatContext;
pub use error::{Result, SheikhError};
pub use session::{Session, SessionRegistry, SessionStatus};
pub use stream::{StreamConsumer, StreamEvent, StreamFrame, StreamIngestor, StreamProgress};
pub use timeline::{Message, MessageMetadata, MessageTimeline, Role};

#[cfg(test)]
pub mod test_utils;
