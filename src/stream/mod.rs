//! Streaming replies: frames, the connection consumer and the ingestor

pub mod consumer;
pub mod frame;
pub mod ingestor;

pub use consumer::{StreamConsumer, StreamEvent};
pub use frame::StreamFrame;
pub use ingestor::{StreamIngestor, StreamProgress};
