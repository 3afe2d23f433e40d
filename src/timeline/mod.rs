//! Per-session message timelines

pub mod message;
pub mod store;

pub use message::{new_message_id, Message, MessageMetadata, Role};
pub use store::MessageTimeline;
