//! Session registry and unread tracking

pub mod registry;
pub mod types;
mod unread;

pub use registry::SessionRegistry;
pub use types::{PendingChange, Session, SessionStatus};
