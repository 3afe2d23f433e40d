//! Command handlers for the CLI
//!
//! Each handler takes a [`ChatContext`](crate::context::ChatContext),
//! performs one engine operation and prints the result:
//!
//! - `sessions` -- session list, creation and lifecycle commands
//! - `chat` -- history display and sending messages

pub mod chat;
pub mod sessions;

use crate::cli::Commands;
use crate::context::ChatContext;
use crate::error::Result;

/// Dispatch a parsed command
pub async fn run(chat: &mut ChatContext, command: Commands) -> Result<()> {
    match command {
        Commands::Sessions => sessions::list_sessions(chat).await,
        Commands::New { title } => sessions::create_session(chat, title.as_deref()).await,
        Commands::Stop { id } => sessions::stop_session(chat, &id).await,
        Commands::Rename { id, title } => sessions::rename_session(chat, &id, &title).await,
        Commands::Delete { id } => sessions::delete_session(chat, &id).await,
        Commands::History { id } => chat::show_history(chat, &id).await,
        Commands::Send {
            id,
            message,
            no_stream,
        } => {
            if no_stream {
                chat::send_message(chat, &id, &message).await
            } else {
                chat::stream_message(chat, &id, &message).await
            }
        }
    }
}

/// Shorten text for a table cell, keeping whole characters
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let kept: String = single_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}
