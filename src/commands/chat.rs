use std::io::Write;

use colored::Colorize;

use crate::context::ChatContext;
use crate::error::Result;
use crate::stream::{StreamEvent, StreamFrame, StreamProgress};
use crate::timeline::{Message, Role};

fn speaker(role: Role) -> colored::ColoredString {
    match role {
        Role::User => "You".blue().bold(),
        Role::Assistant => "Sheikh".green().bold(),
    }
}

/// Format one message for the terminal
pub fn format_message(message: &Message) -> String {
    let time = message.timestamp.format("%H:%M");
    let body = if message.is_failed() {
        message.content.red().to_string()
    } else {
        message.content.clone()
    };
    format!("[{}] {}: {}", time, speaker(message.role), body)
}

/// Print a session's history
pub async fn show_history(chat: &mut ChatContext, id: &str) -> Result<()> {
    let count = chat.open_session(id).await?;
    if count == 0 {
        println!("{}", "No messages in this session.".yellow());
        return Ok(());
    }
    for message in chat.messages(id) {
        println!("{}", format_message(message));
    }
    Ok(())
}

/// Send a message and print the whole reply
pub async fn send_message(chat: &mut ChatContext, id: &str, message: &str) -> Result<()> {
    chat.load_sessions().await?;
    let reply = chat.send_message(id, message).await?;
    println!("{}", format_message(&reply));
    Ok(())
}

/// Send a message and print the reply as it streams in
pub async fn stream_message(chat: &mut ChatContext, id: &str, message: &str) -> Result<()> {
    chat.load_sessions().await?;
    let mut consumer = chat.begin_streaming_message(id, message).await?;

    print!("{}: ", speaker(Role::Assistant));
    std::io::stdout().flush()?;

    let mut progress = StreamProgress::Ignored;
    while let Some(event) = consumer.next_event().await {
        let chunk = match &event {
            StreamEvent::Frame(StreamFrame::Chunk {
                content: Some(text),
            }) => Some(text.clone()),
            _ => None,
        };
        progress = chat.apply_stream_event(&mut consumer, event);
        if let (StreamProgress::Appended, Some(text)) = (progress, chunk) {
            print!("{}", text);
            std::io::stdout().flush()?;
        }
        if progress.is_terminal() {
            break;
        }
    }
    println!();

    if progress == StreamProgress::Failed {
        if let Some(reply) = chat.timeline().get(id, consumer.message_id()) {
            eprintln!("{}", reply.content.red());
            if let Some(reason) = &reply.metadata.error {
                tracing::debug!("Stream failure reason: {}", reason);
            }
        }
    }
    Ok(())
}
