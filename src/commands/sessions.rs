use colored::Colorize;
use prettytable::{format, Table};

use crate::commands::truncate;
use crate::context::ChatContext;
use crate::error::Result;
use crate::session::{Session, SessionStatus};

/// Build the session list table
pub fn sessions_table(sessions: &[Session], current: Option<&str>) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Status".bold(),
        "Unread".bold(),
        "Last Message".bold(),
        "Updated".bold()
    ]);

    for session in sessions {
        let marker = if current == Some(session.id.as_str()) {
            "*"
        } else {
            " "
        };
        let status = match session.status {
            SessionStatus::Active => "active".green(),
            SessionStatus::Stopped => "stopped".red(),
        };
        let unread = match session.unread_count {
            0 => "-".to_string(),
            n => n.to_string().yellow().to_string(),
        };
        let updated = session
            .latest_message_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(prettytable::row![
            format!("{}{}", marker, session.id).cyan(),
            truncate(&session.title, 40),
            status,
            unread,
            truncate(&session.latest_message_preview, 40),
            updated
        ]);
    }

    table
}

/// List sessions
pub async fn list_sessions(chat: &mut ChatContext) -> Result<()> {
    chat.load_sessions().await?;
    let registry = chat.registry();

    if registry.is_empty() {
        println!("{}", "No sessions found.".yellow());
        return Ok(());
    }

    println!("\nSessions:");
    sessions_table(registry.sessions(), registry.current_session_id()).printstd();
    println!();
    let total = chat.total_unread_count();
    if total > 0 {
        println!("{} unread message(s)", total.to_string().yellow());
    }
    println!(
        "Use {} to read a session.",
        "sheikh history <ID>".cyan()
    );
    println!();
    Ok(())
}

/// Create a session
pub async fn create_session(chat: &mut ChatContext, title: Option<&str>) -> Result<()> {
    let session = chat.create_session(title).await?;
    println!(
        "{} {} ({})",
        "Created session".green(),
        session.id.cyan(),
        session.title
    );
    Ok(())
}

/// Stop a session
pub async fn stop_session(chat: &mut ChatContext, id: &str) -> Result<()> {
    chat.load_sessions().await?;
    chat.stop_session(id).await?;
    println!("{}", format!("Stopped session {}", id).green());
    Ok(())
}

/// Rename a session
pub async fn rename_session(chat: &mut ChatContext, id: &str, title: &str) -> Result<()> {
    chat.load_sessions().await?;
    chat.rename_session(id, title).await?;
    println!("{}", format!("Renamed session {} to '{}'", id, title).green());
    Ok(())
}

/// Delete a session
pub async fn delete_session(chat: &mut ChatContext, id: &str) -> Result<()> {
    chat.delete_session(id).await?;
    println!("{}", format!("Deleted session {}", id).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_table_marks_current() {
        colored::control::set_override(false);
        let mut stopped = Session::new("s2", "Finished");
        stopped.status = SessionStatus::Stopped;
        stopped.unread_count = 3;
        let sessions = vec![Session::new("s1", "Ongoing"), stopped];

        let rendered = sessions_table(&sessions, Some("s1")).to_string();
        assert!(rendered.contains("*s1"));
        assert!(rendered.contains(" s2"));
        assert!(rendered.contains("stopped"));
        assert!(rendered.contains('3'));
    }
}
