//! Session administration commands: list, show, rename, delete.
//!
//! Talks to the SQLite gateway directly, scoped to the CLI owner. Tables
//! via comfy-table, deletion behind a confirmation prompt.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use uuid::Uuid;

use wove_core::chat::repository::ChatRepository;
use wove_types::chat::{ChatSession, MessageRole};
use wove_types::error::RepositoryError;

use crate::state::AppState;

fn parse_id(id: &str) -> Result<Uuid> {
    id.parse::<Uuid>()
        .with_context(|| format!("'{id}' is not a valid session ID"))
}

async fn fetch(state: &AppState, id: &Uuid) -> Result<ChatSession> {
    match state.chat_repo.get_session(id, &state.owner).await {
        Ok(session) => Ok(session),
        Err(RepositoryError::NotFoundOrForbidden) => anyhow::bail!("Session '{id}' not found"),
        Err(e) => Err(e.into()),
    }
}

/// List the owner's sessions.
///
/// # Examples
///
/// ```bash
/// wove sessions list
/// wove sessions list --json
/// ```
pub async fn list_sessions(state: &AppState, json: bool) -> Result<()> {
    let sessions = state.chat_repo.list_sessions(&state.owner).await?;

    if json {
        let rows: Vec<_> = sessions
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id.to_string(),
                    "title": s.title,
                    "updated_at": s.updated_at,
                    "message_count": s.message_count(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!();
        println!(
            "  {} No sessions yet. Start one with: {}",
            style("i").blue().bold(),
            style("wove chat").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Title").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("ID").fg(Color::White),
    ]);

    for session in &sessions {
        table.add_row(vec![
            Cell::new(truncate(&session.title, 40)).fg(Color::Cyan),
            Cell::new(session.updated_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::White),
            Cell::new(session.message_count().to_string()).fg(Color::White),
            Cell::new(session.id.to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} session{}",
        style(sessions.len()).bold(),
        if sessions.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

/// Print a session's conversation as Markdown (default) or JSON.
pub async fn show_session(state: &AppState, id: &str, json: bool) -> Result<()> {
    let session_id = parse_id(id)?;
    let session = fetch(state, &session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("# {}", session.title);
    println!();
    println!("- **Updated:** {}", session.updated_at.format("%Y-%m-%d %H:%M UTC"));
    println!("- **Messages:** {}", session.message_count());
    println!();
    println!("---");
    println!();

    for msg in &session.messages {
        let role_label = match msg.role {
            MessageRole::User => "**You**",
            MessageRole::Assistant => "**Wove**",
        };

        let timestamp = msg.created_at.format("%H:%M");
        let edited = if msg.edited_at.is_some() { " (edited)" } else { "" };
        println!("### {role_label} ({timestamp}){edited}");
        println!();
        if let Some(attachment) = &msg.attachment {
            if attachment.is_inline() {
                println!("[inline image]");
            } else {
                println!("[image: {}]", attachment.to_uri());
            }
        }
        println!("{}", msg.content);
        println!();
    }

    Ok(())
}

/// Set an explicit session title.
pub async fn rename_session(state: &AppState, id: &str, title: &str, json: bool) -> Result<()> {
    let session_id = parse_id(id)?;
    let title = title.trim();
    anyhow::ensure!(!title.is_empty(), "Title must not be empty");

    match state.chat_repo.rename_session(&session_id, title, &state.owner).await {
        Ok(()) => {}
        Err(RepositoryError::NotFoundOrForbidden) => anyhow::bail!("Session '{session_id}' not found"),
        Err(e) => return Err(e.into()),
    }

    if json {
        println!(
            "{}",
            serde_json::json!({"session_id": session_id.to_string(), "title": title})
        );
    } else {
        println!("  {} Session renamed to '{}'.", style("✓").green().bold(), style(title).cyan());
    }

    Ok(())
}

/// Delete a session with confirmation.
///
/// # Examples
///
/// ```bash
/// wove sessions delete <session-id>
/// wove sessions delete <session-id> --force
/// ```
pub async fn delete_session(state: &AppState, id: &str, force: bool, json: bool) -> Result<()> {
    let session_id = parse_id(id)?;
    let session = fetch(state, &session_id).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete session '{}' ({} messages)?",
                style(&session.title).red().bold(),
                session.message_count()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.chat_repo.delete_session(&session_id, &state.owner).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": true, "session_id": session_id.to_string()})
        );
    } else {
        println!("  {} Session '{}' deleted.", style("x").red().bold(), session.title);
    }

    Ok(())
}

/// Shorten to at most `max` characters, marking the cut with "...".
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        // Multi-byte characters are never split.
        assert_eq!(truncate("👔👔👔👔👔", 4), "👔...");
    }

    #[tokio::test]
    async fn test_rename_and_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf(), Default::default())
            .await
            .unwrap();
        let session = state.chat_repo.create_session(&state.owner).await.unwrap();
        let id = session.id.to_string();

        rename_session(&state, &id, "  Capsule wardrobe ", true).await.unwrap();
        let renamed = fetch(&state, &session.id.durable().unwrap()).await.unwrap();
        assert_eq!(renamed.title, "Capsule wardrobe");

        delete_session(&state, &id, true, true).await.unwrap();
        let err = show_session(&state, &id, true).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf(), Default::default())
            .await
            .unwrap();
        let err = show_session(&state, "nope", false).await.unwrap_err();
        assert!(err.to_string().contains("not a valid session ID"));
    }
}
