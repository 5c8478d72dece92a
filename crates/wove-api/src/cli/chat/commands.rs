//! Slash command parsing for the chat loop.
//!
//! Commands start with `/` and manage sessions, attachments, and the
//! reply in flight.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use console::style;

use wove_types::attachment::Attachment;

/// Available slash commands in the chat loop.
#[derive(Debug, PartialEq)]
pub enum ChatCommand {
    /// Show available commands.
    Help,
    /// Clear the terminal screen.
    Clear,
    /// Exit the chat.
    Exit,
    /// Start a new chat.
    New,
    /// List sessions with their numbers.
    Sessions,
    /// Switch to the session with this 1-based number.
    Switch(usize),
    /// Set the active session's title.
    Rename(String),
    /// Delete the active session.
    Delete,
    /// Send an image, with optional text.
    Image { source: String, caption: String },
    /// Stop the reply that is streaming.
    Cancel,
    /// Unknown command or bad arguments.
    Unknown(String),
}

/// Parse user input as a slash command.
///
/// Returns `None` if the input doesn't start with `/`.
pub fn parse(input: &str) -> Option<ChatCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (cmd, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd.to_lowercase(), arg.trim()),
        None => (trimmed.to_lowercase(), ""),
    };

    let command = match cmd.as_str() {
        "/help" | "/h" | "/?" => ChatCommand::Help,
        "/clear" | "/cls" => ChatCommand::Clear,
        "/exit" | "/quit" | "/q" => ChatCommand::Exit,
        "/new" => ChatCommand::New,
        "/sessions" | "/ls" => ChatCommand::Sessions,
        "/switch" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => ChatCommand::Switch(n),
            _ => ChatCommand::Unknown("/switch requires a session number (see /sessions)".to_string()),
        },
        "/rename" if arg.is_empty() => ChatCommand::Unknown("/rename requires a title".to_string()),
        "/rename" => ChatCommand::Rename(arg.to_string()),
        "/delete" => ChatCommand::Delete,
        "/image" | "/img" => match arg.split_once(char::is_whitespace) {
            Some((source, caption)) => ChatCommand::Image {
                source: source.to_string(),
                caption: caption.trim().to_string(),
            },
            None if !arg.is_empty() => ChatCommand::Image {
                source: arg.to_string(),
                caption: String::new(),
            },
            None => ChatCommand::Unknown("/image requires a file path or URL".to_string()),
        },
        "/cancel" | "/stop" => ChatCommand::Cancel,
        other => ChatCommand::Unknown(other.to_string()),
    };
    Some(command)
}

/// Turn an `/image` argument into an attachment URI.
///
/// URLs and `data:` URLs pass through after validation; anything else is
/// read as a local file and inlined.
pub async fn load_image(source: &str) -> anyhow::Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") || source.starts_with("data:") {
        return Ok(Attachment::parse(source)?.to_uri());
    }

    let path = Path::new(source);
    let media_type = media_type_for(path)
        .with_context(|| format!("'{source}' is not a supported image (png, jpg, gif, webp)"))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Could not read '{source}'"))?;
    Ok(Attachment::inline(media_type, &bytes)?.to_uri())
}

fn media_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Print the help text listing all available commands.
pub fn print_help(out: &mut impl Write) -> std::io::Result<()> {
    let rows = [
        ("/help", "Show this help message"),
        ("/new", "Start a new chat"),
        ("/sessions", "List your chats"),
        ("/switch <n>", "Open chat number n from /sessions"),
        ("/rename <title>", "Rename the current chat"),
        ("/delete", "Delete the current chat"),
        ("/image <path|url> [text]", "Send an image, optionally with a message"),
        ("/cancel", "Stop the reply that is streaming"),
        ("/clear", "Clear the screen"),
        ("/exit", "Leave the chat"),
    ];

    writeln!(out)?;
    writeln!(out, "  {}", style("Available commands:").bold())?;
    writeln!(out)?;
    for (cmd, desc) in rows {
        writeln!(out, "  {:<26} {}", style(cmd).cyan(), desc)?;
    }
    writeln!(out)?;
    writeln!(out, "  {}", style("Ctrl+C cancels a streaming reply, Ctrl+D exits").dim())?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_help() {
        assert_eq!(parse("/help"), Some(ChatCommand::Help));
        assert_eq!(parse("/h"), Some(ChatCommand::Help));
        assert_eq!(parse("/?"), Some(ChatCommand::Help));
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(parse("/exit"), Some(ChatCommand::Exit));
        assert_eq!(parse("/quit"), Some(ChatCommand::Exit));
        assert_eq!(parse("/q"), Some(ChatCommand::Exit));
    }

    #[test]
    fn test_parse_switch() {
        assert_eq!(parse("/switch 2"), Some(ChatCommand::Switch(2)));
        assert!(matches!(parse("/switch"), Some(ChatCommand::Unknown(_))));
        assert!(matches!(parse("/switch 0"), Some(ChatCommand::Unknown(_))));
        assert!(matches!(parse("/switch two"), Some(ChatCommand::Unknown(_))));
    }

    #[test]
    fn test_parse_rename() {
        assert_eq!(
            parse("/rename  Summer wedding "),
            Some(ChatCommand::Rename("Summer wedding".to_string()))
        );
        assert!(matches!(parse("/rename"), Some(ChatCommand::Unknown(_))));
    }

    #[test]
    fn test_parse_image_with_caption() {
        assert_eq!(
            parse("/image ./shirt.png does this fit?"),
            Some(ChatCommand::Image {
                source: "./shirt.png".to_string(),
                caption: "does this fit?".to_string(),
            })
        );
        assert_eq!(
            parse("/img https://example.com/a.jpg"),
            Some(ChatCommand::Image {
                source: "https://example.com/a.jpg".to_string(),
                caption: String::new(),
            })
        );
        assert!(matches!(parse("/image"), Some(ChatCommand::Unknown(_))));
    }

    #[test]
    fn test_parse_not_command() {
        assert_eq!(parse("hello world"), None);
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(parse("/foo"), Some(ChatCommand::Unknown("/foo".to_string())));
    }

    #[tokio::test]
    async fn test_load_image_inlines_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("look.PNG");
        tokio::fs::write(&path, [0x89, b'P', b'N', b'G']).await.unwrap();

        let uri = load_image(path.to_str().unwrap()).await.unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_load_image_rejects_unknown_extension() {
        let err = load_image("notes.txt").await.unwrap_err();
        assert!(err.to_string().contains("not a supported image"));
    }

    #[tokio::test]
    async fn test_load_image_passes_urls_through() {
        let uri = load_image("https://example.com/coat.webp").await.unwrap();
        assert_eq!(uri, "https://example.com/coat.webp");
    }

    #[test]
    fn test_help_lists_every_command() {
        let mut out = Vec::new();
        print_help(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        for cmd in ["/new", "/sessions", "/switch", "/rename", "/delete", "/image", "/cancel", "/exit"] {
            assert!(text.contains(cmd), "{cmd}");
        }
    }
}
