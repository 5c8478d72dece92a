//! Automatic session titles.
//!
//! A session is titled after its first user message: the greeting is the
//! only prior message, and the title becomes that message, truncated to
//! `TITLE_MAX_CHARS` characters with `TITLE_ELLIPSIS` appended when cut.

use wove_types::chat::{DEFAULT_SESSION_TITLE, MessageRole};

/// Longest title derived from a message before truncation kicks in.
pub const TITLE_MAX_CHARS: usize = 50;

/// Suffix marking a truncated title.
pub const TITLE_ELLIPSIS: &str = "...";

/// Whether a message is the first user-authored message of a session,
/// given how many messages the session held before it.
pub fn is_first_user_message(prior_count: usize, role: MessageRole) -> bool {
    role == MessageRole::User && prior_count == 1
}

/// Derive a session title.
///
/// Returns `existing` unchanged unless this is the first user message, it
/// has text (an image-only message keeps the default title), and the session
/// still carries the default title (an explicit rename wins). Length is
/// counted in characters, so multi-byte text is never split.
pub fn derive_title(existing: &str, is_first_user_message: bool, content: &str) -> String {
    if !is_first_user_message || existing != DEFAULT_SESSION_TITLE || content.trim().is_empty() {
        return existing.to_string();
    }

    match content.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => format!("{}{TITLE_ELLIPSIS}", &content[..cut]),
        None => content.to_string(),
    }
}
