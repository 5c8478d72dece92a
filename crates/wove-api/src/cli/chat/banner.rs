//! Welcome banner display for chat sessions.

use console::style;

/// Print the welcome banner at the start of a chat.
///
/// Shows the model, the backend serving it, and the owner whose sessions
/// are loaded, plus a hint about slash commands.
pub fn print_welcome_banner(model: &str, backend: &str, owner: &str) {
    println!();
    println!("  👔 {}", style("Wove").cyan().bold());
    println!("  {}", style("Your personal fashion assistant").dim());
    println!();
    println!("  {}  {} {}", style("Model:").bold(), style(model).dim(), style(format!("({backend})")).dim());
    println!("  {}  {}", style("Owner:").bold(), style(owner).dim());
    println!();
    println!(
        "  {}",
        style("Type /help for commands, Ctrl+C cancels a reply, Ctrl+D exits").dim()
    );
    println!("  {}", style("---").dim());
    println!();
}
