//! Main chat loop orchestration.
//!
//! Builds a `SyncCoordinator` over the SQLite gateway and the configured
//! generation backend, then multiplexes three sources in one `select!`:
//! the readline prompt, the event bus (for streamed deltas), and the task
//! running the current turn. Input stays live while a reply streams, so
//! `/cancel` and Ctrl+C can stop it.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rustyline_async::SharedWriter;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use wove_core::chat::{FlushPolicy, GenerationSettings, Selection, SyncCoordinator, TurnOutcome, TurnReport};
use wove_infra::llm::create_backend;
use wove_infra::sqlite::chat::SqliteChatRepository;
use wove_types::chat::{ChatSession, MessageRole, SessionId};
use wove_types::error::ChatError;
use wove_types::event::ChatEvent;
use wove_types::llm::GenerationError;

use crate::cli::session::truncate;
use crate::state::AppState;

use super::banner::print_welcome_banner;
use super::commands::{self, ChatCommand};
use super::input::{ChatInput, InputEvent};

type Engine = SyncCoordinator<SqliteChatRepository>;

/// A turn running on its own task.
struct RunningTurn {
    session: SessionId,
    handle: JoinHandle<Result<TurnReport, ChatError>>,
    spinner: Option<ProgressBar>,
}

enum Flow {
    Continue,
    Exit,
}

struct ChatLoop {
    engine: Arc<Engine>,
    out: SharedWriter,
    turn: Option<RunningTurn>,
}

/// Run the interactive chat loop.
pub async fn run_chat_loop(state: &AppState, selection: Selection) -> anyhow::Result<()> {
    let generation = &state.config.generation;
    let backend = create_backend(generation).map_err(|e| match e {
        GenerationError::AuthenticationFailed => anyhow!(
            "{} is not set. Export your API key, or set `backend = \"http\"` under [generation] in config.toml",
            generation.api_key_env
        ),
        other => anyhow!(other),
    })?;

    let engine = SyncCoordinator::new(state.chat_repo.clone(), backend, state.owner.clone())
        .with_settings(GenerationSettings::from(generation))
        .with_flush_policy(FlushPolicy::from_config(&state.config.chat));
    engine.load(selection).await?;
    if engine.view().active.is_none() {
        engine.start_new_chat();
    }

    print_welcome_banner(&generation.model, engine.backend_name(), state.owner.as_str());

    let prompt = format!("  {} ", style("You >").green().bold());
    let (mut input, out) = ChatInput::new(prompt).map_err(|e| anyhow!("Failed to initialize input: {e}"))?;
    let mut events = engine.events().subscribe();

    let mut chat = ChatLoop {
        engine: Arc::new(engine),
        out,
        turn: None,
    };
    chat.print_active()?;

    loop {
        tokio::select! {
            line = input.read_line() => match line {
                InputEvent::Eof => break,
                InputEvent::Interrupted => chat.interrupt()?,
                InputEvent::Message(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    let flow = match commands::parse(&text) {
                        Some(cmd) => chat.run_command(cmd, &mut input).await?,
                        None => {
                            chat.submit(text, None)?;
                            Flow::Continue
                        }
                    };
                    if let Flow::Exit = flow {
                        break;
                    }
                }
            },
            joined = wait_turn(&mut chat.turn) => {
                // Deltas published before the turn ended may still be queued.
                while let Ok(event) = events.try_recv() {
                    chat.on_event(event)?;
                }
                chat.settle(joined)?;
            }
            event = events.recv() => match event {
                Ok(event) => chat.on_event(event)?,
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Chat view lagged behind the event bus"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Leaving mid-reply keeps what streamed so far.
    if let Some(running) = chat.turn.take() {
        chat.engine.cancel_turn(running.session);
        let _ = running.handle.await;
        if let Some(spinner) = running.spinner {
            spinner.finish_and_clear();
        }
    }

    writeln!(chat.out, "\n  {}", style("Chat ended.").dim())?;
    input.flush();
    Ok(())
}

/// Resolves when the running turn finishes; pending forever when idle.
async fn wait_turn(turn: &mut Option<RunningTurn>) -> Result<Result<TurnReport, ChatError>, JoinError> {
    match turn {
        Some(running) => (&mut running.handle).await,
        None => std::future::pending().await,
    }
}

fn thinking_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("thinking...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

impl ChatLoop {
    fn submit(&mut self, text: String, image: Option<String>) -> anyhow::Result<()> {
        if self.turn.is_some() {
            writeln!(
                self.out,
                "  {} A reply is still streaming. Use /cancel or Ctrl+C to stop it.",
                style("!").yellow().bold()
            )?;
            return Ok(());
        }

        let session = match self.engine.store().read(|s| s.active_id()) {
            Some(id) => id,
            None => self.engine.start_new_chat(),
        };
        let engine = self.engine.clone();
        let handle = tokio::spawn(async move { engine.submit_turn_to(session, &text, image.as_deref()).await });

        self.turn = Some(RunningTurn {
            session,
            handle,
            spinner: Some(thinking_spinner()),
        });
        Ok(())
    }

    fn on_event(&mut self, event: ChatEvent) -> anyhow::Result<()> {
        let ChatEvent::AssistantDelta { text, .. } = event else {
            return Ok(());
        };
        let Some(running) = self.turn.as_mut() else {
            return Ok(());
        };

        if let Some(spinner) = running.spinner.take() {
            spinner.finish_and_clear();
            write!(self.out, "\n  {} ", style("Wove >").cyan().bold())?;
        }
        write!(self.out, "{text}")?;
        self.out.flush()?;
        Ok(())
    }

    fn settle(&mut self, joined: Result<Result<TurnReport, ChatError>, JoinError>) -> anyhow::Result<()> {
        let Some(running) = self.turn.take() else {
            return Ok(());
        };
        if let Some(spinner) = running.spinner {
            spinner.finish_and_clear();
        }

        let report = match joined {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                writeln!(self.out, "\n  {} {e}\n", style("!").red().bold())?;
                return Ok(());
            }
            Err(e) => {
                writeln!(self.out, "\n  {} Reply task failed: {e}\n", style("!").red().bold())?;
                return Ok(());
            }
        };

        match report.outcome {
            TurnOutcome::Completed => writeln!(self.out)?,
            TurnOutcome::Cancelled => writeln!(self.out, "\n  {}", style("(reply cancelled)").dim())?,
            TurnOutcome::Failed | TurnOutcome::Abandoned => {
                let display = report.display.as_deref().unwrap_or("Something went wrong.");
                writeln!(self.out, "\n  {} {}", style("!").red().bold(), display)?;
            }
        }
        if report.degraded {
            writeln!(
                self.out,
                "  {}",
                style("Some of this chat could not be saved; it is kept for this run only.").yellow()
            )?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn interrupt(&mut self) -> anyhow::Result<()> {
        match &self.turn {
            Some(running) => {
                self.engine.cancel_turn(running.session);
            }
            None => {
                writeln!(self.out, "\n  {}", style("Press Ctrl+D to exit, or keep chatting.").dim())?;
            }
        }
        Ok(())
    }

    async fn run_command(&mut self, cmd: ChatCommand, input: &mut ChatInput) -> anyhow::Result<Flow> {
        match cmd {
            ChatCommand::Help => commands::print_help(&mut self.out)?,
            ChatCommand::Clear => input.clear(),
            ChatCommand::Exit => return Ok(Flow::Exit),
            ChatCommand::New => {
                self.engine.start_new_chat();
                self.print_active()?;
            }
            ChatCommand::Sessions => self.print_sessions()?,
            ChatCommand::Switch(n) => {
                let sessions = self.engine.view().sessions;
                match sessions.get(n - 1) {
                    Some(summary) => {
                        self.engine.switch_session(summary.id)?;
                        self.print_active()?;
                    }
                    None => writeln!(
                        self.out,
                        "  {} There is no chat number {n}. See /sessions.",
                        style("?").yellow().bold()
                    )?,
                }
            }
            ChatCommand::Rename(title) => {
                let Some(active) = self.engine.store().read(|s| s.active_id()) else {
                    return Ok(Flow::Continue);
                };
                match self.engine.rename_session(active, &title).await {
                    Ok(()) => writeln!(self.out, "  {} Renamed to '{}'.", style("✓").green().bold(), style(title.trim()).cyan())?,
                    Err(e) => writeln!(self.out, "  {} Could not rename: {e}", style("!").red().bold())?,
                }
            }
            ChatCommand::Delete => {
                let Some(active) = self.engine.store().read(|s| s.active_id()) else {
                    return Ok(Flow::Continue);
                };
                match self.engine.delete_session(active).await {
                    Ok(()) => {
                        writeln!(self.out, "  {} Chat deleted.", style("x").red().bold())?;
                        if self.engine.view().active.is_none() {
                            self.engine.start_new_chat();
                        }
                        self.print_active()?;
                    }
                    Err(e) => writeln!(self.out, "  {} Could not delete: {e}", style("!").red().bold())?,
                }
            }
            ChatCommand::Image { source, caption } => match commands::load_image(&source).await {
                Ok(uri) => self.submit(caption, Some(uri))?,
                Err(e) => writeln!(self.out, "  {} {e:#}", style("!").red().bold())?,
            },
            ChatCommand::Cancel => {
                let cancelled = self
                    .turn
                    .as_ref()
                    .is_some_and(|running| self.engine.cancel_turn(running.session));
                if !cancelled {
                    writeln!(self.out, "  {}", style("Nothing to cancel.").dim())?;
                }
            }
            ChatCommand::Unknown(name) => writeln!(
                self.out,
                "\n  {} Unknown command: {}. Type /help for available commands.\n",
                style("?").yellow().bold(),
                style(name).dim()
            )?,
        }
        Ok(Flow::Continue)
    }

    fn print_sessions(&mut self) -> anyhow::Result<()> {
        let view = self.engine.view();
        let active = view.active.as_ref().map(|s| s.id);

        writeln!(self.out)?;
        for (i, summary) in view.sessions.iter().enumerate() {
            let marker = if Some(summary.id) == active { "*" } else { " " };
            writeln!(
                self.out,
                "  {} {:>2}. {}  {}",
                style(marker).green().bold(),
                i + 1,
                style(truncate(&summary.title, 40)).cyan(),
                style(format!(
                    "{} messages, {}",
                    summary.message_count,
                    summary.updated_at.format("%Y-%m-%d %H:%M")
                ))
                .dim()
            )?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn print_active(&mut self) -> anyhow::Result<()> {
        let view = self.engine.view();
        if let Some(session) = view.active.as_ref() {
            write_transcript(&mut self.out, session)?;
        }
        Ok(())
    }
}

fn write_transcript(out: &mut impl Write, session: &ChatSession) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "  {}", style(&session.title).bold())?;
    writeln!(out, "  {}", style("---").dim())?;
    for message in &session.messages {
        let label = match message.role {
            MessageRole::User => style("You >").green().bold(),
            MessageRole::Assistant => style("Wove >").cyan().bold(),
        };
        let image = if message.attachment.is_some() { " [image]" } else { "" };
        writeln!(out, "  {label}{image} {}", message.content)?;
    }
    writeln!(out)?;
    Ok(())
}
