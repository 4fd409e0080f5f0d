//! Interactive REPL.
//!
//! Uses `rustyline` for readline-style editing with persistent history.
//! Plain lines are chat turns; lines starting with `/` manage the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use chatcord_agent::{ConversationOrchestrator, SearchKind, PRESETS};
use chatcord_core::bans::BanCheck;
use chatcord_core::types::Role;

use crate::app::App;
use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

const HELP: &str = "\
  /model NAME             switch model
  /models                 list available models
  /reset                  clear history and instruction
  /instruction [TEXT]     set the system instruction (no text: remove it)
  /preset [ID]            apply a preset (no id: list presets)
  /history                show the stored history
  /search KIND QUERY      one turn with web|images|videos results
  exit                    quit";

/// Where one chat session of the REPL lives.
pub struct ChatTarget {
    pub user_id: u64,
    pub channel_id: Option<u64>,
    /// Applied to every turn when set.
    pub search: Option<SearchKind>,
}

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum ReplCommand {
    Help,
    Model(String),
    Models,
    Reset,
    Instruction(Option<String>),
    Preset(Option<String>),
    History,
    Search(SearchKind, String),
    Unknown(String),
}

/// Parse a `/command`. Returns `None` for ordinary chat input.
fn parse_command(input: &str) -> Option<ReplCommand> {
    let rest = input.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let arg_opt = (!arg.is_empty()).then(|| arg.to_string());

    Some(match name.to_lowercase().as_str() {
        "help" | "?" => ReplCommand::Help,
        "model" => match arg_opt {
            Some(model) => ReplCommand::Model(model),
            None => ReplCommand::Models,
        },
        "models" => ReplCommand::Models,
        "reset" => ReplCommand::Reset,
        "instruction" => ReplCommand::Instruction(arg_opt),
        "preset" => ReplCommand::Preset(arg_opt),
        "history" => ReplCommand::History,
        "search" => {
            let parsed = arg
                .split_once(char::is_whitespace)
                .and_then(|(kind, query)| Some((kind.parse::<SearchKind>().ok()?, query.trim())));
            match parsed {
                Some((kind, query)) if !query.is_empty() => ReplCommand::Search(kind, query.to_string()),
                _ => ReplCommand::Unknown("usage: /search web|images|videos QUERY".to_string()),
            }
        }
        other => ReplCommand::Unknown(format!("unknown command /{other}, try /help")),
    })
}

// ─────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────

/// Run the interactive REPL loop.
pub async fn run(app: &App, target: ChatTarget) -> Result<()> {
    let orchestrator = &app.orchestrator;
    let bot_name = &app.config.bot.name;
    helpers::print_banner(bot_name, &orchestrator.current_model(target.user_id).await);

    let history_file = history_path(&app.data_dir);
    let mut editor = create_editor(&history_file)?;

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_command(trimmed) {
            println!("\nGoodbye! 👋");
            break;
        }
        let _ = editor.add_history_entry(&input);

        // Re-checked every turn so a ban issued meanwhile takes effect
        if let BanCheck::Blocked(message) = app.bans.check_ban(target.user_id).await {
            println!("\n{message}\n");
            continue;
        }

        match parse_command(trimmed) {
            Some(command) => {
                if let Err(e) = run_command(app, &target, command).await {
                    eprintln!("\n{} {e}\n", "✗".red());
                }
            }
            None => {
                debug!(user_id = target.user_id, input = trimmed, "processing input");
                chat_turn(orchestrator, bot_name, &target, trimmed, target.search).await;
            }
        }
    }

    save_history(&mut editor, &history_file);
    Ok(())
}

async fn chat_turn(
    orchestrator: &Arc<ConversationOrchestrator>,
    bot_name: &str,
    target: &ChatTarget,
    message: &str,
    search: Option<SearchKind>,
) {
    helpers::print_thinking();
    let reply = orchestrator
        .handle_response(Some(target.user_id), message, search, target.channel_id)
        .await;
    helpers::clear_thinking();
    helpers::print_reply(bot_name, &reply);
}

async fn run_command(app: &App, target: &ChatTarget, command: ReplCommand) -> Result<()> {
    let orchestrator = &app.orchestrator;
    let user = target.user_id;
    match command {
        ReplCommand::Help => println!("\n{HELP}\n"),
        ReplCommand::Model(model) => {
            orchestrator.set_user_model(user, &model).await?;
            println!("  {} Model set to {}", "✓".green(), model.cyan());
        }
        ReplCommand::Models => {
            let current = orchestrator.current_model(user).await;
            println!();
            for model in orchestrator.available_models() {
                let marker = if model == current { "●".green().to_string() } else { " ".to_string() };
                println!("  {marker} {model}");
            }
            println!();
        }
        ReplCommand::Reset => {
            orchestrator.reset_conversation_history(user).await?;
            println!("  {} Conversation reset", "✓".green());
        }
        ReplCommand::Instruction(Some(text)) => {
            orchestrator.set_user_instruction(user, &text).await?;
            println!("  {} Instruction set", "✓".green());
        }
        ReplCommand::Instruction(None) => {
            orchestrator.reset_user_instruction(user).await?;
            println!("  {} Instruction removed", "✓".green());
        }
        ReplCommand::Preset(Some(id)) => {
            let preset = orchestrator.apply_preset(user, &id).await?;
            println!("  {} Preset {} applied", "✓".green(), preset.name.cyan());
        }
        ReplCommand::Preset(None) => {
            println!();
            for preset in PRESETS {
                println!("  {:<12} {}", preset.id.bold(), preset.preview.dimmed());
            }
            println!();
        }
        ReplCommand::History => {
            let history = orchestrator.export_history(Some(user), target.channel_id).await;
            if history.is_empty() {
                println!("  (empty history)");
            }
            for message in history {
                let role = match message.role {
                    Role::System => "system".yellow(),
                    Role::User => "user".green(),
                    Role::Assistant => "assistant".cyan(),
                };
                println!("  {:<10} {}", role, chatcord_core::utils::truncate_string(&message.content, 120));
            }
        }
        ReplCommand::Search(kind, query) => {
            chat_turn(orchestrator, &app.config.bot.name, target, &query, Some(kind)).await;
        }
        ReplCommand::Unknown(hint) => println!("  {hint}"),
    }
    Ok(())
}

// ─────────────────────────────────────────────
// History file
// ─────────────────────────────────────────────

fn create_editor(history_file: &Path) -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    if history_file.exists() {
        let _ = editor.load_history(history_file);
        debug!("loaded REPL history from {}", history_file.display());
    }

    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>, path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(path) {
        debug!("failed to save history: {e}");
    }
}

fn history_path(data_dir: &Path) -> PathBuf {
    data_dir.join("history").join("cli_history")
}

fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
