//! chatcord CLI: entry point.
//!
//! # Commands
//!
//! - `chatcord chat [-m MESSAGE] [--user ID] [--channel ID] [--search KIND]`: single-shot or REPL
//! - `chatcord run`: start prompt, reminder scheduler and ban sweep until Ctrl+C
//! - `chatcord remind add|list|delete`: manage reminders
//! - `chatcord ban add|remove|info|list`: moderation
//! - `chatcord init`: write a default config and instruction file
//! - `chatcord status`: configuration and provider status
//! - `chatcord models`: servable models and their failover order

mod app;
mod ban_cmd;
mod helpers;
mod init;
mod remind_cmd;
mod repl;
mod run;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use chatcord_agent::SearchKind;
use chatcord_core::bans::BanCheck;
use chatcord_core::config::{get_config_path, load_config};

use app::App;

/// Local console user when `--user` is not given.
const LOCAL_USER_ID: u64 = 1;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// chatcord: a multi-provider LLM chat bot core
#[derive(Parser)]
#[command(name = "chatcord", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.chatcord/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the bot (single-shot or interactive REPL)
    Chat {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Chat as this user id
        #[arg(short, long)]
        user: Option<String>,

        /// Use this channel's shared session instead of the user's DM session
        #[arg(long)]
        channel: Option<u64>,

        /// Augment every turn with search results (web, images, videos)
        #[arg(short, long)]
        search: Option<SearchKind>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Run the background services (start prompt, reminders, ban sweep)
    Run {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Manage reminders
    Remind {
        #[command(subcommand)]
        action: remind_cmd::RemindCommands,
    },

    /// Manage bans
    Ban {
        #[command(subcommand)]
        action: ban_cmd::BanCommands,
    },

    /// Write a default config and instruction file
    Init,

    /// Show configuration and provider status
    Status,

    /// List servable models and their providers
    Models,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = matches!(
        cli.command,
        Commands::Chat { logs: true, .. } | Commands::Run { logs: true }
    );
    init_logging(verbose);

    let config_path = cli.config.unwrap_or_else(get_config_path);
    let config = load_config(Some(config_path.as_path()));

    match cli.command {
        Commands::Chat {
            message,
            user,
            channel,
            search,
            ..
        } => {
            let user_id = match user {
                Some(raw) => helpers::parse_id(&raw)?,
                None => LOCAL_USER_ID,
            };
            run_chat(App::build(config)?, message, user_id, channel, search).await
        }
        Commands::Run { .. } => run::run(App::build(config)?).await,
        Commands::Remind { action } => remind_cmd::dispatch(action, &App::build(config)?).await,
        Commands::Ban { action } => ban_cmd::dispatch(action, &App::build(config)?).await,
        Commands::Init => init::run(&config, &config_path),
        Commands::Status => status::run(&config, &config_path),
        Commands::Models => status::models(&App::build(config)?),
    }
}

// ─────────────────────────────────────────────
// Chat command
// ─────────────────────────────────────────────

async fn run_chat(
    app: App,
    message: Option<String>,
    user_id: u64,
    channel_id: Option<u64>,
    search: Option<SearchKind>,
) -> Result<()> {
    match message {
        Some(msg) => {
            if let BanCheck::Blocked(notice) = app.bans.check_ban(user_id).await {
                println!("{notice}");
                return Ok(());
            }
            info!(user_id, channel_id = ?channel_id, "processing single message");
            let reply = app
                .orchestrator
                .handle_response(Some(user_id), &msg, search, channel_id)
                .await;
            helpers::print_reply(&app.config.bot.name, &reply);
            Ok(())
        }
        None => {
            let target = repl::ChatTarget {
                user_id,
                channel_id,
                search,
            };
            repl::run(&app, target).await
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("chatcord=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
