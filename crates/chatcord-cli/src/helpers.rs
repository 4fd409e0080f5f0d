//! Shared CLI helpers: path expansion, reply printing, banner, id parsing.

use std::path::PathBuf;

use anyhow::{bail, Result};
use colored::Colorize;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Print a bot reply to stdout.
pub fn print_reply(bot_name: &str, reply: &str) {
    println!();
    println!("{}", bot_name.cyan().bold());
    if reply.is_empty() {
        println!("{}", "(no reply)".dimmed());
    } else {
        println!("{reply}");
    }
    println!();
}

/// Print the banner shown at REPL start.
pub fn print_banner(bot_name: &str, model: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}  {}", bot_name.cyan().bold(), version.dimmed(), model.dimmed());
    println!(
        "{}",
        "Type a message, /help for commands, or \"exit\" to quit.".dimmed()
    );
    println!();
}

/// Print a "thinking" placeholder (for non-log mode).
pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

/// Clear the "thinking" placeholder.
pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

/// Parse a Discord snowflake id given on the command line or in a REPL command.
pub fn parse_id(raw: &str) -> Result<u64> {
    let trimmed = raw.trim().trim_start_matches("<@").trim_end_matches('>');
    match trimmed.parse::<u64>() {
        Ok(0) | Err(_) => bail!("invalid user id: {raw}"),
        Ok(id) => Ok(id),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
