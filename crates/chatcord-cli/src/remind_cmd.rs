//! `chatcord remind`: manage a user's reminders from the CLI.
//!
//! - `chatcord remind add --user ID --at "YYYY-MM-DD HH:MM" [--offset MIN] MESSAGE`
//! - `chatcord remind list --user ID`
//! - `chatcord remind delete --user ID INDEX`
//!
//! These commands only touch the reminder store; a running `chatcord run`
//! queues new entries the next time it starts.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime, Utc};
use clap::Subcommand;
use colored::Colorize;

use chatcord_reminders::types::{local_to_utc, validate_fire_time};
use chatcord_reminders::{ReminderRecord, ReminderStore};

use crate::app::App;
use crate::helpers::parse_id;

// ─────────────────────────────────────────────
// Subcommand enum
// ─────────────────────────────────────────────

/// Reminder subcommands.
#[derive(Subcommand)]
pub enum RemindCommands {
    /// Schedule a reminder
    Add {
        /// Owner of the reminder (Discord user id)
        #[arg(short, long)]
        user: String,

        /// Local fire time, e.g. "2026-03-01 09:00"
        #[arg(long)]
        at: String,

        /// UTC offset of `--at` in minutes (defaults to this machine's offset)
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i32>,

        /// Reminder text
        message: String,
    },

    /// List a user's reminders
    List {
        #[arg(short, long)]
        user: String,
    },

    /// Delete a reminder by its position in `list`
    Delete {
        #[arg(short, long)]
        user: String,

        /// 1-based index as shown by `list`
        index: usize,
    },
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

pub async fn dispatch(cmd: RemindCommands, app: &App) -> Result<()> {
    let store = &app.reminders;
    match cmd {
        RemindCommands::Add {
            user,
            at,
            offset,
            message,
        } => {
            let user_id = parse_id(&user)?;
            let offset = offset.unwrap_or_else(local_offset_minutes);
            let record = add_reminder(
                store,
                user_id,
                &at,
                offset,
                &message,
                app.config.reminders.max_ahead_days,
            )
            .await?;
            println!(
                "  {} Reminder set for {} ({})",
                "✓".green(),
                record.local_time().format("%Y-%m-%d %H:%M").to_string().cyan(),
                format_offset(offset).dimmed()
            );
            Ok(())
        }
        RemindCommands::List { user } => list_reminders(store, parse_id(&user)?).await,
        RemindCommands::Delete { user, index } => {
            let user_id = parse_id(&user)?;
            match delete_reminder(store, user_id, index).await? {
                Some(record) => println!("  {} Deleted reminder: {}", "✓".green(), record.message),
                None => println!("  {} No reminder #{} for user {}", "✗".red(), index, user_id),
            }
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// This machine's current UTC offset in minutes.
fn local_offset_minutes() -> i32 {
    Local::now().offset().local_minus_utc() / 60
}

/// `UTC+03:00` style label.
fn format_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let abs = minutes.abs();
    format!("UTC{}{:02}:{:02}", sign, abs / 60, abs % 60)
}

/// Parse `YYYY-MM-DD HH:MM` (a `T` separator and seconds are also accepted).
fn parse_local_time(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .with_context(|| format!("Invalid time '{raw}' (expected YYYY-MM-DD HH:MM)"))
}

// ─────────────────────────────────────────────
// Command implementations
// ─────────────────────────────────────────────

async fn add_reminder(
    store: &ReminderStore,
    user_id: u64,
    at: &str,
    offset_minutes: i32,
    message: &str,
    max_ahead_days: i64,
) -> Result<ReminderRecord> {
    if message.trim().is_empty() {
        bail!("Reminder text is empty");
    }
    let time = local_to_utc(parse_local_time(at)?, offset_minutes)?;
    validate_fire_time(time, Utc::now(), max_ahead_days)?;
    let record = store
        .add(user_id, message.trim(), time, Some(offset_minutes))
        .await
        .context("failed to store reminder")?;
    Ok(record)
}

async fn list_reminders(store: &ReminderStore, user_id: u64) -> Result<()> {
    let reminders = store.list(user_id).await.context("failed to load reminders")?;
    if reminders.is_empty() {
        println!("  No reminders for user {user_id}.");
        return Ok(());
    }

    println!();
    println!("{}", format!("  Reminders for {user_id}").cyan().bold());
    println!();
    println!("  {:<4} {:<18} {:<10} {}", "#".bold(), "Time".bold(), "Status".bold(), "Message".bold());
    println!("  {}", "─".repeat(60));

    let now = Utc::now();
    for (i, reminder) in reminders.iter().enumerate() {
        let status = if reminder.time <= now {
            "due".yellow().to_string()
        } else {
            "pending".green().to_string()
        };
        println!(
            "  {:<4} {:<18} {:<10} {}",
            i + 1,
            reminder.local_time().format("%Y-%m-%d %H:%M"),
            status,
            reminder.message
        );
    }
    println!();
    Ok(())
}

/// Remove the `index`-th reminder (1-based, by fire time).
async fn delete_reminder(store: &ReminderStore, user_id: u64, index: usize) -> Result<Option<ReminderRecord>> {
    let reminders = store.list(user_id).await.context("failed to load reminders")?;
    let Some(record) = index.checked_sub(1).and_then(|i| reminders.get(i)).cloned() else {
        return Ok(None);
    };
    store.remove(user_id, &record.id).await.context("failed to delete reminder")?;
    Ok(Some(record))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
