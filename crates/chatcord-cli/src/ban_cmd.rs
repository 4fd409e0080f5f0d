//! `chatcord ban`: moderate who may talk to the bot.
//!
//! - `chatcord ban add USER [--reason TEXT] [--days N]`
//! - `chatcord ban remove USER`
//! - `chatcord ban info USER`
//! - `chatcord ban list [--as ADMIN]`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use chatcord_core::bans::{BanRecord, BanRegistry};

use crate::app::App;
use crate::helpers::parse_id;

#[derive(Subcommand)]
pub enum BanCommands {
    /// Ban a user
    Add {
        user: String,

        #[arg(short, long, default_value = "No reason given")]
        reason: String,

        /// Ban length in days; permanent when omitted
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Lift a ban
    Remove { user: String },

    /// Show a user's ban, if any
    Info { user: String },

    /// List active bans (admin only)
    List {
        /// Requesting user id; defaults to the configured admin
        #[arg(long = "as")]
        requester: Option<String>,
    },
}

pub async fn dispatch(cmd: BanCommands, app: &App) -> Result<()> {
    let bans = &app.bans;
    let admin = app.config.bans.admin_id;
    match cmd {
        BanCommands::Add { user, reason, days } => {
            let user_id = parse_id(&user)?;
            let banned_by = (admin != 0).then_some(admin);
            let record = bans
                .ban(user_id, &reason, days, banned_by)
                .await
                .context("failed to store ban")?;
            println!("  {} Banned {} ({})", "✓".green(), user_id.to_string().cyan(), describe_term(&record));
        }
        BanCommands::Remove { user } => {
            let user_id = parse_id(&user)?;
            if bans.unban(user_id).await.context("failed to remove ban")? {
                println!("  {} Unbanned {}", "✓".green(), user_id.to_string().cyan());
            } else {
                println!("  {} User {} is not banned", "✗".red(), user_id);
            }
        }
        BanCommands::Info { user } => {
            let user_id = parse_id(&user)?;
            match bans.ban_info(user_id).await.context("failed to read ban")? {
                Some(record) => print_record(&record),
                None => println!("  User {user_id} is not banned."),
            }
        }
        BanCommands::List { requester } => {
            let requester = match requester {
                Some(raw) => parse_id(&raw)?,
                None => admin,
            };
            list_bans(bans, requester).await?;
        }
    }
    Ok(())
}

fn describe_term(record: &BanRecord) -> String {
    match (record.duration, record.expires_at()) {
        (Some(d), Ok(Some(end))) => format!("{} days, until {} UTC", d.days, end.format("%Y-%m-%d %H:%M")),
        (Some(d), _) => format!("{} days, end date out of range", d.days),
        (None, _) => "permanent".to_string(),
    }
}

fn print_record(record: &BanRecord) {
    println!();
    println!("  {:<12} {}", "User:".bold(), record.user_id);
    println!("  {:<12} {}", "Reason:".bold(), record.reason);
    println!("  {:<12} {} UTC", "Since:".bold(), record.timestamp.format("%Y-%m-%d %H:%M"));
    println!("  {:<12} {}", "Term:".bold(), describe_term(record));
    if let Some(by) = record.banned_by {
        println!("  {:<12} {}", "Banned by:".bold(), by);
    }
    println!();
}

async fn list_bans(bans: &BanRegistry, requester: u64) -> Result<()> {
    let records = bans.list_banned(requester).await?;
    if records.is_empty() {
        println!("  No active bans.");
        return Ok(());
    }

    println!();
    println!("{}", "  Active Bans".cyan().bold());
    println!();
    println!("  {:<20} {:<30} {}", "User".bold(), "Term".bold(), "Reason".bold());
    println!("  {}", "─".repeat(70));
    for record in &records {
        println!("  {:<20} {:<30} {}", record.user_id, describe_term(record), record.reason);
    }
    println!();
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
