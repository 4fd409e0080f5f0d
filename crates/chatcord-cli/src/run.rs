//! `chatcord run`: background services without a chat frontend.
//!
//! Startup sequence:
//! 1. Build services from config
//! 2. Run the start prompt through the system channel
//! 3. Load and start the reminder scheduler (console notifier)
//! 4. Start the expired-ban sweep
//! 5. Sweep the session cache until Ctrl+C, then stop both loops

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use tracing::{debug, info};

use chatcord_reminders::{Notifier, ReminderScheduler, SchedulerConfig};

use crate::app::App;
use crate::helpers;

/// Prints reminder deliveries to stdout in place of a chat platform DM.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify_user(&self, user_id: u64, text: &str) -> anyhow::Result<()> {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        println!("  {} {} {}", stamp.to_string().dimmed(), format!("→ {user_id}").cyan(), text);
        Ok(())
    }
}

/// Half the sliding TTL, at least a minute.
fn cache_sweep_period(sliding_ttl_secs: u64) -> Duration {
    Duration::from_secs((sliding_ttl_secs / 2).max(60))
}

pub async fn run(app: App) -> Result<()> {
    let config = &app.config;
    println!();
    println!("{}  v{}", config.bot.name.cyan().bold(), config.bot.version.dimmed());
    println!("  Mode: background services");
    println!();

    let scheduler = Arc::new(ReminderScheduler::new(
        Arc::clone(&app.reminders),
        Arc::new(ConsoleNotifier),
        SchedulerConfig::from(&config.reminders),
    ));

    println!("  Model:     {}", config.bot.default_model);
    println!("  Data dir:  {}", app.data_dir.display());
    println!("  Models:    {} available", app.orchestrator.available_models().len());
    println!("  Search:    {}", if app.orchestrator.has_search() { "enabled" } else { "disabled" });
    println!();

    // The start prompt goes first so its reply shows before reminders fire
    if let Some(reply) = app.orchestrator.start_prompt().await {
        helpers::print_reply(&config.bot.name, &reply);
    }

    scheduler.start().await.context("failed to load reminders")?;
    let queued = scheduler.pending().await.len();
    app.bans.start().await;
    info!(reminders = queued, "background services running");

    println!("  Reminders: {queued} queued");
    println!("  Ctrl+C to stop");
    println!();

    // Sweep idle sessions out of the cache while waiting for Ctrl+C
    let mut sweep = tokio::time::interval(cache_sweep_period(config.storage.sliding_ttl_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = sweep.tick() => {
                if let Some(cache) = app.orchestrator.sessions().cache() {
                    let evicted = cache.clear_expired();
                    if evicted > 0 {
                        debug!(evicted, "session cache swept");
                    }
                }
            }
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl+C")?;
                break;
            }
        }
    }

    println!();
    println!("  Shutting down...");
    info!("received Ctrl+C, shutting down");
    scheduler.stop().await;
    app.bans.stop().await;

    println!("  Stopped. Goodbye!");
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use chatcord_core::config::Config;

    #[test]
    fn test_cache_sweep_period() {
        assert_eq!(cache_sweep_period(3600), Duration::from_secs(1800));
        assert_eq!(cache_sweep_period(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_console_notifier_never_fails() {
        assert!(ConsoleNotifier.notify_user(7, "hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_scheduler_wiring_loads_stored_reminders() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_string_lossy().into_owned();
        let app = App::build(config).unwrap();

        app.reminders
            .add(7, "stretch", Utc::now() + chrono::Duration::hours(1), None)
            .await
            .unwrap();

        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::clone(&app.reminders),
            Arc::new(ConsoleNotifier),
            SchedulerConfig::from(&app.config.reminders),
        ));
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.pending().await.len(), 1);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }
}
