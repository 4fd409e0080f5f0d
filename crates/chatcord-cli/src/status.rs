//! `chatcord status` and `chatcord models`.
//!
//! - `status`: config path, data dir, bot settings, provider keys, search, admin
//! - `models`: every servable model with its ordered provider list

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use chatcord_core::config::Config;
use chatcord_providers::catalog::{effective_provider_configs, PROVIDERS};

use crate::app::App;
use crate::helpers;

/// Green check or a red note, depending on whether `path` exists.
fn exists_marker(path: &Path) -> String {
    if path.exists() {
        "✓".green().to_string()
    } else {
        "(not found)".red().to_string()
    }
}

/// Run the status command.
pub fn run(config: &Config, config_path: &Path) -> Result<()> {
    println!();
    println!("{}", format!("{} Status", config.bot.name).cyan().bold());
    println!();

    println!("  {:<18} {} {}", "Config:".bold(), config_path.display(), exists_marker(config_path));

    let data_dir = helpers::expand_tilde(&config.storage.data_dir);
    println!("  {:<18} {} {}", "Data dir:".bold(), data_dir.display(), exists_marker(&data_dir));

    let instruction = crate::app::instruction_path(&data_dir, &config.bot.instruction_file);
    println!("  {:<18} {} {}", "Instruction:".bold(), instruction.display(), exists_marker(&instruction));

    println!("  {:<18} {}", "Model:".bold(), config.bot.default_model);
    println!(
        "  {:<18} {} | {} | {}",
        "Parameters:".bold(),
        format!("temp: {}", config.bot.temperature).dimmed(),
        format!("max_tokens: {}", config.bot.max_tokens).dimmed(),
        format!("history: {}", config.bot.max_history_length).dimmed(),
    );

    let storage = &config.storage;
    let on_off = |flag: bool| if flag { "on".green().to_string() } else { "off".dimmed().to_string() };
    println!(
        "  {:<18} cache {} | encrypt users {} | encrypt channels {}",
        "Storage:".bold(),
        on_off(storage.cache_enabled),
        on_off(storage.encrypt_user_data),
        on_off(storage.encrypt_channels),
    );

    // Providers
    println!();
    println!("  {}", "Providers:".bold());
    let effective = effective_provider_configs(&config.providers, |key| std::env::var(key).ok());
    for spec in PROVIDERS {
        let status = match effective.get(spec.name) {
            Some(cfg) if cfg.is_configured() => format!("{} (key set)", "✓".green()),
            _ if !spec.requires_key => format!("{}", "· keyless".dimmed()),
            _ => format!("{}", "· not configured".dimmed()),
        };
        println!("    {:<20} {}", spec.display_name, status);
    }

    println!();
    let brave = if config.search.brave_api_key.trim().is_empty() {
        format!("{}", "· not configured".dimmed())
    } else {
        format!("{} (key set)", "✓".green())
    };
    println!("  {:<18} {}", "Brave Search:".bold(), brave);

    let admin = match config.bans.admin_id {
        0 => format!("{}", "· none".dimmed()),
        id => id.to_string(),
    };
    println!("  {:<18} {}", "Admin:".bold(), admin);
    println!();

    Ok(())
}

/// Run the models command.
pub fn models(app: &App) -> Result<()> {
    let table = app.orchestrator.dispatcher().registry().describe();
    if table.is_empty() {
        println!("  No model has a usable provider. Set an API key and retry.");
        return Ok(());
    }

    println!();
    println!("{}", "  Available Models".cyan().bold());
    println!();
    println!("  {:<28} {}", "Model".bold(), "Providers (in failover order)".bold());
    println!("  {}", "─".repeat(70));
    for (model, providers) in &table {
        let name = if *model == app.config.bot.default_model {
            format!("{model} *").green().to_string()
        } else {
            model.clone()
        };
        println!("  {:<28} {}", name, providers.join(" → "));
    }
    println!();
    Ok(())
}
