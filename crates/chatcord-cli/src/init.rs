//! `chatcord init`: write a default config and prepare the data dir.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use chatcord_agent::find_preset;
use chatcord_core::config::{save_config, Config};

use crate::app::instruction_path;
use crate::helpers;

/// Create whatever is missing; existing files are left untouched.
pub fn run(config: &Config, config_path: &Path) -> Result<()> {
    println!();
    println!("{}", format!("{} Setup", config.bot.name).cyan().bold());
    println!();

    if config_path.exists() {
        println!("  {} config already exists at {}", "✓".green(), config_path.display());
    } else {
        save_config(config, Some(config_path))
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("  {} created config at {}", "✓".green(), config_path.display());
    }

    let data_dir = helpers::expand_tilde(&config.storage.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    println!("  {} data dir at {}", "✓".green(), data_dir.display());

    let instruction = instruction_path(&data_dir, &config.bot.instruction_file);
    if instruction.exists() {
        println!("  {} instruction file already exists", "✓".green());
    } else {
        let text = find_preset("default").map(|p| p.instruction).unwrap_or_default();
        std::fs::write(&instruction, text)
            .with_context(|| format!("failed to write {}", instruction.display()))?;
        println!("  {} created instruction file at {}", "✓".green(), instruction.display());
    }

    println!();
    println!(
        "{}",
        "  Next: add provider API keys to the config (or export GROQ_API_KEY etc.) and run `chatcord chat`.".dimmed()
    );
    println!();
    Ok(())
}
