use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use roster_core::config::{Config, RoleSourceConfig, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        return print_json(&config);
    }

    println!("community:          {}", config.community.name);
    println!("ranks:              {}", config.ladder.len());
    println!("sync interval:      {}s", config.sync.interval_secs);
    println!("poll interval:      {}s", config.sync.poll_secs);
    println!("dedup window:       {}s", config.sync.dedup_window_secs);
    println!("xp ceiling:         {}", config.sync.xp_ceiling);
    println!(
        "officer approval:   promotions to {} and above",
        config.workflow.promotion_approval_rank
    );
    match &config.source {
        RoleSourceConfig::File { path } => println!("role source:        file {path}"),
        RoleSourceConfig::Http { base_url, .. } => println!("role source:        http {base_url}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
