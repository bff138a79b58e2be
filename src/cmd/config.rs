//! Configuration view and validation commands: `cascade config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use cascade::config::{CONFIG_DIR, CONFIG_FILE, CascadeConfig, CascadeToml};
    use cascade::session::ensure_gitignore;

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Cascade Configuration");
            println!("=====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                CascadeToml::load(&config_path)?
            } else {
                println!("No cascade.toml found at {}", config_path.display());
                println!("Using default configuration:");
                CascadeToml::default()
            };
            println!();
            print!("{}", toml::to_string_pretty(&toml)?);
            println!();

            println!("Effective values (with env overrides):");
            let config = CascadeConfig::new(project_dir.to_path_buf())?;
            println!(
                "  executor = \"{}\"",
                config.toml.executor_cmd().unwrap_or_else(|| "(none)".to_string())
            );
            println!("  trunk = \"{}\"", config.trunk());
            println!();
            if !config_path.exists() {
                println!("Run 'cascade config init' to create a cascade.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                CascadeToml::load(&config_path)?
            } else {
                println!("No cascade.toml found; checking defaults.");
                CascadeToml::default()
            };
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("cascade.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config_dir)?;
            ensure_gitignore(&config_dir)?;
            CascadeToml::default().save(&config_path)?;

            println!("Created cascade.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [executor] command, args");
            println!("  - [resolution] strategy and retry limits");
            println!("  - [branches] prefix, push, create_pr, conflict_policy");
            println!("  - [parallel] enabled, max_parallel");
            println!();
        }
    }

    Ok(())
}
