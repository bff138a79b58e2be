//! Project initialization: `cascade init`.

use anyhow::{Context, Result};
use cascade::config::{CONFIG_DIR, CONFIG_FILE, CascadeToml};
use cascade::session::ensure_gitignore;
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);
    let was_initialized = config_path.exists();

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    ensure_gitignore(&config_dir)?;

    if was_initialized {
        println!(
            "Cascade project already initialized at {}",
            config_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    CascadeToml::default().save(&config_path)?;
    println!("Initialized cascade project at {}", config_dir.display());
    println!();
    println!("Created directory structure:");
    println!("  .cascade/");
    println!("  ├── cascade.toml  # Executor, resolution and branch settings");
    println!("  └── .gitignore    # Keeps orchestration state out of commits");
    println!();
    println!("Next steps:");
    println!("  1. Set [executor] command in .cascade/cascade.toml");
    println!("  2. Run `cascade check <plan>` to audit your plan");
    println!("  3. Run `cascade run <plan>` to start execution");
    Ok(())
}
