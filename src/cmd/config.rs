//! Configuration view and validation commands — `patchbridge config`.

use anyhow::Result;

use super::super::ConfigCommands;
use patchbridge::bridge_config::BridgeConfig;

pub fn cmd_config(config: &BridgeConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.repo_dir.join(".patchbridge").join("bridge.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No bridge.toml found, using defaults");
            }
            println!("# Effective values (with env/CLI overrides)");
            println!();
            print!("{}", config.toml.to_toml_string()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }

    Ok(())
}
