// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use gridplane_core::config::GridplaneConfig;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as YAML
    Show,

    /// Validate the configuration file
    Validate,

    /// Write a default configuration file
    Generate {
        /// Output path (default: ./gridplane.yaml)
        #[arg(short, long, default_value = "gridplane.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = super::load_config(config_path)?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        ConfigCommand::Validate => {
            let config = super::load_config(config_path)?;
            config.validate()?;
            println!("{}", "Configuration is valid.".green());
            Ok(())
        }
        ConfigCommand::Generate { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "{:?} already exists; pass --force to overwrite",
                    output
                );
            }
            let yaml = serde_yaml::to_string(&GridplaneConfig::default())?;
            std::fs::write(&output, yaml)
                .with_context(|| format!("cannot write {:?}", output))?;
            println!("Wrote default configuration to {:?}", output);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_writes_a_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridplane.yaml");

        handle_command(
            ConfigCommand::Generate {
                output: path.clone(),
                force: false,
            },
            None,
        )
        .await
        .unwrap();

        let yaml = std::fs::read_to_string(&path).unwrap();
        let parsed: GridplaneConfig = serde_yaml::from_str(&yaml).unwrap();
        parsed.validate().unwrap();
    }

    #[tokio::test]
    async fn generate_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridplane.yaml");
        std::fs::write(&path, "existing: true\n").unwrap();

        let result = handle_command(
            ConfigCommand::Generate {
                output: path.clone(),
                force: false,
            },
            None,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing: true\n");
    }
}
