//! Subcommand handlers.

use crate::{Cli, Commands, ConfigAction};
use anyhow::Context;
use pdfrag_core::config::{AppConfig, ConfigOverrides, load_config};
use pdfrag_core::gateway::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) async fn handle_command(cli: Cli) -> anyhow::Result<()> {
    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    match cli.command {
        Commands::Serve {
            host,
            port,
            data_root,
        } => {
            let overrides = ConfigOverrides {
                host,
                port,
                data_root,
            };
            let config = load(&workspace, cli.config.as_deref(), &overrides)?;
            serve(config).await
        }
        Commands::Config { action } => {
            let config = load(&workspace, cli.config.as_deref(), &ConfigOverrides::default())?;
            match action {
                ConfigAction::Show => {
                    let rendered =
                        toml::to_string_pretty(&config).context("rendering configuration")?;
                    println!("{}", rendered);
                }
                ConfigAction::Validate => {
                    let warnings = config.validate();
                    if warnings.is_empty() {
                        println!("Configuration OK");
                    } else {
                        for warning in &warnings {
                            println!("warning: {}", warning);
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

fn load(
    workspace: &std::path::Path,
    config_file: Option<&std::path::Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    load_config(Some(workspace), config_file, overrides)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let data_root = config.storage.data_root.clone();
    std::fs::create_dir_all(&data_root)
        .with_context(|| format!("creating data root {}", data_root.display()))?;

    tracing::info!(
        data_root = %data_root.display(),
        llm = %config.llm.model,
        embedding = %config.embedding.provider,
        "Starting pdfrag"
    );
    let state = AppState::from_config(config).context("initializing services")?;
    gateway::run(Arc::new(state))
        .await
        .context("HTTP server failed")
}
