pub mod types;
pub mod config;
pub mod data;
pub mod boundaries;
pub mod stats;
pub mod processing;
pub mod render;
pub mod callbacks;
pub mod graph;
pub mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the data and serve the dashboard API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Prepare the data and write the initial charts as JSON
    Export {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match &cli.command {
        Commands::Serve { config } => {
            info!("Serving dashboard with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            // Preparation must finish before any recompute is answered
            let data = Arc::new(processing::prepare(&app_config)?);

            server::start_server(app_config, data).await?;
        }
        Commands::Export { config } => {
            info!("Exporting charts with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let data = processing::prepare(&app_config)?;

            let graph = graph::UpdateGraph::dashboard()?;
            let initial = graph.initial(&data, callbacks::UiState::default());
            export_outputs(&app_config.output.figure_dir, &initial)?;

            info!("Export complete!");
        }
    }

    Ok(())
}

fn export_outputs(dir: &Path, update: &graph::Recompute) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {:?}", dir))?;

    for (id, output) in &update.outputs {
        let name = serde_json::to_value(id)?;
        let path = dir.join(format!("{}.json", name.as_str().unwrap_or("output")));
        let json = serde_json::to_string_pretty(output)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Wrote {:?}", path);
    }

    let state_path = dir.join("state.json");
    fs::write(&state_path, serde_json::to_string_pretty(&update.state)?)
        .with_context(|| format!("Failed to write {:?}", state_path))?;
    Ok(())
}
