use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use confirmd::settings::{LoggingSettings, Settings, SETTINGS_ENV};

#[derive(Parser)]
#[command(
    name = "confirmd",
    about = "Single-run orchestrator for the reservation confirmation automation worker",
    version,
    long_about = None
)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = SETTINGS_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (executor + API server)
    Serve {
        /// Bind address, overrides the settings file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the configuration a run would receive
    MergeConfig {
        /// Base configuration (JSON)
        #[arg(long)]
        base: PathBuf,

        /// Override to merge on top (JSON)
        #[arg(long = "override")]
        overlay: PathBuf,
    },
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(cli.config.as_deref())?;

    // Initialize tracing
    init_tracing(&settings.logging);

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.server.effective_bind());
            tracing::info!(%bind, "Starting confirmd daemon");
            confirmd::serve(&bind, settings).await?;
        }
        Commands::MergeConfig { base, overlay } => {
            let base_value = confirmd::config::load_base(&base).await?;
            let overlay_value = confirmd::config::load_base(&overlay)
                .await
                .with_context(|| format!("failed to load override {}", overlay.display()))?;
            let merged = confirmd::config::merge(&base_value, &overlay_value);
            println!("{}", serde_json::to_string_pretty(&merged)?);
        }
    }

    Ok(())
}
