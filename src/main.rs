use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tailor::controller::RunController;
use tailor::events::EventHub;
use tailor::server::{AppState, serve};
use tailor::store::{DbHandle, TailorDb};
use tailor::tailor_config::TailorConfig;

#[derive(Parser)]
#[command(name = "tailor")]
#[command(version, about = "Resume-tailoring pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file. Defaults to ./tailor.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the run API and event stream
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// View or validate configuration
    Config {
        /// Validate without printing
        #[arg(long)]
        validate: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "tailor=debug,info" } else { "tailor=info,warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = TailorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            if let Some(parent) = config.server.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            let db = DbHandle::new(TailorDb::new(&config.server.db_path)?);
            let hub = Arc::new(EventHub::new());
            let controller = Arc::new(RunController::new(
                db,
                Arc::clone(&hub),
                config.pipeline_settings(),
            ));
            let state = Arc::new(AppState { controller, hub });
            serve(state, port).await
        }
        Commands::Config { validate } => {
            config.validate()?;
            if validate {
                println!("Configuration OK");
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
    }
}
