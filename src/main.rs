use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::ServeParams;

#[derive(Parser)]
#[command(
    name = "droidpool",
    version,
    about = "Standalone WebDriver orchestrator for Android devices and emulators",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json), overrides the configuration file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the WebDriver front door
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Register with this hub
        #[arg(long)]
        hub_url: Option<String>,

        /// Folder watched for app binaries
        #[arg(long)]
        app_folder: Option<PathBuf>,

        /// App binary to register at startup (repeatable)
        #[arg(short, long = "app")]
        apps: Vec<PathBuf>,
    },

    /// List attached hardware and configured emulators
    Devices,

    /// Show the catalog entry for an app binary
    Inspect {
        /// Path to the app binary
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = commands::load_config(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    setup_tracing(&config.logging.level, &config.logging.format, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            hub_url,
            app_folder,
            apps,
        } => {
            if let Err(e) = droidpool::metrics::init_metrics() {
                tracing::warn!("Failed to initialize metrics: {}", e);
            }
            tracing::info!(port = ?port, hub_url = ?hub_url, "Starting serve command");
            commands::serve(
                config,
                ServeParams {
                    host,
                    port,
                    hub_url,
                    app_folder,
                    apps,
                },
            )
            .await?;
        }

        Commands::Devices => {
            commands::devices(&config).await?;
        }

        Commands::Inspect { path } => {
            commands::inspect(&config, &path).await?;
        }
    }

    Ok(())
}

fn setup_tracing(level: &str, format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("droidpool=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("droidpool={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
