//! agentdesk - local web chat client with server-side tools

use agentdesk::config::{self, AppConfig, DEFAULT_CONFIG_YAML};
use agentdesk::server;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agentdesk")]
#[command(author, version, about = "Local web chat client with workspace tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize agentdesk configuration in the current directory
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Start the chat server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Workspace root tools may write to (overrides config)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Read-only framework root searched after the workspace (overrides config)
        #[arg(short, long)]
        framework: Option<PathBuf>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "agentdesk=debug,tower_http=debug"
    } else {
        "agentdesk=info,tower_http=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Init { force } => cmd_init(force),
        Commands::Serve {
            port,
            host,
            workspace,
            framework,
        } => cmd_serve(port, host, workspace, framework).await,
        Commands::Config => cmd_config(),
    }
}

/// Write the default configuration and storage directories
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_dir = PathBuf::from(".agentdesk");
    let config_file = config_dir.join("config.yaml");

    if config_file.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }

    let defaults = AppConfig::default();
    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&defaults.storage.conversations_dir)?;
    fs::create_dir_all(&defaults.storage.agents_dir)?;
    fs::write(&config_file, DEFAULT_CONFIG_YAML)?;

    info!("Created {}", config_file.display());
    info!("Set ANTHROPIC_API_KEY and run 'agentdesk serve' to start.");
    Ok(())
}

/// Start the server with command-line overrides applied
async fn cmd_serve(
    port: Option<u16>,
    host: Option<String>,
    workspace: Option<PathBuf>,
    framework: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = config::load_config()?;

    if let Some(p) = port {
        config.server.port = p;
    }
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(w) = workspace {
        config.workspace.root = w;
    }
    if let Some(f) = framework {
        config.workspace.framework_root = Some(f);
    }

    if !config.workspace.root.is_dir() {
        anyhow::bail!(
            "Workspace root {} is not a directory",
            config.workspace.root.display()
        );
    }
    if let Some(framework) = &config.workspace.framework_root {
        if !framework.is_dir() {
            warn!(path = %framework.display(), "Framework root does not exist, reads will use the workspace only");
        }
    }

    info!("agentdesk v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("API available at {}", config.server.api_base_url());

    server::start_server(config).await
}

/// Show current configuration
fn cmd_config() -> anyhow::Result<()> {
    match config::load_config() {
        Ok(config) => {
            if let Err(e) = config.validate() {
                warn!("Configuration is invalid: {}", e);
            }
            print!("{}", serde_yaml::to_string(&config.redacted())?);
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            info!("Run 'agentdesk init' to create a configuration file.");
        }
    }
    Ok(())
}
