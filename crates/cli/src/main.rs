//! InfraPilot CLI - the main entry point.
//!
//! Commands:
//! - `serve`      - Start the HTTP/SSE gateway
//! - `chat`       - Interactive chat or single-message mode
//! - `providers`  - List supported model backends
//! - `tools`      - List tools per profile
//! - `init`       - Write a default config file

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "infrapilot",
    about = "InfraPilot: provision AWS infrastructure through an LLM agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Config file (defaults to ~/.infrapilot/config.toml)
    #[arg(long, global = true, env = "INFRAPILOT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the agent
    Chat {
        /// Model backend (defaults to the configured one)
        #[arg(long)]
        provider: Option<String>,

        /// Model name (defaults to the backend's default)
        #[arg(long)]
        model: Option<String>,

        /// Tool profile: infra or none
        #[arg(long)]
        profile: Option<String>,

        /// Continue an existing thread
        #[arg(long)]
        thread: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List supported model backends
    Providers,

    /// List available tools
    Tools {
        /// Only show this profile
        #[arg(long)]
        profile: Option<String>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(config_path, host, port).await?,
        Commands::Chat {
            provider,
            model,
            profile,
            thread,
            message,
        } => {
            let options = commands::chat::ChatOptions {
                provider,
                model,
                profile,
                thread,
            };
            commands::chat::run(config_path, options, message).await?
        }
        Commands::Providers => commands::providers::run(config_path).await?,
        Commands::Tools { profile } => commands::tools::run(config_path, profile).await?,
        Commands::Init { force } => commands::init::run(config_path, force).await?,
    }

    Ok(())
}
