//! Hisho CLI, the main entry point.
//!
//! Commands:
//! - `serve` : Start the HTTP invocation gateway
//! - `chat`  : Send one message through the orchestrator
//! - `config`: Show the effective configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "hisho",
    about = "Hisho: secretary assistant for calendar, tasks and wiki",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send a single message to the assistant
    Chat {
        /// Message to send
        #[arg(short, long)]
        message: String,

        /// Session id; repeat it to continue a conversation
        #[arg(short, long)]
        session: Option<String>,

        /// IANA timezone of the user (e.g. Asia/Tokyo)
        #[arg(short, long)]
        timezone: Option<String>,

        /// Microsoft Graph access token
        #[arg(long, env = "MS_GRAPH_ACCESS_TOKEN", hide_env_values = true)]
        credential: Option<String>,
    },

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print the default configuration file instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            message,
            session,
            timezone,
            credential,
        } => commands::chat::run(message, session, timezone, credential).await?,
        Commands::Config { default } => commands::config_cmd::run(default)?,
    }

    Ok(())
}
