//! Replyd CLI, the main entry point.
//!
//! Commands:
//! - `serve`     Start the HTTP gateway the messaging transport calls
//! - `ask`       Generate one reply for a conversation
//! - `chat`      Interactive chat as one conversation
//! - `history`   Show or clear stored conversation history
//! - `providers` Show the provider/model fallback order
//! - `config`    Print the effective or default configuration
//! - `sweep`     Drop history older than the configured TTL

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use replyd_config::{AppConfig, ConfigError};

mod commands;

#[derive(Parser)]
#[command(
    name = "replyd",
    about = "Replyd: chat replies with provider fallback, throttling and memory",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.replyd/config.toml)
    #[arg(short, long, global = true, env = "REPLYD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate a single reply
    Ask {
        /// Conversation id the turn belongs to
        #[arg(long)]
        conversation: String,

        /// The user's message
        text: String,
    },

    /// Chat interactively, reading turns from stdin
    Chat {
        /// Conversation id to chat as
        #[arg(long, default_value = "cli")]
        conversation: String,
    },

    /// Inspect or reset conversation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show the provider/model fallback order
    Providers,

    /// Print the effective configuration (API keys redacted)
    Config {
        /// Print the built-in default config as TOML instead
        #[arg(long)]
        default: bool,
    },

    /// Drop history older than memory.ttl_secs
    Sweep,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print stored turns, oldest first
    Show {
        id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a conversation's history
    Clear { id: String },

    /// List conversation ids with stored history
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Config { default: true } = cli.command {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Ask { conversation, text } => {
            commands::ask::once(&config, &conversation, &text).await?
        }
        Commands::Chat { conversation } => commands::ask::interactive(&config, &conversation).await?,
        Commands::History { action } => match action {
            HistoryAction::Show { id, json } => commands::history::show(&config, &id, json).await?,
            HistoryAction::Clear { id } => commands::history::clear(&config, &id).await?,
            HistoryAction::List => commands::history::list(&config).await?,
        },
        Commands::Providers => commands::providers::run(&config)?,
        Commands::Config { .. } => commands::config_cmd::show(&config),
        Commands::Sweep => commands::history::sweep(&config).await?,
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
