//! streamrelay CLI: the main entry point.
//!
//! Commands:
//! - `ask`      Stream one exchange to the terminal
//! - `complete` One synchronous completion with a single tool pass
//! - `serve`    Answer Telegram messages, one exchange per message
//! - `config`   Print the default configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod bootstrap;
mod commands;
mod tools;

#[derive(Parser)]
#[command(
    name = "streamrelay",
    about = "Streaming LLM exchanges with tool calls, delivered as live-edited messages",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.streamrelay/config.toml)
    #[arg(short, long, global = true, env = "STREAMRELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream one exchange to the terminal
    Ask {
        /// The question
        prompt: String,

        /// User id the history is kept under
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Print the metrics exposition after the exchange
        #[arg(long)]
        metrics: bool,
    },

    /// Ask once without streaming
    Complete {
        /// The question
        prompt: String,

        /// User id the history is read from
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Long-poll Telegram and answer every text message
    Serve,

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Ask {
            prompt,
            user,
            metrics,
        } => commands::ask::run(config_path, &user, &prompt, metrics).await?,
        Commands::Complete { prompt, user } => {
            commands::complete::run(config_path, &user, &prompt).await?
        }
        Commands::Serve => commands::serve::run(config_path).await?,
        Commands::Config => commands::config_cmd::print_default(),
    }

    Ok(())
}

/// Logs go to stderr so answers on stdout stay clean.
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
