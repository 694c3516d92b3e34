use std::path::PathBuf;

use anyhow::Result;
use checkgate_cli::extract_cmd;
use checkgate_cli::extract_cmd::ExtractCli;
use checkgate_cli::load_config;
use checkgate_cli::run_cmd;
use checkgate_cli::whitelist_cmd;
use checkgate_cli::whitelist_cmd::WhitelistCli;
use clap::Parser;
use clap::Subcommand;

/// Receipt-gated access bot.
#[derive(Debug, Parser)]
#[command(author, version, bin_name = "checkgate")]
struct Cli {
    /// Directory holding config.toml, .env and the data files
    /// (defaults to $CHECKGATE_HOME, then ~/.checkgate).
    #[arg(long = "home", value_name = "DIR", global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the Telegram bot.
    Run,
    /// Print or save the whitelist as CSV.
    Whitelist(WhitelistCli),
    /// Extract the identifier from a local receipt file.
    Extract(ExtractCli),
}

fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.home)?;
    match cli.command {
        Command::Run => run_cmd::run(config).await,
        Command::Whitelist(args) => whitelist_cmd::run(args, &config),
        Command::Extract(args) => extract_cmd::run(args, &config).await,
    }
}
