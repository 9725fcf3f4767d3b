//! mergeit: merges ready task branches into trunk.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "mergeit")]
#[command(about = "Branch merge bot", long_about = None)]
struct Cli {
    #[command(flatten)]
    daemon: DaemonArgs,

    /// Log as JSON lines
    #[arg(long, env = "MERGEIT_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    /// Websocket URL of the repository server event feed
    #[arg(long, env = "MERGEIT_WEBSOCKET")]
    pub websocket: Option<String>,

    /// Base URL of the repository server REST API
    #[arg(long, env = "MERGEIT_RESTAPI")]
    pub restapi: Option<String>,

    /// API key used to log into the event feed
    #[arg(long, env = "MERGEIT_APIKEY", hide_env_values = true)]
    pub apikey: Option<String>,

    /// Bot name, used for reports and state files
    #[arg(long, env = "MERGEIT_NAME")]
    pub name: Option<String>,

    /// Bot configuration file
    #[arg(long, env = "MERGEIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the queue, review and build state files
    #[arg(long, env = "MERGEIT_STATE_DIR", default_value = ".")]
    pub state_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (default)
    Run,
    /// Validate a bot configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "mergeit.kdl")]
        path: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run(cli.daemon).await?,
        Commands::Validate { path } => commands::validate(&path)?,
    }

    Ok(())
}
