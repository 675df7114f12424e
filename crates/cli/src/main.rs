use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "slackline")]
#[command(about = "Slack Socket Mode bridge to per-channel agent sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config.json, bundle.md).
    Init {
        /// Config file path (default: SLACKLINE_CONFIG_PATH or ~/.slackline/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect to Slack over Socket Mode and answer channel messages until interrupted.
    Start {
        /// Config file path (default: SLACKLINE_CONFIG_PATH or ~/.slackline/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Bundle file (default: SLACKLINE_BUNDLE, agents.bundle, or bundle.md next to the config)
        #[arg(long, short, value_name = "PATH")]
        bundle: Option<PathBuf>,

        /// Only listen in this channel (overrides SLACK_CHANNEL_ID and slack.allowedChannels)
        #[arg(long, value_name = "ID")]
        channel: Option<String>,

        /// Debug logging
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match &cli.command {
        Some(Commands::Start { debug: true, .. }) => "debug",
        Some(Commands::Start { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Some(Commands::Version) => {
            println!("slackline {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Start {
            config,
            bundle,
            channel,
            debug: _,
        }) => {
            if let Err(e) = run_start(config, bundle, channel).await {
                log::error!("start failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(slackline::config::default_config_path);
    let dir = slackline::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_start(
    config_path: Option<PathBuf>,
    bundle: Option<PathBuf>,
    channel: Option<String>,
) -> anyhow::Result<()> {
    let (config, path) = slackline::config::load_config(config_path)?;
    log::info!("using config {}", path.display());
    let opts = slackline::daemon::StartOptions { channel, bundle };
    slackline::daemon::run_daemon(config, path, opts).await
}
