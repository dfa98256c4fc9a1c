mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zonein_core::transport::{NativeHostConfig, DEFAULT_HTTP_ENDPOINT};
use zonein_core::{TransportOptions, DEFAULT_HISTORY_QUERY};

use commands::{
    classify::{handle_classify_command, handle_emit_command, tab_signal},
    helpers::open_database,
    history::handle_history_command,
    monitor::{handle_monitor_command, MonitorAction},
    rules::{handle_rules_command, RulesAction},
    transport::{handle_transport_command, TransportAction},
};

#[derive(Parser)]
#[command(name = "zonein")]
#[command(about = "Classify browsing activity as productive, neutral or distracting", long_about = None)]
struct Cli {
    /// Settings database (defaults to the user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// HTTP receiver endpoint
    #[arg(long, global = true, default_value = DEFAULT_HTTP_ENDPOINT)]
    endpoint: String,
    /// Native messaging host executable
    #[arg(long, global = true)]
    native_host: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a URL with the current rules
    Classify {
        url: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage classification rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Pause or resume monitoring
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },
    /// Configure or test event delivery
    Transport {
        #[command(subcommand)]
        action: TransportAction,
    },
    /// Record and deliver an event as if a tab had navigated to URL
    Emit {
        url: String,
        #[arg(long)]
        tab_id: Option<i64>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Show recently emitted events
    History {
        /// Number of events to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_HISTORY_QUERY)]
        limit: usize,
        /// Delete all recorded events
        #[arg(long)]
        clear: bool,
    },
}

impl Cli {
    fn transport_options(&self) -> TransportOptions {
        let mut native_host = NativeHostConfig::default();
        if let Some(program) = &self.native_host {
            native_host.program.clone_from(program);
        }
        TransportOptions {
            native_host,
            http_endpoint: self.endpoint.clone(),
            ..TransportOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .init();

    let options = cli.transport_options();
    let db = open_database(cli.db)?;

    match cli.command {
        Commands::Classify { url, json } => handle_classify_command(&db, &url, json),
        Commands::Rules { action } => handle_rules_command(&db, action),
        Commands::Monitor { action } => handle_monitor_command(&db, action),
        Commands::Transport { action } => handle_transport_command(db, options, action).await,
        Commands::Emit { url, tab_id, title } => {
            handle_emit_command(db, options, tab_signal(url, tab_id, title)).await
        }
        Commands::History { limit, clear } => handle_history_command(&db, limit, clear),
    }
}
