#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use livechat_widget::channels::{InboundEnvelope, MemoryChannel, StdioChannel};
use livechat_widget::{Config, DispatchResult, WidgetRuntime};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Origin attributed to commands given on the command line.
const CLI_SOURCE: &str = "cli";

/// Livechat widget runtime: host-page command bridge and proactive triggers.
#[derive(Parser, Debug)]
#[command(name = "livechat-widget")]
#[command(version)]
#[command(about = "Embedded livechat widget runtime.", long_about = None)]
struct Cli {
    /// Path to config.toml (overrides LIVECHAT_WIDGET_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Attach the bridge to stdin/stdout (JSON lines) and run until stdin closes
    Run {
        /// Identifier of the widget's own context; envelopes from it are ignored
        #[arg(long, default_value = "widget")]
        context_id: String,

        /// Origin given to bare stdin payloads
        #[arg(long, default_value = "host")]
        host_source: String,
    },

    /// Dispatch one command payload and print the resulting state
    Dispatch {
        /// Command JSON, e.g. '{"src":"rocketchat","fn":"setExpanded","args":[true]}'
        payload: String,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the JSON schema of config.toml
    Schema,
    /// Print the effective configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Schema output must stay clean for piping; skip logging and config.
    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        println!("{}", serde_json::to_string_pretty(&Config::json_schema())?);
        return Ok(());
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO.
    // Logs go to stderr so stdout stays reserved for protocol output.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run {
            context_id,
            host_source,
        } => run(&config, context_id, host_source).await,
        Commands::Dispatch { payload } => dispatch_once(&config, &payload).await,
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCommands::Schema => unreachable!("handled before config load"),
        },
    }
}

async fn run(config: &Config, context_id: String, host_source: String) -> Result<()> {
    if context_id == host_source {
        bail!("--context-id and --host-source must differ or every command is ignored");
    }
    let channel = Arc::new(StdioChannel::new(host_source));
    let runtime = WidgetRuntime::from_config(config, channel)?;
    let bridge = runtime.bridge(context_id)?;

    let mut states = runtime.store().subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(state) => info!(
                    minimized = state.minimized,
                    visible = state.iframe.visible,
                    messages = state.messages.len(),
                    unread = state.unread,
                    "state changed"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state watcher lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let timers = runtime.triggers().schedule_time_on_site();
    bridge.init();

    tokio::select! {
        () = bridge.closed() => info!("stdin closed, shutting down"),
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("interrupted, shutting down");
        }
    }

    bridge.reset();
    for timer in timers {
        timer.abort();
    }
    watcher.abort();
    Ok(())
}

async fn dispatch_once(config: &Config, payload: &str) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;
    let (channel, host) = MemoryChannel::pair(CLI_SOURCE);
    let runtime = WidgetRuntime::from_config(config, Arc::new(channel))?;
    let bridge = runtime.bridge("widget")?;

    let result = bridge.dispatch(InboundEnvelope::new(CLI_SOURCE, data)).await;
    // Let detached parent calls land before reporting them.
    tokio::task::yield_now().await;

    match &result {
        DispatchResult::Completed { command } => info!(command = %command, "command completed"),
        DispatchResult::Failed { command, error } => bail!("command '{command}' failed: {error}"),
        DispatchResult::Ignored(reason) => warn!(?reason, "command ignored"),
    }

    let output = serde_json::json!({
        "state": runtime.store().state(),
        "parentCalls": host.calls(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
