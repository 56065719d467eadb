//! Confab Daemon - Console-Driven Streaming Relay
//!
//! This is the main entry point for the Confab daemon. It drives full
//! conversational turns through the relay core against a live model
//! backend, rendering transport traffic (sends, live edits, structured
//! dispatch) straight to the terminal. What a chat-service adapter would
//! do over a bot API, this binary does over stdin/stdout.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults ($XDG_CONFIG_HOME/confab/config.toml)
//! confab-daemon
//!
//! # Explicit config file and model
//! confab-daemon --config /etc/confab/config.toml --model gpt-4o-mini
//!
//! # Point at a local OpenAI-compatible server, skip the allowlist
//! CONFAB_API_URL=http://localhost:11434/v1 confab-daemon --allow-all
//!
//! # Verbose logging
//! RUST_LOG=debug confab-daemon
//! ```
//!
//! # Console Commands
//!
//! `/reset`, `/memory`, `/remember <text>`, `/forget <id...>`, `/help`,
//! `/quit`. Any other input line is sent to the model as a turn.
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: graceful shutdown

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use confab_core::{
    backend::OpenAiBackend,
    chat::{ChatContext, UserId},
    load_config, load_config_from_path,
    memory::{MemorySource, RememberOutcome},
    outreach::OutreachPlanner,
    transport::{ChatEvent, InProcessTransport},
    ConfigOverrides, ModelBackend, Relay, TurnRequest,
};

/// Confab Daemon - Console-driven streaming relay
#[derive(Parser, Debug)]
#[command(name = "confab-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CONFAB_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "CONFAB_API_URL", value_name = "URL")]
    api_url: Option<String>,

    /// API key for the model backend
    #[arg(long, env = "CONFAB_API_KEY", value_name = "KEY")]
    api_key: Option<String>,

    /// Default model for turns
    #[arg(short = 'm', long, env = "CONFAB_DEFAULT_MODEL", value_name = "MODEL")]
    model: Option<String>,

    /// Directory for persistent relay state
    #[arg(long, env = "CONFAB_STATE_DIR", value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Skip the allowlist and accept every user
    #[arg(long)]
    allow_all: bool,

    /// User id the console session runs as
    #[arg(short = 'u', long, default_value_t = 1)]
    user: i64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CONFAB_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("confab_daemon={level},confab_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Print transport traffic as it happens
fn spawn_event_printer(mut events: mpsc::Receiver<ChatEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Sent {
                    handle,
                    text,
                    reply_to,
                    ..
                } => match reply_to {
                    Some(parent) => println!("\n[{handle} -> {parent}]\n{text}"),
                    None => println!("\n[{handle}]\n{text}"),
                },
                ChatEvent::Edited { handle, text, .. } => println!("\n[{handle} edit]\n{text}"),
                ChatEvent::Deleted { handle } => println!("\n[{handle} deleted]"),
            }
        }
    });
}

fn handle_command(
    relay: &Relay<OpenAiBackend, InProcessTransport>,
    user: UserId,
    chat: &ChatContext,
    command: &str,
) {
    let (name, rest) = match command.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "help" => {
            println!("/reset            abandon the current turn and clear history");
            println!("/memory           list stored memories");
            println!("/remember <text>  store a memory");
            println!("/forget <id...>   remove memories by id");
            println!("/quit             exit");
        }
        "reset" => {
            relay.reset(&chat.conversation);
            println!("Conversation reset.");
        }
        "memory" => match relay.memory().list(user, 50, 1) {
            Ok(records) if records.is_empty() => println!("No memories stored."),
            Ok(records) => {
                for record in records {
                    println!("#{} [{}] {}", record.id, record.importance, record.content);
                }
            }
            Err(e) => error!(error = %e, "listing memories failed"),
        },
        "remember" => {
            if rest.is_empty() {
                println!("Usage: /remember <text>");
                return;
            }
            match relay
                .memory()
                .remember(user, rest, 3, MemorySource::UserExplicit)
            {
                Ok(RememberOutcome::Added(id)) => println!("Remembered as #{id}."),
                Ok(RememberOutcome::Merged(id)) => println!("Matched existing memory #{id}."),
                Err(e) => error!(error = %e, "storing memory failed"),
            }
        }
        "forget" => {
            let ids: Vec<u64> = rest
                .split_whitespace()
                .filter_map(|s| s.parse().ok())
                .collect();
            if ids.is_empty() {
                println!("Usage: /forget <id> [id...]");
                return;
            }
            match relay.memory().forget_many(user, &ids) {
                Ok(report) => {
                    println!("Removed {:?}, missing {:?}", report.removed, report.missing);
                }
                Err(e) => error!(error = %e, "forgetting memories failed"),
            }
        }
        other => println!("Unknown command: /{other}"),
    }
}

/// Read console lines and drive turns until shutdown
async fn run_console(
    relay: Arc<Relay<OpenAiBackend, InProcessTransport>>,
    user: UserId,
    chat: ChatContext,
) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading console input")? else {
                    info!("Console input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Some(command) = line.strip_prefix('/') {
                    handle_command(&relay, user, &chat, command);
                    continue;
                }

                // Turns run as their own tasks so the console stays
                // responsive; /reset can abandon one mid-stream.
                let relay = Arc::clone(&relay);
                let request = TurnRequest::new(user, chat.clone(), line);
                tokio::spawn(async move {
                    if let Err(e) = relay.handle_turn(request).await {
                        error!(error = %e, "turn failed");
                    }
                });
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Confab Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match args.config.clone() {
        Some(path) => load_config_from_path(Some(path))?,
        None => load_config()?,
    };

    let mut overrides = ConfigOverrides::new();
    if let Some(url) = args.api_url.clone() {
        overrides = overrides.with_api_url(url);
    }
    if let Some(key) = args.api_key.clone() {
        overrides = overrides.with_api_key(key);
    }
    if let Some(model) = args.model.clone() {
        overrides = overrides.with_default_model(model);
    }
    if let Some(dir) = args.state_dir.clone() {
        overrides = overrides.with_state_dir(dir);
    }
    if args.allow_all {
        overrides = overrides.with_allow_all(true);
    }
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(source = %config.source(), model = %config.default_model, "configuration loaded");

    let api_url = config.api_url.clone();
    let backend = Arc::new(OpenAiBackend::new(&config.api_url, &config.api_key));
    if backend.health_check().await {
        info!(api_url = %api_url, "model backend reachable");
    } else {
        warn!(api_url = %api_url, "model backend health check failed, continuing anyway");
    }

    let (transport, events) = InProcessTransport::new_pair();
    let transport = Arc::new(transport);
    spawn_event_printer(events);

    let user = UserId(args.user);
    let chat = ChatContext::direct(user);

    let outreach_enabled = config.outreach_enabled;
    let default_model = config.default_model.clone();
    let relay = Arc::new(Relay::new(
        Arc::clone(&backend),
        Arc::clone(&transport),
        config,
    )?);

    if outreach_enabled {
        let planner = Arc::new(OutreachPlanner::new(
            Arc::clone(&backend),
            Arc::clone(&transport),
            default_model,
        ));
        OutreachPlanner::spawn_daily(planner, vec![chat.conversation.clone()]);
        info!("outreach planner started");
    }

    println!("Connected as user {user}. Type a message, or /help for commands.");
    run_console(relay, user, chat).await?;

    info!("Confab daemon stopped cleanly");
    Ok(())
}
