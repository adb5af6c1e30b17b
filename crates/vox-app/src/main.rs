//! Vox application binary - composition root.
//!
//! Ties the workspace crates into a single executable:
//! 1. Load configuration from TOML (CLI flags take precedence)
//! 2. Open the memory store (SQLite turn log + similarity index)
//! 3. Populate the action registry before the session starts
//! 4. Connect the OpenAI-compatible model endpoint
//! 5. Run a line-oriented turn loop over stdin
//!
//! The surrounding voice layer (wake word, speech-to-text, synthesis) is
//! external: this loop stands in for it by reading finalized transcripts
//! from stdin and printing the text that would be synthesized.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use vox_action::ActionRegistry;
use vox_chat::{ConversationOrchestrator, HttpModelService, SessionContext};
use vox_core::config::VoxConfig;
use vox_memory::{Database, HashEmbedding, MemoryStore};

mod cli;
use cli::CliArgs;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config_path = args.resolve_config_path();
    let mut config = VoxConfig::load_or_default(&config_path);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    if args.no_actions {
        config.actions.enabled = false;
    }

    init_tracing(&config.general.log_level);

    if let Err(e) = run(args, config).await {
        eprintln!("vox: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: CliArgs, config: VoxConfig) -> Result<(), String> {
    let db_path = expand_home(&config.general.data_dir).join("vox.db");
    let db = Arc::new(Database::new(&db_path).map_err(|e| e.to_string())?);
    let store = Arc::new(
        MemoryStore::new(db, Arc::new(HashEmbedding::new()), &config.memory)
            .map_err(|e| e.to_string())?,
    );

    // The registry is populated here, before the session starts, and is
    // immutable afterwards.
    let mut registry = ActionRegistry::new();
    registry
        .register_defaults(&config.actions)
        .map_err(|e| e.to_string())?;
    let registry = Arc::new(registry);

    let model = Arc::new(HttpModelService::new(&config.model).map_err(|e| e.to_string())?);
    info!(
        endpoint = %config.model.base_url,
        model = %config.model.model,
        actions = registry.len(),
        "Vox core ready"
    );

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        Arc::clone(&store),
        registry,
        model,
        &config,
    ));

    let mut session = match args.session {
        Some(id) => SessionContext::with_id(id, config.session.short_term_turns),
        None => SessionContext::new(config.session.short_term_turns),
    };
    info!(session = %session.session_id, "Session started");

    // Background durability: flush on the configured interval.
    let flush_store = Arc::clone(&store);
    let flush_interval = std::time::Duration::from_secs(config.memory.flush_interval_secs.max(1));
    let flusher = tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            if let Err(e) = flush_store.flush() {
                warn!(error = %e, "Periodic flush failed");
            }
        }
    });

    println!("Vox is online and ready. Type a transcript, or 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read input");
                break;
            }
        };

        let transcript = line.trim();
        if transcript.is_empty() {
            continue;
        }
        if transcript == "exit" || transcript == "quit" {
            break;
        }

        match orchestrator.take_turn(&mut session, transcript).await {
            Ok(outcome) => {
                println!("vox> {}", outcome.response);
                if let Some(record) = outcome.action {
                    info!(
                        action = %record.action_name,
                        status = %record.status,
                        "Action dispatched"
                    );
                }
            }
            Err(e) => println!("vox> ({})", e),
        }
    }

    flusher.abort();
    orchestrator
        .end_session(&session)
        .await
        .map_err(|e| e.to_string())?;
    let persisted = store
        .session_len(session.session_id)
        .map_err(|e| e.to_string())?;
    info!(session = %session.session_id, turns = persisted, "Goodbye");
    println!("Goodbye.");

    Ok(())
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
        #[cfg(target_os = "windows")]
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
