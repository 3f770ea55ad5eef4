//! # quill
//!
//! Interactive co-writing REPL. Wires settings, telemetry, storage, the
//! completion client, and a `WritingSession` together.

#![deny(unsafe_code)]

mod repl;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use quill_core::persona::PersonaContext;
use quill_core::provider::{CompletionClient, CompletionOptions};
use quill_engine::{FoldPolicy, WritingSession};
use quill_llm::{ChatCompletionsClient, ClientConfig, LlmSummarizer};
use quill_settings::{QuillSettings, StorageBackend};
use quill_store::{ConversationStore, JsonFileStore, SqliteStore};
use quill_telemetry::TelemetryConfig;

/// Co-write a story with a language model.
#[derive(Parser, Debug)]
#[command(name = "quill", about = "Interactive co-writing assistant")]
struct Cli {
    /// Session to open or create.
    #[arg(long, default_value = "default")]
    session: String,

    /// Settings file (defaults to `~/.quill/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// File with the world background.
    #[arg(long)]
    background: Option<PathBuf>,

    /// File describing the protagonist.
    #[arg(long)]
    protagonist: Option<PathBuf>,

    /// Start a fresh conversation instead of resuming.
    #[arg(long)]
    new: bool,

    /// With `--new`, fold the old conversation and carry its summary over.
    #[arg(long, requires = "new")]
    carry_over: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => quill_settings::load_settings_from_path(path),
        None => quill_settings::load_settings(),
    }
    .context("Failed to load settings")?;

    let telemetry = TelemetryConfig::from_level_name(&settings.logging.level, settings.logging.json);
    // A subscriber may already be installed when embedded; keep going.
    let _ = quill_telemetry::init_telemetry(&telemetry);

    if !settings.api.is_configured() {
        tracing::warn!("endpoint or API key missing; replies will fail until configured");
    }

    let persona = PersonaContext::new(
        read_optional(cli.background.as_deref())?,
        read_optional(cli.protagonist.as_deref())?,
    );

    let store = open_store(&settings)?;
    let client: Arc<dyn CompletionClient> = Arc::new(build_client(&settings)?);
    let summarizer = Arc::new(LlmSummarizer::new(
        client.clone(),
        CompletionOptions {
            temperature: settings.summary.temperature,
            max_tokens: settings.summary.max_tokens,
        },
    ));

    let session = WritingSession::open(
        &cli.session,
        store.clone(),
        client.clone(),
        summarizer,
        FoldPolicy {
            max_turns: settings.context.max_history_turns,
            keep_count: settings.context.fold_keep_count,
        },
        CompletionOptions {
            temperature: settings.api.temperature,
            max_tokens: settings.api.max_tokens,
        },
    )
    .with_context(|| format!("Failed to open session {:?}", cli.session))?;

    if cli.new {
        session
            .start_new_conversation(cli.carry_over)
            .await
            .context("Failed to start a new conversation")?;
    }

    tracing::info!(session = %cli.session, client = client.name(), model = client.model(), "quill ready");
    repl::run(&session, store.as_ref(), &persona).await
}

fn build_client(settings: &QuillSettings) -> Result<ChatCompletionsClient> {
    let config = ClientConfig::new(
        settings.api.endpoint.clone(),
        settings.api.api_key.clone(),
        settings.api.model.clone(),
    )
    .with_timeouts(
        Duration::from_secs(settings.api.connect_timeout_secs),
        Duration::from_secs(settings.api.idle_timeout_secs),
    );
    ChatCompletionsClient::new(config).context("Failed to build completion client")
}

fn open_store(settings: &QuillSettings) -> Result<Arc<dyn ConversationStore>> {
    let data_dir = PathBuf::from(&settings.storage.data_dir);
    Ok(match settings.storage.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::new(&data_dir)),
        StorageBackend::Sqlite => {
            let path = data_dir.join("quill.db");
            Arc::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("Failed to open database: {}", path.display()))?,
            )
        }
    })
}

fn read_optional(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(String::new()),
    }
}
