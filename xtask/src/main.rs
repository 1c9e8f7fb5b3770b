use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use comet_core::backend::EmbeddedBackend;
use comet_core::llm::LlmDriver;
use comet_core::state::{MessageStatus, SessionStore};
use comet_core::store::JsonFilePersistence;
use comet_core::telemetry;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Comet")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one mock generation end to end and reload the saved session.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn open_store(temp_dir: &TempDir) -> SessionStore {
    SessionStore::new(
        Arc::new(EmbeddedBackend::new(LlmDriver::fake())),
        Arc::new(JsonFilePersistence::new(temp_dir.path().join("sessions.json"))),
    )
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir);

    let message_id = runtime
        .block_on(store.send_message("ping from xtask"))
        .context("prompt was rejected")?;
    let message = store.message(message_id).context("reply missing")?;
    ensure!(
        message.status == MessageStatus::Finalized,
        "reply ended as {:?}: {}",
        message.status,
        message.content
    );

    let reloaded = open_store(&temp_dir);
    let session = reloaded
        .current_session()
        .context("session was not persisted")?;
    ensure!(session.messages.len() == 2, "expected two persisted messages");
    info!(
        "messages" = session.messages.len(),
        "reply" = %message.content,
        "smoke test session saved and reloaded"
    );
    Ok(())
}
