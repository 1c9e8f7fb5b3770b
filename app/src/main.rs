use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comet_core::backend::{EmbeddedBackend, GenerationBackend, HttpBackend};
use comet_core::config::AiRuntimeSettings;
use comet_core::llm::{LlmDriver, ProviderKind};
use comet_core::state::{MessageStatus, SessionStore, StoreEvent};
use comet_core::store::{JsonFilePersistence, MemoryPersistence, SessionPersistence};
use comet_core::sync::{build_file_tree, FileTreeNode};
use comet_core::telemetry;
use comet_core::templates::{find_template, TEMPLATES};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(name = "comet", version, about = "Streaming chat relay and terminal client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the streaming relay over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
    },
    /// Send one prompt and print the reply as it streams.
    Ask {
        prompt: String,
        /// Relay base URL. Without it the model is called in-process.
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        provider: Option<ProviderKind>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Session file; defaults to the platform data directory.
        #[arg(long)]
        sessions: Option<PathBuf>,
        /// Start a new session from a project template first.
        #[arg(long)]
        template: Option<String>,
    },
    /// List the project templates.
    Templates,
}

fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::default_filter())?;
    let cli = Cli::parse();
    let runtime = Runtime::new()?;

    match cli.command {
        Command::Serve { addr } => {
            let driver = LlmDriver::from_settings(&AiRuntimeSettings::load_or_default());
            runtime.block_on(comet::serve(addr, driver))
        }
        Command::Ask {
            prompt,
            server,
            provider,
            model,
            temperature,
            sessions,
            template,
        } => runtime.block_on(ask(AskArgs {
            prompt,
            server,
            provider,
            model,
            temperature,
            sessions,
            template,
        })),
        Command::Templates => {
            list_templates();
            Ok(())
        }
    }
}

struct AskArgs {
    prompt: String,
    server: Option<String>,
    provider: Option<ProviderKind>,
    model: Option<String>,
    temperature: Option<f32>,
    sessions: Option<PathBuf>,
    template: Option<String>,
}

async fn ask(args: AskArgs) -> Result<()> {
    if args.prompt.trim().is_empty() {
        anyhow::bail!("prompt must not be empty");
    }
    let backend: Arc<dyn GenerationBackend> = match &args.server {
        Some(url) => Arc::new(
            HttpBackend::new(url).with_context(|| format!("invalid relay url `{url}`"))?,
        ),
        None => {
            let settings = AiRuntimeSettings::load_or_default();
            Arc::new(EmbeddedBackend::new(LlmDriver::from_settings(&settings)))
        }
    };
    let persistence: Arc<dyn SessionPersistence> = match args
        .sessions
        .map(JsonFilePersistence::new)
        .or_else(JsonFilePersistence::in_data_dir)
    {
        Some(file) => {
            tracing::debug!(path = %file.path().display(), "using session file");
            Arc::new(file)
        }
        None => Arc::new(MemoryPersistence::default()),
    };

    let store = SessionStore::new(backend, persistence);
    if args.provider.is_some() {
        store.set_provider(args.provider);
    }
    if args.model.is_some() {
        store.set_model(args.model);
    }
    if args.temperature.is_some() {
        store.set_temperature(args.temperature);
    }
    if let Some(key) = &args.template {
        let template =
            find_template(key).with_context(|| format!("unknown template `{key}`"))?;
        store.create_session_from_template(key, template);
    }

    let printer = spawn_printer(store.clone());
    let sent = tokio::select! {
        sent = store.send_message(&args.prompt) => sent,
        _ = tokio::signal::ctrl_c() => {
            store.stop_streaming();
            None
        }
    };
    if sent.is_some() {
        let _ = printer.await;
    } else {
        printer.abort();
    }
    println!();

    let Some(message) = store
        .current_session()
        .and_then(|session| session.messages.last().cloned())
    else {
        return Ok(());
    };
    if sent.is_some() && message.status == MessageStatus::Errored {
        anyhow::bail!("{}", message.content);
    }
    for block in message.code_blocks.unwrap_or_default() {
        let name = block.component_name.as_deref().unwrap_or("anonymous");
        if block.is_component {
            eprintln!("[{}] component {name} ({} bytes)", block.language, block.code.len());
        } else {
            eprintln!("[{}] snippet ({} bytes)", block.language, block.code.len());
        }
    }
    Ok(())
}

/// Echo streamed text as it lands, until the stream finishes.
fn spawn_printer(store: SessionStore) -> tokio::task::JoinHandle<()> {
    let mut events = store.subscribe();
    tokio::spawn(async move {
        let mut printed = 0;
        loop {
            match events.recv().await {
                Ok(StoreEvent::MessageUpdated { message_id }) => {
                    let Some(message) = store.message(message_id) else {
                        continue;
                    };
                    if message.content.len() > printed {
                        print!("{}", &message.content[printed..]);
                        std::io::stdout().flush().ok();
                        printed = message.content.len();
                    }
                }
                Ok(StoreEvent::StreamFinished { .. }) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    })
}

fn list_templates() {
    for template in TEMPLATES {
        println!("{} - {} ({})", template.key, template.name, template.description);
        let files = template.project_files();
        print_tree(&build_file_tree(files.files.keys()), 1);
    }
}

fn print_tree(nodes: &[FileTreeNode], depth: usize) {
    for node in nodes {
        let indent = "  ".repeat(depth);
        match node {
            FileTreeNode::Folder { name, children, .. } => {
                println!("{indent}{name}/");
                print_tree(children, depth + 1);
            }
            FileTreeNode::File { name, .. } => println!("{indent}{name}"),
        }
    }
}
