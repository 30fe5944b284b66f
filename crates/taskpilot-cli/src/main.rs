use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

use taskpilot::executor::{ScriptRunner, DEFAULT_INTERPRETER};
use taskpilot::providers::base::{Embedder, Provider};
use taskpilot::providers::configs::{
    OpenAiProviderConfig, OPENAI_BASE_URL, OPENAI_EMBEDDING_MODEL, OPENAI_MODEL,
};
use taskpilot::providers::openai::OpenAiProvider;
use taskpilot::store::chroma::{CHROMA_URL, DEFAULT_COLLECTION};
use taskpilot::store::splitter::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use taskpilot::store::{ChromaStore, DocumentStore, MemoryStore, TextSplitter};
use taskpilot::tasks::{TaskContext, TaskKind, DEFAULT_TOP_K};

mod commands;
mod prompt;
mod session;

use commands::ingest::run_ingest;
use commands::session::build_session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model to use
    #[arg(short, long, global = true, env = "OPENAI_MODEL", default_value = OPENAI_MODEL)]
    model: String,

    /// Base url of the OpenAI compatible API
    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = OPENAI_BASE_URL)]
    base_url: String,

    /// API key (can also be set via OPENAI_API_KEY environment variable)
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model used to embed documents and queries
    #[arg(long, global = true, env = "OPENAI_EMBEDDING_MODEL", default_value = OPENAI_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Chroma server holding the local documents
    #[arg(long, global = true, env = "CHROMA_URL", default_value = CHROMA_URL)]
    chroma_url: String,

    /// Chroma collection holding the local documents
    #[arg(long, global = true, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Use an empty in-process document store instead of Chroma
    #[arg(long, global = true)]
    memory_store: bool,

    /// Number of chunks retrieved per query
    #[arg(long, global = true, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Name of the session to record to, and resume from when it exists
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// Send a single message and exit
    #[arg(long, global = true)]
    message: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with the model
    Chat,
    /// Ask questions about the documents in the store
    Ask,
    /// Plan a trip with the help of tools
    Trip,
    /// Generate a document that is checked against your request
    Doc,
    /// Python coding assistant that runs the code it writes
    Code {
        /// Directory where output.py is written and run
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Interpreter used to run the generated code
        #[arg(long, default_value = DEFAULT_INTERPRETER)]
        interpreter: String,

        /// Seconds the generated code may run
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Split text files into chunks and add them to the store
    Ingest {
        /// Empty the store first
        #[arg(long)]
        reset: bool,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
        chunk_overlap: usize,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    let openai = Arc::new(create_provider(&cli)?);
    let store = create_store(&cli, openai.clone())?;

    let kind = match &cli.command {
        Command::Ingest {
            reset,
            chunk_size,
            chunk_overlap,
            files,
        } => {
            let splitter = TextSplitter::new(*chunk_size, *chunk_overlap);
            let total = run_ingest(store.as_ref(), files, &splitter, *reset).await?;
            println!("{}", style(format!("{} chunks stored", total)).bold());
            return Ok(());
        }
        Command::Chat => TaskKind::Chat,
        Command::Ask => TaskKind::Ask,
        Command::Trip => TaskKind::Trip,
        Command::Doc => TaskKind::Doc,
        Command::Code { .. } => TaskKind::Code,
    };

    let provider: Arc<dyn Provider> = openai;
    let mut context = TaskContext::new(provider)
        .with_store(store)
        .with_top_k(cli.top_k);
    if let Command::Code {
        workdir,
        interpreter,
        timeout,
    } = &cli.command
    {
        context = context
            .with_workdir(workdir.clone())
            .with_runner(ScriptRunner::new(interpreter.clone(), Duration::from_secs(*timeout)));
    }

    let interactive = cli.message.is_none();
    let mut session = build_session(kind, &context, cli.session.clone(), interactive)?;
    match &cli.message {
        Some(message) => session.headless_start(message).await?,
        None => session.start().await?,
    }
    Ok(())
}

fn create_provider(cli: &Cli) -> Result<OpenAiProvider> {
    let api_key = cli
        .api_key
        .clone()
        .context("API key must be provided via --api-key or OPENAI_API_KEY environment variable")?;

    let mut config = OpenAiProviderConfig::new(api_key);
    config.base_url = cli.base_url.clone();
    config.model = cli.model.clone();
    config.embedding_model = cli.embedding_model.clone();
    OpenAiProvider::new(config)
}

fn create_store(cli: &Cli, embedder: Arc<dyn Embedder>) -> Result<Arc<dyn DocumentStore>> {
    if cli.memory_store {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(ChromaStore::new(
        cli.chroma_url.clone(),
        cli.collection.clone(),
        embedder,
    )?))
}
