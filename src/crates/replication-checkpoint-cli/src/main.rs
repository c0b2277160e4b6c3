//! # replcheck
//!
//! Command-line tool for writing, reading and inspecting replication
//! checkpoints kept in directory-backed document stores.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use replication_checkpoint::{
    reconcile, CheckpointDocument, CheckpointId, Checkpointer, CheckpointerOptions,
    FileDocumentStore, Reconciliation, Seq, SessionId, WriteResult,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "replcheck")]
#[command(about = "Inspect and maintain replication checkpoints", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (falls back to RUST_LOG, then "warn")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Source/target store pair shared by `write` and `get`
#[derive(Args)]
struct StoreArgs {
    /// Directory of the source document store
    #[arg(long)]
    source: PathBuf,

    /// Directory of the target document store
    #[arg(long)]
    target: PathBuf,

    /// Replication id (the `_local/` prefix is added)
    #[arg(long)]
    id: String,

    /// TOML file with checkpointer options
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a checkpoint on both stores
    Write {
        #[command(flatten)]
        stores: StoreArgs,

        /// Sequence reached by the replication
        #[arg(long)]
        seq: Seq,

        /// Session id (a random one is generated when omitted)
        #[arg(long)]
        session: Option<String>,
    },

    /// Print the sequence a replication should resume from
    Get {
        #[command(flatten)]
        stores: StoreArgs,
    },

    /// Reconcile two checkpoint document files
    Reconcile {
        /// Source checkpoint document (a missing file counts as absent)
        source: PathBuf,

        /// Target checkpoint document (a missing file counts as absent)
        target: PathBuf,
    },

    /// Show the contents of a checkpoint document file
    Inspect {
        /// Checkpoint document
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging on stderr so stdout stays parseable
    let filter = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Write {
            stores,
            seq,
            session,
        } => {
            let session = session.map(SessionId::new).unwrap_or_else(SessionId::generate);
            let mut checkpointer = open_checkpointer(&stores).await?;
            info!("Writing checkpoint {} for session {}", seq, session);

            let result = checkpointer
                .write_checkpoint(seq, &session)
                .await
                .context("failed to write checkpoint")?;
            println!("{}", describe_write(&result));
        }
        Commands::Get { stores } => {
            let mut checkpointer = open_checkpointer(&stores).await?;
            let reconciliation = checkpointer
                .reconcile_checkpoint()
                .await
                .context("failed to read checkpoint")?;
            print!("{}", describe_reconciliation(&reconciliation));
        }
        Commands::Reconcile { source, target } => {
            let source = read_document(&source).await?;
            let target = read_document(&target).await?;
            let reconciliation = reconcile(source.as_ref(), target.as_ref());
            print!("{}", describe_reconciliation(&reconciliation));
        }
        Commands::Inspect { file } => {
            let doc = read_document(&file)
                .await?
                .with_context(|| format!("{} does not exist", file.display()))?;
            print!("{}", describe_document(&doc));
        }
    }

    Ok(())
}

async fn open_checkpointer(stores: &StoreArgs) -> Result<Checkpointer> {
    let options = match &stores.config {
        Some(path) => CheckpointerOptions::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CheckpointerOptions::default(),
    };
    debug!("Checkpointer options: {:?}", options);

    let source = FileDocumentStore::open(&stores.source)
        .await
        .with_context(|| format!("failed to open {}", stores.source.display()))?;
    let target = FileDocumentStore::open(&stores.target)
        .await
        .with_context(|| format!("failed to open {}", stores.target.display()))?;
    let id = CheckpointId::new(stores.id.as_str())?;

    Ok(Checkpointer::new(
        Arc::new(source),
        Arc::new(target),
        id,
        serde_json::Value::Null,
        options,
    ))
}

/// Read a document file, `None` when it does not exist
async fn read_document(path: &Path) -> Result<Option<CheckpointDocument>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let doc = serde_json::from_slice(&bytes)
                .with_context(|| format!("{} is not a checkpoint document", path.display()))?;
            Ok(Some(doc))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn describe_write(result: &WriteResult) -> String {
    match result {
        WriteResult::Written(response) => format!("written {} rev {}", response.id, response.rev),
        WriteResult::Unchanged => "unchanged".to_string(),
        WriteResult::NothingWritten => "nothing written (checkpoints disabled)".to_string(),
        WriteResult::Cancelled => "cancelled".to_string(),
    }
}

fn describe_reconciliation(reconciliation: &Reconciliation) -> String {
    format!(
        "since: {}\nbasis: {}\n",
        reconciliation.seq, reconciliation.basis
    )
}

fn describe_document(doc: &CheckpointDocument) -> String {
    let mut out = format!("id: {}\n", doc.id);
    if let Some(rev) = &doc.rev {
        out.push_str(&format!("rev: {}\n", rev));
    }
    if let Some(session) = &doc.session_id {
        out.push_str(&format!("session: {}\n", session));
    }
    out.push_str(&format!("last_seq: {}\n", doc.current_seq()));
    match doc.version {
        Some(version) => out.push_str(&format!("version: {}\n", version)),
        None => out.push_str("version: legacy\n"),
    }
    out.push_str(&format!("history: {} entries\n", doc.history.len()));
    for entry in &doc.history {
        out.push_str(&format!("  {} @ {}\n", entry.session_id, entry.last_seq));
    }
    out
}
