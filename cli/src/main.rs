use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use formdraft::error::EntryError;
use formdraft::gc::cleanup_area;
use formdraft::keys::{STORAGE_KEY_PREFIX, is_draft_storage_key, storage_key};
use formdraft::record::{decode_entry, entry_updated_at};
use formdraft::{Clock, DraftConfig, MemoryStorage, StorageArea, SystemClock};
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to access dump file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("no stored entry for draft key `{0}`")]
    NotFound(String),
    #[error("entry `{key}` rejected: {source}")]
    Rejected { key: String, source: EntryError },
    #[error("storage error: {0}")]
    Storage(#[from] formdraft::StorageError),
}

#[derive(Parser, Debug)]
#[command(name = "formdraft", about = "Inspect and clean exported draft storage")]
struct Cli {
    /// Exported storage area: a JSON object mapping storage keys to values.
    #[arg(long, env = "FORMDRAFT_DUMP")]
    dump: PathBuf,

    /// Evaluate expiry at this epoch-ms instead of the wall clock.
    #[arg(long)]
    now: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One line per draft entry with its validity.
    List,
    /// Pretty-print a valid draft.
    Show { draft_key: String },
    /// Remove expired and undated entries.
    Gc {
        /// Write the cleaned storage back to the dump file.
        #[arg(long)]
        write: bool,
    },
}

struct CliContext {
    dump: PathBuf,
    now_ms: i64,
    config: DraftConfig,
    storage: MemoryStorage,
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    let raw = fs::read_to_string(&cli.dump)?;
    let items: BTreeMap<String, String> = serde_json::from_str(&raw)?;
    let ctx = CliContext {
        dump: cli.dump,
        now_ms: cli.now.unwrap_or_else(|| SystemClock.now_ms()),
        config: DraftConfig::from_env(),
        storage: MemoryStorage::from_items(items),
    };

    match cli.command {
        Command::List => run_list(&ctx),
        Command::Show { draft_key } => run_show(&ctx, &draft_key),
        Command::Gc { write } => run_gc(&ctx, write),
    }
}

fn entry_status(err: Option<&EntryError>) -> &'static str {
    match err {
        None => "valid",
        Some(EntryError::Expired { .. }) => "expired",
        Some(EntryError::SchemaMismatch { .. }) => "schema-mismatch",
        Some(_) => "corrupt",
    }
}

fn run_list(ctx: &CliContext) -> Result<(), CliError> {
    for (key, raw) in ctx.storage.items() {
        if !is_draft_storage_key(&key) {
            continue;
        }
        let draft_key = &key[STORAGE_KEY_PREFIX.len()..];
        let decoded = decode_entry(&raw, Some(draft_key), ctx.now_ms, ctx.config.ttl_ms);
        let status = entry_status(decoded.as_ref().err());
        let updated = entry_updated_at(&raw).map_or_else(|| "-".to_owned(), |at| at.to_string());
        let fields = decoded.map_or_else(|_| "-".to_owned(), |d| d.fields.len().to_string());
        println!("{status:<16} {draft_key}  updated={updated} fields={fields}");
    }
    Ok(())
}

fn run_show(ctx: &CliContext, draft_key: &str) -> Result<(), CliError> {
    let Some(raw) = ctx.storage.get_item(&storage_key(draft_key))? else {
        return Err(CliError::NotFound(draft_key.to_owned()));
    };
    let draft =
        decode_entry(&raw, Some(draft_key), ctx.now_ms, ctx.config.ttl_ms).map_err(|source| CliError::Rejected {
            key: draft_key.to_owned(),
            source,
        })?;
    println!("{}", serde_json::to_string_pretty(&draft)?);
    Ok(())
}

fn run_gc(ctx: &CliContext, write: bool) -> Result<(), CliError> {
    let removed = cleanup_area(&ctx.storage, ctx.now_ms, ctx.config.ttl_ms);
    println!("removed {removed} draft entries");
    if write {
        let rendered = serde_json::to_string_pretty(&ctx.storage.items())?;
        fs::write(&ctx.dump, rendered)?;
        info!(path = %ctx.dump.display(), removed, "cleaned storage written back");
    }
    Ok(())
}
