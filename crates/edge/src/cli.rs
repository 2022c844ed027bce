// crates/edge/src/cli.rs

use crate::{db::SqliteExec, Error};
use adapt::merge::OnConflict;
use adapt::sql::SqlObjBackend;
use adapt::storage::{BulkUpsertArgs, CleanupArgs, ObjStorage, ProgressHook, ReadArgs};
use chrono::{DateTime, Utc};
use clap::{builder::ValueHint, Args, Parser, Subcommand};
use domain::JsonMap;
use domain::setting::Settings;
use serde_json::json;
use serve::{AppConfigCache, IndexingPipeline, ObjStore, StaticAppConfig};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub type Result<T> = std::result::Result<T, Error>;

pub const SETTINGS_FILE: &str = "settings.toml";
pub const WATERMARK_FILE: &str = ".index-watermark";

/// objstore CLI: maintenance jobs over a store directory
#[tokio::main(flavor = "multi_thread")]
#[tracing::instrument(skip_all)]
pub async fn start() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Index(cmd) => do_index(cmd).await,
        Commands::Cleanup(cmd) => do_cleanup(cmd).await,
        Commands::Query(cmd) => do_query(cmd).await,
        Commands::Import(cmd) => do_import(cmd).await,
    };

    result.map_or_else(
        |e| {
            error!("objstore failed: {}", e);
            ExitCode::FAILURE
        },
        |_| ExitCode::SUCCESS,
    )
}

#[derive(Parser, Debug)]
#[command(name = "objstore", version, about = "Schemaless object store maintenance tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index field metadata for objects written since the last pass
    Index(IndexCmd),
    /// Purge soft-deleted objects
    Cleanup(CleanupCmd),
    /// Run a read query (ReadArgs JSON) and print the result
    Query(QueryCmd),
    /// Bulk upsert a JSON array of records
    Import(ImportCmd),
}

#[derive(Args, Debug)]
pub struct StoreDir {
    /// Store directory holding settings.toml (or set OBJSTORE_DIR)
    #[arg(
        value_name = "DIR",
        env = "OBJSTORE_DIR",
        required = true,
        value_hint = ValueHint::DirPath,
        value_parser = dir_must_exist
    )]
    pub dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct IndexCmd {
    #[command(flatten)]
    pub store: StoreDir,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct CleanupCmd {
    #[command(flatten)]
    pub store: StoreDir,

    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct QueryCmd {
    #[command(flatten)]
    pub store: StoreDir,

    /// ReadArgs JSON file, or `-` for stdin
    #[arg(long, value_name = "FILE|-")]
    pub query: String,
}

#[derive(Args, Debug)]
pub struct ImportCmd {
    #[command(flatten)]
    pub store: StoreDir,

    /// JSON array of records
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    #[arg(long)]
    pub app: String,

    #[arg(long)]
    pub group: String,

    #[arg(long)]
    pub tag: String,

    /// Dotted objRecord path identifying an existing record (repeatable)
    #[arg(long = "conflict-key")]
    pub conflict_keys: Vec<String>,

    #[arg(long, default_value = "mergeButReplaceArrays")]
    pub on_conflict: OnConflict,

    #[arg(long, default_value = "objstore-cli")]
    pub by: String,

    #[arg(long, default_value = "system")]
    pub by_type: String,
}

fn dir_must_exist(s: &str) -> std::result::Result<PathBuf, String> {
    let p = PathBuf::from(s);
    if !p.exists() {
        return Err(format!("Not found: {}", p.display()));
    }
    if !p.is_dir() {
        return Err(format!("Not a directory: {}", p.display()));
    }
    Ok(p)
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

pub fn load_settings(dir: &Path) -> Result<Settings> {
    let path = dir.join(SETTINGS_FILE);
    if !path.exists() {
        return Err(Error::Config(format!(
            "{SETTINGS_FILE} not found at {}",
            path.display()
        )));
    }

    let text = std::fs::read_to_string(&path)?;
    let mut settings: Settings = toml::from_str(&text)?;
    settings.store.url = resolve_store_url(dir, &settings.store.url);
    Ok(settings)
}

/// Relative SQLite file paths are taken relative to the store directory.
pub fn resolve_store_url(dir: &Path, url: &str) -> String {
    let Some(rest) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return url.to_string();
    };
    let (file, params) = rest.split_once('?').map_or((rest, None), |(f, p)| (f, Some(p)));
    if file.is_empty() || file.starts_with(':') || Path::new(file).is_absolute() {
        return url.to_string();
    }

    let joined = format!("sqlite://{}", dir.join(file).display());
    match params {
        Some(p) => format!("{joined}?{p}"),
        None => joined,
    }
}

async fn open_backend(settings: &Settings) -> Result<SqlObjBackend<SqliteExec>> {
    let exec = SqliteExec::connect(&settings.store).await?;
    let backend = SqlObjBackend::new(exec);
    backend.ensure_schema().await?;
    Ok(backend)
}

fn progress(job: &'static str) -> ProgressHook {
    ProgressHook::new(move |p| info!(job, processed = p.processed, total = ?p.total, "progress"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Watermark
// ─────────────────────────────────────────────────────────────────────────────

pub fn read_watermark(dir: &Path) -> Result<Option<DateTime<Utc>>> {
    let path = dir.join(WATERMARK_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    let at = DateTime::parse_from_rfc3339(text.trim()).map_err(|err| {
        Error::Config(format!("Invalid watermark at {}: {}", path.display(), err))
    })?;
    Ok(Some(at.with_timezone(&Utc)))
}

pub fn write_watermark(dir: &Path, at: DateTime<Utc>) -> Result<()> {
    std::fs::write(dir.join(WATERMARK_FILE), at.to_rfc3339())?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip_all)]
async fn do_index(cmd: IndexCmd) -> Result<()> {
    let dir = cmd.store.dir;
    let settings = load_settings(&dir)?;
    let backend = open_backend(&settings).await?;

    let apps = AppConfigCache::new(
        StaticAppConfig::new(settings.apps.clone()),
        settings.indexing.app_cache_capacity,
    );
    let pipeline = IndexingPipeline::new(backend, apps, settings.indexing.batch_size);
    let interval = Duration::from_secs(settings.indexing.interval_secs.max(1));

    loop {
        let last = read_watermark(&dir)?;
        debug!(?last, "starting indexing pass");
        let report = pipeline.index_objs(last).await?;
        write_watermark(&dir, report.watermark)?;
        println!("{}", serde_json::to_string(&report)?);

        if cmd.once {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; stopping indexer");
                return Ok(());
            }
        }
    }
}

#[tracing::instrument(skip_all)]
async fn do_cleanup(cmd: CleanupCmd) -> Result<()> {
    let settings = load_settings(&cmd.store.dir)?;
    let store = ObjStore::new(open_backend(&settings).await?, settings.bulk.clone());

    let result = store
        .cleanup_deleted_objs(CleanupArgs {
            batch_size: cmd.batch_size,
            on_progress: Some(progress("cleanup")),
        })
        .await?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

#[tracing::instrument(skip_all)]
async fn do_query(cmd: QueryCmd) -> Result<()> {
    let settings = load_settings(&cmd.store.dir)?;
    let text = if cmd.query == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&cmd.query)?
    };
    let args: ReadArgs = serde_json::from_str(&text)?;

    let store = ObjStore::new(open_backend(&settings).await?, settings.bulk.clone());
    let result = store.read(args).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tracing::instrument(skip_all, fields(app = %cmd.app, tag = %cmd.tag))]
async fn do_import(cmd: ImportCmd) -> Result<()> {
    let settings = load_settings(&cmd.store.dir)?;
    let items: Vec<JsonMap> = serde_json::from_str(&std::fs::read_to_string(&cmd.file)?)?;
    if items.is_empty() {
        warn!(file = %cmd.file.display(), "nothing to import");
    }

    let store = ObjStore::new(open_backend(&settings).await?, settings.bulk.clone());
    let result = store
        .bulk_upsert(BulkUpsertArgs {
            items,
            conflict_on_keys: cmd.conflict_keys,
            on_conflict: cmd.on_conflict,
            tag: cmd.tag,
            app_id: cmd.app,
            group_id: cmd.group,
            created_by: cmd.by,
            created_by_type: cmd.by_type,
            should_index: None,
            fields_to_index: None,
            batch_size: None,
            on_progress: Some(progress("import")),
        })
        .await?;

    let summary = json!({
        "new": result.new_objs.len(),
        "updated": result.updated_objs.len(),
        "ignored": result.ignored_items.len(),
        "failed": result.failed_items.len(),
        "totalProcessed": result.total_processed,
    });
    println!("{summary}");
    Ok(())
}
