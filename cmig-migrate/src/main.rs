//! cmig - Case record migration tool
//!
//! Entity migration (`migrate`, `validate`, `rollback`, `cleanup`) and the
//! audio asset pipeline (`blob-manifest`, `blob-migrate`, `apply-urls`).
//! Run modes come from the environment so a re-run after a crash behaves
//! exactly like the original invocation.
//!
//! Exit codes: 0 success, 1 record failures or failed validation, 2 fatal
//! configuration problems.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cmig_common::artifact::read_json;
use cmig_common::config::Settings;
use cmig_migrate::blob::{
    apply_url_mappings, build_manifest, load_manifest, save_manifest, BlobMigrator,
    HttpObjectStore, LocalObjectStore, ObjectStore,
};
use cmig_migrate::db::{cases::load_case_targets_by_source, init_database_pool, profiles::SqliteProfileLookup};
use cmig_migrate::identity::{ActorCache, ActorResolver};
use cmig_migrate::models::{Phase, UrlMappingArtifact};
use cmig_migrate::rollback::{cleanup, rollback};
use cmig_migrate::source::{load_source_records, JsonExportSource};
use cmig_migrate::utils::RetryPolicy;
use cmig_migrate::{CheckpointStore, MigrationError, MigrationOrchestrator, OrchestratorOptions, Validator};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cmig")]
#[command(about = "Migrate historical case records and audio into the target store")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "CMIG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrate accounts, cases and analyses, then validate
    Migrate {
        /// Run a single phase (accounts, cases, analyses, validate)
        #[arg(long)]
        only: Option<Phase>,
    },
    /// Check the target store against the source export
    Validate,
    /// Delete migrated rows (requires CONFIRM_ROLLBACK=yes)
    Rollback,
    /// Wipe the target tables and local state (requires FORCE_CLEANUP=true)
    Cleanup,
    /// Enumerate the source bucket and write the asset manifest
    BlobManifest,
    /// Copy manifest assets to the target bucket
    BlobMigrate {
        /// Manifest index to start from, overriding saved progress
        #[arg(long)]
        resume_from: Option<usize>,
    },
    /// Point migrated cases at their copied audio
    ApplyUrls,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::from_environment(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("cmig: {e}");
            return ExitCode::from(2);
        }
    };
    cmig_common::logging::init(settings.verbose);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dry_run = settings.dry_run,
        database = %settings.database_path.display(),
        "cmig starting"
    );

    match run(cli.command, &settings).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<MigrationError>() {
        return e.exit_code();
    }
    match err.downcast_ref::<cmig_common::Error>() {
        Some(cmig_common::Error::Config(_)) => 2,
        _ => 1,
    }
}

fn status(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, settings: &Settings) -> Result<ExitCode> {
    match command {
        Command::Migrate { only } => migrate(settings, only).await,
        Command::Validate => validate(settings).await,
        Command::Rollback => {
            settings.require_operator()?;
            let pool = open_pool(settings).await?;
            let report = rollback(&pool, settings.confirm_rollback, settings.dry_run).await?;
            if !settings.dry_run {
                CheckpointStore::new(settings.checkpoint_path()).clear().await?;
            }
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Cleanup => {
            settings.require_operator()?;
            let pool = open_pool(settings).await?;
            let artifacts = [
                settings.checkpoint_path(),
                settings.report_path(),
                settings.manifest_path(),
                settings.blob_progress_path(),
                settings.url_mapping_path(),
            ];
            let report = cleanup(&pool, settings.force_cleanup, &artifacts).await?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::BlobManifest => blob_manifest(settings).await,
        Command::BlobMigrate { resume_from } => blob_migrate(settings, resume_from).await,
        Command::ApplyUrls => apply_urls(settings).await,
    }
}

async fn open_pool(settings: &Settings) -> Result<SqlitePool> {
    init_database_pool(&settings.database_path)
        .await
        .with_context(|| format!("Failed to open {}", settings.database_path.display()))
}

async fn migrate(settings: &Settings, only: Option<Phase>) -> Result<ExitCode> {
    let operator = settings.require_operator()?.to_string();
    let export = settings.require_source_export()?;

    let pool = open_pool(settings).await?;
    let source = load_source_records(&JsonExportSource::new(export)).await?;

    let resolver = ActorResolver::new(ActorCache::new(), Arc::new(SqliteProfileLookup::new(pool.clone())));
    let checkpoint_store = if settings.dry_run {
        CheckpointStore::memory_only(settings.checkpoint_path())
    } else {
        CheckpointStore::new(settings.checkpoint_path())
    };

    let mut orchestrator = MigrationOrchestrator::new(
        pool,
        OrchestratorOptions::from_settings(settings),
        source,
        resolver,
        checkpoint_store,
        operator,
    );
    let report = orchestrator.run(only).await?;

    info!(path = %settings.report_path().display(), "Migration report written");
    Ok(status(report.is_success()))
}

async fn validate(settings: &Settings) -> Result<ExitCode> {
    let export = settings.require_source_export()?;
    let pool = open_pool(settings).await?;
    let source = load_source_records(&JsonExportSource::new(export)).await?;

    let report = Validator::new(settings.sample_size)
        .validate(&pool, &source.records)
        .await?;
    print_json(&report)?;
    Ok(status(report.passed()))
}

/// Legacy bucket: a local mirror when configured, otherwise the storage API
fn source_store(settings: &Settings) -> Result<Arc<dyn ObjectStore>> {
    let storage = &settings.storage;
    match &storage.source_bucket_dir {
        Some(dir) => Ok(Arc::new(LocalObjectStore::new(storage.source_bucket.clone(), dir.clone()))),
        None => http_store(settings, &storage.source_bucket),
    }
}

/// Target bucket: a local directory when configured, otherwise the storage API
fn target_store(settings: &Settings) -> Result<Arc<dyn ObjectStore>> {
    let storage = &settings.storage;
    match &storage.target_bucket_dir {
        Some(dir) => Ok(Arc::new(LocalObjectStore::new(storage.target_bucket.clone(), dir.clone()))),
        None => http_store(settings, &storage.target_bucket),
    }
}

fn http_store(settings: &Settings, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    let storage = &settings.storage;
    let url = storage.target_storage_url.clone().ok_or_else(|| {
        cmig_common::Error::Config(format!(
            "No directory or CMIG_TARGET_STORAGE_URL configured for bucket '{bucket}'"
        ))
    })?;
    let store = HttpObjectStore::new(
        url,
        bucket,
        storage.target_storage_token.clone(),
        storage.requests_per_second,
    )
    .map_err(MigrationError::from)?;
    Ok(Arc::new(store))
}

async fn blob_manifest(settings: &Settings) -> Result<ExitCode> {
    settings.require_operator()?;
    let pool = open_pool(settings).await?;
    let cases = load_case_targets_by_source(&pool).await?;
    let store = source_store(settings)?;

    let manifest = build_manifest(store.as_ref(), &settings.storage.source_prefixes, &cases)
        .await
        .map_err(MigrationError::from)?;
    save_manifest(&settings.manifest_path(), &manifest).await?;

    info!(
        path = %settings.manifest_path().display(),
        files = manifest.total_files,
        "Manifest saved"
    );
    Ok(ExitCode::SUCCESS)
}

async fn blob_migrate(settings: &Settings, resume_from: Option<usize>) -> Result<ExitCode> {
    settings.require_operator()?;
    let manifest = load_manifest(&settings.manifest_path()).await?.ok_or_else(|| {
        cmig_common::Error::Config(format!(
            "No manifest at {}; run blob-manifest first",
            settings.manifest_path().display()
        ))
    })?;

    let migrator = BlobMigrator::new(
        source_store(settings)?,
        target_store(settings)?,
        RetryPolicy::from_settings(settings),
        settings.blob_progress_path(),
        settings.url_mapping_path(),
    )
    .with_dry_run(settings.dry_run);

    let progress = migrator
        .migrate_all(&manifest, settings.audio_concurrency, resume_from)
        .await?;
    Ok(status(progress.failed_files.is_empty()))
}

async fn apply_urls(settings: &Settings) -> Result<ExitCode> {
    settings.require_operator()?;
    let artifact: UrlMappingArtifact = read_json(&settings.url_mapping_path()).await?.ok_or_else(|| {
        cmig_common::Error::Config(format!(
            "No url mappings at {}; run blob-migrate first",
            settings.url_mapping_path().display()
        ))
    })?;

    let pool = open_pool(settings).await?;
    let target_base = target_store(settings)?.uri_for("");
    let summary = apply_url_mappings(
        &pool,
        &artifact,
        &target_base,
        &RetryPolicy::from_settings(settings),
        settings.dry_run,
    )
    .await?;

    print_json(&summary)?;
    Ok(status(summary.failed == 0))
}
