//! Configuration loading
//!
//! Settings are resolved in three tiers, lowest priority first:
//! 1. Compiled defaults
//! 2. TOML config file (`--config`, `CMIG_CONFIG`, or `<config dir>/cmig/config.toml`)
//! 3. Environment variables (`DRY_RUN`, `BATCH_SIZE`, ...)
//!
//! Run modes are environment-gated on purpose: the same binary invocation is
//! re-run after a crash, and the environment carries the mode across restarts.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_AUDIO_CONCURRENCY: usize = 5;
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// Optional values read from the TOML config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database: Option<PathBuf>,
    pub source_export: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub operator: Option<String>,
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub audio_concurrency: Option<usize>,
    pub sample_size: Option<usize>,
    pub storage: TomlStorageConfig,
}

/// `[storage]` table of the TOML config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlStorageConfig {
    pub source_bucket: Option<String>,
    pub source_bucket_dir: Option<PathBuf>,
    pub source_prefixes: Option<Vec<String>>,
    pub target_bucket: Option<String>,
    pub target_bucket_dir: Option<PathBuf>,
    pub target_storage_url: Option<String>,
    pub target_storage_token: Option<String>,
    pub requests_per_second: Option<u32>,
}

/// Object storage settings for the blob subsystem
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Name recorded in the manifest's `bucket` field
    pub source_bucket: String,
    /// Local mirror of the source bucket
    pub source_bucket_dir: Option<PathBuf>,
    /// Path prefixes enumerated when building the manifest
    pub source_prefixes: Vec<String>,
    pub target_bucket: String,
    /// Local directory used as the target store (takes precedence over HTTP)
    pub target_bucket_dir: Option<PathBuf>,
    /// Base URL of the target storage REST API
    pub target_storage_url: Option<String>,
    pub target_storage_token: Option<String>,
    /// Client-side request rate limit for the HTTP store
    pub requests_per_second: u32,
}

/// Fully resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub dry_run: bool,
    pub verbose: bool,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub audio_concurrency: usize,
    pub sample_size: usize,
    pub confirm_rollback: bool,
    pub force_cleanup: bool,
    pub operator: Option<String>,
    pub database_path: PathBuf,
    pub source_export: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub storage: StorageSettings,
}

impl Settings {
    /// Resolve settings from the real process environment
    ///
    /// `config_path` is the `--config` argument, if any.
    pub fn from_environment(config_path: Option<&Path>) -> Result<Self> {
        let explicit = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("CMIG_CONFIG").ok().map(PathBuf::from));
        let toml_config = load_toml_config(explicit.as_deref())?;
        Self::resolve(&toml_config, |key| std::env::var(key).ok())
    }

    /// Resolve settings from a TOML config and an environment lookup
    ///
    /// The lookup is injected so tests never touch process-wide state.
    pub fn resolve<F>(toml_config: &TomlConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let dry_run = match env("DRY_RUN") {
            Some(v) => parse_bool("DRY_RUN", &v)?,
            None => false,
        };
        let verbose = match env("VERBOSE") {
            Some(v) => parse_bool("VERBOSE", &v)?,
            None => false,
        };

        let batch_size = positive(
            "BATCH_SIZE",
            parse_env(&env, "BATCH_SIZE")?
                .or(toml_config.batch_size)
                .unwrap_or(DEFAULT_BATCH_SIZE),
        )?;
        let batch_delay_ms = parse_env(&env, "BATCH_DELAY_MS")?
            .or(toml_config.batch_delay_ms)
            .unwrap_or(DEFAULT_BATCH_DELAY_MS);
        let max_retries = positive(
            "MAX_RETRIES",
            parse_env(&env, "MAX_RETRIES")?
                .or(toml_config.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
        )?;
        let retry_delay_ms = parse_env(&env, "RETRY_DELAY_MS")?
            .or(toml_config.retry_delay_ms)
            .unwrap_or(DEFAULT_RETRY_DELAY_MS);
        let audio_concurrency = positive(
            "AUDIO_CONCURRENCY",
            parse_env(&env, "AUDIO_CONCURRENCY")?
                .or(toml_config.audio_concurrency)
                .unwrap_or(DEFAULT_AUDIO_CONCURRENCY),
        )?;
        let sample_size = parse_env(&env, "CMIG_SAMPLE_SIZE")?
            .or(toml_config.sample_size)
            .unwrap_or(DEFAULT_SAMPLE_SIZE);

        // Destructive modes require the exact documented value, not just "truthy"
        let confirm_rollback = env("CONFIRM_ROLLBACK").as_deref() == Some("yes");
        let force_cleanup = env("FORCE_CLEANUP").as_deref() == Some("true");

        let operator = env("MIGRATION_OPERATOR")
            .or_else(|| toml_config.operator.clone())
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty());

        let state_dir = env("CMIG_STATE_DIR")
            .map(PathBuf::from)
            .or_else(|| toml_config.state_dir.clone())
            .unwrap_or_else(|| PathBuf::from("migration-state"));
        let database_path = env("CMIG_DATABASE")
            .map(PathBuf::from)
            .or_else(|| toml_config.database.clone())
            .unwrap_or_else(|| state_dir.join("target.db"));
        let source_export = env("CMIG_SOURCE_EXPORT")
            .map(PathBuf::from)
            .or_else(|| toml_config.source_export.clone());

        let storage_toml = &toml_config.storage;
        let storage = StorageSettings {
            source_bucket: env("CMIG_SOURCE_BUCKET")
                .or_else(|| storage_toml.source_bucket.clone())
                .unwrap_or_else(|| "source-audio".to_string()),
            source_bucket_dir: env("CMIG_SOURCE_BUCKET_DIR")
                .map(PathBuf::from)
                .or_else(|| storage_toml.source_bucket_dir.clone()),
            source_prefixes: env("CMIG_SOURCE_PREFIXES")
                .map(|v| {
                    v.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .or_else(|| storage_toml.source_prefixes.clone())
                .unwrap_or_else(|| vec!["recordings/".to_string(), "audio/".to_string()]),
            target_bucket: env("CMIG_TARGET_BUCKET")
                .or_else(|| storage_toml.target_bucket.clone())
                .unwrap_or_else(|| "case-audio".to_string()),
            target_bucket_dir: env("CMIG_TARGET_BUCKET_DIR")
                .map(PathBuf::from)
                .or_else(|| storage_toml.target_bucket_dir.clone()),
            target_storage_url: env("CMIG_TARGET_STORAGE_URL")
                .or_else(|| storage_toml.target_storage_url.clone()),
            target_storage_token: env("CMIG_TARGET_STORAGE_TOKEN")
                .or_else(|| storage_toml.target_storage_token.clone()),
            requests_per_second: positive(
                "CMIG_STORAGE_RPS",
                parse_env(&env, "CMIG_STORAGE_RPS")?
                    .or(storage_toml.requests_per_second)
                    .unwrap_or(10),
            )?,
        };

        let settings = Self {
            dry_run,
            verbose,
            batch_size,
            batch_delay_ms,
            max_retries,
            retry_delay_ms,
            audio_concurrency,
            sample_size,
            confirm_rollback,
            force_cleanup,
            operator,
            database_path,
            source_export,
            state_dir,
            storage,
        };

        debug!(?settings, "Settings resolved");
        Ok(settings)
    }

    /// Operator identity, required by every command that mutates state
    pub fn require_operator(&self) -> Result<&str> {
        self.operator.as_deref().ok_or_else(|| {
            Error::Config(
                "MIGRATION_OPERATOR is not set. Set it to the name of the person running the migration."
                    .to_string(),
            )
        })
    }

    /// Source export path, required by commands that read source records
    pub fn require_source_export(&self) -> Result<&Path> {
        self.source_export.as_deref().ok_or_else(|| {
            Error::Config("CMIG_SOURCE_EXPORT is not set (path to the source export JSON)".to_string())
        })
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join("checkpoint.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.state_dir.join("migration-report.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir.join("audio-manifest.json")
    }

    pub fn blob_progress_path(&self) -> PathBuf {
        self.state_dir.join("audio-progress.json")
    }

    pub fn url_mapping_path(&self) -> PathBuf {
        self.state_dir.join("audio-url-mappings.json")
    }
}

/// Load the TOML config file
///
/// An explicitly named file must exist. The platform default location is
/// optional and silently skipped when absent.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("No TOML config file, using environment and defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// `~/.config/cmig/config.toml` (or the platform equivalent)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cmig").join("config.toml"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{} must be true or false, got '{}'",
            key, other
        ))),
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", key, v, e)))
        })
        .transpose()
}

fn positive<T>(key: &str, value: T) -> Result<T>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(Error::Config(format!("{} must be greater than 0, got {}", key, value)));
    }
    Ok(value)
}
