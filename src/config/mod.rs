//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, GlobalOverrides, LookupArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "rollcall";
const ENV_PREFIX: &str = "ROLLCALL";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_FLUSH_BATCH_LIMIT: u64 = 100;
const DEFAULT_CHANGE_TOPIC: &str = "profiles";
const DEFAULT_SIDE_STORE_DIR: &str = ".rollcall/snapshots";
const DEFAULT_SIDE_STORE_MEMORY_LIMIT: u64 = 1_024;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub side_store: SideStoreSettings,
    pub resolver: ResolverSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub fetch_timeout: Duration,
    pub snapshot_ttl: Duration,
    pub flush_interval: Duration,
    pub flush_batch_limit: NonZeroUsize,
    pub change_topic: String,
    pub enable_side_store: bool,
    pub enable_enrichment: bool,
    pub enable_backfill: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideStoreKind {
    File,
    Memory,
}

#[derive(Debug, Clone)]
pub struct SideStoreSettings {
    pub kind: SideStoreKind,
    pub directory: PathBuf,
    pub memory_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub base_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    side_store: RawSideStoreSettings,
    resolver: RawResolverSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ms) = overrides.fetch_timeout_ms {
            self.cache.fetch_timeout_ms = Some(ms);
        }
        if let Some(secs) = overrides.snapshot_ttl_secs {
            self.cache.snapshot_ttl_secs = Some(secs);
        }
        if let Some(dir) = overrides.side_store_dir.as_ref() {
            self.side_store.directory = Some(dir.clone());
        }
        if let Some(url) = overrides.resolver_base_url.as_ref() {
            self.resolver.base_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            side_store,
            resolver,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            side_store: build_side_store_settings(side_store)?,
            resolver: build_resolver_settings(resolver),
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let fetch_timeout_ms = positive(
        cache.fetch_timeout_ms.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS),
        "cache.fetch_timeout_ms",
    )?;
    let snapshot_ttl_secs = positive(
        cache.snapshot_ttl_secs.unwrap_or(DEFAULT_SNAPSHOT_TTL_SECS),
        "cache.snapshot_ttl_secs",
    )?;
    let flush_interval_ms = positive(
        cache.flush_interval_ms.unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
        "cache.flush_interval_ms",
    )?;
    let flush_batch_limit = non_zero_usize(
        cache.flush_batch_limit.unwrap_or(DEFAULT_FLUSH_BATCH_LIMIT),
        "cache.flush_batch_limit",
    )?;

    let change_topic = cache
        .change_topic
        .map(|topic| topic.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CHANGE_TOPIC.to_string());
    if change_topic.is_empty() {
        return Err(LoadError::invalid(
            "cache.change_topic",
            "must not be empty",
        ));
    }

    Ok(CacheSettings {
        fetch_timeout: Duration::from_millis(fetch_timeout_ms),
        snapshot_ttl: Duration::from_secs(snapshot_ttl_secs),
        flush_interval: Duration::from_millis(flush_interval_ms),
        flush_batch_limit,
        change_topic,
        enable_side_store: cache.enable_side_store.unwrap_or(true),
        enable_enrichment: cache.enable_enrichment.unwrap_or(true),
        enable_backfill: cache.enable_backfill.unwrap_or(true),
    })
}

fn build_side_store_settings(
    side_store: RawSideStoreSettings,
) -> Result<SideStoreSettings, LoadError> {
    let kind = match side_store.kind.as_deref().map(str::trim) {
        None | Some("file") => SideStoreKind::File,
        Some("memory") => SideStoreKind::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "side_store.kind",
                format!("expected `file` or `memory`, got `{other}`"),
            ));
        }
    };

    let directory = side_store
        .directory
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SIDE_STORE_DIR));

    let memory_limit = non_zero_usize(
        side_store
            .memory_limit
            .unwrap_or(DEFAULT_SIDE_STORE_MEMORY_LIMIT),
        "side_store.memory_limit",
    )?;

    Ok(SideStoreSettings {
        kind,
        directory,
        memory_limit,
    })
}

fn build_resolver_settings(resolver: RawResolverSettings) -> ResolverSettings {
    let base_url = resolver.base_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    ResolverSettings { base_url }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    fetch_timeout_ms: Option<u64>,
    snapshot_ttl_secs: Option<u64>,
    flush_interval_ms: Option<u64>,
    flush_batch_limit: Option<u64>,
    change_topic: Option<String>,
    enable_side_store: Option<bool>,
    enable_enrichment: Option<bool>,
    enable_backfill: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSideStoreSettings {
    kind: Option<String>,
    directory: Option<PathBuf>,
    memory_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResolverSettings {
    base_url: Option<String>,
}

fn positive(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
