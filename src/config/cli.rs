use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the rollcall binary.
#[derive(Debug, Parser)]
#[command(
    name = "rollcall",
    version,
    about = "Coalescing user-profile cache with durable snapshots"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ROLLCALL_CONFIG_FILE", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Resolve profiles from a JSON fixture store and print them as JSON.
    Lookup(LookupArgs),
    /// Delete every persisted profile snapshot.
    #[command(name = "clear-snapshots")]
    ClearSnapshots,
}

#[derive(Debug, Args, Clone)]
pub struct LookupArgs {
    /// JSON array of raw profile rows acting as the remote store.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub fixtures: PathBuf,

    /// Fetch all ids with a single batch lookup instead of one lookup per id.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub batch: bool,

    /// Profile ids to resolve.
    #[arg(required = true, value_name = "ID")]
    pub ids: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the remote fetch timeout.
    #[arg(long = "fetch-timeout-ms", value_name = "MILLIS", global = true)]
    pub fetch_timeout_ms: Option<u64>,

    /// Override the snapshot time-to-live.
    #[arg(long = "snapshot-ttl-secs", value_name = "SECONDS", global = true)]
    pub snapshot_ttl_secs: Option<u64>,

    /// Override the snapshot directory.
    #[arg(
        long = "side-store-dir",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub side_store_dir: Option<PathBuf>,

    /// Override the base URL avatar keys are resolved against.
    #[arg(long = "resolver-base-url", value_name = "URL", global = true)]
    pub resolver_base_url: Option<String>,
}
