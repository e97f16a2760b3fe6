use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "rollcall_cache_hit_total",
            Unit::Count,
            "Profile lookups answered from the in-memory cache."
        );
        describe_counter!(
            "rollcall_cache_miss_total",
            Unit::Count,
            "Profile lookups that missed the in-memory cache."
        );
        describe_counter!(
            "rollcall_fetch_total",
            Unit::Count,
            "Remote profile fetches issued, labelled by single or batch mode."
        );
        describe_counter!(
            "rollcall_fetch_coalesced_total",
            Unit::Count,
            "Lookups that joined an in-flight fetch instead of starting one."
        );
        describe_counter!(
            "rollcall_snapshot_hit_total",
            Unit::Count,
            "Lookups answered from a fresh side-store snapshot."
        );
        describe_counter!(
            "rollcall_snapshot_expired_total",
            Unit::Count,
            "Side-store snapshots ignored because they outlived the TTL."
        );
        describe_histogram!(
            "rollcall_flush_ms",
            Unit::Milliseconds,
            "Snapshot flush latency in milliseconds."
        );
        describe_counter!(
            "rollcall_background_error_total",
            Unit::Count,
            "Failures raised by background profile work, labelled by kind."
        );
    });
}
