use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_COMPUTE_MS, METRIC_HIT, METRIC_LAZY_EVICT, METRIC_LOCK_TIMEOUT, METRIC_MISS,
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

/// Register descriptions for the engine's metrics with the installed recorder.
///
/// Safe to call more than once; only the first call registers.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT,
            Unit::Count,
            "Total number of lookups answered from the store."
        );
        describe_counter!(
            METRIC_MISS,
            Unit::Count,
            "Total number of lookups that had to recompute."
        );
        describe_counter!(
            METRIC_LOCK_TIMEOUT,
            Unit::Count,
            "Total number of recompute lock waits that timed out."
        );
        describe_counter!(
            METRIC_LAZY_EVICT,
            Unit::Count,
            "Total number of expired entries removed when a lookup observed them."
        );
        describe_histogram!(
            METRIC_COMPUTE_MS,
            Unit::Milliseconds,
            "Recomputation latency in milliseconds."
        );
    });
}
