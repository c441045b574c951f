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

/// Install a global tracing subscriber using the provided logging settings and describe
/// the metrics emitted by builds and the live server.
///
/// Fails if a global subscriber is already installed.
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "prerender_paths_built_total",
            Unit::Count,
            "Total number of paths whose handler completed and output file was written."
        );
        describe_counter!(
            "prerender_paths_failed_total",
            Unit::Count,
            "Total number of paths that failed at any build stage."
        );
        describe_histogram!(
            "prerender_build_ms",
            Unit::Milliseconds,
            "Latency of building a single path in milliseconds."
        );
        describe_histogram!(
            "prerender_run_ms",
            Unit::Milliseconds,
            "Duration of a whole build run in milliseconds."
        );
        describe_counter!(
            "prerender_serve_requests_total",
            Unit::Count,
            "Total number of requests answered by the live server."
        );
    });
}
