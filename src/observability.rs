// src/observability.rs
//! Logging and metrics setup
//!
//! Both are process-wide and installed once from `main`. Library code only
//! emits through `tracing` and `metrics` macros, which are no-ops until a
//! subscriber or recorder is installed.

use crate::recording::supervisor::{CompletionObserver, CompletionRecord, SessionOutcome};
use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{Result, TapError};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const SESSIONS_TOTAL: &str = "stream_tap_sessions_total";
pub const BYTES_PERSISTED_TOTAL: &str = "stream_tap_bytes_persisted_total";
pub const BYTES_DELIVERED_TOTAL: &str = "stream_tap_bytes_delivered_total";
pub const SINK_ERRORS_TOTAL: &str = "stream_tap_sink_errors_total";

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| TapError::Observability(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
    };

    installed.map_err(|e| TapError::Observability(format!("Failed to install subscriber: {}", e)))
}

/// Install the Prometheus exporter when a metrics address is configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(addr) = config.metrics_addr else {
        debug!("Metrics endpoint disabled");
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TapError::Observability(format!("Failed to start metrics exporter: {}", e)))?;

    describe_counter!(SESSIONS_TOTAL, "Tap sessions finished, by outcome");
    describe_counter!(BYTES_PERSISTED_TOTAL, "Bytes written to capture files");
    describe_counter!(BYTES_DELIVERED_TOTAL, "Bytes of tapped streams delivered to clients");
    describe_counter!(SINK_ERRORS_TOTAL, "Sessions whose capture stopped early");

    info!("Metrics available at http://{}/metrics", addr);
    Ok(())
}

fn outcome_label(outcome: &SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::SourceExhausted => "completed",
        SessionOutcome::SourceFault(_) => "source_fault",
        SessionOutcome::ConsumerGone => "consumer_gone",
        SessionOutcome::InternalFault(_) => "internal_fault",
    }
}

/// Completion observer writing one log line and updating counters per session
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl CompletionObserver for LoggingObserver {
    fn on_complete(&self, record: &CompletionRecord) {
        counter!(SESSIONS_TOTAL, "outcome" => outcome_label(&record.outcome)).increment(1);
        counter!(BYTES_PERSISTED_TOTAL).increment(record.bytes_persisted);
        counter!(BYTES_DELIVERED_TOTAL).increment(record.bytes_delivered);

        if let Some(fault) = &record.sink_error {
            counter!(SINK_ERRORS_TOTAL).increment(1);
            warn!(
                flow_id = %record.flow_id,
                "Capture {} incomplete: stopped after {} bytes ({})",
                record.destination,
                fault.after_bytes,
                fault.message
            );
        }

        match &record.outcome {
            SessionOutcome::SourceExhausted => info!(
                flow_id = %record.flow_id,
                elapsed_ms = record.elapsed.as_millis() as u64,
                "Capture finished: {} {} - saved {} bytes ({} lines) to {}",
                record.method,
                record.url,
                record.bytes_persisted,
                record.lines_persisted,
                record.destination
            ),
            outcome => warn!(
                flow_id = %record.flow_id,
                elapsed_ms = record.elapsed.as_millis() as u64,
                "Capture ended early ({}): {} {} - saved {} bytes ({} lines) to {}",
                outcome,
                record.method,
                record.url,
                record.bytes_persisted,
                record.lines_persisted,
                record.destination
            ),
        }
    }
}
