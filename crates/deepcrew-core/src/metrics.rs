use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PhaseMetrics {
    runs: Counter<u64>,
    duration_ms: Histogram<f64>,
    refinements: Histogram<u64>,
}

static METRICS: OnceCell<PhaseMetrics> = OnceCell::new();

fn handles() -> &'static PhaseMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepcrew.phases");
        PhaseMetrics {
            runs: meter
                .u64_counter("phase_runs_total")
                .with_description("Total executor invocations by phase and status")
                .init(),
            duration_ms: meter
                .f64_histogram("phase_duration_ms")
                .with_description("Executor runtime per phase in milliseconds")
                .init(),
            refinements: meter
                .u64_histogram("refinement_iterations")
                .with_description("Refinement passes performed per research run")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("DEEPCREW_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "DEEPCREW_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export phase metrics."
        );
    }
    Ok(())
}

/// Record one executor invocation (no-op if no provider installed).
pub fn record_phase_metrics(phase: &str, status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("phase", phase.to_string()),
        KeyValue::new("status", status.to_string()),
    ];

    metrics.runs.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
}

pub fn record_refinements(iterations: u32) {
    handles().refinements.record(u64::from(iterations), &[]);
}
