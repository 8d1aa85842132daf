//! Metrics/tracing hooks.
//!
//! This module purposefully avoids pulling heavy telemetry stacks.
//! Wire these up to OpenTelemetry/Prometheus in the binary layer.

#[cfg(feature = "tracing")]
pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::DEBUG, "memsqueeze", event);
    let _entered = span.enter();
    for (k, v) in key_values {
        tracing::debug!(%event, %k, %v, "metric");
    }
}

#[cfg(not(feature = "tracing"))]
pub fn emit_span(_event: &str, _key_values: &[(&str, String)]) { /* no-op */
}

/// Key/value pairs describing a finished run.
pub fn summary_fields(summary: &squeeze_core::event::RunSummary) -> Vec<(&'static str, String)> {
    vec![
        ("run_id", summary.run_id.get().to_string()),
        ("termination", format!("{:?}", summary.termination)),
        ("allocated_bytes", summary.allocated_bytes.to_string()),
        ("target_ceiling_bytes", summary.target_ceiling_bytes.to_string()),
        ("blocks", summary.blocks.to_string()),
        ("peak_bytes", summary.peak_bytes.to_string()),
        ("elapsed_ms", summary.elapsed_ms.to_string()),
    ]
}
