//! SafetyMonitor: polls available memory for the lifetime of a run and stops the
//! run once the reading drops below the safety floor.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::run::RunContext;

/// Strictly below the floor is a breach; sitting exactly on it is not.
pub fn is_breach(available_bytes: u64, floor_bytes: u64) -> bool {
    available_bytes < floor_bytes
}

pub(crate) struct SafetyMonitor {
    ctx: Arc<RunContext>,
    interval: Duration,
}

impl SafetyMonitor {
    pub(crate) fn new(ctx: Arc<RunContext>) -> Self {
        let interval = Duration::from_millis(ctx.config.monitor_interval_ms);
        Self { ctx, interval }
    }

    /// Sample immediately, then every `interval` until the run is cancelled.
    pub(crate) fn run(self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(run = %self.ctx.id, interval_ms = self.interval.as_millis() as u64, "monitor started");

        let mut samples = 0u64;
        while !self.ctx.is_cancelled() {
            match self.ctx.telemetry().available_bytes() {
                Ok(available) => {
                    samples += 1;
                    if self.ctx.check_floor(available) {
                        break;
                    }
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(run = %self.ctx.id, error = %_e, "monitor sample skipped");
                }
            }
            thread::sleep(self.interval);
        }

        crate::metrics::emit_span(
            "monitor_exit",
            &[
                ("run", self.ctx.id.to_string()),
                ("samples", samples.to_string()),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_is_strict() {
        assert!(is_breach(99, 100));
        assert!(!is_breach(100, 100));
        assert!(!is_breach(101, 100));
        assert!(!is_breach(0, 0));
    }
}
