//! The allocate-and-pace loop. One per run in single mode, `n` in parallel mode.

use std::sync::Arc;
use std::time::Instant;

use squeeze_core::event::EngineEvent;

use crate::fail_point;
use crate::pacer::Pacer;
use crate::run::RunContext;

/// Why a worker's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    CeilingReached,
    Cancelled,
    Exhausted { requested_bytes: u64 },
    Failed(String),
}

pub(crate) struct Worker {
    ctx: Arc<RunContext>,
    index: usize,
    share_bytes: u64,
    pacer: Pacer,
    report_progress: bool,
}

impl Worker {
    pub(crate) fn new(
        ctx: Arc<RunContext>,
        index: usize,
        share_bytes: u64,
        rate: u32,
        report_progress: bool,
    ) -> Self {
        Self {
            ctx,
            index,
            share_bytes,
            pacer: Pacer::new(rate, Instant::now()),
            report_progress,
        }
    }

    pub(crate) fn run(mut self) -> WorkerExit {
        let exit = self.drive();

        #[cfg(feature = "tracing")]
        tracing::debug!(run = %self.ctx.id, worker = self.index, exit = ?exit, "worker finished");

        if matches!(exit, WorkerExit::Exhausted { .. } | WorkerExit::Failed(_)) {
            self.ctx.cancel();
        }
        exit
    }

    fn drive(&mut self) -> WorkerExit {
        let block = self.ctx.config.block_size_bytes;
        let mut held = 0u64;

        loop {
            if self.ctx.is_cancelled() {
                return WorkerExit::Cancelled;
            }
            if held >= self.share_bytes {
                return WorkerExit::CeilingReached;
            }
            if !self.pacer.is_due(Instant::now()) {
                self.pacer.pause();
                continue;
            }

            fail_point!("panic_allocation_tick");

            held = {
                let mut store = self.ctx.store(self.index);
                // Emergency stop sets the flag before it takes this lock.
                if self.ctx.is_cancelled() {
                    return WorkerExit::Cancelled;
                }
                match store.allocate(block) {
                    Ok(_) => store.held_bytes(),
                    Err(e) if e.is_exhaustion() => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(run = %self.ctx.id, worker = self.index, error = %e, "allocation refused");
                        return WorkerExit::Exhausted {
                            requested_bytes: e.requested_bytes(),
                        };
                    }
                    Err(e) => return WorkerExit::Failed(e.to_string()),
                }
            };
            self.pacer.advance();

            let available = match self.ctx.telemetry().available_bytes() {
                Ok(v) => v,
                Err(e) => return WorkerExit::Failed(format!("telemetry: {e}")),
            };

            if self.report_progress {
                self.ctx
                    .emit(EngineEvent::Progress(self.ctx.progress(held, available)));
            }

            if self.ctx.check_floor(available) {
                return WorkerExit::Cancelled;
            }
        }
    }
}

/// Split `ceiling_bytes` across `workers` in whole blocks. The first
/// `blocks % workers` shares carry one extra block.
pub(crate) fn partition(ceiling_bytes: u64, block_bytes: u64, workers: u32) -> Vec<u64> {
    let workers = u64::from(workers.max(1));
    let blocks = ceiling_bytes.div_ceil(block_bytes.max(1));
    let base = blocks / workers;
    let extra = blocks % workers;
    (0..workers)
        .map(|i| (base + u64::from(i < extra)) * block_bytes)
        .collect()
}

/// Per-worker pacing rate; never zero.
pub(crate) fn split_rate(rate: u32, workers: u32) -> u32 {
    (rate / workers.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn even_split() {
        assert_eq!(partition(40 * MIB, MIB, 4), vec![10 * MIB; 4]);
    }

    #[test]
    fn remainder_goes_to_first_workers() {
        assert_eq!(partition(10 * MIB, MIB, 4), vec![3 * MIB, 3 * MIB, 2 * MIB, 2 * MIB]);
    }

    #[test]
    fn partial_block_rounds_up_once() {
        let shares = partition(10 * MIB + 1, MIB, 4);
        let total: u64 = shares.iter().sum();
        assert_eq!(total, 11 * MIB);
        assert!(total < 10 * MIB + 1 + MIB);
    }

    #[test]
    fn zero_ceiling_gives_empty_shares() {
        assert_eq!(partition(0, MIB, 3), vec![0, 0, 0]);
    }

    #[test]
    fn rate_split_never_zero() {
        assert_eq!(split_rate(500, 4), 125);
        assert_eq!(split_rate(3, 4), 1);
        assert_eq!(split_rate(10, 0), 10);
    }
}
