//! Per-run shared state.
//!
//! One `RunContext` exists per `start()`. The engine, the driver, the monitor and
//! every worker hold an `Arc` to it; nothing in it is global.
//!
//! Locks: each store has its own mutex, and `gate` guards the phase. Neither is
//! held while the sink runs. Emissions are serialised by a re-entrant turn
//! instead, so a sink may call back into the engine (`phase`, `emergency_stop`)
//! from inside `emit`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use squeeze_core::config::SqueezeConfig;
use squeeze_core::event::{Alert, EngineEvent, Phase, Progress, RunSummary, Termination};
use squeeze_core::id::RunId;
use squeeze_core::telemetry::MemoryTelemetry;
use squeeze_mem::BlockStore;

use crate::sink::EventSink;

struct Gate {
    phase: Phase,
    summary: Option<RunSummary>,
    /// Thread currently delivering events, and how deeply it has re-entered.
    emitter: Option<ThreadId>,
    depth: u32,
}

/// Held while delivering to the sink. Released on drop, also when the sink panics.
struct Turn<'a> {
    ctx: &'a RunContext,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let mut gate = self.ctx.gate();
        gate.depth -= 1;
        if gate.depth == 0 {
            gate.emitter = None;
            self.ctx.turn_free.notify_all();
        }
    }
}

pub(crate) struct RunContext {
    pub(crate) id: RunId,
    pub(crate) config: SqueezeConfig,
    pub(crate) ceiling: u64,
    pub(crate) started: Instant,
    cancel: AtomicBool,
    floor_tripped: AtomicBool,
    gate: Mutex<Gate>,
    turn_free: Condvar,
    stores: Vec<Mutex<BlockStore>>,
    sink: Arc<dyn EventSink>,
    telemetry: Arc<dyn MemoryTelemetry>,
}

impl RunContext {
    pub(crate) fn new(
        id: RunId,
        config: SqueezeConfig,
        ceiling: u64,
        stores: Vec<BlockStore>,
        sink: Arc<dyn EventSink>,
        telemetry: Arc<dyn MemoryTelemetry>,
    ) -> Self {
        Self {
            id,
            config,
            ceiling,
            started: Instant::now(),
            cancel: AtomicBool::new(false),
            floor_tripped: AtomicBool::new(false),
            gate: Mutex::new(Gate {
                phase: Phase::Running,
                summary: None,
                emitter: None,
                depth: 0,
            }),
            turn_free: Condvar::new(),
            stores: stores.into_iter().map(Mutex::new).collect(),
            sink,
            telemetry,
        }
    }

    pub(crate) fn telemetry(&self) -> &dyn MemoryTelemetry {
        self.telemetry.as_ref()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn floor_tripped(&self) -> bool {
        self.floor_tripped.load(Ordering::Acquire)
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> Phase {
        self.gate().phase
    }

    /// Running → Stopping and raise the cancel flag. Returns false if the run had
    /// already left `Running`.
    pub(crate) fn request_stop(&self) -> bool {
        let mut gate = self.gate();
        let was_running = gate.phase == Phase::Running;
        if was_running {
            gate.phase = Phase::Stopping;
        }
        self.cancel();
        was_running
    }

    /// Wait until no other thread is delivering. The current emitter may
    /// re-enter.
    fn enter(&self) -> Turn<'_> {
        let me = thread::current().id();
        let mut gate = self.gate();
        while gate.emitter.is_some_and(|t| t != me) {
            gate = self
                .turn_free
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
        gate.emitter = Some(me);
        gate.depth += 1;
        Turn { ctx: self }
    }

    /// Forward an event unless the run has completed. Returns whether it was sent.
    pub(crate) fn emit(&self, event: EngineEvent) -> bool {
        let _turn = self.enter();
        if self.phase() == Phase::Completed {
            return false;
        }
        self.sink.emit(event);
        true
    }

    /// Skip the phase check. Only for observer-driven events after completion.
    pub(crate) fn emit_after_completion(&self, event: EngineEvent) {
        let _turn = self.enter();
        self.sink.emit(event);
    }

    /// Close the run: emit `lead` (if any) then `Completed(summary)`, ordered
    /// with respect to every other emission. Only the first caller wins; the
    /// returned summary is the one that was actually emitted.
    ///
    /// The phase flips before delivery, so anything a sink triggers from inside
    /// these two events finds the run already closed.
    pub(crate) fn complete(
        &self,
        lead: Option<EngineEvent>,
        summary: RunSummary,
    ) -> (bool, RunSummary) {
        let _turn = self.enter();
        {
            let mut gate = self.gate();
            if let Some(done) = gate.summary.as_ref() {
                return (false, done.clone());
            }
            gate.phase = Phase::Completed;
            gate.summary = Some(summary.clone());
        }
        if let Some(ev) = lead {
            self.sink.emit(ev);
        }
        self.sink.emit(EngineEvent::Completed(summary.clone()));
        (true, summary)
    }

    /// Compare a reading against the floor. A breach stops the run; only the first
    /// breach of a run raises the alert.
    pub(crate) fn check_floor(&self, available_bytes: u64) -> bool {
        let floor = self.config.safety_floor_bytes;
        if !crate::monitor::is_breach(available_bytes, floor) {
            return false;
        }
        if !self.floor_tripped.swap(true, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            tracing::warn!(run = %self.id, available_bytes, floor, "safety floor breached");

            self.emit(EngineEvent::Alert(Alert::SafetyFloorBreached {
                available_bytes,
                floor_bytes: floor,
            }));
        }
        self.request_stop();
        true
    }

    pub(crate) fn store(&self, index: usize) -> MutexGuard<'_, BlockStore> {
        // A worker that panicked mid-allocate leaves the store consistent:
        // blocks are only pushed once fully built.
        self.stores[index].lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn held_bytes(&self) -> u64 {
        (0..self.stores.len()).map(|i| self.store(i).held_bytes()).sum()
    }

    pub(crate) fn block_count(&self) -> u64 {
        (0..self.stores.len()).map(|i| self.store(i).len() as u64).sum()
    }

    pub(crate) fn peak_bytes(&self) -> u64 {
        (0..self.stores.len()).map(|i| self.store(i).peak_bytes()).sum()
    }

    /// Free every block of every store. Returns bytes freed.
    pub(crate) fn release_all(&self) -> u64 {
        (0..self.stores.len()).map(|i| self.store(i).release_all()).sum()
    }

    pub(crate) fn progress(&self, allocated_bytes: u64, available_bytes: u64) -> Progress {
        Progress::new(allocated_bytes, self.ceiling, available_bytes)
    }

    pub(crate) fn summary(&self, termination: Termination) -> RunSummary {
        RunSummary {
            run_id: self.id,
            termination,
            allocated_bytes: self.held_bytes(),
            target_ceiling_bytes: self.ceiling,
            blocks: self.block_count(),
            peak_bytes: self.peak_bytes(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
