//! Engine: owns at most one run at a time and exposes the observer's controls.
//!
//! `start` spawns the threads of a run and returns; everything after that is
//! reported through the `EventSink`. `graceful_stop` and `emergency_stop` may be
//! called from any thread, in any phase, any number of times.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use squeeze_core::config::SqueezeConfig;
use squeeze_core::event::{Alert, EngineEvent, Phase, Progress, RunSummary, Termination};
use squeeze_core::id::RunId;
use squeeze_core::telemetry::{MemoryTelemetry, TelemetryError};
use squeeze_mem::{BlockStore, Filler, StoreBudget};

use crate::monitor::SafetyMonitor;
use crate::run::RunContext;
use crate::sink::EventSink;
use crate::worker::{partition, split_rate, Worker, WorkerExit};

#[derive(Debug, Error)]
pub enum ExecError {
    /// A run is still Running or Stopping.
    #[error("engine busy: current run is {0}")]
    Busy(Phase),
    #[error("invalid configuration: {0}")]
    Config(#[from] squeeze_core::Error),
    #[error("memory telemetry unavailable: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}

struct ActiveRun {
    ctx: Arc<RunContext>,
    driver: Option<JoinHandle<RunSummary>>,
}

pub struct Engine {
    sink: Arc<dyn EventSink>,
    telemetry: Arc<dyn MemoryTelemetry>,
    current: Mutex<Option<ActiveRun>>,
}

impl Engine {
    pub fn new(sink: Arc<dyn EventSink>, telemetry: Arc<dyn MemoryTelemetry>) -> Self {
        Self {
            sink,
            telemetry,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a run. Blocks retained by the previous run are freed first.
    pub fn start(&self, config: SqueezeConfig) -> Result<(), ExecError> {
        let mut current = self.current();
        if let Some(run) = current.as_ref() {
            let phase = run.ctx.phase();
            if phase.is_active() {
                return Err(ExecError::Busy(phase));
            }
        }
        config.validate()?;

        let stale = current.take();
        if let Some(prev) = stale.as_ref() {
            prev.ctx.release_all();
        }
        let result = self.launch(config).map(|run| {
            *current = Some(run);
        });
        drop(current);

        // The old driver may still be delivering its last event to a sink that
        // calls back into this engine, so it is joined outside the lock.
        if let Some(driver) = stale.and_then(|mut prev| prev.driver.take()) {
            if driver.thread().id() != thread::current().id() {
                let _ = driver.join();
            }
        }
        result
    }

    fn launch(&self, config: SqueezeConfig) -> Result<ActiveRun, ExecError> {
        let available = self.telemetry.available_bytes()?;
        let ceiling = config.target_ceiling(available);
        let id = RunId::fresh();
        let seed = config.seed.unwrap_or_else(|| id.get());
        let workers = config.worker_count();
        let parallel = config.parallel_workers.is_some();

        let budget = config
            .max_store_bytes
            .map(StoreBudget::new)
            .unwrap_or_else(StoreBudget::uncapped);
        let stores = (0..workers)
            .map(|i| {
                let filler = Filler::new(config.fill, seed.wrapping_add(u64::from(i)));
                BlockStore::with_budget(budget.clone(), filler)
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::info!(
            run = %id,
            available,
            ceiling,
            block = config.block_size_bytes,
            rate = config.rate_per_second,
            workers,
            "starting run"
        );

        let shares = if parallel {
            partition(ceiling, config.block_size_bytes, workers)
        } else {
            vec![ceiling]
        };
        let rate = split_rate(config.rate_per_second, workers);

        let ctx = Arc::new(RunContext::new(
            id,
            config,
            ceiling,
            stores,
            Arc::clone(&self.sink),
            Arc::clone(&self.telemetry),
        ));

        let driver = spawn_run(&ctx, shares, rate, parallel, available)?;
        Ok(ActiveRun {
            ctx,
            driver: Some(driver),
        })
    }

    /// Ask the current run to stop after its in-flight tick. Blocks stay held.
    pub fn graceful_stop(&self) {
        if let Some(run) = self.current().as_ref() {
            if run.ctx.request_stop() {
                #[cfg(feature = "tracing")]
                tracing::info!(run = %run.ctx.id, "graceful stop requested");
            }
        }
    }

    /// Stop the current run and free all of its blocks before returning.
    pub fn emergency_stop(&self) {
        // Not holding `current` past this point: the sink below may call back in.
        let Some(ctx) = self.current().as_ref().map(|run| Arc::clone(&run.ctx)) else {
            return;
        };

        // Workers re-check the flag under their store lock, so nothing is
        // allocated after the stores below are emptied.
        ctx.cancel();
        let freed = ctx.release_all();
        let available = self.telemetry.available_bytes().unwrap_or(0);
        let zero = EngineEvent::Progress(Progress::zero(available));

        let summary = ctx.summary(Termination::EmergencyStop);
        let (closed, _) = ctx.complete(Some(zero.clone()), summary);
        if !closed && freed > 0 {
            ctx.emit_after_completion(zero);
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(run = %ctx.id, freed, closed, "emergency stop");
    }

    /// Wait for the current run's driver and return its summary.
    pub fn join(&self) -> Option<RunSummary> {
        let driver = self.current().as_mut().and_then(|run| run.driver.take())?;
        driver.join().ok()
    }

    pub fn phase(&self) -> Phase {
        self.current()
            .as_ref()
            .map(|run| run.ctx.phase())
            .unwrap_or(Phase::Idle)
    }

    /// Bytes currently held by the run's stores.
    pub fn allocated_bytes(&self) -> u64 {
        self.current()
            .as_ref()
            .map(|run| run.ctx.held_bytes())
            .unwrap_or(0)
    }

    pub fn block_count(&self) -> u64 {
        self.current()
            .as_ref()
            .map(|run| run.ctx.block_count())
            .unwrap_or(0)
    }

    pub fn target_ceiling_bytes(&self) -> Option<u64> {
        self.current().as_ref().map(|run| run.ctx.ceiling)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let current = self
            .current
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mut run) = current.take() {
            run.ctx.cancel();
            if let Some(driver) = run.driver.take() {
                let _ = driver.join();
            }
            run.ctx.release_all();
        }
    }
}

/// Spawn monitor, workers, then the driver. On failure everything already
/// spawned is cancelled and the run's blocks are freed; the threads exit on
/// their own once they see the flag.
fn spawn_run(
    ctx: &Arc<RunContext>,
    shares: Vec<u64>,
    rate: u32,
    parallel: bool,
    available: u64,
) -> Result<JoinHandle<RunSummary>, ExecError> {
    // Not joined: `start` holds the engine lock here, and a worker may be
    // inside a sink that wants it.
    let abort = |_monitor: Option<JoinHandle<()>>, _workers: Vec<JoinHandle<WorkerExit>>| {
        ctx.cancel();
        ctx.release_all();
    };

    let monitor = SafetyMonitor::new(Arc::clone(ctx));
    let monitor = thread::Builder::new()
        .name("squeeze-monitor".into())
        .spawn(move || monitor.run())
        .map_err(|source| ExecError::Spawn {
            what: "monitor",
            source,
        })?;

    let mut workers = Vec::with_capacity(shares.len());
    for (index, share) in shares.into_iter().enumerate() {
        let worker_ctx = Arc::clone(ctx);
        let spawned = thread::Builder::new()
            .name(format!("squeeze-worker-{index}"))
            .spawn(move || {
                let worker = Worker::new(Arc::clone(&worker_ctx), index, share, rate, !parallel);
                panic::catch_unwind(AssertUnwindSafe(|| worker.run())).unwrap_or_else(|payload| {
                    worker_ctx.cancel();
                    WorkerExit::Failed(panic_detail(payload))
                })
            });
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(source) => {
                abort(Some(monitor), workers);
                return Err(ExecError::Spawn {
                    what: "worker",
                    source,
                });
            }
        }
    }

    // The driver needs the handles; hand them back if it cannot be spawned.
    let (handoff_tx, handoff_rx) = crossbeam_channel::bounded(1);
    let driver_ctx = Arc::clone(ctx);
    let spawned = thread::Builder::new()
        .name("squeeze-driver".into())
        .spawn(move || {
            let (monitor, workers) = match handoff_rx.recv() {
                Ok(handles) => handles,
                Err(_) => return driver_ctx.summary(Termination::Failed),
            };
            drive(driver_ctx, monitor, workers, parallel, available)
        });
    match spawned {
        Ok(driver) => {
            // The receiver lives in the driver thread until it reads.
            if let Err(returned) = handoff_tx.send((monitor, workers)) {
                let (monitor, workers) = returned.into_inner();
                abort(Some(monitor), workers);
            }
            Ok(driver)
        }
        Err(source) => {
            abort(Some(monitor), workers);
            Err(ExecError::Spawn {
                what: "driver",
                source,
            })
        }
    }
}

/// Body of the driver thread: watch the workers, close the run.
fn drive(
    ctx: Arc<RunContext>,
    monitor: JoinHandle<()>,
    workers: Vec<JoinHandle<WorkerExit>>,
    parallel: bool,
    mut available: u64,
) -> RunSummary {
    if parallel {
        let interval = Duration::from_millis(ctx.config.progress_interval_ms);
        let mut reported = 0u64;
        while !ctx.is_cancelled() && !workers.iter().all(|w| w.is_finished()) {
            thread::sleep(interval);
            if let Ok(v) = ctx.telemetry().available_bytes() {
                available = v;
            }
            // Approximate: each store is read at a slightly different moment.
            let held = ctx.held_bytes().max(reported);
            if held > reported {
                reported = held;
                ctx.emit(EngineEvent::Progress(ctx.progress(held, available)));
            }
        }
    }

    let exits: Vec<WorkerExit> = workers
        .into_iter()
        .map(|w| {
            w.join()
                .unwrap_or_else(|payload| WorkerExit::Failed(panic_detail(payload)))
        })
        .collect();

    ctx.cancel();
    let _ = monitor.join();

    let termination = pick_termination(&exits, ctx.floor_tripped());
    match termination {
        Termination::Exhausted => {
            let requested_bytes = exits
                .iter()
                .find_map(|e| match e {
                    WorkerExit::Exhausted { requested_bytes } => Some(*requested_bytes),
                    _ => None,
                })
                .unwrap_or(ctx.config.block_size_bytes);
            ctx.emit(EngineEvent::Alert(Alert::AllocationExhausted {
                requested_bytes,
                held_bytes: ctx.held_bytes(),
            }));
        }
        Termination::Failed => {
            let detail = exits
                .iter()
                .find_map(|e| match e {
                    WorkerExit::Failed(detail) => Some(detail.clone()),
                    _ => None,
                })
                .unwrap_or_default();

            #[cfg(feature = "tracing")]
            tracing::error!(run = %ctx.id, %detail, "run failed");

            ctx.emit(EngineEvent::Alert(Alert::UnexpectedRuntime { detail }));
        }
        _ => {}
    }

    let final_summary = ctx.summary(termination);
    if parallel {
        if let Ok(v) = ctx.telemetry().available_bytes() {
            available = v;
        }
        ctx.emit(EngineEvent::Progress(
            ctx.progress(final_summary.allocated_bytes, available),
        ));
        // Worker memory does not outlive a parallel run; only the totals do.
        let _freed = ctx.release_all();

        #[cfg(feature = "tracing")]
        tracing::debug!(run = %ctx.id, freed = _freed, "released parallel worker stores");
    }

    let (_, summary) = ctx.complete(None, final_summary);

    #[cfg(feature = "tracing")]
    tracing::info!(
        run = %summary.run_id,
        termination = ?summary.termination,
        allocated = summary.allocated_bytes,
        blocks = summary.blocks,
        elapsed_ms = summary.elapsed_ms,
        "run completed"
    );
    crate::metrics::emit_span("run_completed", &crate::metrics::summary_fields(&summary));

    summary
}

/// Failed > Exhausted > SafetyFloor > GracefulStop > CeilingReached.
fn pick_termination(exits: &[WorkerExit], floor_tripped: bool) -> Termination {
    if exits.iter().any(|e| matches!(e, WorkerExit::Failed(_))) {
        Termination::Failed
    } else if exits
        .iter()
        .any(|e| matches!(e, WorkerExit::Exhausted { .. }))
    {
        Termination::Exhausted
    } else if floor_tripped {
        Termination::SafetyFloor
    } else if exits.iter().any(|e| *e == WorkerExit::Cancelled) {
        Termination::GracefulStop
    } else {
        Termination::CeilingReached
    }
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}
