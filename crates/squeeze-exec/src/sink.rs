//! EventChannel: how events reach the observer.
//!
//! The engine only ever calls `EventSink::emit`, which must not block. Observers
//! either pass a closure (callback style) or take an `EventChannel`, whose
//! transport is an unbounded crossbeam channel with a cap on queued *progress*
//! events: when the consumer falls `depth` events behind, further progress
//! samples are dropped and counted. Alerts and completions are never dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
pub use crossbeam_channel::RecvTimeoutError;
use squeeze_core::event::EngineEvent;

/// Default number of queued events past which progress samples are dropped.
pub const DEFAULT_PROGRESS_BACKLOG: usize = 1024;

/// Receives engine events. Implementations must return promptly.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn emit(&self, event: EngineEvent) {
        self(&event)
    }
}

/// Sink side of an `EventChannel`.
pub struct ChannelSink {
    tx: Sender<EngineEvent>,
    progress_backlog: usize,
    dropped_progress: AtomicU64,
}

impl ChannelSink {
    /// Progress samples dropped because the consumer was behind.
    pub fn dropped_progress(&self) -> u64 {
        self.dropped_progress.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        if event.is_progress() && self.tx.len() >= self.progress_backlog {
            self.dropped_progress.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // A gone observer is not the engine's problem.
        let _ = self.tx.send(event);
    }
}

/// Receiving side handed to the observer.
pub struct EventStream {
    rx: Receiver<EngineEvent>,
}

impl EventStream {
    /// Block until the next event. `None` once every sink is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<EngineEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Everything queued right now, without blocking.
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn receiver(&self) -> &Receiver<EngineEvent> {
        &self.rx
    }
}

pub struct EventChannel;

impl EventChannel {
    /// A sink/stream pair that queues at most `progress_backlog` events before
    /// it starts dropping progress samples.
    pub fn new(progress_backlog: usize) -> (Arc<ChannelSink>, EventStream) {
        let (tx, rx) = unbounded();
        let sink = ChannelSink {
            tx,
            progress_backlog: progress_backlog.max(1),
            dropped_progress: AtomicU64::new(0),
        };
        (Arc::new(sink), EventStream { rx })
    }

    pub fn with_default_backlog() -> (Arc<ChannelSink>, EventStream) {
        Self::new(DEFAULT_PROGRESS_BACKLOG)
    }
}

/// Discards everything. For callers that only want `Engine::join`.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}
