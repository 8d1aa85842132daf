//! Polling-based SIGINT/SIGTERM handling.
//!
//! The handler only stores the signal number; the run loop polls it.

use std::sync::atomic::{AtomicUsize, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use once_cell::sync::Lazy;

static RECEIVED_SIGNAL: Lazy<AtomicUsize> = Lazy::new(|| AtomicUsize::new(0));

extern "C" fn handler(sig: i32) {
    RECEIVED_SIGNAL.store(sig as usize, Ordering::SeqCst);
}

pub fn install() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise before any handler can run.
    Lazy::force(&RECEIVED_SIGNAL);

    let action = SigAction::new(SigHandler::Handler(handler), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store.
        unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| format!("failed to install {sig:?} handler: {e}"))?;
    }
    Ok(())
}

/// Non-blocking; returns each delivered signal once.
pub fn poll() -> Option<Signal> {
    match RECEIVED_SIGNAL.swap(0, Ordering::AcqRel) {
        0 => None,
        n => Signal::try_from(n as i32).ok(),
    }
}
