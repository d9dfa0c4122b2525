//! Process-wide single-run gate.
//!
//! At most one macro or input sequence executes at a time.  The guard is
//! a shared handle (`Arc<RunGuard>`) passed to everything that runs
//! sequences, not a static.  Acquisition never blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RunGuard {
    held: AtomicBool,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the ticket if it is free.  Returns `false` immediately when
    /// another caller holds it.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Return the ticket.  Prefer [`RunGuard::try_ticket`], which releases
    /// on drop.
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Acquire and wrap the ticket in a guard that releases it on every
    /// exit path, unwinding included.
    pub fn try_ticket(self: &Arc<Self>) -> Option<RunTicket> {
        self.try_acquire().then(|| RunTicket {
            guard: Arc::clone(self),
        })
    }
}

/// Held run ticket.  Dropping it releases the [`RunGuard`].
#[derive(Debug)]
pub struct RunTicket {
    guard: Arc<RunGuard>,
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.guard.release();
    }
}
