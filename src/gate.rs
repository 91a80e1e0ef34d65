//! The connection gate: a shared flag telling every sender whether a client is attached

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared signal set while a client is attached and eligible to receive sends.
///
/// Cloning a gate yields another handle to the same flag. Readers never block; they poll
/// [`ConnectionGate::is_active`] and skip their work while it is false.
#[derive(Debug, Clone, Default)]
pub struct ConnectionGate {
    /// The flag itself, shared by every handle
    active: Arc<AtomicBool>,
}

impl ConnectionGate {
    /// Creates a gate in the inactive state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether senders are currently allowed to write
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Opens the gate, normally right after a client was accepted
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Closes the gate. Idempotent; returns `true` only for the call that actually closed it
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}
