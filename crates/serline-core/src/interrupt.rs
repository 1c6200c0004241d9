#![forbid(unsafe_code)]

//! Cooperative interruption.
//!
//! An [`InterruptFlag`] is raised from outside the editing loop (a SIGINT
//! handler, a watchdog, a host that receives Ctrl-C out of band) and polled
//! by the loop at its suspension points. Nothing is cancelled preemptively:
//! the loop notices the flag between tokens and while waiting for bytes, and
//! converts it into an exit code.
//!
//! On Unix the flag can be wired to SIGINT with [`InterruptFlag::install_sigint`].
//! The returned guard unregisters the handler on drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared, cloneable interruption flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// Create a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether the flag is raised, without consuming it.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Consume the flag: returns whether it was raised and lowers it.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    /// Raise this flag whenever the process receives SIGINT.
    ///
    /// Replaces the default "terminate" disposition for as long as the
    /// returned guard lives.
    #[cfg(unix)]
    pub fn install_sigint(&self) -> std::io::Result<SigintGuard> {
        use signal_hook::consts::signal::SIGINT;

        let id = signal_hook::flag::register(SIGINT, Arc::clone(&self.raised))?;
        crate::debug!("SIGINT wired to interrupt flag");
        Ok(SigintGuard { id })
    }
}

/// Keeps a SIGINT → [`InterruptFlag`] registration alive.
#[cfg(unix)]
#[derive(Debug)]
pub struct SigintGuard {
    id: signal_hook::SigId,
}

#[cfg(unix)]
impl Drop for SigintGuard {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.id);
    }
}
