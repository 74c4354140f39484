//! RAII guard that keeps the crash handler installed.

use crate::activation::Activation;
use crate::error::GuardResult;
use crate::os::OsTable;
use std::sync::{Mutex, MutexGuard};

/// Process-wide activation state. Reach it only through [`activation`].
static ACTIVATION: Mutex<Activation<OsTable>> = Mutex::new(Activation::new(OsTable));

fn activation() -> MutexGuard<'static, Activation<OsTable>> {
    // The state is consistent between calls even if a holder panicked.
    ACTIVATION.lock().unwrap_or_else(|e| e.into_inner())
}

/// Intercepts every signal in [`WATCHED_SIGNALS`](crate::WATCHED_SIGNALS)
/// for as long as it is alive.
///
/// Guards nest: only the first live guard installs the crash handler and
/// only the last one to drop restores the dispositions that were in place
/// before it. Guards may be created and dropped on any thread.
#[derive(Debug)]
#[must_use = "signals are only intercepted while the guard is alive"]
pub struct SignalGuard {
    _private: (),
}

impl SignalGuard {
    /// Arm interception, or join the already armed scope.
    ///
    /// Fails only if the OS rejects a disposition change, in which case no
    /// watched signal is left intercepted.
    pub fn new() -> GuardResult<Self> {
        let depth = activation().acquire()?;
        log::debug!("Signal guard created (depth {depth})");
        Ok(SignalGuard { _private: () })
    }

    /// Number of guards currently alive in the process.
    pub fn active() -> usize {
        activation().count()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let depth = activation().release();
        log::debug!("Signal guard dropped (depth {depth})");
    }
}
