//! The fixed set of signals termguard intercepts.

use nix::sys::signal::{SigSet, Signal};

/// Signals intercepted while a [`SignalGuard`](crate::SignalGuard) is alive.
///
/// Hardware faults come first, followed by abort, terminal interrupt/quit
/// and termination requests. Handlers are installed in this order and
/// restored in reverse.
pub const WATCHED_SIGNALS: [Signal; 8] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGABRT,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
];

/// Number of disposition slots, one per watched signal.
pub(crate) const SLOT_COUNT: usize = WATCHED_SIGNALS.len();

/// Position of `signal` in [`WATCHED_SIGNALS`], if it is watched.
pub(crate) fn slot_index(signal: Signal) -> Option<usize> {
    WATCHED_SIGNALS.iter().position(|&watched| watched == signal)
}

/// Whether the signal is raised synchronously by the CPU on a bad instruction.
pub(crate) fn is_fault(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGILL | Signal::SIGFPE
    )
}

/// Mask applied while the crash handler runs: every watched signal.
pub(crate) fn handler_mask() -> SigSet {
    let mut mask = SigSet::empty();
    for signal in WATCHED_SIGNALS {
        mask.add(signal);
    }
    mask
}
