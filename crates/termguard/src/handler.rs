//! The async-signal-safe crash handler and chaining to prior dispositions.

use crate::diagnostic::{DiagnosticContext, Origin};
use crate::os;
use crate::signals::is_fault;
use crate::terminal;
use libc::{c_int, c_void, siginfo_t};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, raise, sigaction};

/// Entry point installed for every watched signal.
///
/// Reports, discards pending terminal input, then hands the signal to the
/// disposition that was active before the first guard.
pub(crate) extern "C" fn on_signal(signum: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let Ok(signal) = Signal::try_from(signum) else {
        return;
    };

    // SAFETY: both pointers come straight from the kernel for this delivery.
    let diagnostic = unsafe { DiagnosticContext::capture(signal, info, context) };
    diagnostic.report();
    terminal::discard_pending_input();

    let Some(prior) = chain_target(signal) else {
        reraise_default(signal);
        return;
    };
    match prior.handler() {
        SigHandler::SigDfl => reraise_default(signal),
        SigHandler::SigIgn => {
            // Returning from a hardware fault re-executes the instruction.
            if diagnostic.origin == Origin::Kernel && is_fault(signal) {
                reraise_default(signal);
            }
        }
        SigHandler::Handler(handler) => {
            prepare_chain(signal, &prior);
            handler(signum);
        }
        SigHandler::SigAction(handler) => {
            prepare_chain(signal, &prior);
            handler(signum, info, context);
        }
    }
}

/// Disposition the signal is handed to after the report.
///
/// Falls back to the live disposition when nothing was recorded, as long as
/// that is not this handler.
fn chain_target(signal: Signal) -> Option<SigAction> {
    os::prior_disposition(signal)
        .or_else(|| os::current_disposition(signal).ok())
        .filter(|action| !os::is_crash_handler(action))
}

/// Put back the default action and queue the signal again.
///
/// The signal is blocked while this handler runs, so it is delivered as
/// soon as the handler returns and the OS applies the default action.
fn reraise_default(signal: Signal) {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_DFL installs no code.
    let _ = unsafe { sigaction(signal, &default) };
    let _ = raise(signal);
}

/// Apply what the kernel would have done before calling the prior handler.
fn prepare_chain(signal: Signal, prior: &SigAction) {
    let _ = prior.mask().thread_block();
    if prior.flags().contains(SaFlags::SA_RESETHAND) {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: SIG_DFL installs no code.
        let _ = unsafe { sigaction(signal, &default) };
    }
}
