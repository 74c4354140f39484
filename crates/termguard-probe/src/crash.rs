//! Provoking signals and registering prior dispositions.
//!
//! The prior handlers stand in for another crash-reporting layer that was
//! installed before termguard: they announce themselves on stderr and exit
//! with [`PRIOR_EXIT_CODE`].

use crate::cli::{Fault, Prior};
use anyhow::{Context, Result};
use libc::{c_int, c_void, siginfo_t};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, raise, sigaction};

/// Exit status used by the prior handlers.
pub const PRIOR_EXIT_CODE: c_int = 42;

impl Fault {
    /// Signal this fault is expected to produce.
    pub fn signal(self) -> Signal {
        match self {
            Fault::DivideByZero => Signal::SIGFPE,
            Fault::Segfault => Signal::SIGSEGV,
            Fault::IllegalInstruction => Signal::SIGILL,
            Fault::Abort => Signal::SIGABRT,
            Fault::BusError => Signal::SIGBUS,
            Fault::Interrupt => Signal::SIGINT,
            Fault::Quit => Signal::SIGQUIT,
            Fault::Terminate => Signal::SIGTERM,
        }
    }
}

/// Register `prior` as the disposition of `signal`.
///
/// `Prior::Default` is written explicitly because std installs its own
/// SIGSEGV/SIGBUS handler at start-up.
pub fn install_prior(signal: Signal, prior: Prior) -> Result<()> {
    let handler = match prior {
        Prior::Default => SigHandler::SigDfl,
        Prior::Ignore => SigHandler::SigIgn,
        Prior::Handler => SigHandler::Handler(plain_prior),
        Prior::Siginfo => SigHandler::SigAction(siginfo_prior),
    };
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: the prior handlers only call write(2) and _exit(2).
    unsafe { sigaction(signal, &action) }
        .with_context(|| format!("Failed to install prior disposition for {signal}"))?;
    log::debug!("Installed {prior:?} prior disposition for {signal}");
    Ok(())
}

extern "C" fn plain_prior(signum: c_int) {
    announce_prior(signum, b"");
}

extern "C" fn siginfo_prior(signum: c_int, info: *mut siginfo_t, _context: *mut c_void) {
    let suffix: &[u8] = if info.is_null() { b" without siginfo" } else { b" with siginfo" };
    announce_prior(signum, suffix);
}

fn announce_prior(signum: c_int, suffix: &[u8]) {
    let name = Signal::try_from(signum).map_or("unknown", Signal::as_str);
    let parts = [
        b"prior handler invoked: ".as_slice(),
        name.as_bytes(),
        suffix,
        b"\n".as_slice(),
    ];
    for part in parts {
        // SAFETY: write(2) and _exit(2) are async-signal-safe.
        unsafe { libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len()) };
    }
    unsafe { libc::_exit(PRIOR_EXIT_CODE) };
}

/// Bring the process down with `fault`.
///
/// Returns only if the signal was ignored or handled without exiting.
pub fn trigger(fault: Fault) -> Result<()> {
    match fault {
        Fault::DivideByZero => divide_by_zero(),
        Fault::Segfault => store_to_unmapped_page(),
        Fault::IllegalInstruction => illegal_instruction(),
        Fault::Abort => std::process::abort(),
        other => raise(other.signal()).with_context(|| format!("Failed to raise {}", other.signal()))?,
    }
    Ok(())
}

/// Rust checks divisions, so the trapping `div` is issued directly.
#[cfg(target_arch = "x86_64")]
fn divide_by_zero() {
    let divisor: u64 = std::hint::black_box(0);
    unsafe {
        std::arch::asm!(
            "div {divisor}",
            divisor = in(reg) divisor,
            inout("rax") 1u64 => _,
            inout("rdx") 0u64 => _,
        );
    }
}

#[cfg(target_arch = "x86")]
fn divide_by_zero() {
    let divisor: u32 = std::hint::black_box(0);
    unsafe {
        std::arch::asm!(
            "div {divisor}",
            divisor = in(reg) divisor,
            inout("eax") 1u32 => _,
            inout("edx") 0u32 => _,
        );
    }
}

/// Other architectures do not trap on integer division by zero.
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
fn divide_by_zero() {
    let _ = raise(Signal::SIGFPE);
}

fn store_to_unmapped_page() {
    // The first page is never mapped.
    let address = std::ptr::without_provenance_mut::<u8>(0x10);
    unsafe { std::ptr::write_volatile(address, 1) };
}

#[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
fn illegal_instruction() {
    unsafe { std::arch::asm!("ud2") };
}

#[cfg(target_arch = "aarch64")]
fn illegal_instruction() {
    unsafe { std::arch::asm!("udf #0") };
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
fn illegal_instruction() {
    let _ = raise(Signal::SIGILL);
}
