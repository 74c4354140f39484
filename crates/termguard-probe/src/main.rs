//! termguard-probe: arms termguard and then crashes on purpose.
//!
//! Used by the integration tests to observe the fatal paths from outside:
//! exit status, stderr and the state of the terminal afterwards.

mod cli;
#[cfg(unix)]
mod crash;

use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(unix))]
fn run() -> anyhow::Result<()> {
    anyhow::bail!("termguard-probe only runs on Unix")
}

#[cfg(unix)]
fn run() -> anyhow::Result<()> {
    use anyhow::Context;
    use clap::Parser;
    use cli::{Cli, Commands};
    use termguard::SignalGuard;

    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Crash {
            fault,
            nest,
            prior,
            no_guard,
        } => {
            let signal = fault.signal();
            crash::install_prior(signal, prior)?;

            let depth = if no_guard { 0 } else { nest };
            let guards = (0..depth)
                .map(|_| SignalGuard::new())
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to arm signal guard")?;
            log::info!("Armed {} guard(s), triggering {:?}", guards.len(), fault);

            crash::trigger(fault)?;
            eprintln!("survived {signal}");
            drop(guards);
            Ok(())
        }
        Commands::FlushCheck { delay_ms, no_guard } => flush_check(delay_ms, no_guard),
    }
}

/// Wait for the harness to type into the terminal, then take a SIGTERM.
///
/// A prior SIGTERM handler records the delivery so the process survives and
/// can report how many unread bytes the terminal still holds.
#[cfg(unix)]
fn flush_check(delay_ms: u64, no_guard: bool) -> anyhow::Result<()> {
    use anyhow::Context;
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, raise, sigaction};
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use termguard::SignalGuard;

    static DELIVERED: AtomicBool = AtomicBool::new(false);

    extern "C" fn record(_: libc::c_int) {
        DELIVERED.store(true, Ordering::SeqCst);
    }

    let action = SigAction::new(SigHandler::Handler(record), SaFlags::empty(), SigSet::empty());
    // SAFETY: `record` only stores to an atomic.
    unsafe { sigaction(Signal::SIGTERM, &action) }.context("Failed to install SIGTERM handler")?;

    let guard = if no_guard {
        None
    } else {
        Some(SignalGuard::new().context("Failed to arm signal guard")?)
    };

    println!("ready");
    std::io::stdout().flush()?;
    std::thread::sleep(Duration::from_millis(delay_ms));

    raise(Signal::SIGTERM).context("Failed to raise SIGTERM")?;
    drop(guard);

    let mut pending: libc::c_int = 0;
    // SAFETY: FIONREAD writes a single c_int.
    let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::FIONREAD, &raw mut pending) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("FIONREAD on stdin failed");
    }

    println!(
        "prior handler invoked: {}",
        if DELIVERED.load(Ordering::SeqCst) { "yes" } else { "no" }
    );
    println!("pending input bytes: {pending}");
    Ok(())
}
