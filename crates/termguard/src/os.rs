//! The process-wide disposition table backed by `sigaction`.
//!
//! Saved dispositions live in fixed static slots so the crash handler can
//! read them without locking or allocating.

use crate::activation::DispositionTable;
use crate::error::{GuardError, GuardResult};
use crate::handler;
use crate::signals::{SLOT_COUNT, handler_mask, slot_index};
use libc::{c_int, c_void, siginfo_t};
use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::sync::atomic::{AtomicU8, Ordering};

/// Saved disposition for one watched signal.
///
/// Two buffers: a store fills the one that is not published and then flips
/// `published`, so a handler still copying the previous entry never sees a
/// half-written one. Entries are never withdrawn. Once restored, the slot
/// keeps describing the disposition that is live again.
struct Slot {
    /// 0 while nothing was recorded, otherwise 1 + the live buffer index.
    published: AtomicU8,
    entries: [UnsafeCell<MaybeUninit<SigAction>>; 2],
}

// SAFETY: stores are serialized by the activation lock, never touch the
// published buffer, and are made visible with release/acquire ordering.
unsafe impl Sync for Slot {}

impl Slot {
    const fn empty() -> Self {
        Slot {
            published: AtomicU8::new(0),
            entries: [const { UnsafeCell::new(MaybeUninit::uninit()) }; 2],
        }
    }

    /// Caller must hold the activation lock.
    unsafe fn store(&self, action: SigAction) {
        let free = match self.published.load(Ordering::Acquire) {
            1 => 1,
            _ => 0,
        };
        // SAFETY: readers only look at the published buffer.
        unsafe { (*self.entries[free].get()).write(action) };
        self.published.store(free as u8 + 1, Ordering::Release);
    }

    fn load(&self) -> Option<SigAction> {
        let live = self.published.load(Ordering::Acquire).checked_sub(1)?;
        let entry = self.entries.get(usize::from(live))?;
        // SAFETY: a buffer is only published after it was initialized.
        Some(unsafe { (*entry.get()).assume_init_read() })
    }
}

static SLOTS: [Slot; SLOT_COUNT] = [const { Slot::empty() }; SLOT_COUNT];

fn slot(signal: Signal) -> Option<&'static Slot> {
    slot_index(signal).and_then(|index| SLOTS.get(index))
}

/// Disposition that was active before interception, if one is recorded.
///
/// Async-signal-safe: a single atomic load and a copy.
pub(crate) fn prior_disposition(signal: Signal) -> Option<SigAction> {
    slot(signal).and_then(Slot::load)
}

/// Disposition installed for `signal` right now, read without changing it.
///
/// Async-signal-safe.
pub(crate) fn current_disposition(signal: Signal) -> nix::Result<SigAction> {
    let mut raw = MaybeUninit::<libc::sigaction>::zeroed();
    // SAFETY: a null new action only queries the current one.
    let rc = unsafe { libc::sigaction(signal as c_int, std::ptr::null(), raw.as_mut_ptr()) };
    Errno::result(rc)?;
    // SAFETY: sigaction(2) filled the struct.
    let raw = unsafe { raw.assume_init() };

    let flags = SaFlags::from_bits_truncate(raw.sa_flags);
    let handler = match raw.sa_sigaction {
        libc::SIG_DFL => SigHandler::SigDfl,
        libc::SIG_IGN => SigHandler::SigIgn,
        // SAFETY: the kernel hands out the address that was installed, and
        // SA_SIGINFO says which signature it was installed with.
        address if flags.contains(SaFlags::SA_SIGINFO) => SigHandler::SigAction(unsafe {
            mem::transmute::<usize, extern "C" fn(c_int, *mut siginfo_t, *mut c_void)>(address)
        }),
        address => SigHandler::Handler(unsafe {
            mem::transmute::<usize, extern "C" fn(c_int)>(address)
        }),
    };
    // SAFETY: the mask was produced by the OS.
    let mask = unsafe { SigSet::from_sigset_t_unchecked(raw.sa_mask) };
    Ok(SigAction::new(handler, flags, mask))
}

/// Whether `action` is the crash handler itself.
pub(crate) fn is_crash_handler(action: &SigAction) -> bool {
    match action.handler() {
        SigHandler::SigAction(f) => f as usize == handler::on_signal as usize,
        _ => false,
    }
}

/// The real OS table. Only the activation lock may drive it.
#[derive(Debug)]
pub(crate) struct OsTable;

impl DispositionTable for OsTable {
    fn intercept(&mut self, signal: Signal) -> GuardResult<()> {
        let install_failed = |source| GuardError::Install { signal, source };
        let Some(slot) = slot(signal) else {
            return Err(install_failed(Errno::EINVAL));
        };

        // The entry is published before the handler goes in, so every
        // delivery from here on finds it.
        let live = current_disposition(signal).map_err(install_failed)?;
        if is_crash_handler(&live) {
            // Left behind by a failed restore; the slot still holds the
            // real prior disposition.
            log::debug!("{signal} was still intercepted, keeping its saved disposition");
        } else {
            // SAFETY: called with the activation lock held.
            unsafe { slot.store(live) };
        }

        // No SA_RESTART: blocking reads must return EINTR.
        let crash = SigAction::new(
            SigHandler::SigAction(handler::on_signal),
            SaFlags::SA_ONSTACK,
            handler_mask(),
        );
        // SAFETY: the installed handler only performs async-signal-safe work.
        unsafe { sigaction(signal, &crash) }.map_err(install_failed)?;
        log::trace!("Intercepted {signal}");
        Ok(())
    }

    fn release(&mut self, signal: Signal) -> GuardResult<()> {
        let Some(prior) = prior_disposition(signal) else {
            return Ok(());
        };
        // The slot stays published: a handler already running on another
        // thread may still be about to read it.
        // SAFETY: reinstating a disposition that was installed before us.
        unsafe { sigaction(signal, &prior) }
            .map_err(|source| GuardError::Restore { signal, source })?;
        log::trace!("Restored {signal}");
        Ok(())
    }
}
