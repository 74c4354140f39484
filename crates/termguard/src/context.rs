//! Instruction pointer extraction from the machine context.
//!
//! Only the register layouts below are known; everywhere else the pc is
//! reported as unavailable rather than guessed.

use libc::c_void;

/// Program counter recorded in a `ucontext_t`, if this platform exposes it.
///
/// # Safety
/// `context` must be null or the third argument the kernel passed to an
/// `SA_SIGINFO` handler.
pub(crate) unsafe fn instruction_pointer(context: *const c_void) -> Option<usize> {
    if context.is_null() {
        return None;
    }
    // SAFETY: forwarded from the caller.
    unsafe { read_pc(context) }
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
unsafe fn read_pc(context: *const c_void) -> Option<usize> {
    let uc = context.cast::<libc::ucontext_t>();
    let gregs = unsafe { &(*uc).uc_mcontext.gregs };
    gregs.get(libc::REG_RIP as usize).map(|&rip| rip as usize)
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86"))]
unsafe fn read_pc(context: *const c_void) -> Option<usize> {
    let uc = context.cast::<libc::ucontext_t>();
    let gregs = unsafe { &(*uc).uc_mcontext.gregs };
    gregs.get(libc::REG_EIP as usize).map(|&eip| eip as u32 as usize)
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "aarch64"))]
unsafe fn read_pc(context: *const c_void) -> Option<usize> {
    let uc = context.cast::<libc::ucontext_t>();
    Some(unsafe { (*uc).uc_mcontext.pc } as usize)
}

#[cfg(all(target_vendor = "apple", target_arch = "x86_64"))]
unsafe fn read_pc(context: *const c_void) -> Option<usize> {
    let uc = context.cast::<libc::ucontext_t>();
    let mcontext = unsafe { (*uc).uc_mcontext };
    if mcontext.is_null() {
        return None;
    }
    Some(unsafe { (*mcontext).__ss.__rip } as usize)
}

#[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
unsafe fn read_pc(context: *const c_void) -> Option<usize> {
    let uc = context.cast::<libc::ucontext_t>();
    let mcontext = unsafe { (*uc).uc_mcontext };
    if mcontext.is_null() {
        return None;
    }
    Some(unsafe { (*mcontext).__ss.__pc } as usize)
}

#[cfg(not(any(
    all(
        target_os = "linux",
        target_env = "gnu",
        any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")
    ),
    all(
        target_vendor = "apple",
        any(target_arch = "x86_64", target_arch = "aarch64")
    )
)))]
unsafe fn read_pc(_context: *const c_void) -> Option<usize> {
    None
}
