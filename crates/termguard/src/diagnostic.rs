//! Diagnostic line assembled inside the crash handler.
//!
//! Everything here runs on the signal-delivery stack: no allocation, no
//! locks, no `std::io` handles. The line is rendered into a fixed stack
//! buffer and written to descriptor 2 with raw `write` calls.

use crate::context;
use crate::signals::is_fault;
use libc::{c_int, c_void, siginfo_t};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::os::fd::BorrowedFd;

/// Who sent the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Raised by the kernel on behalf of the faulting instruction or tty.
    Kernel,
    /// Sent with `kill`, `raise`, `sigqueue` and friends.
    Process { pid: Option<i32> },
}

/// Snapshot of one signal delivery. Lives on the handler's stack only.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DiagnosticContext {
    pub(crate) signal: Signal,
    pub(crate) code: c_int,
    pub(crate) origin: Origin,
    pub(crate) fault_address: Option<usize>,
    pub(crate) instruction_pointer: Option<usize>,
}

impl DiagnosticContext {
    /// Read the kernel-supplied records.
    ///
    /// # Safety
    /// `info` and `context` must be null or the pointers handed to an
    /// `SA_SIGINFO` handler for this delivery.
    pub(crate) unsafe fn capture(
        signal: Signal,
        info: *const siginfo_t,
        context: *const c_void,
    ) -> Self {
        let instruction_pointer = unsafe { context::instruction_pointer(context) };
        if info.is_null() {
            return DiagnosticContext {
                signal,
                code: 0,
                origin: Origin::Process { pid: None },
                fault_address: None,
                instruction_pointer,
            };
        }

        let code = unsafe { (*info).si_code };
        let origin = if sent_by_process(code) {
            Origin::Process {
                pid: unsafe { sender_pid(info) },
            }
        } else {
            Origin::Kernel
        };
        let fault_address = match origin {
            Origin::Kernel if is_fault(signal) => unsafe { fault_address(info) },
            _ => None,
        };

        DiagnosticContext {
            signal,
            code,
            origin,
            fault_address,
            instruction_pointer,
        }
    }

    pub(crate) fn render(&self, out: &mut StackBuffer) {
        out.push_str("caught ");
        out.push_str(self.signal.as_str());
        out.push_str(" (");
        out.push_str(category(self.signal));
        match self.origin {
            Origin::Kernel => {
                if let Some(detail) = detail(self.signal, self.code) {
                    out.push_str(": ");
                    out.push_str(detail);
                }
            }
            Origin::Process { pid: Some(pid) } => {
                out.push_str(": sent by process ");
                out.push_decimal(i64::from(pid));
            }
            Origin::Process { pid: None } => {}
        }
        out.push_str(")");
        if let Some(address) = self.fault_address {
            out.push_str(", fault address ");
            out.push_hex(address);
        }
        if let Some(pc) = self.instruction_pointer {
            out.push_str(", pc ");
            out.push_hex(pc);
        }
    }

    /// Write the diagnostic line to stderr. Best effort.
    pub(crate) fn report(&self) {
        let mut line = StackBuffer::new();
        line.push_str("\r\n");
        self.render(&mut line);
        line.push_str("\r\n");
        write_stderr(line.as_bytes());
    }
}

/// Linux marks user-sent signals with `si_code <= 0`; the BSDs use `0` or
/// the `SI_USER` family starting at `0x10001`.
fn sent_by_process(code: c_int) -> bool {
    if cfg!(any(target_os = "linux", target_os = "android")) {
        code <= 0
    } else {
        code <= 0 || code >= 0x10000
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn sender_pid(info: *const siginfo_t) -> Option<i32> {
    Some(unsafe { (*info).si_pid() })
}

#[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
unsafe fn sender_pid(info: *const siginfo_t) -> Option<i32> {
    Some(unsafe { (*info).si_pid })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd"
)))]
unsafe fn sender_pid(_info: *const siginfo_t) -> Option<i32> {
    None
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: *const siginfo_t) -> Option<usize> {
    Some(unsafe { (*info).si_addr() } as usize)
}

#[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
unsafe fn fault_address(info: *const siginfo_t) -> Option<usize> {
    Some(unsafe { (*info).si_addr } as usize)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd"
)))]
unsafe fn fault_address(_info: *const siginfo_t) -> Option<usize> {
    None
}

fn category(signal: Signal) -> &'static str {
    match signal {
        Signal::SIGSEGV => "segmentation violation",
        Signal::SIGBUS => "bus error",
        Signal::SIGILL => "illegal instruction",
        Signal::SIGFPE => "floating-point exception",
        Signal::SIGABRT => "abort",
        Signal::SIGINT => "interactive interrupt",
        Signal::SIGQUIT => "interactive quit",
        Signal::SIGTERM => "termination request",
        _ => "unexpected signal",
    }
}

/// Kernel sub-codes from `<asm-generic/siginfo.h>`.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn detail(signal: Signal, code: c_int) -> Option<&'static str> {
    let text = match (signal, code) {
        (Signal::SIGSEGV, 1) => "address not mapped to object",
        (Signal::SIGSEGV, 2) => "invalid permissions for mapped object",
        (Signal::SIGSEGV, 3) => "failed address bound checks",
        (Signal::SIGSEGV, 4) => "access denied by protection keys",
        (Signal::SIGBUS, 1) => "invalid address alignment",
        (Signal::SIGBUS, 2) => "nonexistent physical address",
        (Signal::SIGBUS, 3) => "object-specific hardware error",
        (Signal::SIGBUS, 4) => "hardware memory error consumed on a machine check",
        (Signal::SIGBUS, 5) => "hardware memory error detected but not consumed",
        (Signal::SIGILL, 1) => "illegal opcode",
        (Signal::SIGILL, 2) => "illegal operand",
        (Signal::SIGILL, 3) => "illegal addressing mode",
        (Signal::SIGILL, 4) => "illegal trap",
        (Signal::SIGILL, 5) => "privileged opcode",
        (Signal::SIGILL, 6) => "privileged register",
        (Signal::SIGILL, 7) => "coprocessor error",
        (Signal::SIGILL, 8) => "internal stack error",
        (Signal::SIGFPE, 1) => "integer division by zero",
        (Signal::SIGFPE, 2) => "integer overflow",
        (Signal::SIGFPE, 3) => "floating-point division by zero",
        (Signal::SIGFPE, 4) => "floating-point overflow",
        (Signal::SIGFPE, 5) => "floating-point underflow",
        (Signal::SIGFPE, 6) => "floating-point inexact result",
        (Signal::SIGFPE, 7) => "floating-point invalid operation",
        (Signal::SIGFPE, 8) => "subscript out of range",
        _ => return None,
    };
    Some(text)
}

/// Sub-codes from Darwin's `<sys/signal.h>`.
#[cfg(target_vendor = "apple")]
fn detail(signal: Signal, code: c_int) -> Option<&'static str> {
    let text = match (signal, code) {
        (Signal::SIGSEGV, 1) => "address not mapped to object",
        (Signal::SIGSEGV, 2) => "invalid permissions for mapped object",
        (Signal::SIGBUS, 1) => "invalid address alignment",
        (Signal::SIGBUS, 2) => "nonexistent physical address",
        (Signal::SIGBUS, 3) => "object-specific hardware error",
        (Signal::SIGILL, 1) => "illegal opcode",
        (Signal::SIGILL, 2) => "illegal trap",
        (Signal::SIGILL, 3) => "privileged opcode",
        (Signal::SIGILL, 4) => "illegal operand",
        (Signal::SIGILL, 5) => "illegal addressing mode",
        (Signal::SIGILL, 6) => "privileged register",
        (Signal::SIGILL, 7) => "coprocessor error",
        (Signal::SIGILL, 8) => "internal stack error",
        (Signal::SIGFPE, 1) => "floating-point division by zero",
        (Signal::SIGFPE, 2) => "floating-point overflow",
        (Signal::SIGFPE, 3) => "floating-point underflow",
        (Signal::SIGFPE, 4) => "floating-point inexact result",
        (Signal::SIGFPE, 5) => "floating-point invalid operation",
        (Signal::SIGFPE, 6) => "subscript out of range",
        (Signal::SIGFPE, 7) => "integer division by zero",
        (Signal::SIGFPE, 8) => "integer overflow",
        _ => return None,
    };
    Some(text)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
fn detail(_signal: Signal, _code: c_int) -> Option<&'static str> {
    None
}

/// Capacity of the diagnostic line, terminators included.
const LINE_CAPACITY: usize = 256;

/// Fixed-capacity ASCII buffer. Text past the capacity is dropped.
pub(crate) struct StackBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
}

impl StackBuffer {
    pub(crate) const fn new() -> Self {
        StackBuffer {
            bytes: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    pub(crate) fn push_str(&mut self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        let room = LINE_CAPACITY - self.len;
        let take = bytes.len().min(room);
        if let (Some(dst), Some(src)) = (
            self.bytes.get_mut(self.len..self.len + take),
            bytes.get(..take),
        ) {
            dst.copy_from_slice(src);
            self.len += take;
        }
    }

    pub(crate) fn push_hex(&mut self, value: usize) {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut scratch = [0u8; 2 + 2 * size_of::<usize>()];
        let mut start = scratch.len();
        let mut rest = value;
        loop {
            start -= 1;
            scratch[start] = DIGITS[rest & 0xf];
            rest >>= 4;
            if rest == 0 {
                break;
            }
        }
        start -= 2;
        scratch[start] = b'0';
        scratch[start + 1] = b'x';
        self.push_bytes(&scratch[start..]);
    }

    pub(crate) fn push_decimal(&mut self, value: i64) {
        let mut scratch = [0u8; 20];
        let mut start = scratch.len();
        let mut rest = value.unsigned_abs();
        loop {
            start -= 1;
            scratch[start] = b'0' + (rest % 10) as u8;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }
        if value < 0 {
            self.push_bytes(b"-");
        }
        self.push_bytes(&scratch[start..]);
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

fn write_stderr(mut bytes: &[u8]) {
    // SAFETY: descriptor 2 stays open for the life of the process.
    let stderr = unsafe { BorrowedFd::borrow_raw(libc::STDERR_FILENO) };
    while !bytes.is_empty() {
        match nix::unistd::write(stderr, bytes) {
            Ok(0) => return,
            Ok(written) => bytes = bytes.get(written..).unwrap_or_default(),
            Err(Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}
