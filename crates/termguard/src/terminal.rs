//! Discarding unread terminal input after an abnormal interruption.

use nix::sys::termios::{FlushArg, tcflush};
use std::io::IsTerminal;
use std::os::fd::BorrowedFd;

/// Discard bytes typed or pasted into stdin that nobody has read yet.
///
/// Returns `true` if stdin is a terminal and its input queue was flushed.
/// Safe to call from a signal handler.
pub fn discard_pending_input() -> bool {
    // SAFETY: descriptor 0 is only borrowed for the duration of the call.
    let stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
    discard_pending_input_on(stdin)
}

/// Like [`discard_pending_input`], for an arbitrary descriptor.
///
/// Pipes, files and closed descriptors are left alone and yield `false`.
pub fn discard_pending_input_on(fd: BorrowedFd<'_>) -> bool {
    if !fd.is_terminal() {
        return false;
    }
    tcflush(fd, FlushArg::TCIFLUSH).is_ok()
}
