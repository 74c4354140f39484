//! Error types for termguard.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;

/// Errors that can occur while changing signal dispositions.
#[derive(Error, Debug)]
pub enum GuardError {
    /// The OS refused to swap in the crash handler.
    #[error("Failed to intercept {signal}: {source}")]
    Install { signal: Signal, source: Errno },

    /// The OS refused to reinstate a saved disposition.
    #[error("Failed to restore disposition of {signal}: {source}")]
    Restore { signal: Signal, source: Errno },
}

/// Result type for termguard operations.
pub type GuardResult<T> = Result<T, GuardError>;
