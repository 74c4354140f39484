//! Scoped crash and interrupt handling for terminal applications.
//!
//! While at least one [`SignalGuard`] is alive, fatal and interrupt signals
//! are intercepted: a one-line diagnostic is written to stderr, unread
//! terminal input is discarded, and the signal is handed back to whatever
//! disposition was registered before the first guard was created.
//!
//! ```no_run
//! let _guard = termguard::SignalGuard::new()?;
//! // ... run the terminal UI ...
//! # Ok::<(), termguard::GuardError>(())
//! ```
#![cfg(unix)]

mod activation;
mod context;
mod diagnostic;
mod error;
mod guard;
mod handler;
mod os;
mod signals;
mod terminal;

pub use error::*;
pub use guard::SignalGuard;
pub use signals::WATCHED_SIGNALS;
pub use terminal::{discard_pending_input, discard_pending_input_on};
