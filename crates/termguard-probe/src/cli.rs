//! Command-line interface definition using clap.

use clap::{Parser, Subcommand, ValueEnum};

/// Arms termguard and then crashes on purpose.
#[derive(Parser, Debug)]
#[command(name = "termguard-probe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trigger a fatal or interrupt signal while guards are armed
    Crash {
        /// Which signal to provoke
        #[arg(value_enum)]
        fault: Fault,

        /// Number of nested guards alive when the fault fires
        #[arg(long, default_value_t = 1)]
        nest: usize,

        /// Disposition registered before the guards
        #[arg(long, value_enum, default_value_t = Prior::Default)]
        prior: Prior,

        /// Do not arm any guard
        #[arg(long)]
        no_guard: bool,
    },

    /// Raise SIGTERM after a delay and report how much terminal input is left
    FlushCheck {
        /// Milliseconds to wait after printing "ready"
        #[arg(long, default_value_t = 1500)]
        delay_ms: u64,

        /// Do not arm any guard
        #[arg(long)]
        no_guard: bool,
    },
}

/// How the process is brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Fault {
    /// Integer division by zero (SIGFPE)
    DivideByZero,
    /// Store to an unmapped address (SIGSEGV)
    Segfault,
    /// Execute an undefined instruction (SIGILL)
    IllegalInstruction,
    /// Call abort() (SIGABRT)
    Abort,
    /// Raise SIGBUS
    BusError,
    /// Raise SIGINT
    Interrupt,
    /// Raise SIGQUIT
    Quit,
    /// Raise SIGTERM
    Terminate,
}

/// Disposition to install before the guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Prior {
    /// Reset to the default action
    Default,
    /// Ignore the signal
    Ignore,
    /// A plain handler that reports and exits with status 42
    Handler,
    /// An SA_SIGINFO handler that reports and exits with status 42
    Siginfo,
}
