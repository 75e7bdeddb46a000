//! Fatal shutdown capability.
//!
//! Permanent loss of the bus connection ends the process so a supervisor can
//! restart it. The exit itself sits behind [`FatalHandler`] so tests can
//! observe the request without exiting.

use tracing::error;

/// Exit status used when the bus connection is permanently lost.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Terminates the process.
pub trait FatalHandler: Send + Sync {
    /// Terminate with `code`. Called at most once per server state.
    fn terminate(&self, code: i32);
}

/// Exits the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl FatalHandler for ProcessExit {
    fn terminate(&self, code: i32) {
        error!(code, "Terminating process");
        std::process::exit(code);
    }
}
