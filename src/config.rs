//! Settings of a debug session

use nix::sys::signal::Signal;

/// Upper bound of concurrently enabled breakpoints if nothing else is configured
pub const DEFAULT_BREAKPOINT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum number of enabled breakpoints
    pub breakpoint_capacity: usize,
    /// Stop signals that are handed to the debuggee on the spot when continuing, without
    /// reporting the stop
    pub passthrough_signals: Vec<Signal>,
    /// Ask the kernel to not randomize the address space of the debuggee
    pub disable_aslr: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            breakpoint_capacity: DEFAULT_BREAKPOINT_CAPACITY,
            passthrough_signals: vec![Signal::SIGWINCH, Signal::SIGCHLD],
            disable_aslr: true,
        }
    }
}
