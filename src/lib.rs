//! # trapmine
//!
//! A minimal debugger for a single traced process on Linux x86_64.
//!
//! It launches a program under [ptrace](nix::sys::ptrace), sets software breakpoints by
//! patching an `int3` over the first byte of an instruction, continues, single-steps, and shows
//! registers. The interesting part is the breakpoint engine:
//!
//! - [`memory`] plants and removes the trap byte, leaving every other bit of the text intact
//! - [`breakpoint`] keeps the table of breakpoints of a session
//! - [`execution`] continues and steps the debuggee and steps over breakpoints it hits
//! - [`status`] classifies what `waitpid` reports
//! - [`process`] spawns the debuggee under trace
//!
//! [`session::Session`] ties these together into a request and response API, which
//! [`debugger::Debugger`] drives from a [`ui::DebuggerUI`].

pub mod addr;
pub mod breakpoint;
pub mod config;
pub mod debugger;
pub mod entry;
pub mod errors;
pub mod execution;
pub mod feedback;
pub mod memory;
pub mod process;
pub mod session;
pub mod status;
pub mod tracee;
pub mod ui;

#[cfg(test)]
pub(crate) mod mock;

/// A word of the debuggee's memory, as transferred by `PTRACE_PEEKTEXT` and `PTRACE_POKETEXT`
pub type Word = i64;

pub use crate::addr::Addr;
pub use crate::errors::{DebuggerError, Result};
