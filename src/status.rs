//! # Wait Status Decoding
//!
//! Turns the raw result of `waitpid` into a [`WaitOutcome`]. Decoding is pure: it never touches
//! the traced process.
//!
//! The status is decoded from the integer the kernel filled in rather than through
//! [`nix::sys::wait::WaitStatus`], which has no representation for real-time signals.

use std::fmt::Display;

use nix::libc;
use nix::sys::signal::Signal;
use serde::Serialize;
use tracing::warn;

use crate::errors::{DebuggerError, Result};

/// A signal number as the kernel reports it
///
/// Standard signals are named by [`Signal`], real-time signals only have a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnySignal {
    Named(Signal),
    Realtime(i32),
}

impl AnySignal {
    pub fn from_raw(signo: i32) -> Self {
        match Signal::try_from(signo) {
            Ok(sig) => Self::Named(sig),
            Err(_) => Self::Realtime(signo),
        }
    }

    pub fn raw(&self) -> i32 {
        match self {
            Self::Named(sig) => *sig as i32,
            Self::Realtime(signo) => *signo,
        }
    }

    /// The [`Signal`], if nix has a name for it
    pub fn named(self) -> Option<Signal> {
        match self {
            Self::Named(sig) => Some(sig),
            Self::Realtime(_) => None,
        }
    }
}

impl From<Signal> for AnySignal {
    fn from(sig: Signal) -> Self {
        Self::Named(sig)
    }
}

impl Display for AnySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(sig) => write!(f, "{}", sig.as_str()),
            Self::Realtime(signo) => write!(f, "SIG{signo}"),
        }
    }
}

impl Serialize for AnySignal {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// What happened to the traced process when we last waited for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Stopped by delivery of a signal, still alive
    Stopped(AnySignal),
    /// Exited normally with the given exit code
    Exited(i32),
    /// Killed by a signal
    Terminated(AnySignal),
}

impl Display for WaitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped(sig) => write!(f, "stopped by signal {} ({sig})", sig.raw()),
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Terminated(sig) => write!(f, "terminated by signal {} ({sig})", sig.raw()),
        }
    }
}

impl Serialize for WaitOutcome {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("WaitOutcome", 2)?;
        match self {
            Self::Stopped(sig) => {
                s.serialize_field("kind", "stopped")?;
                s.serialize_field("signal", sig)?;
            }
            Self::Exited(code) => {
                s.serialize_field("kind", "exited")?;
                s.serialize_field("code", code)?;
            }
            Self::Terminated(sig) => {
                s.serialize_field("kind", "terminated")?;
                s.serialize_field("signal", sig)?;
            }
        }
        s.end()
    }
}

/// Classifies a raw status integer as filled in by `waitpid(2)`
///
/// # Errors
///
/// Anything that is not a stop, an exit or a kill is reported as
/// [`DebuggerError::UnknownStatus`]. Without `WNOHANG`, `WCONTINUED` or ptrace options a
/// conforming kernel never produces those.
pub fn decode(raw: i32) -> Result<WaitOutcome> {
    if libc::WIFSTOPPED(raw) {
        Ok(WaitOutcome::Stopped(AnySignal::from_raw(libc::WSTOPSIG(raw))))
    } else if libc::WIFEXITED(raw) {
        Ok(WaitOutcome::Exited(libc::WEXITSTATUS(raw)))
    } else if libc::WIFSIGNALED(raw) {
        Ok(WaitOutcome::Terminated(AnySignal::from_raw(libc::WTERMSIG(raw))))
    } else {
        let err = DebuggerError::UnknownStatus(format!("{raw:#x}"));
        warn!("{err}");
        Err(err)
    }
}

/// Raw wait statuses the way the kernel encodes them, for scripting a fake tracee
#[cfg(test)]
pub(crate) mod raw {
    pub(crate) fn stopped(signo: i32) -> i32 {
        (signo << 8) | 0x7f
    }

    pub(crate) fn exited(code: i32) -> i32 {
        (code & 0xff) << 8
    }

    pub(crate) fn signaled(signo: i32) -> i32 {
        signo & 0x7f
    }

    pub(crate) const CONTINUED: i32 = 0xffff;
}
