use std::fmt::Display;

use serde_json::{json, Value};

use crate::addr::Addr;
use crate::breakpoint::{Breakpoint, BreakpointId};
use crate::errors::DebuggerError;
use crate::execution::{CleanupReport, ExecState};
use crate::tracee::Registers;
use crate::Word;

/// The answer of the debugger to a [`Status`](crate::ui::Status)
#[derive(Debug)]
pub enum Feedback {
    Text(String),
    Word(Addr, Word),
    Addr(Addr),
    Registers(Registers),
    BreakpointSet(BreakpointId, Addr),
    BreakpointRemoved(Breakpoint),
    Breakpoints(Vec<Breakpoint>),
    /// The debuggee stopped, exited or was killed
    Execution(ExecState),
    Cleanup(CleanupReport),
    Error(DebuggerError),
}

impl Feedback {
    /// Machine readable form, one JSON object per feedback
    pub fn to_json(&self) -> Value {
        match self {
            Feedback::Text(t) => json!({ "text": t }),
            Feedback::Word(addr, w) => json!({ "word": { "addr": addr, "value": format!("{w:#018x}") } }),
            Feedback::Addr(addr) => json!({ "addr": addr }),
            Feedback::Registers(regs) => json!({ "registers": regs }),
            Feedback::BreakpointSet(id, addr) => {
                json!({ "breakpoint_set": { "id": id, "addr": addr } })
            }
            Feedback::BreakpointRemoved(bp) => json!({ "breakpoint_removed": bp }),
            Feedback::Breakpoints(bps) => json!({ "breakpoints": bps }),
            Feedback::Execution(state) => json!({ "execution": state }),
            Feedback::Cleanup(report) => json!({ "cleanup": report }),
            Feedback::Error(e) => json!({ "error": e.to_string() }),
        }
    }
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Error(e) => write!(f, "Error: {e}")?,
            Feedback::Registers(regs) => write!(f, "{regs}")?,
            Feedback::Word(addr, w) => write!(f, "{addr}: {w:#018x}")?,
            Feedback::Addr(addr) => write!(f, "{addr}")?,
            Feedback::Text(t) => write!(f, "{t}")?,
            Feedback::BreakpointSet(id, addr) => {
                write!(f, "Breakpoint {} set at {addr}", id.index())?
            }
            Feedback::BreakpointRemoved(bp) => {
                write!(f, "Breakpoint {} at {} removed", bp.id().index(), bp.addr())?
            }
            Feedback::Breakpoints(bps) => {
                if bps.is_empty() {
                    write!(f, "No breakpoints")?;
                }
                for (idx, bp) in bps.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    match bp.saved_byte() {
                        Some(b) => write!(f, "{:<4}{}  saved {b:#04x}", bp.id().index(), bp.addr())?,
                        None => write!(f, "{:<4}{}  (not armed)", bp.id().index(), bp.addr())?,
                    }
                }
            }
            Feedback::Execution(state) => write!(f, "Debuggee {state}")?,
            Feedback::Cleanup(report) => write!(f, "{report}")?,
        }

        Ok(())
    }
}

impl From<Result<Feedback, DebuggerError>> for Feedback {
    fn from(value: Result<Feedback, DebuggerError>) -> Self {
        match value {
            Ok(f) => f,
            Err(e) => Feedback::Error(e),
        }
    }
}
