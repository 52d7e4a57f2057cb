use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;

#[cfg(feature = "cli")]
pub mod cli;

pub const HELP: &str = "\
continue, c            resume the debuggee until it stops
step, s                execute a single instruction
regs                   show the registers
break <hex address>    set a breakpoint
delete <hex address>   remove a breakpoint
breakpoints, bl        list breakpoints
peek <hex address>     read a word of memory
entry                  show the runtime entry point of the executable
help, h                show this help
quit, q                restore breakpoints, detach and exit";

/// A request from the user to the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    DebuggerQuit,
    Continue,
    StepSingle,
    DumpRegisters,
    SetBreakpoint(Addr),
    DelBreakpoint(Addr),
    ListBreakpoints,
    ReadMem(Addr),
    EntryPoint,
    Help,
}

impl Status {
    /// Interprets a command that was already split into words
    ///
    /// # Errors
    ///
    /// [`DebuggerError::UnknownCommand`] for anything that is not a command, and
    /// [`DebuggerError::MissingArgument`] or [`DebuggerError::BadAddress`] for commands
    /// without a usable address.
    pub fn from_words(words: &[impl AsRef<str>]) -> Result<Self> {
        let Some(cmd) = words.first().map(|w| w.as_ref()) else {
            return Err(DebuggerError::UnknownCommand(String::new()));
        };
        let addr = || -> Result<Addr> {
            words
                .get(1)
                .ok_or(DebuggerError::MissingArgument("<hex address>"))?
                .as_ref()
                .parse()
        };

        let status = match cmd {
            "continue" | "c" | "cont" => Status::Continue,
            "step" | "s" | "si" => Status::StepSingle,
            "regs" | "registers" => Status::DumpRegisters,
            "break" | "b" => Status::SetBreakpoint(addr()?),
            "delete" | "d" => Status::DelBreakpoint(addr()?),
            "breakpoints" | "bl" => Status::ListBreakpoints,
            "peek" | "x" => Status::ReadMem(addr()?),
            "entry" => Status::EntryPoint,
            "help" | "h" | "?" => Status::Help,
            "quit" | "q" | "exit" => Status::DebuggerQuit,
            other => return Err(DebuggerError::UnknownCommand(other.to_string())),
        };
        Ok(status)
    }
}

pub trait DebuggerUI {
    /// Shows `feedback` to the user and returns what the user wants next
    fn process(&mut self, feedback: Feedback) -> Result<Status>;
    /// Shows the last `feedback` of a session, nothing is asked anymore
    fn report(&mut self, feedback: Feedback) -> Result<()>;
}
