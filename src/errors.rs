use nix::errno::Errno;
use thiserror::Error;

use crate::addr::Addr;
use crate::execution::ExecState;

pub type Result<T> = std::result::Result<T, DebuggerError>;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Could not set up the debuggee: {0}")]
    SetupFailure(String),
    #[error("Access to the traced process was denied: {0}")]
    TraceAccessDenied(Errno),
    #[error("The traced process does not exist (anymore)")]
    NoSuchProcess,
    #[error("A breakpoint already exists at {0}")]
    Duplicate(Addr),
    #[error("Maximum number of breakpoints reached ({0})")]
    CapacityExceeded(usize),
    #[error("Lost the traced process while stepping over a breakpoint: {0}")]
    LostTarget(#[source] Box<DebuggerError>),
    #[error("Unknown wait status: {0}")]
    UnknownStatus(String),
    #[error("The debuggee is not traceable in state {0}")]
    NotRunning(ExecState),
    #[error("No breakpoint at {0}")]
    NoSuchBreakpoint(Addr),
    #[error("Os error: {0}")]
    Os(Errno),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("Could not parse the executable: {0}")]
    Object(#[from] object::Error),
    #[error("Could not find the executable: {0}")]
    Which(#[from] which::Error),
    #[error("The executable is not mapped into the debuggee")]
    NoEntryMapping,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Not a hexadecimal address: {0:?}")]
    BadAddress(String),
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
    #[cfg(feature = "cli")]
    #[error("Could not read input: {0}")]
    Dialoguer(#[from] dialoguer::Error),
}

impl From<Errno> for DebuggerError {
    fn from(value: Errno) -> Self {
        match value {
            Errno::ESRCH | Errno::ECHILD => DebuggerError::NoSuchProcess,
            Errno::EPERM | Errno::EACCES | Errno::EIO | Errno::EFAULT => {
                DebuggerError::TraceAccessDenied(value)
            }
            other => DebuggerError::Os(other),
        }
    }
}

impl DebuggerError {
    /// True if the error means that the traced process is gone
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            DebuggerError::NoSuchProcess | DebuggerError::LostTarget(_)
        )
    }
}
