//! # Debug Session
//!
//! A [`Session`] bundles everything that belongs to debugging one process: the
//! [`TracedProcess`], its [`BreakpointTable`] and the [`ExecutionController`]. It is the request
//! and response API that user interfaces and test drivers talk to.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::addr::Addr;
use crate::breakpoint::{Breakpoint, BreakpointId, BreakpointTable};
use crate::config::SessionConfig;
use crate::entry::entry_point;
use crate::errors::{DebuggerError, Result};
use crate::execution::{CleanupReport, ExecState, ExecutionController};
use crate::memory;
use crate::process::{spawn_traced, TracedProcess};
use crate::status::WaitOutcome;
use crate::tracee::{Ptrace, Registers, Tracee};
use crate::Word;

pub struct Session<T: Tracee = Ptrace> {
    executable: PathBuf,
    process: TracedProcess<T>,
    breakpoints: BreakpointTable,
    controller: ExecutionController,
}

impl Session<Ptrace> {
    /// Starts `executable` under trace and waits for its first stop
    pub fn launch(
        executable: impl AsRef<Path>,
        args: &[String],
        config: &SessionConfig,
    ) -> Result<Self> {
        let executable = executable.as_ref().to_owned();
        let process = spawn_traced(&executable, args, config)?;
        info!("session for {} started", executable.display());
        Ok(Self::new(executable, process, config))
    }
}

impl<T: Tracee> Session<T> {
    /// A session for a process that has already completed the initial stop
    pub fn new(executable: PathBuf, process: TracedProcess<T>, config: &SessionConfig) -> Self {
        Self {
            executable,
            process,
            breakpoints: BreakpointTable::new(config.breakpoint_capacity),
            controller: ExecutionController::new(config),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn process(&self) -> &TracedProcess<T> {
        &self.process
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn state(&self) -> ExecState {
        self.controller.state()
    }

    pub fn resume(&mut self) -> Result<WaitOutcome> {
        self.controller.resume(&mut self.process, &self.breakpoints)
    }

    pub fn single_step(&mut self) -> Result<WaitOutcome> {
        self.controller.single_step(&mut self.process)
    }

    pub fn insert_breakpoint(&mut self, addr: Addr) -> Result<BreakpointId> {
        self.controller
            .insert_breakpoint(&mut self.process, &mut self.breakpoints, addr)
    }

    pub fn remove_breakpoint(&mut self, addr: Addr) -> Result<Breakpoint> {
        self.controller
            .remove_breakpoint(&mut self.process, &mut self.breakpoints, addr)
    }

    pub fn cleanup(&mut self) -> Result<CleanupReport> {
        self.controller
            .session_cleanup(&mut self.process, &mut self.breakpoints)
    }

    pub fn registers(&self) -> Result<Registers> {
        self.ensure_traceable()?;
        self.process.tracee().registers()
    }

    /// Reads a word of the debuggee's memory, as the debuggee sees it
    ///
    /// Planted traps are visible in the result.
    pub fn read_word(&self, addr: Addr) -> Result<Word> {
        self.ensure_traceable()?;
        memory::read_word(self.process.tracee(), addr)
    }

    /// The runtime address at which the debuggee's executable starts executing
    pub fn entry_point(&self) -> Result<Addr> {
        self.ensure_traceable()?;
        entry_point(self.process.pid(), &self.executable)
    }

    fn ensure_traceable(&self) -> Result<()> {
        if self.process.is_traceable() {
            Ok(())
        } else {
            Err(DebuggerError::NotRunning(self.state()))
        }
    }
}
