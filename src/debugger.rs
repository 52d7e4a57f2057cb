//! # Debugger Module
//!
//! Connects a [`DebuggerUI`] to a [`Session`].
//!
//! The [`Debugger`] launches the debuggee, then asks the UI for one [`Status`] at a time, runs
//! it against the session and hands the resulting [`Feedback`] back to the UI. Errors of single
//! commands are reported to the user and never end the loop.

use std::path::Path;

use tracing::{error, info};

use crate::config::SessionConfig;
use crate::errors::{DebuggerError, Result};
use crate::execution::CleanupReport;
use crate::feedback::Feedback;
use crate::session::Session;
use crate::tracee::{Ptrace, Tracee};
use crate::ui::{DebuggerUI, Status, HELP};

pub struct Debugger<UI: DebuggerUI, T: Tracee = Ptrace> {
    session: Option<Session<T>>,
    ui: UI,
    config: SessionConfig,
}

impl<UI: DebuggerUI> Debugger<UI, Ptrace> {
    /// Starts `executable` under trace
    ///
    /// # Errors
    ///
    /// Everything that prevents the debuggee from reaching its first stop. No session exists
    /// afterwards.
    pub fn launch_debuggee(&mut self, executable: impl AsRef<Path>, args: &[String]) -> Result<()> {
        let session = Session::launch(executable, args, &self.config)?;
        self.session = Some(session);
        Ok(())
    }
}

impl<UI: DebuggerUI, T: Tracee> Debugger<UI, T> {
    pub fn build(ui: UI, config: SessionConfig) -> Self {
        Debugger {
            session: None,
            ui,
            config,
        }
    }

    /// Uses an already started session instead of launching one
    pub fn with_session(mut self, session: Session<T>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&Session<T>> {
        self.session.as_ref()
    }

    pub fn ui(&self) -> &UI {
        &self.ui
    }

    /// Runs commands from the UI until it asks to quit
    ///
    /// Quitting cleans the session up and reports how that went. Only failures of the UI itself
    /// end this with an error.
    pub fn run_debugger(&mut self) -> Result<()> {
        let mut feedback = self.initial_feedback();
        loop {
            let status = match self.ui.process(feedback) {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(s) => s,
            };
            feedback = match status {
                Status::DebuggerQuit => break,
                Status::Continue => self.cont(),
                Status::StepSingle => self.step(),
                Status::SetBreakpoint(addr) => self.on_session(|s| {
                    let id = s.insert_breakpoint(addr)?;
                    Ok(Feedback::BreakpointSet(id, addr))
                }),
                Status::DelBreakpoint(addr) => {
                    self.on_session(|s| Ok(Feedback::BreakpointRemoved(s.remove_breakpoint(addr)?)))
                }
                Status::ListBreakpoints => self.on_session(|s| {
                    Ok(Feedback::Breakpoints(
                        s.breakpoints().all_enabled().cloned().collect(),
                    ))
                }),
                Status::DumpRegisters => {
                    self.on_session(|s| Ok(Feedback::Registers(s.registers()?)))
                }
                Status::ReadMem(addr) => {
                    self.on_session(|s| Ok(Feedback::Word(addr, s.read_word(addr)?)))
                }
                Status::EntryPoint => self.on_session(|s| Ok(Feedback::Addr(s.entry_point()?))),
                Status::Help => Feedback::Text(HELP.to_string()),
            };
        }

        let last = match self.cleanup() {
            Ok(report) => {
                info!("{report}");
                Feedback::Cleanup(report)
            }
            Err(e) => {
                error!("cleanup failed: {e}");
                Feedback::Error(e)
            }
        };
        self.ui.report(last)
    }

    /// Restores all breakpoints and detaches, if there is anything to clean up
    pub fn cleanup(&mut self) -> Result<CleanupReport> {
        match self.session.as_mut() {
            Some(s) => s.cleanup(),
            None => Ok(CleanupReport::NoOp),
        }
    }

    fn initial_feedback(&self) -> Feedback {
        let Some(session) = &self.session else {
            return Feedback::Error(DebuggerError::SetupFailure("no debuggee".to_string()));
        };
        let regs = match session.registers() {
            Ok(r) => r.to_string(),
            Err(e) => format!("registers unavailable: {e}"),
        };
        Feedback::Text(format!("Debuggee {}\n{regs}", session.state()))
    }

    fn cont(&mut self) -> Feedback {
        self.on_session(|s| {
            s.resume()?;
            Ok(Feedback::Execution(s.state()))
        })
    }

    fn step(&mut self) -> Feedback {
        self.on_session(|s| {
            s.single_step()?;
            Ok(Feedback::Execution(s.state()))
        })
    }

    fn on_session<F>(&mut self, f: F) -> Feedback
    where
        F: FnOnce(&mut Session<T>) -> Result<Feedback>,
    {
        match self.session.as_mut() {
            Some(s) => f(s).into(),
            None => Feedback::Error(DebuggerError::SetupFailure("no debuggee".to_string())),
        }
    }
}
