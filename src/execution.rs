//! # Execution Control
//!
//! Continuing, single-stepping and stepping over software breakpoints.
//!
//! When the debuggee executes a planted `int3`, the kernel reports a `SIGTRAP` stop with the
//! instruction pointer one byte past the breakpoint address. Before [`ExecutionController::resume`]
//! returns such a stop, it resolves the hit in this exact order:
//!
//! 1. restore the original byte at the breakpoint address
//! 2. rewind the instruction pointer by one byte, back onto the breakpoint address
//! 3. single-step, so the original instruction executes exactly once
//! 4. plant the trap again, so the breakpoint fires the next time
//!
//! The caller therefore never sees a debuggee sitting on a breakpoint it already reported.

use std::fmt::Display;

use nix::sys::signal::Signal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::addr::Addr;
use crate::breakpoint::{Breakpoint, BreakpointId, BreakpointTable};
use crate::config::SessionConfig;
use crate::errors::{DebuggerError, Result};
use crate::memory::{plant_trap, remove_trap};
use crate::process::TracedProcess;
use crate::status::{decode, AnySignal, WaitOutcome};
use crate::tracee::Tracee;

/// Where the debuggee is, as far as the controller knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Continued or stepped, not waited for yet
    Running,
    /// Stopped because it hit the breakpoint at this address. The hit is already resolved.
    StoppedAtBreakpoint(Addr),
    StoppedOther(AnySignal),
    /// Stopped, but the wait status could not be classified
    StoppedUnknown,
    Exited(i32),
    Terminated(AnySignal),
    /// Vanished while we were working on it
    Lost,
    /// No longer traced by us
    Detached,
}

impl ExecState {
    /// True if no trace operation is possible anymore
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Exited(_) | Self::Terminated(_) | Self::Lost | Self::Detached
        )
    }
}

impl Display for ExecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::StoppedAtBreakpoint(addr) => write!(f, "stopped at breakpoint {addr}"),
            Self::StoppedOther(sig) => write!(f, "stopped by signal {} ({sig})", sig.raw()),
            Self::StoppedUnknown => write!(f, "stopped for an unknown reason"),
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Terminated(sig) => write!(f, "terminated by signal {} ({sig})", sig.raw()),
            Self::Lost => write!(f, "lost"),
            Self::Detached => write!(f, "detached"),
        }
    }
}

impl Serialize for ExecState {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut m = serializer.serialize_map(None)?;
        match self {
            Self::Running => m.serialize_entry("state", "running")?,
            Self::StoppedAtBreakpoint(addr) => {
                m.serialize_entry("state", "breakpoint")?;
                m.serialize_entry("addr", addr)?;
            }
            Self::StoppedOther(sig) => {
                m.serialize_entry("state", "stopped")?;
                m.serialize_entry("signal", sig)?;
            }
            Self::StoppedUnknown => m.serialize_entry("state", "unknown")?,
            Self::Exited(code) => {
                m.serialize_entry("state", "exited")?;
                m.serialize_entry("code", code)?;
            }
            Self::Terminated(sig) => {
                m.serialize_entry("state", "terminated")?;
                m.serialize_entry("signal", sig)?;
            }
            Self::Lost => m.serialize_entry("state", "lost")?,
            Self::Detached => m.serialize_entry("state", "detached")?,
        }
        m.end()
    }
}

/// What [`ExecutionController::session_cleanup`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupReport {
    /// The debuggee was already gone or detached, nothing was touched
    NoOp,
    /// Breakpoints were restored and tracing was stopped
    Detached { restored: usize, failed: usize },
}

impl Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOp => write!(f, "Nothing to clean up"),
            Self::Detached { restored, failed: 0 } => {
                write!(f, "Detached cleanly, restored {restored} breakpoint(s)")
            }
            Self::Detached { restored, failed } => write!(
                f,
                "Detached, restored {restored} breakpoint(s), {failed} could not be restored"
            ),
        }
    }
}

/// Drives the debuggee and owns the step-over-breakpoint protocol
#[derive(Debug, Clone)]
pub struct ExecutionController {
    state: ExecState,
    /// Signal that stopped the debuggee and still has to be delivered to it
    pending_signal: Option<AnySignal>,
    passthrough_signals: Vec<Signal>,
}

impl ExecutionController {
    /// A controller for a debuggee that just completed the initial stop after `exec`
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: ExecState::StoppedOther(Signal::SIGTRAP.into()),
            pending_signal: None,
            passthrough_signals: config.passthrough_signals.clone(),
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn pending_signal(&self) -> Option<AnySignal> {
        self.pending_signal
    }

    /// Continues the debuggee until it stops for a reason worth reporting
    ///
    /// Stops by one of the passthrough signals are not reported, the signal is delivered and the
    /// debuggee continued again. A stop at one of `breakpoints` is resolved before returning, see
    /// the [module documentation](self).
    ///
    /// # Errors
    ///
    /// * [`DebuggerError::NotRunning`] if the debuggee can no longer be traced, nothing is done
    /// * [`DebuggerError::LostTarget`] if the debuggee vanished while stepping over a breakpoint
    /// * [`DebuggerError::UnknownStatus`] for an unclassifiable stop, the debuggee stays usable
    pub fn resume<T: Tracee>(
        &mut self,
        process: &mut TracedProcess<T>,
        breakpoints: &BreakpointTable,
    ) -> Result<WaitOutcome> {
        self.ensure_traceable(process)?;
        loop {
            let sig = self.pending_signal.take();
            debug!("continue with signal {sig:?}");
            let res = process.tracee_mut().cont(sig);
            self.observe(process, res)?;
            self.state = ExecState::Running;

            let outcome = self.wait(process)?;
            match outcome {
                WaitOutcome::Stopped(sig) if self.is_passthrough(sig) => {
                    debug!("forwarding {sig} to the debuggee");
                    continue;
                }
                WaitOutcome::Stopped(AnySignal::Named(Signal::SIGTRAP)) => {
                    if let Some(ended) = self.on_trap(process, breakpoints)? {
                        return Ok(ended);
                    }
                }
                _ => (),
            }
            return Ok(outcome);
        }
    }

    /// Executes one machine instruction
    ///
    /// Breakpoints get no special treatment here: stepping onto a breakpoint address stops on
    /// the planted trap byte and is reported like any other stop.
    pub fn single_step<T: Tracee>(&mut self, process: &mut TracedProcess<T>) -> Result<WaitOutcome> {
        self.ensure_traceable(process)?;
        let sig = self.pending_signal.take();
        debug!("single step with signal {sig:?}");
        let res = process.tracee_mut().step(sig);
        self.observe(process, res)?;
        self.state = ExecState::Running;
        self.wait(process)
    }

    /// Sets a breakpoint at `addr`
    ///
    /// If the trap cannot be planted, the reservation in `breakpoints` is given up again.
    pub fn insert_breakpoint<T: Tracee>(
        &mut self,
        process: &mut TracedProcess<T>,
        breakpoints: &mut BreakpointTable,
        addr: Addr,
    ) -> Result<BreakpointId> {
        self.ensure_traceable(process)?;
        let id = breakpoints.insert(addr)?;
        match plant_trap(process.tracee_mut(), addr) {
            Ok(saved) => {
                breakpoints.arm(id, saved);
                info!("breakpoint {} set at {addr}", id.index());
                Ok(id)
            }
            Err(e) => {
                breakpoints.rollback(id);
                error!("could not set breakpoint at {addr}: {e}");
                self.observe(process, Err(e))
            }
        }
    }

    /// Restores the original byte at `addr` and forgets the breakpoint there
    pub fn remove_breakpoint<T: Tracee>(
        &mut self,
        process: &mut TracedProcess<T>,
        breakpoints: &mut BreakpointTable,
        addr: Addr,
    ) -> Result<Breakpoint> {
        self.ensure_traceable(process)?;
        let saved = breakpoints
            .find_by_address(addr)
            .ok_or(DebuggerError::NoSuchBreakpoint(addr))?
            .saved_byte();
        if let Some(saved) = saved {
            let res = remove_trap(process.tracee_mut(), addr, saved);
            self.observe(process, res)?;
        }
        let bp = breakpoints
            .remove(addr)
            .ok_or(DebuggerError::NoSuchBreakpoint(addr))?;
        info!("breakpoint {} at {addr} removed", bp.id().index());
        Ok(bp)
    }

    /// Restores all breakpoints and detaches from the debuggee
    ///
    /// If the debuggee is already gone or detached, memory is left alone and
    /// [`CleanupReport::NoOp`] is returned. Calling this repeatedly is fine.
    pub fn session_cleanup<T: Tracee>(
        &mut self,
        process: &mut TracedProcess<T>,
        breakpoints: &mut BreakpointTable,
    ) -> Result<CleanupReport> {
        if !process.is_traceable() || self.state.is_terminal() {
            debug!("debuggee is {}, nothing to clean up", self.state);
            breakpoints.clear();
            return Ok(CleanupReport::NoOp);
        }

        let armed: Vec<(Addr, u8)> = breakpoints
            .all_enabled()
            .filter_map(|bp| bp.saved_byte().map(|b| (bp.addr(), b)))
            .collect();
        let mut restored = 0;
        let mut failed = 0;
        for (addr, saved) in armed {
            match remove_trap(process.tracee_mut(), addr, saved) {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!("could not restore the original byte at {addr}: {e}");
                    failed += 1;
                }
            }
        }
        breakpoints.clear();

        let sig = self.pending_signal.take();
        match process.tracee_mut().detach(sig) {
            Ok(()) => {
                process.mark_detached();
                self.state = ExecState::Detached;
                info!("detached cleanly from {}", process.pid());
                Ok(CleanupReport::Detached { restored, failed })
            }
            Err(e) if e.is_gone() => {
                warn!("debuggee vanished during cleanup");
                process.mark_gone();
                self.state = ExecState::Lost;
                Ok(CleanupReport::NoOp)
            }
            Err(e) => {
                error!("could not detach: {e}");
                Err(e)
            }
        }
    }

    fn is_passthrough(&self, sig: AnySignal) -> bool {
        sig.named()
            .is_some_and(|sig| self.passthrough_signals.contains(&sig))
    }

    fn ensure_traceable<T: Tracee>(&self, process: &TracedProcess<T>) -> Result<()> {
        if process.is_traceable() && !self.state.is_terminal() {
            Ok(())
        } else {
            Err(DebuggerError::NotRunning(self.state))
        }
    }

    /// Marks the debuggee as lost if `res` says it is gone
    fn observe<T: Tracee, R>(&mut self, process: &mut TracedProcess<T>, res: Result<R>) -> Result<R> {
        if let Err(e) = &res {
            if e.is_gone() {
                process.mark_gone();
                self.state = ExecState::Lost;
            }
        }
        res
    }

    fn wait<T: Tracee>(&mut self, process: &mut TracedProcess<T>) -> Result<WaitOutcome> {
        let res = process.tracee_mut().wait();
        let status = self.observe(process, res)?;
        match decode(status) {
            Ok(outcome) => {
                self.apply(process, outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.state = ExecState::StoppedUnknown;
                Err(e)
            }
        }
    }

    fn apply<T: Tracee>(&mut self, process: &mut TracedProcess<T>, outcome: WaitOutcome) {
        self.state = match outcome {
            WaitOutcome::Stopped(sig) => {
                self.pending_signal = deliverable(sig);
                ExecState::StoppedOther(sig)
            }
            WaitOutcome::Exited(code) => {
                process.mark_gone();
                ExecState::Exited(code)
            }
            WaitOutcome::Terminated(sig) => {
                process.mark_gone();
                ExecState::Terminated(sig)
            }
        };
        debug!("debuggee {}", self.state);
    }

    /// Checks a `SIGTRAP` stop against the breakpoints and resolves a hit
    ///
    /// Returns the outcome if the debuggee ended while stepping over the breakpoint.
    fn on_trap<T: Tracee>(
        &mut self,
        process: &mut TracedProcess<T>,
        breakpoints: &BreakpointTable,
    ) -> Result<Option<WaitOutcome>> {
        let res = process.tracee().instruction_pointer();
        let ip = self.observe(process, res)?;

        // int3 is one byte, the debuggee stops right behind it
        let Some(addr) = ip.checked_sub(1) else {
            return Ok(None);
        };
        let Some(bp) = breakpoints.find_by_address(addr) else {
            return Ok(None);
        };
        let Some(saved) = bp.saved_byte() else {
            warn!("breakpoint at {addr} has no saved byte");
            return Ok(None);
        };

        info!("breakpoint {} hit at {addr}", bp.id().index());
        self.state = ExecState::StoppedAtBreakpoint(addr);
        match self.step_over(process, addr, saved) {
            Ok(None) => Ok(None),
            Ok(Some(ended)) => {
                self.apply(process, ended);
                Ok(Some(ended))
            }
            Err(e) => {
                error!("could not step over the breakpoint at {addr}: {e}");
                if e.is_gone() {
                    process.mark_gone();
                    self.state = ExecState::Lost;
                } else {
                    // still attached, cleanup can restore the text and detach
                    self.state = ExecState::StoppedUnknown;
                }
                Err(DebuggerError::LostTarget(Box::new(e)))
            }
        }
    }

    fn step_over<T: Tracee>(
        &mut self,
        process: &mut TracedProcess<T>,
        addr: Addr,
        saved: u8,
    ) -> Result<Option<WaitOutcome>> {
        debug!("stepping over the breakpoint at {addr}");
        let tracee = process.tracee_mut();

        remove_trap(tracee, addr, saved)?;
        tracee.set_instruction_pointer(addr)?;
        tracee.step(None)?;
        match decode(tracee.wait()?)? {
            WaitOutcome::Stopped(AnySignal::Named(Signal::SIGTRAP)) => (),
            WaitOutcome::Stopped(sig) => {
                debug!("{sig} arrived while stepping over {addr}");
                self.pending_signal = deliverable(sig);
            }
            ended => return Ok(Some(ended)),
        }

        let reread = plant_trap(tracee, addr)?;
        if reread != saved {
            warn!("byte at {addr} changed from {saved:#04x} to {reread:#04x} while stepping over it");
        }
        Ok(None)
    }
}

/// The signal to hand to the debuggee when it is resumed after stopping with `sig`
fn deliverable(sig: AnySignal) -> Option<AnySignal> {
    match sig {
        AnySignal::Named(Signal::SIGTRAP | Signal::SIGSTOP) => None,
        other => Some(other),
    }
}
