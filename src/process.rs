//! # Process Control
//!
//! Starting a debuggee under trace and keeping track of whether it is still around.
//!
//! [`spawn_traced`] forks, lets the child request tracing and replace itself with the
//! executable, and then waits for the implicit stop that the kernel produces after a traced
//! `exec`. Only after that stop is it safe to touch the debuggee's memory.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::waitpid;
use nix::unistd::{execv, fork, pipe2, ForkResult, Pid};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::errors::{DebuggerError, Result};
use crate::status::{decode, AnySignal, WaitOutcome};
use crate::tracee::{Ptrace, Tracee};

/// The one process a debug session traces
///
/// `running` becomes false exactly once, when the process is seen exiting or being killed, or
/// when it vanishes. `attached` becomes false when tracing is given up. Only a process that is
/// both running and attached may be touched.
#[derive(Debug)]
pub struct TracedProcess<T: Tracee = Ptrace> {
    tracee: T,
    running: bool,
    attached: bool,
}

impl<T: Tracee> TracedProcess<T> {
    /// Wraps a tracee that has already completed the initial stop
    pub fn new(tracee: T) -> Self {
        Self {
            tracee,
            running: true,
            attached: true,
        }
    }

    pub fn pid(&self) -> Pid {
        self.tracee.pid()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// True if trace operations on the process are valid
    pub fn is_traceable(&self) -> bool {
        self.running && self.attached
    }

    pub fn tracee(&self) -> &T {
        &self.tracee
    }

    pub fn tracee_mut(&mut self) -> &mut T {
        &mut self.tracee
    }

    pub(crate) fn mark_gone(&mut self) {
        if self.running {
            info!("debuggee {} is gone", self.pid());
            self.running = false;
        }
    }

    pub(crate) fn mark_detached(&mut self) {
        self.attached = false;
    }
}

/// Launches `executable` with `args` as a traced child process
///
/// Returns once the child has stopped right after `exec`.
///
/// # Errors
///
/// Fails with [`DebuggerError::SetupFailure`] if forking fails, if the child could not request
/// tracing or replace its image (the child reports why), or if the first stop is not the
/// expected `SIGTRAP`. Fails with [`DebuggerError::ExecutableDoesNotExist`] or
/// [`DebuggerError::ExecutableIsNotAFile`] before forking if the path is unusable.
pub fn spawn_traced(
    executable: impl AsRef<Path>,
    args: &[String],
    config: &SessionConfig,
) -> Result<TracedProcess<Ptrace>> {
    let path: &Path = executable.as_ref();
    if !path.exists() {
        let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
        error!("{err}");
        return Err(err);
    }
    if !path.is_file() {
        let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
        error!("{err}");
        return Err(err);
    }

    // everything the child needs is allocated before forking
    let cpath = CString::new(path.as_os_str().as_bytes())?;
    let mut argv = vec![cpath.clone()];
    for arg in args {
        argv.push(CString::new(arg.as_str())?);
    }
    let exec_failed = format!("exec {}", path.display());

    let (report_rx, report_tx) = pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| DebuggerError::SetupFailure(format!("could not create pipe: {e}")))?;

    match unsafe { fork() } {
        Err(e) => {
            let err = DebuggerError::SetupFailure(format!("could not fork: {e}"));
            error!("{err}");
            Err(err)
        }
        Ok(ForkResult::Child) => {
            drop(report_rx);
            exec_child(&cpath, &argv, &report_tx, exec_failed.as_bytes(), config.disable_aslr)
        }
        Ok(ForkResult::Parent { child }) => {
            drop(report_tx);
            debug!("forked debuggee {child}");

            // the write end closes on a successful exec, so this returns once the child either
            // runs the executable or has reported why it could not
            let mut report = String::new();
            File::from(report_rx).read_to_string(&mut report)?;
            if !report.is_empty() {
                let _ = waitpid(child, None);
                let err = DebuggerError::SetupFailure(report);
                error!("{err}");
                return Err(err);
            }

            let process = handshake(Ptrace::new(child))?;
            info!("started {} as {child}", path.display());
            Ok(process)
        }
    }
}

/// Waits for the stop that follows a traced `exec`
pub(crate) fn handshake<T: Tracee>(mut tracee: T) -> Result<TracedProcess<T>> {
    await_first_stop(&mut tracee)?;
    Ok(TracedProcess::new(tracee))
}

/// Expects a `SIGTRAP` stop. A child that stopped otherwise is killed and reaped.
fn await_first_stop<T: Tracee>(tracee: &mut T) -> Result<()> {
    let status = tracee
        .wait()
        .map_err(|e| DebuggerError::SetupFailure(format!("waiting for the debuggee: {e}")))?;
    let err = match decode(status) {
        Ok(WaitOutcome::Stopped(AnySignal::Named(Signal::SIGTRAP))) => return Ok(()),
        Ok(ended @ (WaitOutcome::Exited(_) | WaitOutcome::Terminated(_))) => {
            DebuggerError::SetupFailure(format!("debuggee {ended} before it could be traced"))
        }
        Ok(stopped) => {
            discard(tracee);
            DebuggerError::SetupFailure(format!("debuggee {stopped} before it could be traced"))
        }
        Err(e) => {
            discard(tracee);
            DebuggerError::SetupFailure(e.to_string())
        }
    };
    error!("{err}");
    Err(err)
}

fn discard<T: Tracee>(tracee: &mut T) {
    match tracee.kill() {
        Ok(()) => {
            let _ = tracee.wait();
        }
        Err(e) => warn!("could not kill {}: {e}", tracee.pid()),
    }
}

// Runs between fork and exec: no allocation, only system calls
fn exec_child(
    path: &CStr,
    argv: &[CString],
    report: &OwnedFd,
    exec_failed: &[u8],
    disable_aslr: bool,
) -> ! {
    if disable_aslr {
        // not every environment allows this, the debuggee just runs randomized then
        if let Ok(persona) = personality::get() {
            let _ = personality::set(persona | Persona::ADDR_NO_RANDOMIZE);
        }
    }

    if let Err(e) = ptrace::traceme() {
        child_fail(report, b"ptrace(TRACEME)", e);
    }

    let e = match execv(path, argv) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    child_fail(report, exec_failed, e)
}

fn child_fail(report: &OwnedFd, what: &[u8], e: Errno) -> ! {
    for part in [what, b": ".as_slice(), e.desc().as_bytes()] {
        let _ = nix::unistd::write(report, part);
    }
    unsafe { nix::libc::_exit(1) }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockTracee, Request};
    use crate::status::raw;

    #[test]
    fn test_handshake_expects_sigtrap() {
        let mut tracee = MockTracee::with_text(0x1000usize.into(), &[0x90; 8]);
        tracee.push_status(raw::stopped(Signal::SIGTRAP as i32));
        let process = handshake(tracee).unwrap();
        assert!(process.is_running());
        assert!(process.is_attached());
        assert!(process.is_traceable());
    }

    #[test]
    fn test_handshake_rejects_early_exit() {
        let mut tracee = MockTracee::with_text(0x1000usize.into(), &[0x90; 8]);
        tracee.push_status(raw::exited(1));
        assert!(matches!(
            await_first_stop(&mut tracee),
            Err(DebuggerError::SetupFailure(_))
        ));
        // already reaped by the failed wait, nothing to kill
        assert!(tracee.requests().is_empty());
    }

    #[test]
    fn test_handshake_kills_child_stopped_otherwise() {
        let mut tracee = MockTracee::with_text(0x1000usize.into(), &[0x90; 8]);
        tracee.push_status(raw::stopped(Signal::SIGSTOP as i32));
        assert!(matches!(
            await_first_stop(&mut tracee),
            Err(DebuggerError::SetupFailure(_))
        ));
        assert_eq!(tracee.requests(), &[Request::Kill]);
        assert!(tracee.is_gone());
        // the kill was waited for, no zombie is left behind
        assert!(tracee.wait().is_err());
    }

    #[test]
    fn test_handshake_without_child() {
        let tracee = MockTracee::with_text(0x1000usize.into(), &[0x90; 8]);
        assert!(matches!(
            handshake(tracee),
            Err(DebuggerError::SetupFailure(_))
        ));
    }

    #[test]
    fn test_spawn_missing_executable() {
        let res = spawn_traced(
            "/this/does/not/exist",
            &[],
            &SessionConfig::default(),
        );
        assert!(matches!(res, Err(DebuggerError::ExecutableDoesNotExist(_))));
    }

    #[test]
    fn test_spawn_directory() {
        let res = spawn_traced("/", &[], &SessionConfig::default());
        assert!(matches!(res, Err(DebuggerError::ExecutableIsNotAFile(_))));
    }

    #[test]
    fn test_mark_gone_is_terminal() {
        let mut process = TracedProcess::new(MockTracee::with_text(0x1000usize.into(), &[0; 8]));
        process.mark_gone();
        process.mark_gone();
        assert!(!process.is_running());
        assert!(!process.is_traceable());
    }
}
