#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use nix::sys::signal::Signal;
use trapmine::config::SessionConfig;
use trapmine::execution::{CleanupReport, ExecState};
use trapmine::session::Session;
use trapmine::status::{AnySignal, WaitOutcome};
use trapmine::DebuggerError;

fn launch_true() -> Session {
    let program = which::which("true").expect("no true in PATH");
    Session::launch(program, &[], &SessionConfig::default()).expect("could not launch true")
}

#[test]
fn test_run_to_exit() {
    let mut session = launch_true();
    assert_eq!(session.state(), ExecState::StoppedOther(Signal::SIGTRAP.into()));
    assert!(session.registers().unwrap().rip != 0);

    assert_eq!(session.resume().unwrap(), WaitOutcome::Exited(0));
    assert_eq!(session.state(), ExecState::Exited(0));
    assert!(!session.process().is_running());

    assert_eq!(session.cleanup().unwrap(), CleanupReport::NoOp);
    assert_eq!(session.cleanup().unwrap(), CleanupReport::NoOp);
    assert!(matches!(
        session.resume(),
        Err(DebuggerError::NotRunning(ExecState::Exited(0)))
    ));
}

#[test]
fn test_breakpoint_at_entry() {
    let mut session = launch_true();
    let entry = session.entry_point().unwrap();
    let before = session.read_word(entry).unwrap();

    session.insert_breakpoint(entry).unwrap();
    let planted = session.read_word(entry).unwrap();
    assert_eq!(planted & 0xff, 0xcc);
    assert_eq!(planted & !0xff, before & !0xff);

    session.resume().unwrap();
    assert_eq!(session.state(), ExecState::StoppedAtBreakpoint(entry));
    // the trap is back in place after the hit was stepped over
    assert_eq!(session.read_word(entry).unwrap() & 0xff, 0xcc);
    assert!(session.registers().unwrap().rip as usize > entry.usize());

    assert_eq!(session.resume().unwrap(), WaitOutcome::Exited(0));
    assert_eq!(session.cleanup().unwrap(), CleanupReport::NoOp);
}

#[test]
fn test_detach_restores_text() {
    let mut session = launch_true();
    let entry = session.entry_point().unwrap();
    session.insert_breakpoint(entry).unwrap();
    session.single_step().unwrap();

    let report = session.cleanup().unwrap();
    assert_eq!(
        report,
        CleanupReport::Detached {
            restored: 1,
            failed: 0
        }
    );
    assert_eq!(session.state(), ExecState::Detached);
    assert!(session.breakpoints().is_empty());
    assert_eq!(session.cleanup().unwrap(), CleanupReport::NoOp);
}

#[test]
fn test_missing_executable() {
    let err = Session::launch("/nonexistent/trapmine", &[], &SessionConfig::default());
    assert!(matches!(err, Err(DebuggerError::ExecutableDoesNotExist(_))));
}

#[test]
fn test_realtime_signal_reaches_debuggee() {
    let sh = which::which("sh").expect("no sh in PATH");
    let args = ["-c".to_string(), "kill -34 $$; exit 3".to_string()];
    let mut session = Session::launch(sh, &args, &SessionConfig::default()).unwrap();

    assert_eq!(
        session.resume().unwrap(),
        WaitOutcome::Stopped(AnySignal::Realtime(34))
    );
    assert_eq!(session.state(), ExecState::StoppedOther(AnySignal::Realtime(34)));
    // delivered on the next continue, which kills the shell like it would untraced
    assert_eq!(
        session.resume().unwrap(),
        WaitOutcome::Terminated(AnySignal::Realtime(34))
    );
    assert_eq!(session.cleanup().unwrap(), CleanupReport::NoOp);
}

#[test]
fn test_exec_failure_is_reported() {
    let not_executable = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
    match Session::launch(not_executable, &[], &SessionConfig::default()) {
        Err(DebuggerError::SetupFailure(msg)) => {
            assert!(msg.starts_with("exec "), "{msg}");
            assert!(msg.ends_with("Permission denied"), "{msg}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("launched a file that is not executable"),
    }
}
