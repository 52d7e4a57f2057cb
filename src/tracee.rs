//! # Tracee Module
//!
//! The primitives the debugger needs from the operating system to control a traced process.
//!
//! Everything the breakpoint engine does to the debuggee goes through the [`Tracee`] trait:
//! peeking and poking words of text memory, reading and rewriting the instruction pointer,
//! resuming, single-stepping, waiting and detaching. [`Ptrace`] implements it with
//! [ptrace](nix::sys::ptrace) on Linux.

use std::fmt::Display;

use nix::errno::Errno;
use nix::libc::{self, user_regs_struct};
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::trace;

use crate::addr::Addr;
use crate::errors::Result;
use crate::status::AnySignal;
use crate::Word;

/// Operations on a process that is traced by us
///
/// All operations are only valid while the process is stopped, except [`Tracee::wait`], which
/// blocks until the next state change after [`Tracee::cont`] or [`Tracee::step`].
pub trait Tracee {
    fn pid(&self) -> Pid;

    /// Read the word at `addr`. `addr` does not need to be aligned.
    fn read_word(&self, addr: Addr) -> Result<Word>;
    /// Write the word at `addr`. `addr` does not need to be aligned.
    fn write_word(&mut self, addr: Addr, word: Word) -> Result<()>;

    fn registers(&self) -> Result<Registers>;
    fn instruction_pointer(&self) -> Result<Addr>;
    fn set_instruction_pointer(&mut self, addr: Addr) -> Result<()>;

    /// Resume the process, delivering `sig` if given
    fn cont(&mut self, sig: Option<AnySignal>) -> Result<()>;
    /// Execute exactly one machine instruction, delivering `sig` if given
    fn step(&mut self, sig: Option<AnySignal>) -> Result<()>;
    /// Block until the process stops, exits or is killed, returning the raw wait status
    fn wait(&mut self) -> Result<i32>;
    /// Stop tracing the process and let it run freely
    fn detach(&mut self, sig: Option<AnySignal>) -> Result<()>;
    /// Send `SIGKILL`. The process still has to be waited for.
    fn kill(&mut self) -> Result<()>;
}

/// A [`Tracee`] backed by the ptrace system call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ptrace {
    pid: Pid,
}

impl Ptrace {
    /// Wraps a process that is already traced by the calling process
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Resumes with a real-time signal, which the nix wrappers cannot express
    fn resume_raw(&self, request: libc::c_uint, signo: i32) -> Result<()> {
        trace!("ptrace request {request} with signal {signo}");
        let res = unsafe {
            libc::ptrace(
                request,
                self.pid.as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                signo as libc::c_long,
            )
        };
        Errno::result(res)?;
        Ok(())
    }
}

impl Tracee for Ptrace {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn read_word(&self, addr: Addr) -> Result<Word> {
        let word = ptrace::read(self.pid, addr.raw_pointer())?;
        trace!("peek {addr}: {word:016x}");
        Ok(word)
    }

    fn write_word(&mut self, addr: Addr, word: Word) -> Result<()> {
        trace!("poke {addr}: {word:016x}");
        Ok(ptrace::write(self.pid, addr.raw_pointer(), word)?)
    }

    fn registers(&self) -> Result<Registers> {
        Ok(ptrace::getregs(self.pid)?.into())
    }

    fn instruction_pointer(&self) -> Result<Addr> {
        Ok(ptrace::getregs(self.pid)?.rip.into())
    }

    fn set_instruction_pointer(&mut self, addr: Addr) -> Result<()> {
        let mut regs = ptrace::getregs(self.pid)?;
        regs.rip = addr.u64();
        Ok(ptrace::setregs(self.pid, regs)?)
    }

    fn cont(&mut self, sig: Option<AnySignal>) -> Result<()> {
        match sig {
            Some(AnySignal::Realtime(signo)) => self.resume_raw(libc::PTRACE_CONT, signo),
            sig => Ok(ptrace::cont(self.pid, sig.and_then(AnySignal::named))?),
        }
    }

    fn step(&mut self, sig: Option<AnySignal>) -> Result<()> {
        match sig {
            Some(AnySignal::Realtime(signo)) => self.resume_raw(libc::PTRACE_SINGLESTEP, signo),
            sig => Ok(ptrace::step(self.pid, sig.and_then(AnySignal::named))?),
        }
    }

    fn wait(&mut self) -> Result<i32> {
        let mut status: libc::c_int = 0;
        Errno::result(unsafe { libc::waitpid(self.pid.as_raw(), &mut status, 0) })?;
        trace!("wait status of {}: {status:#x}", self.pid);
        Ok(status)
    }

    fn detach(&mut self, sig: Option<AnySignal>) -> Result<()> {
        match sig {
            Some(AnySignal::Realtime(signo)) => self.resume_raw(libc::PTRACE_DETACH, signo),
            sig => Ok(ptrace::detach(self.pid, sig.and_then(AnySignal::named))?),
        }
    }

    fn kill(&mut self) -> Result<()> {
        Ok(signal::kill(self.pid, Signal::SIGKILL)?)
    }
}

/// Snapshot of the registers shown to the user
///
/// Holds the instruction, stack and frame pointer and the primary general purpose registers.
/// [`Display`] renders them in that fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Registers {
    pub rip: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
}

impl From<user_regs_struct> for Registers {
    fn from(regs: user_regs_struct) -> Self {
        Self {
            rip: regs.rip,
            rsp: regs.rsp,
            rbp: regs.rbp,
            rax: regs.rax,
            rbx: regs.rbx,
            rcx: regs.rcx,
            rdx: regs.rdx,
            rsi: regs.rsi,
            rdi: regs.rdi,
        }
    }
}

impl Display for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = [
            ("RIP", self.rip),
            ("RSP", self.rsp),
            ("RBP", self.rbp),
            ("RAX", self.rax),
            ("RBX", self.rbx),
            ("RCX", self.rcx),
            ("RDX", self.rdx),
            ("RSI", self.rsi),
            ("RDI", self.rdi),
        ];
        writeln!(f, "=== Registers ===")?;
        for (name, value) in fields {
            writeln!(f, "{name}: {value:#018x}")?;
        }
        write!(f, "=================")
    }
}
