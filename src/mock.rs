//! A scripted, in-memory [`Tracee`] for tests that need no live process

use std::collections::VecDeque;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::addr::Addr;
use crate::errors::Result;
use crate::memory::INT3_BYTE;
use crate::status::{raw, AnySignal};
use crate::tracee::{Registers, Tracee};
use crate::Word;

const WORD_BYTES: usize = std::mem::size_of::<Word>();

/// What the simulated program does when it is continued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Run {
    /// Execution reaches `addr`. It traps there if the byte is `int3`, otherwise it runs on to
    /// the next scripted event.
    Reach(Addr),
    /// A signal arrives
    Signal(AnySignal),
    Exit(i32),
    Kill(Signal),
    /// The process disappears without a trace, waiting fails
    Vanish,
}

/// What happens when the simulated program is single-stepped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// The instruction executes and the step trap is reported
    Trap,
    /// The instruction executes, but a signal is reported instead of the step trap
    Signal(AnySignal),
    /// The instruction ends the program
    Exit(i32),
    Kill(Signal),
    /// The step request fails although the process is still there
    Fail(Errno),
    /// The process disappears, the step request fails
    Vanish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    Cont(Option<AnySignal>),
    Step(Option<AnySignal>),
    Detach(Option<AnySignal>),
    Kill,
}

#[derive(Debug)]
pub(crate) struct MockTracee {
    pid: Pid,
    base: Addr,
    text: Vec<u8>,
    regs: Registers,
    runs: VecDeque<Run>,
    steps: VecDeque<Step>,
    statuses: VecDeque<i32>,
    requests: Vec<Request>,
    executed: Vec<(Addr, u8)>,
    gone: bool,
    detached: bool,
    detach_error: Option<Errno>,
}

impl MockTracee {
    /// A stopped process whose text at `base` holds `text`, with the instruction pointer at `base`
    pub(crate) fn with_text(base: Addr, text: &[u8]) -> Self {
        Self {
            pid: Pid::from_raw(31337),
            base,
            text: text.to_vec(),
            regs: Registers {
                rip: base.u64(),
                rsp: 0x7ffd_0000,
                rbp: 0x7ffd_0040,
                ..Default::default()
            },
            runs: VecDeque::new(),
            steps: VecDeque::new(),
            statuses: VecDeque::new(),
            requests: Vec::new(),
            executed: Vec::new(),
            gone: false,
            detached: false,
            detach_error: None,
        }
    }

    pub(crate) fn push_run(&mut self, run: Run) {
        self.runs.push_back(run);
    }

    /// Scripts the next single step, steps without a script just trap
    pub(crate) fn push_step(&mut self, step: Step) {
        self.steps.push_back(step);
    }

    /// Queues a raw wait status ahead of whatever the next request produces
    pub(crate) fn push_status(&mut self, status: i32) {
        self.statuses.push_back(status);
    }

    /// Lets detaching fail with `errno` while the process stays attached
    pub(crate) fn fail_detach(&mut self, errno: Errno) {
        self.detach_error = Some(errno);
    }

    pub(crate) fn is_gone(&self) -> bool {
        self.gone
    }

    pub(crate) fn byte_at(&self, addr: Addr) -> u8 {
        self.text[(addr - self.base).usize()]
    }

    pub(crate) fn bytes(&self, addr: Addr, len: usize) -> &[u8] {
        let start = (addr - self.base).usize();
        &self.text[start..start + len]
    }

    pub(crate) fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// `(address, byte)` of every instruction that was single-stepped
    pub(crate) fn executed(&self) -> &[(Addr, u8)] {
        &self.executed
    }

    fn alive(&self) -> Result<()> {
        if self.gone || self.detached {
            Err(Errno::ESRCH.into())
        } else {
            Ok(())
        }
    }

    fn offset(&self, addr: Addr) -> Result<usize> {
        if addr < self.base || (addr - self.base).usize() + WORD_BYTES > self.text.len() {
            return Err(Errno::EIO.into());
        }
        Ok((addr - self.base).usize())
    }
}

impl Tracee for MockTracee {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn read_word(&self, addr: Addr) -> Result<Word> {
        self.alive()?;
        let off = self.offset(addr)?;
        let mut buf = [0u8; WORD_BYTES];
        buf.copy_from_slice(&self.text[off..off + WORD_BYTES]);
        Ok(Word::from_le_bytes(buf))
    }

    fn write_word(&mut self, addr: Addr, word: Word) -> Result<()> {
        self.alive()?;
        let off = self.offset(addr)?;
        self.text[off..off + WORD_BYTES].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    fn registers(&self) -> Result<Registers> {
        self.alive()?;
        Ok(self.regs)
    }

    fn instruction_pointer(&self) -> Result<Addr> {
        self.alive()?;
        Ok(self.regs.rip.into())
    }

    fn set_instruction_pointer(&mut self, addr: Addr) -> Result<()> {
        self.alive()?;
        self.regs.rip = addr.u64();
        Ok(())
    }

    fn cont(&mut self, sig: Option<AnySignal>) -> Result<()> {
        self.alive()?;
        self.requests.push(Request::Cont(sig));
        loop {
            let status = match self.runs.pop_front().unwrap_or(Run::Exit(0)) {
                Run::Reach(addr) => {
                    if self.byte_at(addr) != INT3_BYTE {
                        continue;
                    }
                    self.regs.rip = (addr + 1).u64();
                    raw::stopped(Signal::SIGTRAP as i32)
                }
                Run::Signal(sig) => raw::stopped(sig.raw()),
                Run::Exit(code) => {
                    self.gone = true;
                    raw::exited(code)
                }
                Run::Kill(sig) => {
                    self.gone = true;
                    raw::signaled(sig as i32)
                }
                Run::Vanish => {
                    self.gone = true;
                    return Ok(());
                }
            };
            self.statuses.push_back(status);
            return Ok(());
        }
    }

    fn step(&mut self, sig: Option<AnySignal>) -> Result<()> {
        let script = self.steps.pop_front().unwrap_or(Step::Trap);
        if script == Step::Vanish {
            self.gone = true;
        }
        self.alive()?;
        if let Step::Fail(errno) = script {
            return Err(errno.into());
        }
        self.requests.push(Request::Step(sig));
        let rip: Addr = self.regs.rip.into();
        self.executed.push((rip, self.byte_at(rip)));
        self.regs.rip += 1;
        let status = match script {
            Step::Signal(sig) => raw::stopped(sig.raw()),
            Step::Exit(code) => {
                self.gone = true;
                raw::exited(code)
            }
            Step::Kill(sig) => {
                self.gone = true;
                raw::signaled(sig as i32)
            }
            _ => raw::stopped(Signal::SIGTRAP as i32),
        };
        self.statuses.push_back(status);
        Ok(())
    }

    fn wait(&mut self) -> Result<i32> {
        self.statuses
            .pop_front()
            .ok_or_else(|| Errno::ECHILD.into())
    }

    fn detach(&mut self, sig: Option<AnySignal>) -> Result<()> {
        self.alive()?;
        self.requests.push(Request::Detach(sig));
        if let Some(errno) = self.detach_error {
            return Err(errno.into());
        }
        self.detached = true;
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.alive()?;
        self.requests.push(Request::Kill);
        self.gone = true;
        self.statuses.push_back(raw::signaled(Signal::SIGKILL as i32));
        Ok(())
    }
}
