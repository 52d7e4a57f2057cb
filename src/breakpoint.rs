//! # Breakpoint Table
//!
//! Bookkeeping for the software breakpoints of one debug session.
//!
//! The [`BreakpointTable`] never touches the debuggee. Inserting only reserves a slot; the
//! caller patches the memory and hands the replaced byte back with [`BreakpointTable::arm`],
//! or gives the slot up with [`BreakpointTable::rollback`] if patching failed.

use serde::Serialize;

use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};

/// Index of a slot in a [`BreakpointTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BreakpointId(usize);

impl BreakpointId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A software breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    id: BreakpointId,
    addr: Addr,
    saved_byte: Option<u8>,
    enabled: bool,
}

impl Breakpoint {
    pub fn id(&self) -> BreakpointId {
        self.id
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// The original byte that the trap opcode replaced, [None] while the slot is only reserved
    pub fn saved_byte(&self) -> Option<u8> {
        self.saved_byte
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// The set of breakpoints of a debug session
///
/// At most one enabled breakpoint exists per address and at most `capacity` breakpoints are
/// enabled at once. Removed breakpoints stay in the storage as disabled slots, which are reused
/// by later insertions.
#[derive(Debug, Clone)]
pub struct BreakpointTable {
    slots: Vec<Breakpoint>,
    capacity: usize,
}

impl BreakpointTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Number of enabled breakpoints
    pub fn len(&self) -> usize {
        self.all_enabled().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves a slot for a breakpoint at `addr`
    ///
    /// # Errors
    ///
    /// * [`DebuggerError::Duplicate`] if an enabled breakpoint already sits at `addr`
    /// * [`DebuggerError::CapacityExceeded`] if `capacity` breakpoints are already enabled
    pub fn insert(&mut self, addr: Addr) -> Result<BreakpointId> {
        if self.find_by_address(addr).is_some() {
            return Err(DebuggerError::Duplicate(addr));
        }
        if self.len() >= self.capacity {
            return Err(DebuggerError::CapacityExceeded(self.capacity));
        }

        let free = self.slots.iter().position(|bp| !bp.enabled);
        let id = BreakpointId(free.unwrap_or(self.slots.len()));
        let bp = Breakpoint {
            id,
            addr,
            saved_byte: None,
            enabled: true,
        };
        match free {
            Some(idx) => self.slots[idx] = bp,
            None => self.slots.push(bp),
        }
        Ok(id)
    }

    /// Records the original byte for a reserved slot, once the trap is in place
    pub fn arm(&mut self, id: BreakpointId, saved_byte: u8) {
        if let Some(bp) = self.slots.get_mut(id.0).filter(|bp| bp.enabled) {
            bp.saved_byte = Some(saved_byte);
        }
    }

    /// Gives up a slot reserved by [`Self::insert`]
    pub fn rollback(&mut self, id: BreakpointId) {
        if let Some(bp) = self.slots.get_mut(id.0) {
            bp.enabled = false;
            bp.saved_byte = None;
        }
    }

    /// The enabled breakpoint at exactly `addr`
    pub fn find_by_address(&self, addr: Addr) -> Option<&Breakpoint> {
        self.slots.iter().find(|bp| bp.enabled && bp.addr == addr)
    }

    /// Disables the breakpoint at `addr` and returns it as it was before
    ///
    /// The caller restores the original byte before calling this.
    pub fn remove(&mut self, addr: Addr) -> Option<Breakpoint> {
        let bp = self
            .slots
            .iter_mut()
            .find(|bp| bp.enabled && bp.addr == addr)?;
        let before = bp.clone();
        bp.enabled = false;
        Some(before)
    }

    /// Disables every breakpoint
    pub fn clear(&mut self) {
        for bp in self.slots.iter_mut() {
            bp.enabled = false;
        }
    }

    pub fn all_enabled(&self) -> impl Iterator<Item = &Breakpoint> + Clone + '_ {
        self.slots.iter().filter(|bp| bp.enabled)
    }
}

impl Default for BreakpointTable {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BREAKPOINT_CAPACITY)
    }
}
