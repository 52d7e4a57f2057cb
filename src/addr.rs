//! Addresses in the address space of the traced process

use std::fmt::Display;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::errors::DebuggerError;
use crate::Word;

pub type RawPointer = *mut std::ffi::c_void;

/// A byte-granular address inside the traced process
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Addr(usize);

impl Addr {
    pub fn usize(&self) -> usize {
        self.0
    }
    pub fn u64(&self) -> u64 {
        self.0 as u64
    }
    pub fn raw_pointer(&self) -> RawPointer {
        self.0 as RawPointer
    }

    /// The address `rhs` bytes below this one, or [None] if that would wrap below zero
    pub fn checked_sub(&self, rhs: usize) -> Option<Addr> {
        self.0.checked_sub(rhs).map(Addr)
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", { self.0 })
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Serialize for Addr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

/// Parses a hexadecimal address, with or without a leading `0x`
impl FromStr for Addr {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        usize::from_str_radix(digits, 16)
            .map(Addr)
            .map_err(|_| DebuggerError::BadAddress(s.to_string()))
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub for Addr {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Sub<usize> for Addr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl From<Addr> for RawPointer {
    fn from(value: Addr) -> Self {
        value.0 as RawPointer
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Addr(value)
    }
}

impl From<Word> for Addr {
    fn from(value: Word) -> Self {
        Addr(value as usize)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value as usize)
    }
}

impl From<Addr> for u64 {
    fn from(value: Addr) -> Self {
        value.0 as u64
    }
}
