//! # Memory Patching
//!
//! Plants and removes the one byte trap opcode that implements a software breakpoint.
//!
//! The kernel only lets us read and write whole words of the debuggee's text, so every patch is a
//! read-modify-write of the word starting at the breakpoint address. Only the lowest addressed
//! byte of that word (the low byte, on little endian x86_64) is ever changed.

use tracing::trace;

use crate::addr::Addr;
use crate::errors::Result;
use crate::tracee::Tracee;
use crate::Word;

pub const MASK_ALL: Word = -1; // yup for real, two's complement
/// `int3`
pub const INT3_BYTE: u8 = 0xcc;
pub const INT3: Word = INT3_BYTE as Word;
pub const BYTE_MASK: Word = 0x00000000000000ff;
pub const BYTE_MASK_INV: Word = MASK_ALL ^ BYTE_MASK;

/// Replaces the low byte of `word` with `byte`, keeping every other bit
#[inline]
pub fn patch_low_byte(word: Word, byte: u8) -> Word {
    (word & BYTE_MASK_INV) | byte as Word
}

/// The low byte of `word`, which is the byte stored at the address the word was read from
#[inline]
pub fn low_byte(word: Word) -> u8 {
    (word & BYTE_MASK) as u8
}

pub fn read_word<T: Tracee + ?Sized>(tracee: &T, addr: Addr) -> Result<Word> {
    tracee.read_word(addr)
}

pub fn write_word<T: Tracee + ?Sized>(tracee: &mut T, addr: Addr, word: Word) -> Result<()> {
    tracee.write_word(addr, word)
}

/// Writes the trap opcode to `addr` and returns the byte it replaced
pub fn plant_trap<T: Tracee + ?Sized>(tracee: &mut T, addr: Addr) -> Result<u8> {
    let word = read_word(tracee, addr)?;
    trace!("original word: {word:016x}");
    let original = low_byte(word);
    let patched = patch_low_byte(word, INT3_BYTE);
    trace!("modified word: {patched:016x}");
    write_word(tracee, addr, patched)?;
    Ok(original)
}

/// Writes `original` back to `addr`
///
/// The current byte at `addr` is not checked, so this can be repeated safely.
pub fn remove_trap<T: Tracee + ?Sized>(tracee: &mut T, addr: Addr, original: u8) -> Result<()> {
    let word = read_word(tracee, addr)?;
    trace!("patched word: {word:016x}");
    let restored = patch_low_byte(word, original);
    trace!("restored word: {restored:016x}");
    write_word(tracee, addr, restored)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockTracee;

    #[test]
    fn test_minus_one_has_this_representation() {
        assert_eq!(
            &(-1i64).to_le_bytes(),
            &[0xffu8, 0xffu8, 0xffu8, 0xffu8, 0xffu8, 0xffu8, 0xffu8, 0xffu8,]
        )
    }

    #[test]
    fn test_patch_low_byte_keeps_other_bits() {
        let words: &[Word] = &[
            0,
            -1,
            0x00000000_ec834855,
            0x7fff_ffff_ffff_ff00,
            i64::MIN,
            0x0123_4567_89ab_cdef,
        ];
        for &word in words {
            let patched = patch_low_byte(word, INT3_BYTE);
            assert_eq!(low_byte(patched), INT3_BYTE);
            assert_eq!(patched & BYTE_MASK_INV, word & BYTE_MASK_INV);
            assert_eq!(patch_low_byte(patched, low_byte(word)), word);
        }
    }

    #[test]
    fn test_plant_then_remove_restores_word() {
        let addr = Addr::from(0x401003usize);
        let original: [u8; 8] = [0x55, 0x48, 0x89, 0xe5, 0x90, 0xc3, 0xff, 0x80];
        let mut tracee = MockTracee::with_text(addr, &original);
        let before = tracee.read_word(addr).unwrap();

        let saved = plant_trap(&mut tracee, addr).unwrap();
        assert_eq!(saved, 0x55);
        assert_eq!(tracee.byte_at(addr), INT3_BYTE);
        assert_eq!(tracee.bytes(addr + 1, 7), &original[1..]);

        remove_trap(&mut tracee, addr, saved).unwrap();
        assert_eq!(tracee.read_word(addr).unwrap(), before);

        // again, with the trap already gone
        remove_trap(&mut tracee, addr, saved).unwrap();
        assert_eq!(tracee.read_word(addr).unwrap(), before);
    }

    #[test]
    fn test_unmapped_address_fails() {
        let mut tracee = MockTracee::with_text(Addr::from(0x1000usize), &[0x90; 16]);
        assert!(plant_trap(&mut tracee, Addr::from(0x9000usize)).is_err());
        assert!(remove_trap(&mut tracee, Addr::from(0x9000usize), 0x90).is_err());
    }
}
