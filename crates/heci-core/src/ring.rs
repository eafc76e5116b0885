//! Circular buffer pointer arithmetic.
//!
//! Each ring direction is described by an 8-bit read cursor, an 8-bit write
//! cursor and a depth in dword slots. Cursors wrap freely; the slot a cursor
//! addresses is `cursor % depth`.

use crate::protocol::HeciCsr;
use crate::transport::HeciError;

/// Read/write cursor pair for one direction of the HECI ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularBufferPointers {
    pub read_pointer: u8,
    pub write_pointer: u8,
    /// Capacity in 32-bit slots.
    pub depth: u8,
}

impl CircularBufferPointers {
    pub const fn new(read_pointer: u8, write_pointer: u8, depth: u8) -> Self {
        Self {
            read_pointer,
            write_pointer,
            depth,
        }
    }

    /// Snapshot the pointers from a CSR value.
    pub fn from_csr(csr: HeciCsr) -> Self {
        Self {
            read_pointer: csr.read_pointer(),
            write_pointer: csr.write_pointer(),
            depth: csr.depth(),
        }
    }

    /// Filled slots: `(int8)(write - read)`, kept in an unsigned byte.
    ///
    /// A read cursor ahead of the write cursor yields a value above 127,
    /// which is larger than any valid depth and therefore reads as overflow.
    pub fn filled_slots(&self) -> u8 {
        (self.write_pointer as i8).wrapping_sub(self.read_pointer as i8) as u8
    }

    pub fn is_overflowed(&self) -> bool {
        self.filled_slots() > self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.filled_slots() == 0
    }

    /// Free slots, or `None` if the ring is in overflow.
    pub fn empty_slots(&self) -> Option<u8> {
        self.depth.checked_sub(self.filled_slots())
    }

    /// Check that `words` more slots can be written.
    pub fn check_room(&self, words: usize) -> Result<(), HeciError> {
        let overflow = HeciError::Overflow {
            filled: self.filled_slots(),
            depth: self.depth,
            requested: words,
        };
        match self.empty_slots() {
            Some(empty) if words <= empty as usize => Ok(()),
            _ => Err(overflow),
        }
    }

    /// Fail if the ring is in overflow, regardless of direction.
    pub fn check_overflow(&self) -> Result<(), HeciError> {
        if self.is_overflowed() {
            return Err(HeciError::Overflow {
                filled: self.filled_slots(),
                depth: self.depth,
                requested: 0,
            });
        }
        Ok(())
    }

    /// Ring slot addressed by `pointer`.
    pub fn slot_index(&self, pointer: u8) -> usize {
        if self.depth == 0 {
            return 0;
        }
        pointer as usize % self.depth as usize
    }

    /// Pointers after writing `words` slots.
    pub fn advance_write(&self, words: usize) -> Self {
        Self {
            write_pointer: self.write_pointer.wrapping_add(words as u8),
            ..*self
        }
    }

    /// Pointers after consuming `words` slots.
    pub fn advance_read(&self, words: usize) -> Self {
        Self {
            read_pointer: self.read_pointer.wrapping_add(words as u8),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_at_capacity() {
        let full = CircularBufferPointers::new(0, 8, 8);
        assert_eq!(full.filled_slots(), 8);
        assert!(!full.is_overflowed());
        assert!(matches!(full.check_room(1), Err(HeciError::Overflow { .. })));

        let almost = CircularBufferPointers::new(0, 7, 8);
        assert_eq!(almost.filled_slots(), 7);
        assert!(almost.check_room(1).is_ok());
        assert_eq!(almost.advance_write(1).write_pointer, 8);
    }

    #[test]
    fn test_overflow_detection_is_exact() {
        for depth in [1u8, 4, 8, 16, 32, 64, 128] {
            for read in 0..=u8::MAX {
                for write in 0..=u8::MAX {
                    let ptrs = CircularBufferPointers::new(read, write, depth);
                    let filled = (write as i8).wrapping_sub(read as i8) as u8;
                    assert_eq!(ptrs.is_overflowed(), filled > depth);
                    assert_eq!(ptrs.check_overflow().is_err(), filled > depth);
                    if filled <= depth {
                        let free = (depth - filled) as usize;
                        assert!(ptrs.check_room(free).is_ok());
                        assert!(ptrs.check_room(free + 1).is_err());
                    } else {
                        assert!(ptrs.check_room(0).is_err());
                    }
                }
            }
        }
    }

    #[test]
    fn test_filled_slots_across_wrap() {
        let ptrs = CircularBufferPointers::new(0xFE, 0x02, 8);
        assert_eq!(ptrs.filled_slots(), 4);
        assert_eq!(ptrs.empty_slots(), Some(4));
    }

    #[test]
    fn test_read_ahead_of_write_is_overflow() {
        let ptrs = CircularBufferPointers::new(5, 3, 8);
        assert!(ptrs.is_overflowed());
        assert_eq!(ptrs.empty_slots(), None);
    }

    #[test]
    fn test_slot_index_wraps() {
        let ptrs = CircularBufferPointers::new(0, 0, 8);
        assert_eq!(ptrs.slot_index(7), 7);
        assert_eq!(ptrs.slot_index(8), 0);
        assert_eq!(ptrs.slot_index(13), 5);
    }

    #[test]
    fn test_from_csr() {
        let csr = HeciCsr::compose(0, 3, 9, 16);
        let ptrs = CircularBufferPointers::from_csr(csr);
        assert_eq!(ptrs, CircularBufferPointers::new(3, 9, 16));
        assert_eq!(ptrs.filled_slots(), 6);
    }
}
