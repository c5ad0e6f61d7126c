//! Field descriptors of the serialized struct format.
//!
//! ```text
//! +---------+----------+----------+----------+------------+
//! |  magic  |  item 1  |  item 2  | item END |  raw data  |
//! +---------+----------+----------+----------+------------+
//! |   u32   |   u32    |   u32    |   u32    |    var     |
//! +---------+----------+----------+----------+------------+
//! ```
//!
//! Each item word carries the storage kind in bit 31 (0 = inline value,
//! 1 = indirect block) and the byte length in bits 0-30.  The zero word ends
//! the list; an empty indirect block is therefore `0x8000_0000`, never `0`.

use byteorder::{LittleEndian, WriteBytesExt};
use std::fmt;

pub const HEADER_MAGIC: u32 = 0xFFFF_FFFF;
pub const ITEM_END:     u32 = 0x0000_0000;

pub const FLAG_INDIRECT: u32 = 0x8000_0000;
pub const MASK_LENGTH:   u32 = 0x7FFF_FFFF;

/// Largest length a descriptor can carry.
pub const MAX_LENGTH: usize = MASK_LENGTH as usize;

/// How a field's bytes are stored in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Inline,
    Indirect,
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Inline   => f.write_str("inline"),
            Storage::Indirect => f.write_str("indirect"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// Fixed-width scalar stored directly; length is its native width.
    Inline(u32),
    /// String, array or sequence block; length is the block's byte count.
    Indirect(u32),
}

impl Descriptor {
    /// Build an inline descriptor, or `None` if `len` does not fit in 31 bits.
    pub fn inline(len: usize) -> Option<Self> {
        Self::checked_len(len).map(Descriptor::Inline)
    }

    /// Build an indirect descriptor, or `None` if `len` does not fit in 31 bits.
    pub fn indirect(len: usize) -> Option<Self> {
        Self::checked_len(len).map(Descriptor::Indirect)
    }

    fn checked_len(len: usize) -> Option<u32> {
        if len > MAX_LENGTH {
            None
        } else {
            Some(len as u32)
        }
    }

    pub fn storage(self) -> Storage {
        match self {
            Descriptor::Inline(_)   => Storage::Inline,
            Descriptor::Indirect(_) => Storage::Indirect,
        }
    }

    pub fn len(self) -> usize {
        match self {
            Descriptor::Inline(len) | Descriptor::Indirect(len) => len as usize,
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Wire form of this descriptor.
    pub fn to_word(self) -> u32 {
        match self {
            Descriptor::Inline(len)   => len & MASK_LENGTH,
            Descriptor::Indirect(len) => FLAG_INDIRECT | (len & MASK_LENGTH),
        }
    }

    /// Parse a descriptor word.  Returns `None` for the terminator.
    pub fn from_word(word: u32) -> Option<Self> {
        if word == ITEM_END {
            return None;
        }
        let len = word & MASK_LENGTH;
        if word & FLAG_INDIRECT != 0 {
            Some(Descriptor::Indirect(len))
        } else {
            Some(Descriptor::Inline(len))
        }
    }

    pub fn write<W: std::io::Write>(self, mut writer: W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.to_word())
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} B", self.storage(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_layout() {
        assert_eq!(Descriptor::Inline(4).to_word(), 0x0000_0004);
        assert_eq!(Descriptor::Indirect(8).to_word(), 0x8000_0008);
        assert_eq!(Descriptor::Indirect(0).to_word(), 0x8000_0000);
        assert_eq!(Descriptor::Indirect(MASK_LENGTH).to_word(), 0xFFFF_FFFF);
    }

    #[test]
    fn parse_words() {
        assert_eq!(Descriptor::from_word(0), None);
        assert_eq!(Descriptor::from_word(0x0000_0002), Some(Descriptor::Inline(2)));
        assert_eq!(Descriptor::from_word(0x8000_000C), Some(Descriptor::Indirect(12)));
        assert_eq!(Descriptor::from_word(0x8000_0000), Some(Descriptor::Indirect(0)));
    }

    #[test]
    fn length_limit() {
        assert!(Descriptor::indirect(MAX_LENGTH).is_some());
        assert!(Descriptor::indirect(MAX_LENGTH + 1).is_none());
        assert!(Descriptor::inline(MAX_LENGTH + 1).is_none());
    }
}
