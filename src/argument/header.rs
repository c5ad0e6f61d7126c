use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use super::StubError;
use crate::cipher::KEY_SIZE;

pub const OFFSET_NUM_ARGS:  usize = KEY_SIZE;
pub const OFFSET_ARGS_SIZE: usize = KEY_SIZE + 4;
pub const OFFSET_CHECKSUM:  usize = KEY_SIZE + 4 + 4;
pub const OFFSET_FIRST_ARG: usize = KEY_SIZE + 4 + 4 + 4;

/// Size of the `(id, size)` prefix of every argument record.
pub const RECORD_HEADER_SIZE: usize = 4 + 4;

/// Rolling header checksum: `c = c * 3 + b` for every byte, modulo 2^32.
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| {
        acc.wrapping_add(acc << 1).wrapping_add(b as u32)
    })
}

/// Cleartext part of an argument stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubHeader {
    pub key:          [u8; KEY_SIZE],
    pub count:        u32,
    pub payload_size: u32,
    pub checksum:     u32,
}

impl StubHeader {
    /// Build a header with its checksum computed over key, count and size.
    pub fn new(key: [u8; KEY_SIZE], count: u32, payload_size: u32) -> Self {
        let mut header = Self { key, count, payload_size, checksum: 0 };
        header.checksum = header.compute_checksum();
        header
    }

    /// Checksum of bytes `[0, OFFSET_CHECKSUM)` as they are laid out on the wire.
    pub fn compute_checksum(&self) -> u32 {
        let mut covered = [0u8; OFFSET_CHECKSUM];
        covered[..KEY_SIZE].copy_from_slice(&self.key);
        covered[OFFSET_NUM_ARGS..OFFSET_ARGS_SIZE].copy_from_slice(&self.count.to_le_bytes());
        covered[OFFSET_ARGS_SIZE..].copy_from_slice(&self.payload_size.to_le_bytes());
        checksum(&covered)
    }

    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Read the cleartext header from the front of a whole stub.
    ///
    /// Only the length is checked; use [`StubHeader::is_valid`] for the
    /// checksum.
    pub fn parse(stub: &[u8]) -> Result<Self, StubError> {
        if stub.len() < OFFSET_FIRST_ARG {
            return Err(StubError::InvalidStub { len: stub.len() });
        }
        Ok(Self::read(&stub[..OFFSET_FIRST_ARG])?)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.key)?;
        writer.write_u32::<LittleEndian>(self.count)?;
        writer.write_u32::<LittleEndian>(self.payload_size)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut key = [0u8; KEY_SIZE];
        reader.read_exact(&mut key)?;
        Ok(Self {
            key,
            count:        reader.read_u32::<LittleEndian>()?,
            payload_size: reader.read_u32::<LittleEndian>()?,
            checksum:     reader.read_u32::<LittleEndian>()?,
        })
    }
}
