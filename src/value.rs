//! Field values of a serialized record.
//!
//! Scalars are stored inline at their native width, little-endian.  Strings,
//! fixed arrays and sequences are indirect blocks: the decoder learns their
//! byte length from the descriptor and their element width from the schema.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::descriptor::Storage;
use crate::serialization::SerializeError;

// ── Scalars ──────────────────────────────────────────────────────────────────

/// Fixed-width value usable as a field or as an array/sequence element.
pub trait Scalar: Copy {
    /// Native byte width.
    const WIDTH: usize;

    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()>;
    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self>;
}

macro_rules! scalar {
    ($ty:ty, $width:expr, $write:ident, $read:ident) => {
        impl Scalar for $ty {
            const WIDTH: usize = $width;
            fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
                writer.$write::<LittleEndian>(self)
            }
            fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
                reader.$read::<LittleEndian>()
            }
        }
    };
}

scalar!(i16, 2, write_i16, read_i16);
scalar!(i32, 4, write_i32, read_i32);
scalar!(i64, 8, write_i64, read_i64);
scalar!(u16, 2, write_u16, read_u16);
scalar!(u32, 4, write_u32, read_u32);
scalar!(u64, 8, write_u64, read_u64);
scalar!(f32, 4, write_f32, read_f32);
scalar!(f64, 8, write_f64, read_f64);

impl Scalar for i8 {
    const WIDTH: usize = 1;
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_i8(self)
    }
    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_i8()
    }
}

impl Scalar for u8 {
    const WIDTH: usize = 1;
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self)
    }
    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u8()
    }
}

impl Scalar for bool {
    const WIDTH: usize = 1;
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self as u8)
    }
    // Only 1 reads as true, matching what the native side compares against.
    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(reader.read_u8()? == 1)
    }
}

// ── Fields ───────────────────────────────────────────────────────────────────

/// A type that can appear as a participating field of a [`Record`].
///
/// [`Record`]: crate::serialization::Record
pub trait Field: Sized {
    /// Whether the field is stored inline or as an indirect block.
    const STORAGE: Storage;

    /// Reject a declared length before any payload byte is consumed.
    /// Only fixed-width fields know their length up front.
    fn check_len(_name: &'static str, _len: usize) -> Result<(), SerializeError> {
        Ok(())
    }

    /// Append the field's payload bytes to `out`.
    fn write_field(&self, out: &mut Vec<u8>) -> io::Result<()>;

    /// Rebuild the field from exactly the bytes its descriptor declared.
    fn read_field(name: &'static str, block: &[u8]) -> Result<Self, SerializeError>;
}

fn check_width<T: Scalar>(name: &'static str, len: usize) -> Result<(), SerializeError> {
    if len != T::WIDTH {
        return Err(SerializeError::InvalidSize {
            field:    name,
            expected: T::WIDTH,
            found:    len,
        });
    }
    Ok(())
}

fn read_scalar<T: Scalar>(name: &'static str, block: &[u8]) -> Result<T, SerializeError> {
    check_width::<T>(name, block.len())?;
    let mut reader = block;
    Ok(T::read_le(&mut reader)?)
}

macro_rules! scalar_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Field for $ty {
                const STORAGE: Storage = Storage::Inline;
                fn check_len(name: &'static str, len: usize) -> Result<(), SerializeError> {
                    check_width::<$ty>(name, len)
                }
                fn write_field(&self, out: &mut Vec<u8>) -> io::Result<()> {
                    (*self).write_le(out)
                }
                fn read_field(name: &'static str, block: &[u8]) -> Result<Self, SerializeError> {
                    read_scalar(name, block)
                }
            }
        )*
    };
}

scalar_field!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool);

/// Split an indirect block into scalar elements.
fn read_elements<T: Scalar>(name: &'static str, block: &[u8]) -> Result<Vec<T>, SerializeError> {
    if block.len() % T::WIDTH != 0 {
        return Err(SerializeError::InvalidElementSize {
            field: name,
            len:   block.len(),
            width: T::WIDTH,
        });
    }
    let mut elements = Vec::with_capacity(block.len() / T::WIDTH);
    let mut reader = block;
    while !reader.is_empty() {
        elements.push(T::read_le(&mut reader)?);
    }
    Ok(elements)
}

impl<T: Scalar> Field for Vec<T> {
    const STORAGE: Storage = Storage::Indirect;

    fn write_field(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.reserve(self.len() * T::WIDTH);
        for &element in self {
            element.write_le(out)?;
        }
        Ok(())
    }

    fn read_field(name: &'static str, block: &[u8]) -> Result<Self, SerializeError> {
        read_elements(name, block)
    }
}

impl<T: Scalar, const N: usize> Field for [T; N] {
    const STORAGE: Storage = Storage::Indirect;

    fn write_field(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.reserve(N * T::WIDTH);
        for &element in self {
            element.write_le(out)?;
        }
        Ok(())
    }

    fn read_field(name: &'static str, block: &[u8]) -> Result<Self, SerializeError> {
        let elements = read_elements::<T>(name, block)?;
        let found = elements.len();
        elements
            .try_into()
            .map_err(|_| SerializeError::ArrayLengthMismatch { field: name, expected: N, found })
    }
}

impl Field for String {
    const STORAGE: Storage = Storage::Indirect;

    /// UTF-16LE code units followed by a zero unit.  The empty string
    /// produces an empty block, not a lone terminator.
    fn write_field(&self, out: &mut Vec<u8>) -> io::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        for unit in self.encode_utf16() {
            out.write_u16::<LittleEndian>(unit)?;
        }
        out.write_u16::<LittleEndian>(0)
    }

    fn read_field(name: &'static str, block: &[u8]) -> Result<Self, SerializeError> {
        if block.is_empty() {
            return Ok(String::new());
        }
        if block.len() < 2 || block.len() % 2 != 0 {
            return Err(SerializeError::InvalidUtf16 { field: name });
        }
        // The trailing unit is the terminator; its value is not checked.
        let body = &block[..block.len() - 2];
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| SerializeError::InvalidUtf16 { field: name })
    }
}
