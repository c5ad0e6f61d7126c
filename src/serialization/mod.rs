//! Struct serialization engine.
//!
//! A [`Record`] lists its participating fields in declaration order.
//! [`marshal`] writes the magic word, one descriptor per field, the terminator
//! and then the raw field bytes.  [`unmarshal`] validates the magic word and
//! the descriptor count against the target record before it trusts any
//! length, so a stale or foreign blob is rejected instead of being
//! reinterpreted.
//!
//! Records are usually declared with [`impl_record!`](crate::impl_record):
//!
//! ```
//! use stubcodec::impl_record;
//! use stubcodec::serialization::{marshal, unmarshal};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Options {
//!     timeout: u32,
//!     ports:   [u16; 2],
//!     name:    String,
//!     cache:   Vec<u8>, // not listed below: never serialized
//! }
//! impl_record!(Options { timeout, ports, name });
//!
//! let opts = Options { timeout: 30, ports: [80, 443], name: "svc".into(), cache: vec![1] };
//! let blob = marshal(&opts)?;
//! let back: Options = unmarshal(&blob)?;
//! assert_eq!(back, Options { cache: Vec::new(), ..opts });
//! # Ok::<(), stubcodec::serialization::SerializeError>(())
//! ```

mod macros;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};
use std::io;
use thiserror::Error;

use crate::descriptor::{Descriptor, Storage, HEADER_MAGIC, ITEM_END};
use crate::value::Field;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("invalid data length")]
    InvalidDataLength,
    #[error("invalid magic number: {0:#010x}")]
    InvalidMagic(u32),
    #[error("descriptor list truncated before terminator")]
    TruncatedDescriptors,
    #[error("invalid number of fields: record has {expected}, data has {found}")]
    FieldCountMismatch { expected: usize, found: usize },
    #[error("field `{field}`: expected {expected} descriptor, found {found}")]
    DescriptorKindMismatch { field: &'static str, expected: Storage, found: Storage },
    #[error("field `{field}`: invalid size {found}, native size is {expected}")]
    InvalidSize { field: &'static str, expected: usize, found: usize },
    #[error("field `{field}`: block of {len} B is not a multiple of element size {width}")]
    InvalidElementSize { field: &'static str, len: usize, width: usize },
    #[error("field `{field}`: expected {expected} elements, found {found}")]
    ArrayLengthMismatch { field: &'static str, expected: usize, found: usize },
    #[error("field `{field}`: invalid utf16 string")]
    InvalidUtf16 { field: &'static str },
    #[error("field `{field}`: truncated at payload offset {offset} (need {needed} B, {available} B left)")]
    Truncated { field: &'static str, offset: usize, needed: usize, available: usize },
    #[error("field `{field}`: {len} B does not fit in a descriptor")]
    FieldTooLarge { field: &'static str, len: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A record type with a statically declared, ordered list of fields.
///
/// `encode_fields` and `decode_fields` must visit the same fields in the same
/// order, and exactly `FIELD_COUNT` of them.
pub trait Record: Sized {
    const FIELD_COUNT: usize;

    fn encode_fields(&self, encoder: &mut FieldEncoder) -> Result<(), SerializeError>;
    fn decode_fields(decoder: &mut FieldDecoder<'_>) -> Result<Self, SerializeError>;
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Collects descriptors and payload bytes while a record writes its fields.
#[derive(Debug, Default)]
pub struct FieldEncoder {
    descriptors: Vec<Descriptor>,
    payload:     Vec<u8>,
}

impl FieldEncoder {
    fn with_capacity(fields: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(fields),
            payload:     Vec::new(),
        }
    }

    pub fn field<F: Field>(&mut self, name: &'static str, value: &F) -> Result<(), SerializeError> {
        let start = self.payload.len();
        value.write_field(&mut self.payload)?;
        let len = self.payload.len() - start;
        let descriptor = match F::STORAGE {
            Storage::Inline   => Descriptor::inline(len),
            Storage::Indirect => Descriptor::indirect(len),
        }
        .ok_or(SerializeError::FieldTooLarge { field: name, len })?;
        trace!("encode field `{}`: {}", name, descriptor);
        self.descriptors.push(descriptor);
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, SerializeError> {
        let header_len = 4 * (self.descriptors.len() + 2);
        let mut buffer = Vec::with_capacity(header_len + self.payload.len());
        buffer.write_u32::<LittleEndian>(HEADER_MAGIC)?;
        for descriptor in &self.descriptors {
            descriptor.write(&mut buffer)?;
        }
        buffer.write_u32::<LittleEndian>(ITEM_END)?;
        buffer.extend_from_slice(&self.payload);
        Ok(buffer)
    }
}

/// Serialize `record` into a self-describing blob.
pub fn marshal<R: Record>(record: &R) -> Result<Vec<u8>, SerializeError> {
    let mut encoder = FieldEncoder::with_capacity(R::FIELD_COUNT);
    record.encode_fields(&mut encoder)?;
    if encoder.descriptors.len() != R::FIELD_COUNT {
        return Err(SerializeError::FieldCountMismatch {
            expected: R::FIELD_COUNT,
            found:    encoder.descriptors.len(),
        });
    }
    debug!(
        "marshal: {} field(s), {} B payload",
        encoder.descriptors.len(),
        encoder.payload.len()
    );
    encoder.finish()
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Read the magic word and the descriptor list.  Returns the descriptors and
/// the payload that follows the terminator.
fn read_header(data: &[u8]) -> Result<(Vec<Descriptor>, &[u8]), SerializeError> {
    if data.len() < 4 {
        return Err(SerializeError::InvalidDataLength);
    }
    let mut reader = data;
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != HEADER_MAGIC {
        return Err(SerializeError::InvalidMagic(magic));
    }
    let mut descriptors = Vec::new();
    loop {
        let word = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| SerializeError::TruncatedDescriptors)?;
        match Descriptor::from_word(word) {
            Some(descriptor) => descriptors.push(descriptor),
            None => break,
        }
    }
    Ok((descriptors, reader))
}

/// Hands out payload blocks to a record's fields in descriptor order.
#[derive(Debug)]
pub struct FieldDecoder<'a> {
    descriptors: Vec<Descriptor>,
    next:        usize,
    payload:     &'a [u8],
    offset:      usize,
}

impl<'a> FieldDecoder<'a> {
    pub fn field<F: Field>(&mut self, name: &'static str) -> Result<F, SerializeError> {
        let descriptor = *self.descriptors.get(self.next).ok_or(
            SerializeError::FieldCountMismatch {
                expected: self.next + 1,
                found:    self.descriptors.len(),
            },
        )?;
        self.next += 1;

        if descriptor.storage() != F::STORAGE {
            return Err(SerializeError::DescriptorKindMismatch {
                field:    name,
                expected: F::STORAGE,
                found:    descriptor.storage(),
            });
        }
        let len = descriptor.len();
        F::check_len(name, len)?;

        let available = self.payload.len() - self.offset;
        if len > available {
            return Err(SerializeError::Truncated {
                field:  name,
                offset: self.offset,
                needed: len,
                available,
            });
        }
        let block = &self.payload[self.offset..self.offset + len];
        trace!("decode field `{}`: {} at offset {}", name, descriptor, self.offset);
        self.offset += len;
        F::read_field(name, block)
    }
}

/// Deserialize a blob produced by [`marshal`] into a fresh `R`.
///
/// On error nothing is returned; there is no partially decoded record.
pub fn unmarshal<R: Record>(data: &[u8]) -> Result<R, SerializeError> {
    let (descriptors, payload) = read_header(data)?;
    if descriptors.len() != R::FIELD_COUNT {
        return Err(SerializeError::FieldCountMismatch {
            expected: R::FIELD_COUNT,
            found:    descriptors.len(),
        });
    }
    let mut decoder = FieldDecoder { descriptors, next: 0, payload, offset: 0 };
    let record = R::decode_fields(&mut decoder)?;
    if decoder.next != R::FIELD_COUNT {
        return Err(SerializeError::FieldCountMismatch {
            expected: R::FIELD_COUNT,
            found:    decoder.next,
        });
    }
    if decoder.offset < payload.len() {
        debug!("unmarshal: ignoring {} trailing byte(s)", payload.len() - decoder.offset);
    }
    debug!("unmarshal: {} field(s), {} B payload", R::FIELD_COUNT, decoder.offset);
    Ok(record)
}

// ── Inspection ───────────────────────────────────────────────────────────────

/// One descriptor and where its bytes start in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub descriptor: Descriptor,
    pub offset:     usize,
}

/// Schema-less view of a serialized blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLayout {
    pub fields:         Vec<FieldLayout>,
    /// Bytes before the payload: magic, descriptors and terminator.
    pub header_len:     usize,
    /// Sum of all descriptor lengths.
    pub declared_bytes: usize,
    /// Payload bytes actually present.
    pub payload_bytes:  usize,
}

impl BlobLayout {
    /// Whether every declared block lies within the payload.
    pub fn is_complete(&self) -> bool {
        self.declared_bytes <= self.payload_bytes
    }
}

/// Validate the header of a blob without a target record and describe it.
pub fn inspect(data: &[u8]) -> Result<BlobLayout, SerializeError> {
    let (descriptors, payload) = read_header(data)?;
    let mut offset = 0usize;
    let fields = descriptors
        .into_iter()
        .map(|descriptor| {
            let layout = FieldLayout { descriptor, offset };
            offset += descriptor.len();
            layout
        })
        .collect::<Vec<_>>();
    Ok(BlobLayout {
        header_len: data.len() - payload.len(),
        fields,
        declared_bytes: offset,
        payload_bytes: payload.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_record;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Pair {
        a: u32,
        b: [u32; 2],
    }
    impl_record!(Pair { a, b });

    #[derive(Debug, Default, PartialEq)]
    struct Single {
        arg1: u16,
    }
    impl_record!(Single { arg1 });

    #[derive(Debug, Default, PartialEq)]
    struct Named {
        name: String,
    }
    impl_record!(Named { name });

    #[test]
    fn pair_layout() {
        let blob = marshal(&Pair { a: 123, b: [456, 789] }).unwrap();
        assert_eq!(&blob[0..4], &[0xFF; 4]);
        assert_eq!(&blob[4..8], &4u32.to_le_bytes());
        assert_eq!(&blob[8..12], &0x8000_0008u32.to_le_bytes());
        assert_eq!(&blob[12..16], &[0; 4]);
        assert_eq!(blob.len(), 16 + 12);
        assert_eq!(&blob[16..20], &123u32.to_le_bytes());
    }

    #[test]
    fn empty_input() {
        assert!(matches!(unmarshal::<Pair>(&[]), Err(SerializeError::InvalidDataLength)));
        assert!(matches!(unmarshal::<Pair>(&[0xFF; 3]), Err(SerializeError::InvalidDataLength)));
    }

    #[test]
    fn bad_magic() {
        let err = unmarshal::<Pair>(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, SerializeError::InvalidMagic(0)));
        assert_eq!(err.to_string(), "invalid magic number: 0x00000000");
    }

    #[test]
    fn descriptors_without_terminator() {
        let mut data = vec![0xFF; 4];
        data.extend_from_slice(&[0x04, 0x00, 0x00]);
        assert!(matches!(
            unmarshal::<Pair>(&data),
            Err(SerializeError::TruncatedDescriptors)
        ));
    }

    #[test]
    fn field_count_mismatch() {
        let mut data = vec![0xFF; 4];
        data.extend_from_slice(&[0; 4]);
        let err = unmarshal::<Pair>(&data).unwrap_err();
        assert!(matches!(err, SerializeError::FieldCountMismatch { expected: 2, found: 0 }));
    }

    #[test]
    fn inline_size_checked_before_read() {
        let data = [
            0xFF, 0xFF, 0xFF, 0xFF,
            0x03, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];
        let err = unmarshal::<Single>(&data).unwrap_err();
        assert!(matches!(
            err,
            SerializeError::InvalidSize { field: "arg1", expected: 2, found: 3 }
        ));
    }

    #[test]
    fn missing_payload_is_truncation() {
        let data = [
            0xFF, 0xFF, 0xFF, 0xFF,
            0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x01,
        ];
        let err = unmarshal::<Single>(&data).unwrap_err();
        assert!(matches!(
            err,
            SerializeError::Truncated { field: "arg1", offset: 0, needed: 2, available: 1 }
        ));
    }

    #[test]
    fn storage_kind_must_match() {
        // inline descriptor where the record expects a string block
        let data = [
            0xFF, 0xFF, 0xFF, 0xFF,
            0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        let err = unmarshal::<Named>(&data).unwrap_err();
        assert!(matches!(
            err,
            SerializeError::DescriptorKindMismatch {
                field:    "name",
                expected: Storage::Indirect,
                found:    Storage::Inline,
            }
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut blob = marshal(&Pair { a: 1, b: [2, 3] }).unwrap();
        blob.extend_from_slice(&[0xAA; 5]);
        assert_eq!(unmarshal::<Pair>(&blob).unwrap(), Pair { a: 1, b: [2, 3] });
    }

    #[test]
    fn inspect_reports_offsets() {
        let blob = marshal(&Pair { a: 1, b: [2, 3] }).unwrap();
        let layout = inspect(&blob).unwrap();
        assert_eq!(layout.header_len, 16);
        assert_eq!(layout.fields.len(), 2);
        assert_eq!(layout.fields[0], FieldLayout { descriptor: Descriptor::Inline(4), offset: 0 });
        assert_eq!(layout.fields[1], FieldLayout { descriptor: Descriptor::Indirect(8), offset: 4 });
        assert_eq!(layout.declared_bytes, 12);
        assert!(layout.is_complete());

        let layout = inspect(&blob[..blob.len() - 1]).unwrap();
        assert!(!layout.is_complete());
    }

    struct Lying;

    impl Record for Lying {
        const FIELD_COUNT: usize = 2;
        fn encode_fields(&self, encoder: &mut FieldEncoder) -> Result<(), SerializeError> {
            encoder.field("only", &1u8)
        }
        fn decode_fields(decoder: &mut FieldDecoder<'_>) -> Result<Self, SerializeError> {
            decoder.field::<u8>("only")?;
            Ok(Lying)
        }
    }

    #[test]
    fn manual_record_must_honour_field_count() {
        assert!(matches!(
            marshal(&Lying),
            Err(SerializeError::FieldCountMismatch { expected: 2, found: 1 })
        ));
    }
}
