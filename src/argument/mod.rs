//! Encrypted argument stubs.
//!
//! ```text
//! +---------+----------+-----------+----------+--------+----------+----------+
//! |   key   | num args | args size | checksum | arg id | arg size | arg data |
//! +---------+----------+-----------+----------+--------+----------+----------+
//! | 32 byte |  uint32  |  uint32   |  uint32  | uint32 |  uint32  |   var    |
//! +---------+----------+-----------+----------+--------+----------+----------+
//! ```
//!
//! The first 44 bytes are cleartext.  The checksum covers only the key,
//! argument count and payload size; the argument records that follow are
//! obfuscated with the keystream in [`crate::cipher`] and are checked only by
//! the length bookkeeping done while parsing them.
//!
//! ```
//! use stubcodec::argument::{decode, encode, Argument};
//!
//! let args = vec![Argument::new(0, [0x12, 0x34, 0x56, 0x78]), Argument::new(1, b"cmd".to_vec())];
//! let stub = encode(&args)?;
//! assert_eq!(decode(&stub)?, args);
//! # Ok::<(), stubcodec::argument::StubError>(())
//! ```

mod header;

pub use header::{
    checksum, StubHeader, OFFSET_ARGS_SIZE, OFFSET_CHECKSUM, OFFSET_FIRST_ARG, OFFSET_NUM_ARGS,
    RECORD_HEADER_SIZE,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::collections::HashSet;
use std::io;
use thiserror::Error;

use crate::cipher::{self, CipherProfile, KEY_SIZE};
use crate::entropy::{EntropyError, EntropySource, SystemEntropy};

#[derive(Error, Debug)]
pub enum StubError {
    #[error("failed to generate crypto key: {0}")]
    KeyGeneration(#[from] EntropyError),
    #[error("invalid argument stub: {len} B is shorter than the {OFFSET_FIRST_ARG} B header")]
    InvalidStub { len: usize },
    #[error("invalid argument stub checksum: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("argument id {0} already exists")]
    DuplicateId(u32),
    #[error("argument {id}: {len} B of data does not fit in a u32 size field")]
    ArgumentTooLarge { id: u32, len: usize },
    #[error("total argument payload exceeds u32::MAX bytes")]
    PayloadTooLarge,
    #[error("argument payload truncated: header declares {declared} B, {available} B present")]
    TruncatedPayload { declared: usize, available: usize },
    #[error("argument #{index} truncated at payload offset {offset} (need {needed} B, {available} B left)")]
    Truncated { index: u32, offset: usize, needed: usize, available: usize },
    #[error("payload size mismatch: header declares {declared} B, argument records use {consumed} B")]
    PayloadSizeMismatch { declared: usize, consumed: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// An identifier-tagged blob handed to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub id:   u32,
    pub data: Vec<u8>,
}

impl Argument {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self { id, data: data.into() }
    }
}

// ── StubOptions ───────────────────────────────────────────────────────────────

/// Configuration shared by the encoding and decoding side of a stub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StubOptions {
    /// Keystream profile; both ends must agree.
    pub profile: CipherProfile,
}

// ── StubCodec ─────────────────────────────────────────────────────────────────

/// Encoder/decoder bound to a set of options and a key source.
#[derive(Debug, Clone, Default)]
pub struct StubCodec<E = SystemEntropy> {
    options: StubOptions,
    entropy: E,
}

impl StubCodec<SystemEntropy> {
    pub fn new(options: StubOptions) -> Self {
        Self { options, entropy: SystemEntropy }
    }
}

impl<E: EntropySource> StubCodec<E> {
    pub fn with_entropy(options: StubOptions, entropy: E) -> Self {
        Self { options, entropy }
    }

    pub fn options(&self) -> &StubOptions {
        &self.options
    }

    /// Build an encrypted stub from `args`, in order.
    ///
    /// Every call draws a new key.  Nothing is returned on error.
    pub fn encode(&self, args: &[Argument]) -> Result<Vec<u8>, StubError> {
        let mut seen = HashSet::with_capacity(args.len());
        let mut total = 0u64;
        for arg in args {
            if !seen.insert(arg.id) {
                return Err(StubError::DuplicateId(arg.id));
            }
            let len = u32::try_from(arg.data.len()).map_err(|_| StubError::ArgumentTooLarge {
                id:  arg.id,
                len: arg.data.len(),
            })?;
            total += RECORD_HEADER_SIZE as u64 + u64::from(len);
        }
        let payload_size = u32::try_from(total).map_err(|_| StubError::PayloadTooLarge)?;
        let count = u32::try_from(args.len()).map_err(|_| StubError::PayloadTooLarge)?;

        let mut key = [0u8; KEY_SIZE];
        self.entropy.fill_bytes(&mut key)?;

        let header = StubHeader::new(key, count, payload_size);
        let mut stub = Vec::with_capacity(OFFSET_FIRST_ARG + payload_size as usize);
        header.write(&mut stub)?;
        for arg in args {
            stub.write_u32::<LittleEndian>(arg.id)?;
            stub.write_u32::<LittleEndian>(arg.data.len() as u32)?;
            stub.extend_from_slice(&arg.data);
        }
        cipher::encrypt(self.options.profile, &key, &mut stub[OFFSET_FIRST_ARG..]);

        debug!(
            "encode stub: {} argument(s), {} B payload, profile {}",
            count,
            payload_size,
            self.options.profile.name()
        );
        Ok(stub)
    }

    /// Verify, decrypt and parse a stub produced by [`StubCodec::encode`].
    ///
    /// `stub` is not modified; the encrypted region is copied before it is
    /// decrypted.
    pub fn decode(&self, stub: &[u8]) -> Result<Vec<Argument>, StubError> {
        let header = StubHeader::parse(stub)?;
        let computed = header.compute_checksum();
        if computed != header.checksum {
            return Err(StubError::ChecksumMismatch { stored: header.checksum, computed });
        }
        if header.count == 0 {
            debug!("decode stub: no arguments");
            return Ok(Vec::new());
        }

        let region = &stub[OFFSET_FIRST_ARG..];
        let declared = header.payload_size as usize;
        if declared > region.len() {
            return Err(StubError::TruncatedPayload { declared, available: region.len() });
        }
        if region.len() > declared {
            debug!("decode stub: ignoring {} trailing byte(s)", region.len() - declared);
        }

        let mut payload = region[..declared].to_vec();
        cipher::decrypt(self.options.profile, &header.key, &mut payload);
        let args = parse_records(&payload, header.count)?;

        debug!(
            "decode stub: {} argument(s), {} B payload, profile {}",
            args.len(),
            declared,
            self.options.profile.name()
        );
        Ok(args)
    }
}

/// Walk `count` decrypted `(id, size, data)` records that must fill `payload`
/// exactly.
fn parse_records(payload: &[u8], count: u32) -> Result<Vec<Argument>, StubError> {
    // count is untrusted; never reserve more records than could fit
    let capacity = (count as usize).min(payload.len() / RECORD_HEADER_SIZE);
    let mut args = Vec::with_capacity(capacity);
    let mut reader = payload;
    for index in 0..count {
        let offset = payload.len() - reader.len();
        if reader.len() < RECORD_HEADER_SIZE {
            return Err(StubError::Truncated {
                index,
                offset,
                needed:    RECORD_HEADER_SIZE,
                available: reader.len(),
            });
        }
        let id = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()? as usize;
        if size > reader.len() {
            return Err(StubError::Truncated {
                index,
                offset:    offset + RECORD_HEADER_SIZE,
                needed:    size,
                available: reader.len(),
            });
        }
        let (data, rest) = reader.split_at(size);
        args.push(Argument { id, data: data.to_vec() });
        reader = rest;
    }
    if !reader.is_empty() {
        return Err(StubError::PayloadSizeMismatch {
            declared: payload.len(),
            consumed: payload.len() - reader.len(),
        });
    }
    Ok(args)
}

/// Encode with default options and the system entropy source.
pub fn encode(args: &[Argument]) -> Result<Vec<u8>, StubError> {
    StubCodec::new(StubOptions::default()).encode(args)
}

/// Decode with default options.
pub fn decode(stub: &[u8]) -> Result<Vec<Argument>, StubError> {
    StubCodec::new(StubOptions::default()).decode(stub)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoEntropy;

    impl EntropySource for NoEntropy {
        fn fill_bytes(&self, _dest: &mut [u8]) -> Result<(), EntropyError> {
            Err(EntropyError::Unavailable)
        }
    }

    /// Deterministic key for layout assertions.
    struct FixedKey([u8; KEY_SIZE]);

    impl EntropySource for FixedKey {
        fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
            dest.copy_from_slice(&self.0[..dest.len()]);
            Ok(())
        }
    }

    fn sample_args() -> Vec<Argument> {
        vec![
            Argument::new(0, [0x12, 0x34, 0x56, 0x78]),
            Argument::new(1, b"hello runtime".repeat(10)),
            Argument::new(2, Vec::new()),
        ]
    }

    #[test]
    fn encoded_length() {
        let args = sample_args();
        let stub = encode(&args).unwrap();
        let expected = OFFSET_FIRST_ARG + 3 * RECORD_HEADER_SIZE + 4 + 130;
        assert_eq!(stub.len(), expected);
    }

    #[test]
    fn roundtrip() {
        let args = sample_args();
        let stub = encode(&args).unwrap();
        assert_eq!(decode(&stub).unwrap(), args);
    }

    #[test]
    fn fresh_key_per_call() {
        let args = sample_args();
        let a = encode(&args).unwrap();
        let b = encode(&args).unwrap();
        assert_ne!(a[..KEY_SIZE], b[..KEY_SIZE]);
        assert_ne!(a[OFFSET_FIRST_ARG..], b[OFFSET_FIRST_ARG..]);
    }

    #[test]
    fn key_generation_failure() {
        let codec = StubCodec::with_entropy(StubOptions::default(), NoEntropy);
        let err = codec.encode(&sample_args()).unwrap_err();
        assert!(matches!(err, StubError::KeyGeneration(EntropyError::Unavailable)));
    }

    #[test]
    fn duplicate_id() {
        let args = vec![
            Argument::new(0, [0x12, 0x34, 0x56, 0x78]),
            Argument::new(0, b"hello runtime".repeat(10)),
        ];
        let err = encode(&args).unwrap_err();
        assert!(matches!(err, StubError::DuplicateId(0)));
        assert_eq!(err.to_string(), "argument id 0 already exists");
    }

    #[test]
    fn duplicate_id_checked_before_key() {
        let codec = StubCodec::with_entropy(StubOptions::default(), NoEntropy);
        let args = vec![Argument::new(7, vec![1]), Argument::new(7, vec![2])];
        assert!(matches!(codec.encode(&args), Err(StubError::DuplicateId(7))));
    }

    #[test]
    fn header_stays_cleartext() {
        let key = [0x42u8; KEY_SIZE];
        let codec = StubCodec::with_entropy(StubOptions::default(), FixedKey(key));
        let stub = codec.encode(&[Argument::new(9, vec![0u8; 16])]).unwrap();

        let header = StubHeader::read(&stub[..OFFSET_FIRST_ARG]).unwrap();
        assert_eq!(header.key, key);
        assert_eq!(header.count, 1);
        assert_eq!(header.payload_size, 8 + 16);
        assert!(header.is_valid());
        // the record is no longer readable as plaintext
        assert_ne!(&stub[OFFSET_FIRST_ARG..OFFSET_FIRST_ARG + 4], &9u32.to_le_bytes());
    }

    #[test]
    fn short_stub() {
        assert!(matches!(decode(&[]), Err(StubError::InvalidStub { len: 0 })));
        assert!(matches!(
            decode(&[0u8; OFFSET_FIRST_ARG - 1]),
            Err(StubError::InvalidStub { .. })
        ));
    }

    #[test]
    fn zeroed_checksum() {
        let mut stub = encode(&sample_args()).unwrap();
        stub[OFFSET_CHECKSUM..OFFSET_FIRST_ARG].copy_from_slice(&[0; 4]);
        let err = decode(&stub).unwrap_err();
        assert!(matches!(err, StubError::ChecksumMismatch { stored: 0, .. }));
        assert!(err.to_string().starts_with("invalid argument stub checksum"));
    }

    #[test]
    fn tampered_count_breaks_checksum() {
        let mut stub = encode(&sample_args()).unwrap();
        stub[OFFSET_NUM_ARGS] ^= 0x01;
        assert!(matches!(decode(&stub), Err(StubError::ChecksumMismatch { .. })));
    }

    #[test]
    fn empty_list_skips_payload() {
        let mut stub = encode(&[]).unwrap();
        assert_eq!(stub.len(), OFFSET_FIRST_ARG);
        stub.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01]);
        assert!(decode(&stub).unwrap().is_empty());
    }

    #[test]
    fn truncated_payload() {
        let stub = encode(&sample_args()).unwrap();
        let err = decode(&stub[..stub.len() - 1]).unwrap_err();
        assert!(matches!(err, StubError::TruncatedPayload { .. }));
    }

    #[test]
    fn trailing_bytes_ignored() {
        let args = sample_args();
        let mut stub = encode(&args).unwrap();
        stub.extend_from_slice(&[0u8; 3]);
        assert_eq!(decode(&stub).unwrap(), args);
    }

    #[test]
    fn wrong_profile_does_not_roundtrip() {
        let word64 = StubCodec::new(StubOptions { profile: CipherProfile::Word64 });
        let args = sample_args();
        let stub = word64.encode(&args).unwrap();
        assert_eq!(word64.decode(&stub).unwrap(), args);
        // wrong profile: garbage lengths or garbage data, never the input
        if let Ok(decoded) = decode(&stub) {
            assert_ne!(decoded, args);
        }
    }

    #[test]
    fn record_running_past_payload() {
        // one record claiming 100 B inside an 8 B payload
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(5).unwrap();
        payload.write_u32::<LittleEndian>(100).unwrap();
        let err = parse_records(&payload, 1).unwrap_err();
        assert!(matches!(
            err,
            StubError::Truncated { index: 0, offset: 8, needed: 100, available: 0 }
        ));
    }

    #[test]
    fn missing_record_header() {
        let err = parse_records(&[0u8; 8], 2).unwrap_err();
        assert!(matches!(
            err,
            StubError::Truncated { index: 1, offset: 8, needed: 8, available: 0 }
        ));
    }

    #[test]
    fn leftover_payload() {
        let err = parse_records(&[0u8; 12], 1).unwrap_err();
        assert!(matches!(err, StubError::PayloadSizeMismatch { declared: 12, consumed: 8 }));
    }

    #[test]
    fn huge_count_does_not_preallocate() {
        let err = parse_records(&[], u32::MAX).unwrap_err();
        assert!(matches!(err, StubError::Truncated { index: 0, .. }));
    }
}
