//! Binary save-state codec.
//!
//! Every stateful component writes its fields in a fixed order through a
//! [`StateWriter`] and reads them back in the same order through a
//! [`StateReader`]. All multi-byte values are little-endian. A blob begins
//! with a short header (magic + format version) and ends with a `true`
//! sentinel byte, so a stream cut short anywhere fails to restore.

use thiserror::Error;

/// Magic bytes at the start of every save-state blob.
pub const STATE_MAGIC: [u8; 4] = *b"NSTS";

/// Current save-state format version.
pub const STATE_VERSION: u16 = 2;

/// Errors raised while decoding a save-state blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("save state truncated: wanted {wanted} byte(s), {remaining} remaining")]
    Truncated { wanted: usize, remaining: usize },
    #[error("save state is missing its end-of-stream sentinel")]
    MissingSentinel,
    #[error("not a save state (bad magic)")]
    BadMagic,
    #[error("unsupported save state version {0}")]
    UnsupportedVersion(u16),
    #[error("invalid save state: {0}")]
    Invalid(&'static str),
}

/// Sequential writer for save-state blobs.
#[derive(Debug, Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the magic/version header.
    pub fn write_header(&mut self) {
        self.buf.extend_from_slice(&STATE_MAGIC);
        self.write_u16(STATE_VERSION);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write raw bytes with no length prefix; the reader must know the size.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a `u32` length followed by the bytes.
    pub fn write_block(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Terminate the stream.
    pub fn write_sentinel(&mut self) {
        self.write_bool(true);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential reader over a save-state blob.
#[derive(Debug)]
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StateError> {
        if self.remaining() < n {
            return Err(StateError::Truncated {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StateError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Check the magic/version header.
    pub fn read_header(&mut self) -> Result<(), StateError> {
        let magic: [u8; 4] = self.take_array()?;
        if magic != STATE_MAGIC {
            return Err(StateError::BadMagic);
        }
        let version = self.read_u16()?;
        if version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, StateError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, StateError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(StateError::Invalid("boolean out of range")),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, StateError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, StateError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, StateError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, StateError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, StateError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Fill `out` with exactly `out.len()` bytes.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<(), StateError> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    /// Read a length-prefixed block written by [`StateWriter::write_block`].
    pub fn read_block(&mut self) -> Result<Vec<u8>, StateError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed block into a buffer that must already have
    /// the same length.
    pub fn read_block_into(&mut self, out: &mut [u8]) -> Result<(), StateError> {
        let len = self.read_u32()? as usize;
        if len != out.len() {
            return Err(StateError::Invalid("block length mismatch"));
        }
        self.read_into(out)
    }

    /// Consume the end-of-stream sentinel.
    pub fn read_sentinel(&mut self) -> Result<(), StateError> {
        match self.read_u8() {
            Ok(1) => Ok(()),
            Ok(_) | Err(StateError::Truncated { .. }) => Err(StateError::MissingSentinel),
            Err(e) => Err(e),
        }
    }
}
