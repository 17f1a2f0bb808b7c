//! binary codec shared by every entity
//!
//! variable-length fields (bytes, text, nested lists) carry a big-endian
//! u16 length prefix, so no single field can exceed 65535 bytes.
//! enumerated fields are a single tag byte.

use crate::{Error, Result};

/// largest payload a single length-prefixed field can carry
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// types with a binary wire form
pub trait Encode {
    fn encode(&self, w: &mut Writer) -> Result<()>;

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        self.encode(&mut w)?;
        Ok(w.into_bytes())
    }
}

/// types that can be rebuilt from their wire form
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self>;

    /// decode from the front of `bytes`, returning the value and bytes consumed
    fn deserialize(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(bytes);
        let value = Self::decode(&mut r)?;
        Ok((value, r.position()))
    }
}

#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// write a length (element count or byte count) as u16
    pub fn put_len(&mut self, len: usize) -> Result<()> {
        let len16 = u16::try_from(len).map_err(|_| Error::FieldTooLong { len })?;
        self.put_u16(len16);
        Ok(())
    }

    /// length-prefixed byte field
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_len(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// length-prefixed utf-8 field (prefix counts bytes, not chars)
    pub fn put_str(&mut self, s: &str) -> Result<()> {
        self.put_bytes(s.as_bytes())
    }

    /// raw bytes with no prefix
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put<T: Encode>(&mut self, value: &T) -> Result<()> {
        value.encode(self)
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

#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn raw(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated {
                need: n,
                have: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// everything not consumed yet
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.raw(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.raw(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.raw(8)?);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.u16()? as usize)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.len()?;
        self.raw(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8)
    }

    pub fn get<T: Decode>(&mut self) -> Result<T> {
        T::decode(self)
    }
}
