//! Little-endian primitives for the database body.
//!
//! Strings are a `u32` byte length followed by UTF-8 bytes. Lists are a `u32` count
//! followed by their items.

use super::DbError;

#[derive(Debug, Default)]
pub(crate) struct Writer {
  buf: Vec<u8>,
}

impl Writer {
  pub fn with_header(magic: &[u8; 3], version: u8) -> Self {
    let mut buf = Vec::with_capacity(4096);
    buf.extend_from_slice(magic);
    buf.push(version);
    Self { buf }
  }

  pub fn u8(&mut self, value: u8) {
    self.buf.push(value);
  }

  pub fn bool(&mut self, value: bool) {
    self.buf.push(value as u8);
  }

  #[allow(clippy::cast_possible_truncation)]
  pub fn u32(&mut self, value: usize) {
    debug_assert!(u32::try_from(value).is_ok(), "length {value} exceeds u32::MAX");
    self.buf.extend_from_slice(&(value as u32).to_le_bytes());
  }

  pub fn i32(&mut self, value: i32) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  pub fn u64(&mut self, value: u64) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  pub fn str(&mut self, value: &str) {
    self.u32(value.len());
    self.buf.extend_from_slice(value.as_bytes());
  }

  pub fn strings(&mut self, values: &[String]) {
    self.u32(values.len());
    for value in values {
      self.str(value);
    }
  }

  pub fn finish(self) -> Vec<u8> {
    self.buf
  }
}

pub(crate) struct Reader<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  pub fn new(bytes: &'a [u8], pos: usize) -> Self {
    Self { bytes, pos }
  }

  fn take(&mut self, len: usize) -> Result<&'a [u8], DbError> {
    let end = self
      .pos
      .checked_add(len)
      .filter(|end| *end <= self.bytes.len())
      .ok_or_else(|| DbError::Corrupt(format!("unexpected end of data at offset {}", self.pos)))?;
    let slice = &self.bytes[self.pos..end];
    self.pos = end;
    Ok(slice)
  }

  fn array<const N: usize>(&mut self) -> Result<[u8; N], DbError> {
    let mut out = [0u8; N];
    out.copy_from_slice(self.take(N)?);
    Ok(out)
  }

  pub fn u8(&mut self) -> Result<u8, DbError> {
    Ok(self.take(1)?[0])
  }

  pub fn bool(&mut self) -> Result<bool, DbError> {
    match self.u8()? {
      0 => Ok(false),
      1 => Ok(true),
      other => Err(DbError::Corrupt(format!("invalid bool byte {other}"))),
    }
  }

  pub fn u32(&mut self) -> Result<u32, DbError> {
    Ok(u32::from_le_bytes(self.array()?))
  }

  /// A length or count, bounded by the bytes left so corrupt input cannot trigger huge
  /// allocations.
  pub fn len(&mut self) -> Result<usize, DbError> {
    let len = self.u32()? as usize;
    if len > self.remaining() {
      return Err(DbError::Corrupt(format!("length {len} exceeds remaining data")));
    }
    Ok(len)
  }

  pub fn i32(&mut self) -> Result<i32, DbError> {
    Ok(i32::from_le_bytes(self.array()?))
  }

  pub fn u64(&mut self) -> Result<u64, DbError> {
    Ok(u64::from_le_bytes(self.array()?))
  }

  pub fn string(&mut self) -> Result<String, DbError> {
    let len = self.len()?;
    let bytes = self.take(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| DbError::Corrupt(format!("invalid utf-8 string: {e}")))
  }

  pub fn strings(&mut self) -> Result<Vec<String>, DbError> {
    let count = self.len()?;
    (0..count).map(|_| self.string()).collect()
  }

  pub fn remaining(&self) -> usize {
    self.bytes.len() - self.pos
  }
}
