use crate::consts::INT_SIZE;
use crate::error::{IndexError, Result};

/// Serialized width of a record type. Every value of the type encodes to
/// exactly this many bytes so buckets can be fixed-size blocks.
pub trait FixedWidth {
    const WIDTH: usize;
}

pub trait EncodeRecord: FixedWidth {
    /// Writes the record into `buf`, which is exactly `Self::WIDTH` bytes long.
    fn encode_into(&self, buf: &mut [u8]);
}

pub trait DecodeRecord: FixedWidth + Sized {
    /// Reads a record back out of exactly `Self::WIDTH` bytes.
    fn decode_from(buf: &[u8]) -> Result<Self>;
}

/// A record that can live in a bucket block.
pub trait FixedRecord: EncodeRecord + DecodeRecord + Clone {}

impl<T> FixedRecord for T where T: EncodeRecord + DecodeRecord + Clone {}

pub fn put_i64_le(buf: &mut [u8], value: i64) {
    buf[..INT_SIZE].copy_from_slice(&value.to_le_bytes());
}

pub fn get_i64_le(buf: &[u8]) -> Result<i64> {
    let bytes: [u8; INT_SIZE] = buf
        .get(..INT_SIZE)
        .and_then(|b| <[u8; INT_SIZE]>::try_from(b).ok())
        .ok_or_else(|| IndexError::RecordDecode(format!("need {} bytes, got {}", INT_SIZE, buf.len())))?;
    Ok(i64::from_le_bytes(bytes))
}

fn check_len<T: FixedWidth>(buf: &[u8]) -> Result<()> {
    if buf.len() != T::WIDTH {
        return Err(IndexError::RecordDecode(format!(
            "expected {} bytes, got {}",
            T::WIDTH,
            buf.len()
        )));
    }
    Ok(())
}

impl FixedWidth for u64 {
    const WIDTH: usize = 8;
}

impl EncodeRecord for u64 {
    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }
}

impl DecodeRecord for u64 {
    fn decode_from(buf: &[u8]) -> Result<Self> {
        check_len::<Self>(buf)?;
        Ok(get_i64_le(buf)? as u64)
    }
}

impl FixedWidth for i64 {
    const WIDTH: usize = 8;
}

impl EncodeRecord for i64 {
    fn encode_into(&self, buf: &mut [u8]) {
        put_i64_le(buf, *self);
    }
}

impl DecodeRecord for i64 {
    fn decode_from(buf: &[u8]) -> Result<Self> {
        check_len::<Self>(buf)?;
        get_i64_le(buf)
    }
}

impl<const N: usize> FixedWidth for [u8; N] {
    const WIDTH: usize = N;
}

impl<const N: usize> EncodeRecord for [u8; N] {
    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }
}

impl<const N: usize> DecodeRecord for [u8; N] {
    fn decode_from(buf: &[u8]) -> Result<Self> {
        check_len::<Self>(buf)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(buf);
        Ok(out)
    }
}

/// Pairs are laid out back to back, first element first.
impl<A: FixedWidth, B: FixedWidth> FixedWidth for (A, B) {
    const WIDTH: usize = A::WIDTH + B::WIDTH;
}

impl<A: EncodeRecord, B: EncodeRecord> EncodeRecord for (A, B) {
    fn encode_into(&self, buf: &mut [u8]) {
        let (head, tail) = buf.split_at_mut(A::WIDTH);
        self.0.encode_into(head);
        self.1.encode_into(tail);
    }
}

impl<A: DecodeRecord, B: DecodeRecord> DecodeRecord for (A, B) {
    fn decode_from(buf: &[u8]) -> Result<Self> {
        check_len::<Self>(buf)?;
        let (head, tail) = buf.split_at(A::WIDTH);
        Ok((A::decode_from(head)?, B::decode_from(tail)?))
    }
}
