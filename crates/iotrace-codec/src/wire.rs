use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use iotrace_types::{Status, StatusCode, TraceCode};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("insufficient data: need {need} bytes but only {have} remain")]
    InsufficientData { need: usize, have: usize },
    #[error("{field} count {count} exceeds capacity {capacity}")]
    CountOutOfRange {
        field: &'static str,
        count: usize,
        capacity: usize,
    },
    #[error("unknown record schema: {0}")]
    UnknownSchema(String),
}

impl From<WireError> for Status {
    fn from(err: WireError) -> Self {
        let code = match &err {
            WireError::InsufficientData { .. } => TraceCode::RECORD_TRUNCATED,
            WireError::CountOutOfRange { .. } => StatusCode::INVALID_FORMAT,
            WireError::UnknownSchema(_) => TraceCode::UNSUPPORTED_SCHEMA,
        };
        Status::with_message(code, err.to_string())
    }
}

/// Little-endian fixed-width field decoding.
pub trait WireDeserialize: Sized {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError>;
}

fn read_bytes<'a>(buf: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8], WireError> {
    let have = buf.len().saturating_sub(*offset);
    if have < n {
        return Err(WireError::InsufficientData { need: n, have });
    }
    let slice = &buf[*offset..*offset + n];
    *offset += n;
    Ok(slice)
}

macro_rules! impl_wire_for_int {
    ($ty:ty, $size:expr, $read:ident) => {
        impl WireDeserialize for $ty {
            fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
                let bytes = read_bytes(buf, offset, $size)?;
                Ok(LittleEndian::$read(bytes))
            }
        }
    };
}

impl_wire_for_int!(u16, 2, read_u16);
impl_wire_for_int!(u32, 4, read_u32);
impl_wire_for_int!(u64, 8, read_u64);
impl_wire_for_int!(i32, 4, read_i32);

impl WireDeserialize for u8 {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let bytes = read_bytes(buf, offset, 1)?;
        Ok(bytes[0])
    }
}

/// Reads a field at an absolute offset within a record.
pub fn read_at<T: WireDeserialize>(buf: &[u8], at: usize) -> Result<T, WireError> {
    let mut offset = at;
    T::wire_deserialize(buf, &mut offset)
}

/// Reads a NUL-padded string field of fixed capacity.
///
/// The value ends at the first NUL (or at the capacity when there is none).
/// Invalid UTF-8 is replaced rather than rejected.
pub fn read_fixed_str(buf: &[u8], at: usize, capacity: usize) -> Result<String, WireError> {
    let mut offset = at;
    let raw = read_bytes(buf, &mut offset, capacity)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ints_little_endian() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_at::<u8>(&buf, 0).unwrap(), 0x01);
        assert_eq!(read_at::<u16>(&buf, 0).unwrap(), 0x0201);
        assert_eq!(read_at::<u32>(&buf, 4).unwrap(), 0x0807_0605);
        assert_eq!(read_at::<u64>(&buf, 0).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn test_read_negative_i32() {
        let buf = (-7i32).to_le_bytes();
        assert_eq!(read_at::<i32>(&buf, 0).unwrap(), -7);
    }

    #[test]
    fn test_sequential_offsets() {
        let buf = [0x10, 0x00, 0x20, 0x00, 0x00, 0x00];
        let mut offset = 0;
        assert_eq!(u16::wire_deserialize(&buf, &mut offset).unwrap(), 0x10);
        assert_eq!(u32::wire_deserialize(&buf, &mut offset).unwrap(), 0x20);
        assert_eq!(offset, 6);
    }

    #[test]
    fn test_insufficient_data() {
        let buf = [0u8; 3];
        let err = read_at::<u32>(&buf, 0).unwrap_err();
        assert_eq!(err, WireError::InsufficientData { need: 4, have: 3 });

        // Offsets past the end report zero remaining instead of underflowing.
        let err = read_at::<u8>(&buf, 10).unwrap_err();
        assert_eq!(err, WireError::InsufficientData { need: 1, have: 0 });
    }

    #[test]
    fn test_fixed_str_trims_at_nul() {
        let mut buf = [0u8; 12];
        buf[2..7].copy_from_slice(b"blk.0");
        buf[8] = b'x';
        assert_eq!(read_fixed_str(&buf, 2, 8).unwrap(), "blk.0");
    }

    #[test]
    fn test_fixed_str_without_nul_uses_full_capacity() {
        let buf = *b"token_embd";
        assert_eq!(read_fixed_str(&buf, 0, 5).unwrap(), "token");
    }

    #[test]
    fn test_fixed_str_lossy_utf8() {
        let buf = [b'a', 0xFF, b'b', 0];
        let s = read_fixed_str(&buf, 0, 4).unwrap();
        assert_eq!(s, "a\u{FFFD}b");
    }

    #[test]
    fn test_wire_error_to_status() {
        let s: Status = WireError::InsufficientData { need: 256, have: 10 }.into();
        assert_eq!(s.code(), TraceCode::RECORD_TRUNCATED);
        let s: Status = WireError::UnknownSchema("v9".into()).into();
        assert_eq!(s.code(), TraceCode::UNSUPPORTED_SCHEMA);
    }
}
