//! Tag/wire-type/value field encoding used inside frame payloads.
//!
//! A minimal subset of the protocol-buffer wire format: each field is a
//! varint key `(field_number << 3) | wire_type` followed by its value.
//! Writers here always emit the field, zero values included.

use bytes::{BufMut, BytesMut};

use crate::errors::DecodeReason;

/// Wire type in the low three bits of a field key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    /// Base-128 varint
    Varint,
    /// 8 little-endian bytes
    Fixed64,
    /// Varint length followed by that many bytes
    LengthDelimited,
    /// 4 little-endian bytes
    Fixed32,
}

impl WireType {
    fn from_bits(bits: u8) -> Result<Self, DecodeReason> {
        match bits {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            other => Err(DecodeReason::UnsupportedWireType(other)),
        }
    }

    fn bits(self) -> u64 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::LengthDelimited => 2,
            Self::Fixed32 => 5,
        }
    }
}

/// Writes `value` as a base-128 varint.
pub fn put_varint(dst: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Writes a field key.
pub fn put_key(dst: &mut impl BufMut, field: u32, wire_type: WireType) {
    put_varint(dst, (u64::from(field) << 3) | wire_type.bits());
}

/// Writes an unsigned integer field.
pub fn put_uint_field(dst: &mut impl BufMut, field: u32, value: u64) {
    put_key(dst, field, WireType::Varint);
    put_varint(dst, value);
}

/// Writes a boolean field as varint 0 or 1.
pub fn put_bool_field(dst: &mut impl BufMut, field: u32, value: bool) {
    put_uint_field(dst, field, u64::from(value));
}

/// Writes a bytes or string field.
pub fn put_bytes_field(dst: &mut impl BufMut, field: u32, value: &[u8]) {
    put_key(dst, field, WireType::LengthDelimited);
    put_varint(dst, value.len() as u64);
    dst.put_slice(value);
}

/// Writes a nested message field, encoding it with `encode` first.
pub fn put_message_field(dst: &mut impl BufMut, field: u32, encode: impl FnOnce(&mut BytesMut)) {
    let mut nested = BytesMut::new();
    encode(&mut nested);
    put_bytes_field(dst, field, &nested);
}

/// A decoded field value, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Varint
    Varint(u64),
    /// Fixed 64-bit
    Fixed64(u64),
    /// Length-delimited bytes
    Bytes(&'a [u8]),
    /// Fixed 32-bit
    Fixed32(u32),
}

impl<'a> FieldValue<'a> {
    /// Interprets the value as a `u32`.
    pub fn as_u32(self, field: u32) -> Result<u32, DecodeReason> {
        match self {
            Self::Varint(value) => {
                u32::try_from(value).map_err(|_| DecodeReason::OutOfRange { field, value })
            },
            _ => Err(DecodeReason::WrongWireType { field }),
        }
    }

    /// Interprets the value as a boolean (varint 0 or 1).
    pub fn as_bool(self, field: u32) -> Result<bool, DecodeReason> {
        match self {
            Self::Varint(0) => Ok(false),
            Self::Varint(1) => Ok(true),
            Self::Varint(value) => Err(DecodeReason::OutOfRange { field, value }),
            _ => Err(DecodeReason::WrongWireType { field }),
        }
    }

    /// Interprets the value as raw bytes.
    pub fn as_bytes(self, field: u32) -> Result<&'a [u8], DecodeReason> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            _ => Err(DecodeReason::WrongWireType { field }),
        }
    }

    /// Interprets the value as a UTF-8 string.
    pub fn as_string(self, field: u32) -> Result<String, DecodeReason> {
        let bytes = self.as_bytes(field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeReason::InvalidUtf8 { field })
    }
}

/// Iterates over the fields of an encoded message.
///
/// Yields `(field_number, value)` pairs in wire order. After the first
/// error the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> FieldReader<'a> {
    /// Reads fields from `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, failed: false }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeReason> {
        if self.buf.len() < n {
            return Err(DecodeReason::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn varint(&mut self) -> Result<u64, DecodeReason> {
        let mut value = 0u64;
        for i in 0..10 {
            let byte = self.take(1)?[0];
            let bits = u64::from(byte & 0x7F);
            if i == 9 && bits > 1 {
                return Err(DecodeReason::VarintOverflow);
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeReason::VarintOverflow)
    }

    fn field(&mut self) -> Result<(u32, FieldValue<'a>), DecodeReason> {
        let key = self.varint()?;
        let wire_type = WireType::from_bits((key & 0x07) as u8)?;
        let field = u32::try_from(key >> 3)
            .map_err(|_| DecodeReason::OutOfRange { field: 0, value: key >> 3 })?;
        if field == 0 {
            return Err(DecodeReason::InvalidFieldNumber);
        }
        let value = match wire_type {
            WireType::Varint => FieldValue::Varint(self.varint()?),
            WireType::Fixed64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8)?);
                FieldValue::Fixed64(u64::from_le_bytes(raw))
            },
            WireType::LengthDelimited => {
                let len = self.varint()?;
                let len = usize::try_from(len).map_err(|_| DecodeReason::Truncated)?;
                FieldValue::Bytes(self.take(len)?)
            },
            WireType::Fixed32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(self.take(4)?);
                FieldValue::Fixed32(u32::from_le_bytes(raw))
            },
        };
        Ok((field, value))
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<(u32, FieldValue<'a>), DecodeReason>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        let item = self.field();
        self.failed = item.is_err();
        Some(item)
    }
}

/// Unwraps a required field collected during decoding.
pub fn required<T>(value: Option<T>, name: &'static str) -> Result<T, DecodeReason> {
    value.ok_or(DecodeReason::MissingField(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(buf: &[u8]) -> Result<Vec<(u32, FieldValue<'_>)>, DecodeReason> {
        FieldReader::new(buf).collect()
    }

    #[test]
    fn varint_encoding() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 0);
        put_varint(&mut buf, 127);
        put_varint(&mut buf, 128);
        put_varint(&mut buf, 300);
        assert_eq!(&buf[..], &[0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02]);
    }

    #[test]
    fn zero_values_are_emitted() {
        let mut buf = BytesMut::new();
        put_uint_field(&mut buf, 1, 0);
        put_bool_field(&mut buf, 2, false);
        put_bytes_field(&mut buf, 3, &[]);
        assert_eq!(&buf[..], &[0x08, 0x00, 0x10, 0x00, 0x1A, 0x00]);
    }

    #[test]
    fn reads_back_fields() {
        let mut buf = BytesMut::new();
        put_uint_field(&mut buf, 1, u64::from(u32::MAX));
        put_bytes_field(&mut buf, 2, b"abc");
        let fields = collect(&buf).unwrap();
        assert_eq!(fields[0].1.as_u32(1).unwrap(), u32::MAX);
        assert_eq!(fields[1].1.as_string(2).unwrap(), "abc");
    }

    #[test]
    fn skips_fixed_width_values() {
        let buf = [0x0D, 1, 2, 3, 4, 0x11, 0, 0, 0, 0, 0, 0, 0, 0];
        let fields = collect(&buf).unwrap();
        assert_eq!(fields[0], (1, FieldValue::Fixed32(0x0403_0201)));
        assert_eq!(fields[1], (2, FieldValue::Fixed64(0)));
    }

    #[test]
    fn truncated_length_delimited() {
        assert_eq!(collect(&[0x12, 0x05, b'a']), Err(DecodeReason::Truncated));
    }

    #[test]
    fn overlong_varint() {
        let buf = [0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        assert_eq!(collect(&buf), Err(DecodeReason::VarintOverflow));
    }

    #[test]
    fn group_wire_types_rejected() {
        assert_eq!(collect(&[0x0B]), Err(DecodeReason::UnsupportedWireType(3)));
    }

    #[test]
    fn field_zero_rejected() {
        assert_eq!(collect(&[0x00, 0x00]), Err(DecodeReason::InvalidFieldNumber));
    }

    #[test]
    fn u32_range_checked() {
        let mut buf = BytesMut::new();
        put_uint_field(&mut buf, 4, u64::from(u32::MAX) + 1);
        let fields = collect(&buf).unwrap();
        assert!(matches!(fields[0].1.as_u32(4), Err(DecodeReason::OutOfRange { field: 4, .. })));
    }
}
