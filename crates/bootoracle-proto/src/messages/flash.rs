//! Flash staging, data transfer and acknowledgment messages.

use bytes::{Bytes, BytesMut};

use super::WireMessage;
use crate::{
    crc::crc32_bootloader,
    errors::DecodeReason,
    wire::{FieldReader, put_bool_field, put_bytes_field, put_uint_field, required},
};

/// Prepare (or, with `verify_after_program`, verify) a flash write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashProgramRequest {
    /// Number of bytes the session will transfer
    pub total_data_length: u32,
    /// `false` stages the write, `true` asks the device to program and verify
    pub verify_after_program: bool,
}

impl FlashProgramRequest {
    /// Stages a write of `total_data_length` bytes.
    #[must_use]
    pub fn prepare(total_data_length: u32) -> Self {
        Self { total_data_length, verify_after_program: false }
    }

    /// Asks the device to program and verify the staged bytes.
    #[must_use]
    pub fn verify(total_data_length: u32) -> Self {
        Self { total_data_length, verify_after_program: true }
    }
}

impl WireMessage for FlashProgramRequest {
    fn encode_fields(&self, dst: &mut BytesMut) {
        put_uint_field(dst, 1, u64::from(self.total_data_length));
        put_bool_field(dst, 2, self.verify_after_program);
    }

    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason> {
        let mut total_data_length = None;
        let mut verify_after_program = None;
        for field in FieldReader::new(buf) {
            match field? {
                (1, value) => total_data_length = Some(value.as_u32(1)?),
                (2, value) => verify_after_program = Some(value.as_bool(2)?),
                _ => {},
            }
        }
        Ok(Self {
            total_data_length: required(total_data_length, "total_data_length")?,
            verify_after_program: required(verify_after_program, "verify_after_program")?,
        })
    }
}

/// A chunk of program data with its CRC32.
///
/// `offset` and `data_crc32` are always on the wire, even when zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Byte offset of `data` within the staged image
    pub offset: u32,
    /// Program bytes
    pub data: Bytes,
    /// [`crc32_bootloader`] of `data`
    pub data_crc32: u32,
}

impl DataPacket {
    /// Creates a packet, computing the CRC32 of `data`.
    #[must_use]
    pub fn new(offset: u32, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let data_crc32 = crc32_bootloader(&data);
        Self { offset, data, data_crc32 }
    }

    /// Whether `data_crc32` matches the data carried.
    #[must_use]
    pub fn crc_matches(&self) -> bool {
        crc32_bootloader(&self.data) == self.data_crc32
    }
}

impl WireMessage for DataPacket {
    fn encode_fields(&self, dst: &mut BytesMut) {
        put_uint_field(dst, 1, u64::from(self.offset));
        put_bytes_field(dst, 2, &self.data);
        put_uint_field(dst, 3, u64::from(self.data_crc32));
    }

    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason> {
        let mut offset = None;
        let mut data = None;
        let mut data_crc32 = None;
        for field in FieldReader::new(buf) {
            match field? {
                (1, value) => offset = Some(value.as_u32(1)?),
                (2, value) => data = Some(Bytes::copy_from_slice(value.as_bytes(2)?)),
                (3, value) => data_crc32 = Some(value.as_u32(3)?),
                _ => {},
            }
        }
        Ok(Self {
            offset: required(offset, "offset")?,
            data: required(data, "data")?,
            data_crc32: required(data_crc32, "data_crc32")?,
        })
    }
}

/// Device's accept/reject answer to prepare, data and verify requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Whether the request was accepted
    pub success: bool,
    /// Optional human-readable detail
    pub message: Option<String>,
}

impl Acknowledgment {
    /// Positive acknowledgment with a message.
    #[must_use]
    pub fn accept(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()) }
    }

    /// Negative acknowledgment with a reason.
    #[must_use]
    pub fn reject(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()) }
    }
}

impl WireMessage for Acknowledgment {
    fn encode_fields(&self, dst: &mut BytesMut) {
        put_bool_field(dst, 1, self.success);
        if let Some(message) = &self.message {
            put_bytes_field(dst, 2, message.as_bytes());
        }
    }

    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason> {
        let mut success = None;
        let mut message = None;
        for field in FieldReader::new(buf) {
            match field? {
                (1, value) => success = Some(value.as_bool(1)?),
                (2, value) => message = Some(value.as_string(2)?),
                _ => {},
            }
        }
        Ok(Self { success: required(success, "success")?, message })
    }
}
