//! Session opening: capability negotiation.

use bytes::BytesMut;

use super::WireMessage;
use crate::{
    errors::DecodeReason,
    wire::{FieldReader, put_bytes_field, put_uint_field, required},
};

/// Host's opening message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Comma-separated capability names
    pub capabilities: String,
    /// Largest data packet the host intends to send
    pub max_packet_size: u32,
}

impl WireMessage for HandshakeRequest {
    fn encode_fields(&self, dst: &mut BytesMut) {
        put_bytes_field(dst, 1, self.capabilities.as_bytes());
        put_uint_field(dst, 2, u64::from(self.max_packet_size));
    }

    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason> {
        let mut capabilities = None;
        let mut max_packet_size = None;
        for field in FieldReader::new(buf) {
            match field? {
                (1, value) => capabilities = Some(value.as_string(1)?),
                (2, value) => max_packet_size = Some(value.as_u32(2)?),
                _ => {},
            }
        }
        Ok(Self {
            capabilities: required(capabilities, "capabilities")?,
            max_packet_size: required(max_packet_size, "max_packet_size")?,
        })
    }
}

/// Device's answer to a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Firmware version string
    pub bootloader_version: String,
    /// Capabilities the device supports, when it reports them
    pub supported_capabilities: Option<String>,
    /// Flash page size in bytes
    pub flash_page_size: u32,
}

impl WireMessage for HandshakeResponse {
    fn encode_fields(&self, dst: &mut BytesMut) {
        put_bytes_field(dst, 1, self.bootloader_version.as_bytes());
        if let Some(caps) = &self.supported_capabilities {
            put_bytes_field(dst, 2, caps.as_bytes());
        }
        put_uint_field(dst, 3, u64::from(self.flash_page_size));
    }

    fn decode_fields(buf: &[u8]) -> Result<Self, DecodeReason> {
        let mut bootloader_version = None;
        let mut supported_capabilities = None;
        let mut flash_page_size = None;
        for field in FieldReader::new(buf) {
            match field? {
                (1, value) => bootloader_version = Some(value.as_string(1)?),
                (2, value) => supported_capabilities = Some(value.as_string(2)?),
                (3, value) => flash_page_size = Some(value.as_u32(3)?),
                _ => {},
            }
        }
        Ok(Self {
            bootloader_version: required(bootloader_version, "bootloader_version")?,
            supported_capabilities,
            flash_page_size: required(flash_page_size, "flash_page_size")?,
        })
    }
}
