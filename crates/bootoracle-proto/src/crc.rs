//! Checksums shared with the bootloader firmware.
//!
//! Both algorithms are the bit-at-a-time forms the device implements, so
//! output must agree with the firmware byte for byte:
//!
//! - [`crc16_ccitt`]: frame integrity. Init `0xFFFF`, polynomial `0x1021`,
//!   MSB first, no reflection, no final XOR (CRC-16/CCITT-FALSE).
//! - [`crc32_bootloader`]: payload integrity. Init `0xFFFF_FFFF`, reflected
//!   polynomial `0xEDB8_8320`, LSB first, final bitwise NOT.

/// Initial value of the frame CRC
pub const CRC16_INIT: u16 = 0xFFFF;

/// Frame CRC polynomial (MSB-first form)
pub const CRC16_POLY: u16 = 0x1021;

/// Initial value of the data CRC
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// Data CRC polynomial (reflected form)
pub const CRC32_POLY: u32 = 0xEDB8_8320;

/// Incremental CRC16-CCITT state.
///
/// Lets the frame CRC cover the big-endian length followed by the payload
/// without concatenating them first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16(u16);

impl Crc16 {
    /// Starts a new computation at [`CRC16_INIT`].
    #[must_use]
    pub const fn new() -> Self {
        Self(CRC16_INIT)
    }

    /// Feeds bytes into the running CRC.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.0 ^= u16::from(byte) << 8;
            for _ in 0..8 {
                self.0 =
                    if self.0 & 0x8000 != 0 { (self.0 << 1) ^ CRC16_POLY } else { self.0 << 1 };
            }
        }
    }

    /// Current CRC value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC16-CCITT over `data`. Empty input yields [`CRC16_INIT`].
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.value()
}

/// Frame CRC: CRC16-CCITT over `length_be16 || payload`.
///
/// The length is taken modulo 2^16; frames never carry more than
/// [`crate::MAX_PAYLOAD_SIZE`] bytes.
#[must_use]
pub fn frame_crc16(payload: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(&(payload.len() as u16).to_be_bytes());
    crc.update(payload);
    crc.value()
}

/// CRC32 as computed by the bootloader over `DataPacket.data`.
///
/// Empty input yields `!CRC32_INIT`, i.e. `0`.
#[must_use]
pub fn crc32_bootloader(data: &[u8]) -> u32 {
    let mut crc = CRC32_INIT;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC32_POLY } else { crc >> 1 };
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn crc16_empty_is_init() {
        assert_eq!(crc16_ccitt(&[]), CRC16_INIT);
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32_bootloader(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty_is_inverted_init() {
        assert_eq!(crc32_bootloader(&[]), 0);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut crc = Crc16::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.value(), crc16_ccitt(b"123456789"));
    }

    #[test]
    fn frame_crc_covers_length_prefix() {
        assert_eq!(frame_crc16(b"\x01\x02"), crc16_ccitt(&[0x00, 0x02, 0x01, 0x02]));
        assert_eq!(frame_crc16(&[]), crc16_ccitt(&[0x00, 0x00]));
    }
}
