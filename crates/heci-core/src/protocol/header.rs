//! Bit-packed headers used on the HECI ring.
//!
//! Both headers are a single little-endian dword. Fields are accessed with
//! explicit shifts and masks instead of relying on any bit-field layout.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::HECI_MAX_FRAME_LENGTH;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Frame length {0} exceeds the 9-bit length field")]
    LengthOverflow(usize),
}

/// HECI framing header, one per ring frame.
///
/// | bits  | field            |
/// |-------|------------------|
/// | 0-7   | ME address       |
/// | 8-15  | host address     |
/// | 16-24 | length in bytes  |
/// | 31    | message complete |
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HeciMessageHeader(u32);

impl HeciMessageHeader {
    const LENGTH_SHIFT: u32 = 16;
    const LENGTH_MASK: u32 = 0x1FF;
    const HOST_ADDRESS_SHIFT: u32 = 8;
    const MESSAGE_COMPLETE: u32 = 1 << 31;

    pub fn new(
        me_address: u8,
        host_address: u8,
        length: usize,
        message_complete: bool,
    ) -> Result<Self, HeaderError> {
        if length > HECI_MAX_FRAME_LENGTH {
            return Err(HeaderError::LengthOverflow(length));
        }
        let mut value = me_address as u32
            | (host_address as u32) << Self::HOST_ADDRESS_SHIFT
            | (length as u32) << Self::LENGTH_SHIFT;
        if message_complete {
            value |= Self::MESSAGE_COMPLETE;
        }
        Ok(Self(value))
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn me_address(&self) -> u8 {
        self.0 as u8
    }

    pub fn host_address(&self) -> u8 {
        (self.0 >> Self::HOST_ADDRESS_SHIFT) as u8
    }

    /// Payload length in bytes.
    pub fn length(&self) -> usize {
        ((self.0 >> Self::LENGTH_SHIFT) & Self::LENGTH_MASK) as usize
    }

    /// Payload length rounded up to whole ring slots.
    pub fn length_in_dwords(&self) -> usize {
        self.length().div_ceil(4)
    }

    pub fn message_complete(&self) -> bool {
        self.0 & Self::MESSAGE_COMPLETE != 0
    }
}

impl fmt::Debug for HeciMessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HeciMessageHeader({:08X} me={:#04X} host={:#04X} len={} complete={})",
            self.0,
            self.me_address(),
            self.host_address(),
            self.length(),
            self.message_complete()
        )
    }
}

/// MKHI message header, the first dword of every MKHI payload.
///
/// | bits  | field       |
/// |-------|-------------|
/// | 0-7   | group ID    |
/// | 8-14  | command     |
/// | 15    | is response |
/// | 16-23 | reserved    |
/// | 24-31 | result      |
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MkhiHeader(u32);

impl MkhiHeader {
    pub const SIZE: usize = 4;

    const COMMAND_SHIFT: u32 = 8;
    const COMMAND_MASK: u32 = 0x7F;
    const IS_RESPONSE: u32 = 1 << 15;
    const RESULT_SHIFT: u32 = 24;

    /// Request header for `group` / `command` with a zero result.
    pub fn request(group_id: u8, command: u8) -> Self {
        Self(group_id as u32 | ((command as u32) & Self::COMMAND_MASK) << Self::COMMAND_SHIFT)
    }

    /// Response header mirroring a request, carrying `result`.
    pub fn response(group_id: u8, command: u8, result: u8) -> Self {
        Self(
            Self::request(group_id, command).0
                | Self::IS_RESPONSE
                | (result as u32) << Self::RESULT_SHIFT,
        )
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self(LittleEndian::read_u32(data)))
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn group_id(&self) -> u8 {
        self.0 as u8
    }

    pub fn command(&self) -> u8 {
        ((self.0 >> Self::COMMAND_SHIFT) & Self::COMMAND_MASK) as u8
    }

    pub fn is_response(&self) -> bool {
        self.0 & Self::IS_RESPONSE != 0
    }

    pub fn result(&self) -> u8 {
        (self.0 >> Self::RESULT_SHIFT) as u8
    }

    /// True if `self` is the response to `request` (same group and command).
    pub fn answers(&self, request: &MkhiHeader) -> bool {
        self.is_response()
            && self.group_id() == request.group_id()
            && self.command() == request.command()
    }
}

impl fmt::Debug for MkhiHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MkhiHeader({:08X} group={:#04X} cmd={:#04X} response={} result={:#04X})",
            self.0,
            self.group_id(),
            self.command(),
            self.is_response(),
            self.result()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_heci_header_fields() {
        let header = HeciMessageHeader::new(0x07, 0x00, 0x1F, true).unwrap();
        assert_eq!(header.raw(), 0x801F_0007);
        assert_eq!(header.me_address(), 0x07);
        assert_eq!(header.host_address(), 0x00);
        assert_eq!(header.length(), 0x1F);
        assert_eq!(header.length_in_dwords(), 8);
        assert!(header.message_complete());
    }

    #[test]
    fn test_heci_header_rejects_long_frame() {
        assert_eq!(
            HeciMessageHeader::new(0, 0, 0x200, true),
            Err(HeaderError::LengthOverflow(0x200))
        );
    }

    #[test]
    fn test_mkhi_get_fw_version_request() {
        let header = MkhiHeader::request(MKHI_GEN_GROUP_ID, GEN_GET_FW_VERSION_CMD);
        assert_eq!(header.raw(), 0x0000_02FF);
        assert!(!header.is_response());
    }

    #[test]
    fn test_mkhi_response_answers_request() {
        let request = MkhiHeader::request(MKHI_FWCAPS_GROUP_ID, FWCAPS_GET_RULE_CMD);
        let response = MkhiHeader::response(MKHI_FWCAPS_GROUP_ID, FWCAPS_GET_RULE_CMD, 0x89);
        assert_eq!(response.raw(), 0x8900_8203);
        assert!(response.answers(&request));
        assert_eq!(response.result(), 0x89);

        let other = MkhiHeader::response(MKHI_GEN_GROUP_ID, FWCAPS_GET_RULE_CMD, 0);
        assert!(!other.answers(&request));
    }

    #[test]
    fn test_mkhi_from_bytes() {
        let header = MkhiHeader::from_bytes(&[0xFF, 0x82, 0x00, 0x00]).unwrap();
        assert_eq!(header.group_id(), 0xFF);
        assert_eq!(header.command(), 0x02);
        assert!(header.is_response());
        assert!(MkhiHeader::from_bytes(&[0xFF]).is_err());
    }
}
