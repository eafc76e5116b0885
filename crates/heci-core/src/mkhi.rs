//! MKHI callers built on the HECI transport.
//!
//! The transport returns whatever message the ME produces next; these
//! callers check that the reply carries the request's group and command,
//! the response bit and a success result before decoding it.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::device::HeciDeviceHandle;
use crate::events::{HeciObserver, TracingObserver};
use crate::heci::HeciTransport;
use crate::message::Message;
use crate::protocol::MkhiHeader;
use crate::protocol::constants::*;
use crate::transport::{HeciError, HeciRegisters};

/// MKHI result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkhiStatus {
    Success,
    InvalidState,
    MessageSkipped,
    SizeError,
    InvalidAccess,
    InvalidParams,
    NotReady,
    NotSupported,
    InvalidAddress,
    InvalidCommand,
    Failure,
    InvalidResource,
    ResourceInUse,
    NoResource,
    GeneralError,
    Unknown(u8),
}

impl From<u8> for MkhiStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MkhiStatus::Success,
            0x01 => MkhiStatus::InvalidState,
            0x02 => MkhiStatus::MessageSkipped,
            0x05 => MkhiStatus::SizeError,
            0x84 => MkhiStatus::InvalidAccess,
            0x85 => MkhiStatus::InvalidParams,
            0x88 => MkhiStatus::NotReady,
            0x89 => MkhiStatus::NotSupported,
            0x8C => MkhiStatus::InvalidAddress,
            0x8D => MkhiStatus::InvalidCommand,
            0x9E => MkhiStatus::Failure,
            0xE4 => MkhiStatus::InvalidResource,
            0xE5 => MkhiStatus::ResourceInUse,
            0xE6 => MkhiStatus::NoResource,
            0xFF => MkhiStatus::GeneralError,
            other => MkhiStatus::Unknown(other),
        }
    }
}

impl fmt::Display for MkhiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MkhiStatus::Unknown(code) => write!(f, "unknown status {:#04X}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MkhiError {
    #[error(transparent)]
    Transport(#[from] HeciError),

    #[error("Unexpected response {actual:?} to request {request:?}")]
    UnexpectedResponse {
        request: MkhiHeader,
        actual: MkhiHeader,
    },

    #[error("MKHI command failed: {0}")]
    Status(MkhiStatus),

    #[error("Response truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Four-part firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwVersion {
    pub major: u16,
    pub minor: u16,
    pub hotfix: u16,
    pub build: u16,
}

impl FwVersion {
    const SIZE: usize = 8;

    /// Wire order is minor, major, build, hotfix.
    fn parse(data: &[u8]) -> Self {
        Self {
            minor: LittleEndian::read_u16(&data[0..2]),
            major: LittleEndian::read_u16(&data[2..4]),
            build: LittleEndian::read_u16(&data[4..6]),
            hotfix: LittleEndian::read_u16(&data[6..8]),
        }
    }
}

impl fmt::Display for FwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.hotfix, self.build)
    }
}

/// Reply to GEN_GET_FW_VERSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersions {
    pub code: FwVersion,
    pub recovery: FwVersion,
    /// Present only when the image was built with FITC.
    pub fitc: Option<FwVersion>,
}

/// FW capability SKU bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwCapsSku(pub u32);

impl FwCapsSku {
    pub fn is_set(&self, bit: u32) -> bool {
        bit < 32 && self.0 & (1 << bit) != 0
    }
}

/// Platform type rule data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformType(pub u32);

impl PlatformType {
    pub fn target_usage_type(&self) -> u8 {
        (self.0 & 0xF) as u8
    }

    pub fn super_sku(&self) -> bool {
        self.0 & (1 << 6) != 0
    }

    pub fn image_type(&self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    pub fn brand(&self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }
}

/// Issues MKHI requests on one device.
pub struct MkhiClient<'a, R: HeciRegisters, O: HeciObserver = TracingObserver> {
    transport: &'a HeciTransport<O>,
    device: &'a mut HeciDeviceHandle<R>,
}

impl<'a, R: HeciRegisters, O: HeciObserver> MkhiClient<'a, R, O> {
    pub fn new(transport: &'a HeciTransport<O>, device: &'a mut HeciDeviceHandle<R>) -> Self {
        Self { transport, device }
    }

    /// Send one request and validate the reply header.
    fn exchange(&mut self, request: MkhiHeader, body: &[u32]) -> Result<Vec<u8>, MkhiError> {
        let message = Message::new(request.raw(), body);
        let timeout = self.transport.config().receive_timeout();
        let capacity = self.device.max_message_len();
        let address = self.transport.mkhi_address();

        let response = self.transport.send_and_wait_for_ack(
            self.device,
            &message,
            address,
            timeout,
            capacity,
        )?;

        let bytes = response.to_bytes();
        let actual = MkhiHeader::from_bytes(&bytes).map_err(|_| MkhiError::Truncated {
            expected: MkhiHeader::SIZE,
            actual: bytes.len(),
        })?;
        if !actual.answers(&request) {
            debug!(request = ?request, actual = ?actual, "MKHI reply does not match request");
            return Err(MkhiError::UnexpectedResponse { request, actual });
        }
        if actual.result() != 0 {
            return Err(MkhiError::Status(MkhiStatus::from(actual.result())));
        }
        Ok(bytes)
    }

    /// Read code, recovery and (optional) FITC firmware versions.
    #[instrument(level = "debug", skip(self), fields(device = %self.device.id()))]
    pub fn get_fw_version(&mut self) -> Result<FirmwareVersions, MkhiError> {
        let request = MkhiHeader::request(MKHI_GEN_GROUP_ID, GEN_GET_FW_VERSION_CMD);
        let data = self.exchange(request, &[])?;

        let base = MkhiHeader::SIZE;
        let required = base + 2 * FwVersion::SIZE;
        if data.len() < required {
            return Err(MkhiError::Truncated {
                expected: required,
                actual: data.len(),
            });
        }

        let code = FwVersion::parse(&data[base..]);
        let recovery = FwVersion::parse(&data[base + FwVersion::SIZE..]);
        let fitc = (data.len() >= required + FwVersion::SIZE)
            .then(|| FwVersion::parse(&data[required..]));

        debug!(code = %code, recovery = %recovery, "Firmware version");
        Ok(FirmwareVersions {
            code,
            recovery,
            fitc,
        })
    }

    /// Read a FWCAPS rule; returns the rule data dword.
    fn get_rule(&mut self, rule_id: u32) -> Result<u32, MkhiError> {
        let request = MkhiHeader::request(MKHI_FWCAPS_GROUP_ID, FWCAPS_GET_RULE_CMD);
        let data = self.exchange(request, &[rule_id])?;

        // Packed reply: header, rule id, data length byte, rule data.
        let base = MkhiHeader::SIZE;
        let required = base + 4 + 1 + 4;
        if data.len() < required {
            return Err(MkhiError::Truncated {
                expected: required,
                actual: data.len(),
            });
        }
        let echoed = LittleEndian::read_u32(&data[base..base + 4]);
        if echoed != rule_id {
            debug!(rule_id, echoed, "Rule id mismatch in reply");
        }
        Ok(LittleEndian::read_u32(&data[base + 5..base + 9]))
    }

    #[instrument(level = "debug", skip(self), fields(device = %self.device.id()))]
    pub fn get_fw_caps_sku(&mut self) -> Result<FwCapsSku, MkhiError> {
        self.get_rule(FW_CAPS_RULE_ID).map(FwCapsSku)
    }

    #[instrument(level = "debug", skip(self), fields(device = %self.device.id()))]
    pub fn get_platform_type(&mut self) -> Result<PlatformType, MkhiError> {
        self.get_rule(PLATFORM_TYPE_RULE_ID).map(PlatformType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeciConfig;
    use crate::transport::MockHeci;

    fn setup() -> (HeciTransport, HeciDeviceHandle<MockHeci>, MockHeci) {
        let config = HeciConfig {
            receive_timeout_ms: 30,
            poll_interval_us: 200,
            ..Default::default()
        };
        let transport = HeciTransport::new(config);
        let mock = MockHeci::new(32);
        let device = transport.open_device(mock.clone(), 0);
        (transport, device, mock)
    }

    fn version_reply(result: u8, fitc: bool) -> Message {
        let header = MkhiHeader::response(MKHI_GEN_GROUP_ID, GEN_GET_FW_VERSION_CMD, result);
        let mut bytes = header.raw().to_le_bytes().to_vec();
        // code 11.8.50.3425, recovery 11.8.50.3399
        for v in [8u16, 11, 3425, 50, 8, 11, 3399, 50] {
            bytes.extend(v.to_le_bytes());
        }
        if fitc {
            for v in [0u16, 11, 1, 0] {
                bytes.extend(v.to_le_bytes());
            }
        }
        Message::from_bytes(&bytes)
    }

    fn rule_reply(rule_id: u32, data: u32) -> Message {
        let header = MkhiHeader::response(MKHI_FWCAPS_GROUP_ID, FWCAPS_GET_RULE_CMD, 0);
        let mut bytes = header.raw().to_le_bytes().to_vec();
        bytes.extend(rule_id.to_le_bytes());
        bytes.push(4);
        bytes.extend(data.to_le_bytes());
        Message::from_bytes(&bytes)
    }

    #[test]
    fn test_get_fw_version() {
        let (transport, mut device, mock) = setup();
        mock.queue_response(version_reply(0, false));

        let versions = MkhiClient::new(&transport, &mut device).get_fw_version().unwrap();
        assert_eq!(versions.code.to_string(), "11.8.50.3425");
        assert_eq!(versions.recovery.build, 3399);
        assert_eq!(versions.fitc, None);

        let request = &mock.received_messages()[0];
        assert_eq!(
            request.mkhi_header(),
            MkhiHeader::request(MKHI_GEN_GROUP_ID, GEN_GET_FW_VERSION_CMD)
        );
        assert_eq!(request.len(), 4);
    }

    #[test]
    fn test_get_fw_version_with_fitc() {
        let (transport, mut device, mock) = setup();
        mock.queue_response(version_reply(0, true));

        let versions = MkhiClient::new(&transport, &mut device).get_fw_version().unwrap();
        assert_eq!(versions.fitc.map(|v| v.to_string()), Some("11.0.0.1".to_string()));
    }

    #[test]
    fn test_status_error() {
        let (transport, mut device, mock) = setup();
        mock.queue_response(version_reply(0x89, false));

        let err = MkhiClient::new(&transport, &mut device).get_fw_version().unwrap_err();
        assert_eq!(err, MkhiError::Status(MkhiStatus::NotSupported));
    }

    #[test]
    fn test_mismatched_reply() {
        let (transport, mut device, mock) = setup();
        mock.queue_response(rule_reply(FW_CAPS_RULE_ID, 0));

        let err = MkhiClient::new(&transport, &mut device).get_fw_version().unwrap_err();
        assert!(matches!(err, MkhiError::UnexpectedResponse { .. }));
    }

    #[test]
    fn test_truncated_reply() {
        let (transport, mut device, mock) = setup();
        let header = MkhiHeader::response(MKHI_GEN_GROUP_ID, GEN_GET_FW_VERSION_CMD, 0);
        mock.queue_response(Message::new(header.raw(), &[0x000B_0008]));

        let err = MkhiClient::new(&transport, &mut device).get_fw_version().unwrap_err();
        assert_eq!(
            err,
            MkhiError::Truncated {
                expected: 20,
                actual: 8
            }
        );
    }

    #[test]
    fn test_transport_error_propagates() {
        let (transport, mut device, _mock) = setup();
        let err = MkhiClient::new(&transport, &mut device).get_fw_version().unwrap_err();
        assert_eq!(err, MkhiError::Transport(HeciError::Timeout { timeout_ms: 30 }));
    }

    #[test]
    fn test_get_fw_caps_sku() {
        let (transport, mut device, mock) = setup();
        mock.queue_response(rule_reply(FW_CAPS_RULE_ID, 0x0000_0801));

        let sku = MkhiClient::new(&transport, &mut device).get_fw_caps_sku().unwrap();
        assert!(sku.is_set(0));
        assert!(sku.is_set(11));
        assert!(!sku.is_set(1));

        let request = &mock.received_messages()[0];
        assert_eq!(request.body(), &[FW_CAPS_RULE_ID]);
    }

    #[test]
    fn test_get_platform_type() {
        let (transport, mut device, mock) = setup();
        mock.queue_response(rule_reply(PLATFORM_TYPE_RULE_ID, 0x0000_2342));

        let platform = MkhiClient::new(&transport, &mut device)
            .get_platform_type()
            .unwrap();
        assert_eq!(platform.target_usage_type(), 2);
        assert!(platform.super_sku());
        assert_eq!(platform.image_type(), 3);
        assert_eq!(platform.brand(), 2);
        assert_eq!(
            mock.received_messages()[0].body(),
            &[PLATFORM_TYPE_RULE_ID]
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(MkhiStatus::from(0), MkhiStatus::Success);
        assert_eq!(MkhiStatus::from(0x8D), MkhiStatus::InvalidCommand);
        assert_eq!(MkhiStatus::from(0x42), MkhiStatus::Unknown(0x42));
        assert_eq!(MkhiStatus::Unknown(0x42).to_string(), "unknown status 0x42");
    }
}
