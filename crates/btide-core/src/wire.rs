//! btide wire format: the fixed-size packet exchanged between peers.
//!
//! Every packet is exactly [`PACKET_SIZE`] bytes: a 2-byte message code, a
//! 2-byte error field, and a payload padded to [`PAYLOAD_MAX`]. Integers are
//! big-endian. REQ and RES carry structured payloads; the other messages
//! carry none.
//!
//! All types are #[repr(C, packed)] with byte-order-aware integer fields and
//! use zerocopy derives for allocation-free serialization. There is no
//! unsafe code in this module. No transport lives here.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::crypto::{is_digest_hex, HASH_HEX_LEN};

/// Total packet size on the wire.
pub const PACKET_SIZE: usize = 4096;

/// Payload bytes after the 4-byte header.
pub const PAYLOAD_MAX: usize = 4092;

/// Identifier field width in REQ/RES payloads.
pub const IDENT_FIELD_LEN: usize = 1024;

/// Maximum data bytes carried by one RES packet.
pub const DATA_MAX: usize = 2998;

// ── Message codes ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgCode {
    /// Pong.
    Pog = 0x00,
    /// Connection accepted.
    Acp = 0x02,
    /// Disconnect.
    Dsn = 0x03,
    /// Chunk request.
    Req = 0x06,
    /// Chunk response.
    Res = 0x08,
    /// Acknowledgement.
    Ack = 0x0c,
    /// Ping.
    Png = 0xff,
}

impl TryFrom<u16> for MsgCode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MsgCode::Pog),
            0x02 => Ok(MsgCode::Acp),
            0x03 => Ok(MsgCode::Dsn),
            0x06 => Ok(MsgCode::Req),
            0x08 => Ok(MsgCode::Res),
            0x0c => Ok(MsgCode::Ack),
            0xff => Ok(MsgCode::Png),
            other => Err(WireError::UnknownMsgCode(other)),
        }
    }
}

impl From<MsgCode> for u16 {
    fn from(c: MsgCode) -> u16 {
        c as u16
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// Wire size: 4096 bytes.
#[derive(Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Packet {
    pub msg_code: U16<BigEndian>,
    /// Non-zero marks an error response (e.g. a RES for data we do not have).
    pub error: U16<BigEndian>,
    pub payload: [u8; PAYLOAD_MAX],
}

assert_eq_size!(Packet, [u8; PACKET_SIZE]);

impl Packet {
    /// A packet with an empty payload.
    pub fn new(code: MsgCode) -> Self {
        let mut p = Self::new_zeroed();
        p.msg_code = U16::new(code.into());
        p
    }

    pub fn with_payload<P: AsBytes>(code: MsgCode, payload: &P) -> Self {
        let mut p = Self::new(code);
        let bytes = payload.as_bytes();
        p.payload[..bytes.len()].copy_from_slice(bytes);
        p
    }

    pub fn code(&self) -> Result<MsgCode, WireError> {
        MsgCode::try_from(self.msg_code.get())
    }

    /// Parse a packet. The buffer must be exactly [`PACKET_SIZE`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != PACKET_SIZE {
            return Err(WireError::BadLength(bytes.len()));
        }
        let p = Self::read_from(bytes).ok_or(WireError::BadLength(bytes.len()))?;
        p.code()?;
        Ok(p)
    }

    pub fn encode(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn req(&self) -> Result<ReqPayload, WireError> {
        self.expect(MsgCode::Req)?;
        let req = ReqPayload::read_from_prefix(&self.payload[..]).ok_or(WireError::BadPayload)?;
        req.validate()?;
        Ok(req)
    }

    pub fn res(&self) -> Result<ResPayload, WireError> {
        self.expect(MsgCode::Res)?;
        let res = ResPayload::read_from(&self.payload[..]).ok_or(WireError::BadPayload)?;
        res.validate()?;
        Ok(res)
    }

    fn expect(&self, want: MsgCode) -> Result<(), WireError> {
        let got = self.code()?;
        if got != want {
            return Err(WireError::UnexpectedMsgCode { want, got });
        }
        Ok(())
    }
}

// ── REQ / RES payloads ────────────────────────────────────────────────────────

/// Request for a byte range of one chunk.
///
/// Wire size: 1096 bytes (zero-padded to the payload width).
#[derive(Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ReqPayload {
    pub file_offset: U32<BigEndian>,
    pub data_len: U32<BigEndian>,
    pub chunk_hash: [u8; HASH_HEX_LEN],
    pub identifier: [u8; IDENT_FIELD_LEN],
}

assert_eq_size!(ReqPayload, [u8; 1096]);

impl ReqPayload {
    pub fn new(identifier: &str, chunk_hash: &str, file_offset: u32, data_len: u32) -> Self {
        let mut r = Self::new_zeroed();
        r.file_offset = U32::new(file_offset);
        r.data_len = U32::new(data_len);
        copy_str(&mut r.chunk_hash, chunk_hash);
        copy_str(&mut r.identifier, identifier);
        r
    }

    pub fn chunk_hash(&self) -> Result<&str, WireError> {
        field_str(&self.chunk_hash)
    }

    pub fn identifier(&self) -> Result<&str, WireError> {
        field_str(&self.identifier)
    }

    fn validate(&self) -> Result<(), WireError> {
        check_hash(self.chunk_hash()?)?;
        self.identifier()?;
        Ok(())
    }
}

/// Up to [`DATA_MAX`] bytes of one chunk.
///
/// Wire size: 4092 bytes.
#[derive(Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ResPayload {
    pub file_offset: U32<BigEndian>,
    pub data: [u8; DATA_MAX],
    pub data_len: U16<BigEndian>,
    pub chunk_hash: [u8; HASH_HEX_LEN],
    pub identifier: [u8; IDENT_FIELD_LEN],
}

assert_eq_size!(ResPayload, [u8; PAYLOAD_MAX]);

impl ResPayload {
    pub fn new(
        identifier: &str,
        chunk_hash: &str,
        file_offset: u32,
        data: &[u8],
    ) -> Result<Self, WireError> {
        if data.len() > DATA_MAX {
            return Err(WireError::DataTooLarge(data.len()));
        }
        let mut r = Self::new_zeroed();
        r.file_offset = U32::new(file_offset);
        r.data[..data.len()].copy_from_slice(data);
        r.data_len = U16::new(data.len() as u16);
        copy_str(&mut r.chunk_hash, chunk_hash);
        copy_str(&mut r.identifier, identifier);
        Ok(r)
    }

    /// The valid data bytes.
    pub fn data(&self) -> &[u8] {
        let len = usize::from(self.data_len.get()).min(DATA_MAX);
        &self.data[..len]
    }

    pub fn chunk_hash(&self) -> Result<&str, WireError> {
        field_str(&self.chunk_hash)
    }

    pub fn identifier(&self) -> Result<&str, WireError> {
        field_str(&self.identifier)
    }

    fn validate(&self) -> Result<(), WireError> {
        let len = usize::from(self.data_len.get());
        if len > DATA_MAX {
            return Err(WireError::DataTooLarge(len));
        }
        check_hash(self.chunk_hash()?)?;
        self.identifier()?;
        Ok(())
    }
}

/// Copy `s` into a NUL-padded field, truncating at the field width.
fn copy_str(field: &mut [u8], s: &str) {
    let n = s.len().min(field.len());
    field[..n].copy_from_slice(&s.as_bytes()[..n]);
}

/// Text up to the first NUL.
fn field_str(field: &[u8]) -> Result<&str, WireError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end]).map_err(|_| WireError::BadText)
}

fn check_hash(hash: &str) -> Result<(), WireError> {
    if is_digest_hex(hash) {
        Ok(())
    } else {
        Err(WireError::BadHash)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("packet is {0} bytes, expected {}", PACKET_SIZE)]
    BadLength(usize),

    #[error("unknown message code: 0x{0:02x}")]
    UnknownMsgCode(u16),

    #[error("expected {want:?} packet, got {got:?}")]
    UnexpectedMsgCode { want: MsgCode, got: MsgCode },

    #[error("payload does not fit its message layout")]
    BadPayload,

    #[error("data length {0} exceeds maximum {}", DATA_MAX)]
    DataTooLarge(usize),

    #[error("chunk hash is not 64 hex characters")]
    BadHash,

    #[error("text field is not valid UTF-8")]
    BadText,
}
