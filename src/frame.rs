//! WebSocket wire primitives according to RFC 6455 Section 5.
//!
//! This module holds everything that touches raw frame bytes: the opcode and
//! close-code tables, XOR masking (including the mask rotation needed when a
//! masked payload is consumed across several reads), the server-role frame
//! header encoder, and the protocol-violation catalogue.
//!
//! # Frame Format (RFC 6455 Section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! | Masking-key, if MASK set to 1 |          Payload Data         |
//! +-------------------------------+ - - - - - - - - - - - - - - - +
//! ```
//!
//! Client-to-server frames are always masked, so the header an endpoint in
//! the server role reads is 6 to 14 bytes; the headers it writes are 2 to
//! 10 bytes (no mask).

use thiserror::Error;

/// 4-bit frame type: 0=Continue, 1=Text, 2=Binary, 8=Close, 9=Ping,
/// 10=Pong. The rest of the nibble space is reserved.
///
/// Data opcodes sit below 8 and carry message payload; control opcodes sit
/// at 8 and above, manage the connection, and may arrive between the
/// fragments of a data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Extends the message started by a Text or Binary frame.
    Continuation = 0,
    /// First frame of a UTF-8 text message.
    Text = 1,
    /// First frame of a binary message.
    Binary = 2,
    /// Starts or answers the close handshake.
    Close = 8,
    /// Liveness probe; answered with a Pong carrying the same payload.
    Ping = 9,
    /// Answer to a Ping, or an unsolicited heartbeat.
    Pong = 10,
}

/// Control opcodes occupy the high half of the opcode space.
const CONTROL_MIN: u8 = 8;

impl Opcode {
    /// Close, Ping or Pong.
    #[must_use]
    pub const fn is_control(self) -> bool {
        self as u8 >= CONTROL_MIN
    }

    /// Continuation, Text or Binary.
    #[must_use]
    pub const fn is_data(self) -> bool {
        !self.is_control()
    }

    /// Decode the low nibble of a header byte.
    ///
    /// The reserved opcodes (3-7 and 11-15) are a protocol error.
    pub fn from_u8(nibble: u8) -> Result<Self, ProtocolError> {
        Ok(match nibble {
            0 => Self::Continuation,
            1 => Self::Text,
            2 => Self::Binary,
            8 => Self::Close,
            9 => Self::Ping,
            10 => Self::Pong,
            reserved => return Err(ProtocolError::InvalidOpcode(reserved)),
        })
    }
}

/// Close codes defined by RFC 6455 (big-endian u16 on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    ProtocolError = 1002,
    /// Unsupported data type (1003).
    Unsupported = 1003,
    /// No status received (1005) - synthetic, never sent in a frame.
    NoStatus = 1005,
    /// Abnormal closure (1006) - synthetic, never sent in a frame.
    Abnormal = 1006,
    /// Invalid payload data (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooLong = 1009,
    /// Mandatory extension missing (1010).
    MissingExtension = 1010,
    /// Internal server error (1011).
    InternalError = 1011,
}

impl CloseCode {
    /// Parse a close code from a u16 value.
    ///
    /// Returns `None` for codes outside the semantic set (including the
    /// reserved and private-use ranges, which a peer may legally send).
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::Unsupported),
            1005 => Some(Self::NoStatus),
            1006 => Some(Self::Abnormal),
            1007 => Some(Self::InvalidPayload),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooLong),
            1010 => Some(Self::MissingExtension),
            1011 => Some(Self::InternalError),
            _ => None,
        }
    }

    /// Returns true for codes that exist only as recorded reasons and must
    /// never appear in a Close frame payload (1005, 1006).
    #[must_use]
    pub const fn is_synthetic(self) -> bool {
        matches!(self, Self::NoStatus | Self::Abnormal)
    }

    pub(crate) const fn is_synthetic_u16(code: u16) -> bool {
        code == Self::NoStatus as u16 || code == Self::Abnormal as u16
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code as Self
    }
}

/// A protocol conformance violation observed on the inbound side.
///
/// Each variant maps onto the close code the session puts on the wire before
/// it stops reading, see [`ProtocolError::close_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Reserved header bits set without a negotiated extension.
    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,
    /// Client-to-server frame without the mask bit.
    #[error("client frame is not masked")]
    UnmaskedFrame,
    /// Opcode outside {0, 1, 2, 8, 9, 10}.
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),
    /// Control frame with a payload longer than 125 bytes.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(u64),
    /// Control frame without the FIN bit.
    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,
    /// Continuation frame while no message is in progress.
    #[error("continuation frame without a message in progress")]
    OrphanContinuation,
    /// Text or Binary frame while a fragmented message is in progress.
    #[error("new data frame while a fragmented message is in progress")]
    InterleavedDataFrame,
    /// 64-bit payload length with the most significant bit set.
    #[error("payload length has the most significant bit set")]
    LengthOverflow,
    /// Reassembled message would exceed the configured limit.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLong {
        /// Size the message would reach with the current frame.
        size: u64,
        /// Configured maximum message size.
        max: usize,
    },
    /// Completed text message is not valid UTF-8.
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    /// The close code this violation puts on the wire.
    #[must_use]
    pub const fn close_code(self) -> CloseCode {
        match self {
            Self::MessageTooLong { .. } => CloseCode::MessageTooLong,
            Self::InvalidUtf8 => CloseCode::InvalidPayload,
            _ => CloseCode::ProtocolError,
        }
    }
}

/// Maximum number of bytes in a frame header written by the server role
/// (2 header bytes plus an 8-byte extended length; never a mask).
pub const MAX_HEADER_LEN: usize = 2 + 8;

/// Encode a server-role frame header.
///
/// Returns the header bytes and their length. The mask bit is never set:
/// per RFC 6455 Section 5.1 a server must not mask the frames it sends.
///
/// # Panics
///
/// Debug-asserts that `payload_len` fits in 63 bits (the wire format
/// reserves the top bit).
#[must_use]
pub fn encode_header(fin: bool, opcode: Opcode, payload_len: u64) -> ([u8; MAX_HEADER_LEN], usize) {
    debug_assert_eq!(payload_len >> 63, 0, "payload length top bit must be zero");

    let mut header = [0u8; MAX_HEADER_LEN];
    header[0] = (if fin { 0x80 } else { 0x00 }) | opcode as u8;

    if payload_len <= 125 {
        header[1] = payload_len as u8;
        (header, 2)
    } else if payload_len <= u64::from(u16::MAX) {
        header[1] = 126;
        header[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
        (header, 4)
    } else {
        header[1] = 127;
        header[2..10].copy_from_slice(&payload_len.to_be_bytes());
        (header, 10)
    }
}

/// Apply XOR masking to payload data.
///
/// Used for both masking and unmasking; the operation is its own inverse.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Rotate a mask so unmasking can resume after `offset` bytes were consumed.
///
/// When a frame's payload arrives split across reads, the byte after a
/// partial read of length `n` must be XORed with `mask[n % 4]`. Rotating the
/// stored mask by `n % 4` lets the next read start at index 0 again.
#[must_use]
pub fn rotate_mask(mask: [u8; 4], offset: usize) -> [u8; 4] {
    let mut rotated = [0u8; 4];
    for (i, byte) in rotated.iter_mut().enumerate() {
        *byte = mask[(offset + i) % 4];
    }
    rotated
}
