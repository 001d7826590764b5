//! Core types for the DBC decoder library
//!
//! This module defines the transient frame type handed to the codec, the values the
//! decoder emits, the CAN FD length table and the error taxonomy shared by the
//! grammar parser, the schema builder and the signal codec.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DbcError>;

/// Payload capacity of a classic CAN frame
pub const CLASSIC_FRAME_LEN: usize = 8;

/// Payload capacity of a CAN FD frame
pub const MAX_FRAME_LEN: usize = 64;

/// Payload size in bytes for every DLC code.
///
/// DLC 10 carries 18 bytes, so 13..=18 byte payloads all land in DLC 10.
const DLC_SIZES: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 18, 20, 24, 32, 48, 64];

/// Convert a data length code into the number of payload bytes.
///
/// Codes above 15 are not valid and map to an empty payload.
pub fn dlc_to_size(dlc: u8) -> usize {
    DLC_SIZES.get(dlc as usize).copied().unwrap_or(0)
}

/// Convert a payload size into the smallest DLC whose payload can hold it.
///
/// Sizes above 8 bytes are bucketed (13..=18 bytes → DLC 10), so the mapping is
/// not injective. Anything above 64 bytes saturates at DLC 15.
pub fn size_to_dlc(size: usize) -> u8 {
    DLC_SIZES
        .iter()
        .position(|&bucket| bucket >= size)
        .map(|dlc| dlc as u8)
        .unwrap_or(15)
}

/// Raw CAN or CAN FD frame
///
/// Frames are created per bus transaction and never belong to the schema. The
/// buffer always has room for a full CAN FD payload; only the first `len()`
/// bytes are part of the frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// CAN identifier (11-bit or 29-bit, without flag bits)
    pub id: u32,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// True if this is a remote transmission request
    pub is_remote: bool,
    /// True if this is an error frame
    pub is_error: bool,
    /// True if this is a CAN FD frame
    pub is_fd: bool,
    len: u8,
    data: [u8; MAX_FRAME_LEN],
}

impl Frame {
    /// Build a frame carrying a copy of `data`.
    ///
    /// Payloads longer than 8 bytes mark the frame as CAN FD.
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        let mut frame = Self::zeroed(id, data.len())?;
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// Build a frame of `len` zero bytes.
    pub fn zeroed(id: u32, len: usize) -> Result<Self> {
        if len > MAX_FRAME_LEN {
            return Err(DbcError::InvalidFrame(format!(
                "payload of {} bytes exceeds the CAN FD maximum of {} bytes",
                len, MAX_FRAME_LEN
            )));
        }

        Ok(Self {
            id,
            is_extended: false,
            is_remote: false,
            is_error: false,
            is_fd: len > CLASSIC_FRAME_LEN,
            len: len as u8,
            data: [0; MAX_FRAME_LEN],
        })
    }

    /// Builder method: mark the frame as using a 29-bit identifier
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.is_extended = extended;
        self
    }

    /// Builder method: mark the frame as a remote request
    pub fn with_remote(mut self, remote: bool) -> Self {
        self.is_remote = remote;
        self
    }

    /// Builder method: mark the frame as an error frame
    pub fn with_error(mut self, error: bool) -> Self {
        self.is_error = error;
        self
    }

    /// Builder method: force the CAN FD flag (e.g. an FD frame of 8 bytes or less)
    pub fn with_fd(mut self, fd: bool) -> Self {
        self.is_fd = fd || self.len() > CLASSIC_FRAME_LEN;
        self
    }

    /// Number of payload bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True if the frame carries no payload
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Mutable payload bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.data[..len]
    }

    /// Data length code for the payload size
    pub fn dlc(&self) -> u8 {
        size_to_dlc(self.len())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &format_args!("0x{:X}", self.id))
            .field("is_extended", &self.is_extended)
            .field("is_remote", &self.is_remote)
            .field("is_error", &self.is_error)
            .field("is_fd", &self.is_fd)
            .field("data", &format_args!("{:02X?}", self.data()))
            .finish()
    }
}

/// Errors raised while loading a DBC file or converting signal values
#[derive(Debug, thiserror::Error)]
pub enum DbcError {
    /// Malformed or unexpected token while parsing a record
    #[error("Syntax error at line {line}, column {column}: expected {expected}, found {found}")]
    Syntax {
        line: usize,
        column: usize,
        expected: String,
        found: String,
    },

    /// Structural violation inside a message definition
    #[error("Invalid message '{message}': {violation}")]
    Schema {
        message: String,
        violation: SchemaViolation,
    },

    /// Frame too short for the signal's bit range
    #[error("Signal '{signal}' requires {required} bytes but frame only has {available} bytes")]
    Range {
        signal: String,
        required: usize,
        available: usize,
    },

    #[error("Signal '{signal}' is {length} bits wide; raw values are limited to 64 bits")]
    UnsupportedWidth { signal: String, length: u16 },

    #[error("Message not found: CAN ID 0x{0:X}")]
    MessageNotFound(u32),

    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DbcError {
    pub(crate) fn schema(message: impl Into<String>, violation: SchemaViolation) -> Self {
        DbcError::Schema {
            message: message.into(),
            violation,
        }
    }

    /// True for faults raised by the grammar parser
    pub fn is_syntax(&self) -> bool {
        matches!(self, DbcError::Syntax { .. })
    }

    /// True for structural faults raised by the schema builder
    pub fn is_schema(&self) -> bool {
        matches!(self, DbcError::Schema { .. })
    }

    /// True for frame-too-short faults raised by the codec
    pub fn is_range(&self) -> bool {
        matches!(self, DbcError::Range { .. })
    }
}

/// Structural rules a message definition must satisfy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("signal '{0}' is defined more than once")]
    DuplicateSignal(String),

    #[error("signal '{signal}' needs {required} bytes but the message holds {capacity}")]
    SignalOutOfBounds {
        signal: String,
        required: usize,
        capacity: usize,
    },

    #[error("signal '{signal}' has length {length}, expected 1..=512 bits")]
    InvalidSignalLength { signal: String, length: u16 },

    #[error("signals '{first}' and '{second}' are both multiplexer switches")]
    MultipleSwitches { first: String, second: String },

    #[error("multiplexed signal '{0}' has no multiplexer switch")]
    MissingSwitch(String),

    #[error("signal '{0}' is not preceded by a message definition")]
    SignalWithoutMessage(String),

    #[error("CAN ID 0x{0:X} is defined more than once")]
    DuplicateMessage(u32),

    #[error("message or signal definition after the metadata section started")]
    StructureAfterOverlays,
}

/// Value of one signal in a decoded frame
///
/// Conditional (multiplexed) signals whose switch value does not match the frame
/// are reported as `Absent`, which is distinct from a decoded zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalValue {
    /// Physical value (after scaling and offset)
    Present(f64),
    /// Signal is not carried by this frame
    Absent,
}

impl SignalValue {
    /// Physical value, if the signal is present
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Present(v) => Some(*v),
            SignalValue::Absent => None,
        }
    }

    /// Check if the signal is carried by the frame
    pub fn is_present(&self) -> bool {
        matches!(self, SignalValue::Present(_))
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Present(v) => write!(f, "{}", v),
            SignalValue::Absent => write!(f, "-"),
        }
    }
}

/// All signal values of one frame, keyed by signal name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    /// Masked CAN ID of the message
    pub id: u32,
    /// Message name from the DBC file
    pub name: String,
    /// Raw value of the multiplexer switch (if the message is multiplexed)
    pub multiplexer_value: Option<i64>,
    /// Signals of the message, present or absent (fields wider than 64 bits are left out)
    pub signals: BTreeMap<String, SignalValue>,
}

impl DecodedMessage {
    /// Look up a signal's value by name
    pub fn get(&self, signal: &str) -> Option<SignalValue> {
        self.signals.get(signal).copied()
    }

    /// Physical value of a present signal
    pub fn value(&self, signal: &str) -> Option<f64> {
        self.get(signal).and_then(|v| v.as_f64())
    }
}

/// Output of the streaming frame decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    /// A frame decoded against its message definition
    Message(DecodedMessage),
    /// A frame with no (or no decodable) message definition
    RawFrame(Frame),
}

impl DecodedEvent {
    /// Get the CAN ID of this event
    pub fn can_id(&self) -> u32 {
        match self {
            DecodedEvent::Message(message) => message.id,
            DecodedEvent::RawFrame(frame) => frame.id,
        }
    }
}
