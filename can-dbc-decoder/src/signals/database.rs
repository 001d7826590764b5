//! Frozen signal schema
//!
//! A [`Schema`] maps masked CAN IDs to [`Message`] definitions, each owning its
//! [`Signal`]s by value. It is produced once by the schema builder and only hands
//! out shared references afterwards, so it can be read from any number of
//! threads without locking.

use crate::codec;
use crate::multiplex::MultiplexResolver;
use crate::types::{DbcError, DecodedMessage, Frame, Result, CLASSIC_FRAME_LEN};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

/// Bit 31 of a raw DBC message ID flags an extended (29-bit) identifier
pub const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Mask applied to raw DBC message IDs
pub const ID_MASK: u32 = 0x3FFF_FFFF;

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format, `@1`)
    LittleEndian,
    /// Big-endian (Motorola format, `@0`)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer (`-`)
    Signed,
    /// Unsigned integer (`+`)
    Unsigned,
}

/// How the raw bit pattern of a signal is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    /// Plain (possibly sign-extended) integer
    #[default]
    Integer,
    /// IEEE-754 single precision, 32 bits
    Float,
    /// IEEE-754 double precision, 64 bits
    Double,
}

impl DataType {
    /// Bit length a float interpretation requires
    pub fn required_length(&self) -> Option<u16> {
        match self {
            DataType::Integer => None,
            DataType::Float => Some(32),
            DataType::Double => Some(64),
        }
    }
}

/// Role of a signal in message multiplexing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiplexing {
    /// Always present
    #[default]
    None,
    /// The message's multiplexer switch (`M`)
    Switch,
    /// Present only when the switch decodes to this value (`m<value>`)
    Conditional(i64),
}

/// A CAN signal definition
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    name: String,
    start_bit: u16,
    length: u16,
    byte_order: ByteOrder,
    value_type: ValueType,
    data_type: DataType,
    factor: f64,
    offset: f64,
    min: f64,
    max: f64,
    multiplexing: Multiplexing,
    unit: Option<String>,
    receivers: Vec<String>,
    comment: Option<String>,
    initial_value: Option<f64>,
}

impl Signal {
    /// Create an unscaled integer signal
    pub fn new(
        name: impl Into<String>,
        start_bit: u16,
        length: u16,
        byte_order: ByteOrder,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order,
            value_type,
            data_type: DataType::Integer,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            multiplexing: Multiplexing::None,
            unit: None,
            receivers: Vec::new(),
            comment: None,
            initial_value: None,
        }
    }

    /// Builder method: set factor and offset
    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// Builder method: set the advisory physical range
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Builder method: set the raw data interpretation
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Builder method: set the multiplexing role
    pub fn with_multiplexing(mut self, multiplexing: Multiplexing) -> Self {
        self.multiplexing = multiplexing;
        self
    }

    /// Builder method: set the engineering unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        self.unit = if unit.is_empty() { None } else { Some(unit) };
        self
    }

    /// Builder method: set the receiving nodes
    pub fn with_receivers(mut self, receivers: Vec<String>) -> Self {
        self.receivers = receivers;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_bit(&self) -> u16 {
        self.start_bit
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Declared minimum (advisory, never enforced)
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Declared maximum (advisory, never enforced)
    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn multiplexing(&self) -> Multiplexing {
        self.multiplexing
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn receivers(&self) -> &[String] {
        &self.receivers
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Raw initial value from the `GenSigStartValue` attribute
    pub fn initial_value(&self) -> Option<f64> {
        self.initial_value
    }

    /// True for the multiplexer switch
    pub fn is_switch(&self) -> bool {
        self.multiplexing == Multiplexing::Switch
    }

    /// Number of payload bytes a frame needs to carry this signal
    pub fn required_bytes(&self) -> usize {
        codec::required_bytes(self.start_bit, self.length, self.byte_order)
    }

    pub(crate) fn set_comment(&mut self, comment: String) {
        self.comment = Some(comment);
    }

    pub(crate) fn set_data_type(&mut self, data_type: DataType) {
        self.data_type = data_type;
    }

    pub(crate) fn set_initial_value(&mut self, raw: f64) {
        self.initial_value = Some(raw);
    }
}

/// A complete CAN message definition
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    raw_id: u32,
    id: u32,
    is_extended: bool,
    length: u8,
    name: String,
    transmitter: String,
    comment: Option<String>,
    cycle_time_ms: Option<u32>,
    signals: BTreeMap<String, Signal>,
    switch: Option<String>,
}

impl Message {
    /// Create a message with no signals from its raw DBC identifier
    pub fn new(
        raw_id: u32,
        name: impl Into<String>,
        length: u8,
        transmitter: impl Into<String>,
    ) -> Self {
        Self {
            raw_id,
            id: raw_id & ID_MASK,
            is_extended: raw_id & EXTENDED_ID_FLAG != 0,
            length,
            name: name.into(),
            transmitter: transmitter.into(),
            comment: None,
            cycle_time_ms: None,
            signals: BTreeMap::new(),
            switch: None,
        }
    }

    /// Identifier as written in the DBC file, including the extended flag
    pub fn raw_id(&self) -> u32 {
        self.raw_id
    }

    /// Masked CAN identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.is_extended
    }

    /// Declared payload length in bytes
    pub fn length(&self) -> u8 {
        self.length
    }

    /// Payload bytes available to signals.
    ///
    /// Lengths above 8 bytes imply a CAN FD frame and are rounded up to the next
    /// valid FD payload size.
    pub fn capacity_bytes(&self) -> usize {
        let length = self.length as usize;
        if length <= CLASSIC_FRAME_LEN {
            length
        } else {
            crate::types::dlc_to_size(crate::types::size_to_dlc(length))
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sending node (`Vector__XXX` when unspecified)
    pub fn transmitter(&self) -> &str {
        &self.transmitter
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Cycle time from the `GenMsgCycleTime` attribute
    pub fn cycle_time_ms(&self) -> Option<u32> {
        self.cycle_time_ms
    }

    /// Look up a signal by name
    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.get(name)
    }

    /// All signals in name order
    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    /// The multiplexer switch signal, if any
    pub fn switch_signal(&self) -> Option<&Signal> {
        self.switch.as_deref().and_then(|name| self.signals.get(name))
    }

    /// True if any signal takes part in multiplexing
    pub fn is_multiplexed(&self) -> bool {
        self.signals
            .values()
            .any(|s| s.multiplexing != Multiplexing::None)
    }

    /// Decode every signal of this message from `frame`
    pub fn decode(&self, frame: &Frame) -> Result<DecodedMessage> {
        MultiplexResolver::decode_message(self, frame)
    }

    pub(crate) fn switch_name(&self) -> Option<&str> {
        self.switch.as_deref()
    }

    pub(crate) fn set_switch(&mut self, name: String) {
        self.switch = Some(name);
    }

    pub(crate) fn insert_signal(&mut self, signal: Signal) {
        self.signals.insert(signal.name.clone(), signal);
    }

    pub(crate) fn signal_mut(&mut self, name: &str) -> Option<&mut Signal> {
        self.signals.get_mut(name)
    }

    pub(crate) fn set_comment(&mut self, comment: String) {
        self.comment = Some(comment);
    }

    pub(crate) fn set_cycle_time(&mut self, cycle_time_ms: u32) {
        self.cycle_time_ms = Some(cycle_time_ms);
    }
}

/// The frozen signal schema
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// All message definitions by masked CAN ID
    messages: BTreeMap<u32, Message>,
    /// Message name lookup (first definition wins)
    names: HashMap<String, u32>,
    /// Network comment (`CM_ "..."`)
    comment: Option<String>,
    /// Node comments (`CM_ BU_ ...`)
    node_comments: BTreeMap<String, String>,
}

impl Schema {
    pub(crate) fn from_parts(
        messages: BTreeMap<u32, Message>,
        comment: Option<String>,
        node_comments: BTreeMap<String, String>,
    ) -> Self {
        let mut names = HashMap::new();
        for message in messages.values() {
            names.entry(message.name.clone()).or_insert(message.id);
        }

        Self {
            messages,
            names,
            comment,
            node_comments,
        }
    }

    /// Load and freeze a schema from a DBC file
    pub fn from_file(path: &Path) -> Result<Self> {
        crate::signals::dbc::parse_dbc_file(path)
    }

    /// Get a message definition by CAN ID (the extended flag bit is ignored)
    pub fn message(&self, can_id: u32) -> Option<&Message> {
        self.messages.get(&(can_id & ID_MASK))
    }

    /// Get a message definition by name
    pub fn message_by_name(&self, name: &str) -> Option<&Message> {
        self.names.get(name).and_then(|id| self.messages.get(id))
    }

    /// All messages in ascending ID order
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Look up one signal of one message
    pub fn signal(&self, can_id: u32, name: &str) -> Option<&Signal> {
        self.message(can_id).and_then(|m| m.signal(name))
    }

    /// Network comment
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Comment attached to a node
    pub fn node_comment(&self, node: &str) -> Option<&str> {
        self.node_comments.get(node).map(String::as_str)
    }

    /// Decode a frame against the message with the same ID
    pub fn decode(&self, frame: &Frame) -> Result<DecodedMessage> {
        let message = self
            .message(frame.id)
            .ok_or(DbcError::MessageNotFound(frame.id))?;
        MultiplexResolver::decode_message(message, frame)
    }

    /// Build a frame for message `can_id` from physical signal values.
    ///
    /// Signals missing from `values` are written with their initial value, or
    /// zero when none is declared.
    pub fn encode_frame(&self, can_id: u32, values: &HashMap<String, f64>) -> Result<Frame> {
        let message = self
            .message(can_id)
            .ok_or(DbcError::MessageNotFound(can_id))?;

        let mut frame = Frame::zeroed(message.id, message.capacity_bytes())?
            .with_extended(message.is_extended);
        MultiplexResolver::encode_message(message, values, &mut frame)?;
        Ok(frame)
    }

    /// Get schema statistics
    pub fn stats(&self) -> SchemaStats {
        SchemaStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(Message::signal_count).sum(),
            num_multiplexed_messages: self
                .messages
                .values()
                .filter(|m| m.is_multiplexed())
                .count(),
        }
    }

    /// Get all CAN IDs in the schema
    pub fn get_all_can_ids(&self) -> Vec<u32> {
        self.messages.keys().copied().collect()
    }
}

impl FromStr for Schema {
    type Err = DbcError;

    fn from_str(text: &str) -> Result<Self> {
        crate::signals::dbc::parse_dbc_str(text)
    }
}

/// Schema statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
    /// Messages with a multiplexer switch or conditional signals
    pub num_multiplexed_messages: usize,
}
