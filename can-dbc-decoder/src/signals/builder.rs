//! Two-phase schema construction
//!
//! 1. [`build_structural`] folds message and signal records into a
//!    [`SchemaDraft`], enforcing the per-message invariants as each signal is
//!    attached. Any violation aborts the build.
//! 2. [`SchemaDraft::apply_overlays`] applies comments, value types and
//!    attributes, then freezes the result into a [`Schema`]. Overlays that
//!    reference an unknown message or signal are logged and skipped.

use crate::signals::database::{Message, Multiplexing, Schema, Signal, ID_MASK};
use crate::signals::grammar::{
    AttributeRecord, AttributeTarget, CommentRecord, MessageRecord, OverlayRecord, Record,
    SignalRecord, StructuralRecord, ValueTypeRecord,
};
use crate::types::{DbcError, Result, SchemaViolation};
use std::collections::BTreeMap;

/// Name of the pseudo message that holds signals not mapped to any frame
pub const INDEPENDENT_SIGNALS_MESSAGE: &str = "VECTOR__INDEPENDENT_SIG_MSG";

/// Attribute carrying a signal's raw initial value
pub const START_VALUE_ATTRIBUTE: &str = "GenSigStartValue";

/// Attribute carrying a message's cycle time in milliseconds
pub const CYCLE_TIME_ATTRIBUTE: &str = "GenMsgCycleTime";

/// Schema after the structural pass, before metadata overlays
#[derive(Debug)]
pub struct SchemaDraft {
    messages: BTreeMap<u32, Message>,
}

/// Build a schema from the records of one DBC file, in file order.
///
/// Structural records must all come before [`Record::EndOfStructure`] (or the
/// first overlay record); a message or signal after that point is a schema error.
pub fn build_schema(records: Vec<Record>) -> Result<Schema> {
    let mut structural = Vec::new();
    let mut overlays = Vec::new();
    let mut structure_closed = false;

    for record in records {
        match record {
            Record::Structural(record) => {
                if structure_closed {
                    let owner = match &record {
                        StructuralRecord::Message(m) => m.name.clone(),
                        StructuralRecord::Signal(s) => s.name.clone(),
                    };
                    return Err(DbcError::schema(
                        owner,
                        SchemaViolation::StructureAfterOverlays,
                    ));
                }
                structural.push(record);
            }
            Record::EndOfStructure => structure_closed = true,
            Record::Overlay(overlay) => {
                structure_closed = true;
                overlays.push(overlay);
            }
        }
    }

    Ok(build_structural(structural)?.apply_overlays(overlays))
}

/// Fold message and signal records into a draft schema.
///
/// Signals belong to the most recently defined message.
pub fn build_structural<I>(records: I) -> Result<SchemaDraft>
where
    I: IntoIterator<Item = StructuralRecord>,
{
    let mut messages: BTreeMap<u32, Message> = BTreeMap::new();
    let mut current: Option<Message> = None;
    let mut skipping_independent = false;

    for record in records {
        match record {
            StructuralRecord::Message(record) => {
                if let Some(done) = current.take() {
                    close_message(done, &mut messages)?;
                }

                skipping_independent = record.name == INDEPENDENT_SIGNALS_MESSAGE;
                if skipping_independent {
                    log::debug!("Skipping signals of {}", INDEPENDENT_SIGNALS_MESSAGE);
                } else {
                    current = Some(message_from_record(record));
                }
            }
            StructuralRecord::Signal(record) => {
                if skipping_independent {
                    continue;
                }
                match current.as_mut() {
                    Some(message) => attach_signal(message, record)?,
                    None => {
                        return Err(DbcError::schema(
                            "<none>",
                            SchemaViolation::SignalWithoutMessage(record.name),
                        ))
                    }
                }
            }
        }
    }

    if let Some(done) = current.take() {
        close_message(done, &mut messages)?;
    }

    Ok(SchemaDraft { messages })
}

fn message_from_record(record: MessageRecord) -> Message {
    Message::new(record.raw_id, record.name, record.length, record.transmitter)
}

fn signal_from_record(record: SignalRecord) -> Signal {
    let signal = Signal::new(
        record.name,
        record.start_bit,
        record.length,
        record.byte_order,
        record.value_type,
    )
    .with_scaling(record.factor, record.offset)
    .with_range(record.min, record.max)
    .with_multiplexing(record.multiplexing)
    .with_receivers(record.receivers);

    match record.unit {
        Some(unit) => signal.with_unit(unit),
        None => signal,
    }
}

/// Validate a signal against its message and attach it
fn attach_signal(message: &mut Message, record: SignalRecord) -> Result<()> {
    let signal = signal_from_record(record);
    let violation = |v| DbcError::schema(message.name(), v);

    if signal.length() == 0 || signal.length() > 512 {
        return Err(violation(SchemaViolation::InvalidSignalLength {
            signal: signal.name().to_string(),
            length: signal.length(),
        }));
    }

    if message.signal(signal.name()).is_some() {
        return Err(violation(SchemaViolation::DuplicateSignal(
            signal.name().to_string(),
        )));
    }

    let required = signal.required_bytes();
    if required > message.capacity_bytes() {
        return Err(violation(SchemaViolation::SignalOutOfBounds {
            signal: signal.name().to_string(),
            required,
            capacity: message.capacity_bytes(),
        }));
    }

    if signal.is_switch() {
        if let Some(existing) = message.switch_name() {
            return Err(violation(SchemaViolation::MultipleSwitches {
                first: existing.to_string(),
                second: signal.name().to_string(),
            }));
        }
    }

    let switch_name = signal.is_switch().then(|| signal.name().to_string());
    message.insert_signal(signal);
    if let Some(name) = switch_name {
        message.set_switch(name);
    }
    Ok(())
}

/// Final checks on a message once all of its signals are known
fn close_message(message: Message, messages: &mut BTreeMap<u32, Message>) -> Result<()> {
    if message.switch_signal().is_none() {
        let conditional = message
            .signals()
            .find(|s| matches!(s.multiplexing(), Multiplexing::Conditional(_)));
        if let Some(signal) = conditional {
            return Err(DbcError::schema(
                message.name(),
                SchemaViolation::MissingSwitch(signal.name().to_string()),
            ));
        }
    }

    if messages.contains_key(&message.id()) {
        return Err(DbcError::schema(
            message.name(),
            SchemaViolation::DuplicateMessage(message.id()),
        ));
    }

    log::debug!(
        "Built message {} (ID 0x{:X}) with {} signals",
        message.name(),
        message.id(),
        message.signal_count()
    );
    messages.insert(message.id(), message);
    Ok(())
}

impl SchemaDraft {
    /// Apply metadata overlays and freeze the schema.
    ///
    /// Overlays addressing unknown messages or signals are skipped.
    pub fn apply_overlays<I>(mut self, overlays: I) -> Schema
    where
        I: IntoIterator<Item = OverlayRecord>,
    {
        let mut network_comment = None;
        let mut node_comments = BTreeMap::new();

        for overlay in overlays {
            match overlay {
                OverlayRecord::Comment(CommentRecord::Network(text)) => {
                    network_comment = Some(text);
                }
                OverlayRecord::Comment(CommentRecord::Node { node, text }) => {
                    node_comments.insert(node, text);
                }
                OverlayRecord::Comment(CommentRecord::Message(comment)) => {
                    match self.message_mut(comment.id) {
                        Some(message) => message.set_comment(comment.text),
                        None => overlay_miss("comment", comment.id, None),
                    }
                }
                OverlayRecord::Comment(CommentRecord::Signal(comment)) => {
                    match self.signal_mut(comment.id, &comment.signal) {
                        Some(signal) => signal.set_comment(comment.text),
                        None => overlay_miss("comment", comment.id, Some(&comment.signal)),
                    }
                }
                OverlayRecord::Comment(CommentRecord::EnvVar { name, .. }) => {
                    log::trace!("Ignoring comment on environment variable {}", name);
                }
                OverlayRecord::ValueType(value_type) => self.apply_value_type(value_type),
                OverlayRecord::Attribute(attribute) => self.apply_attribute(attribute),
            }
        }

        log::debug!("Schema frozen with {} messages", self.messages.len());
        Schema::from_parts(self.messages, network_comment, node_comments)
    }

    fn apply_value_type(&mut self, record: ValueTypeRecord) {
        let Some(signal) = self.signal_mut(record.id, &record.signal) else {
            overlay_miss("value type", record.id, Some(&record.signal));
            return;
        };

        match record.data_type.required_length() {
            Some(length) if length != signal.length() => {
                log::warn!(
                    "Ignoring {:?} value type for signal {}: it is {} bits wide, expected {}",
                    record.data_type,
                    signal.name(),
                    signal.length(),
                    length
                );
            }
            _ => signal.set_data_type(record.data_type),
        }
    }

    fn apply_attribute(&mut self, record: AttributeRecord) {
        match (record.name.as_str(), &record.target) {
            (START_VALUE_ATTRIBUTE, AttributeTarget::Signal(id, name)) => {
                let Some(raw) = record.value.as_f64() else {
                    log::warn!("Non-numeric {} for signal {}", START_VALUE_ATTRIBUTE, name);
                    return;
                };
                match self.signal_mut(*id, name) {
                    Some(signal) => signal.set_initial_value(raw),
                    None => overlay_miss("attribute", *id, Some(name)),
                }
            }
            (CYCLE_TIME_ATTRIBUTE, AttributeTarget::Message(id)) => {
                let cycle_time = record.value.as_f64().filter(|v| *v >= 0.0);
                match (self.message_mut(*id), cycle_time) {
                    (Some(message), Some(ms)) => message.set_cycle_time(ms as u32),
                    (None, _) => overlay_miss("attribute", *id, None),
                    (Some(message), None) => log::warn!(
                        "Invalid {} for message {}",
                        CYCLE_TIME_ATTRIBUTE,
                        message.name()
                    ),
                }
            }
            _ => log::trace!("Attribute {} has no effect on the schema", record.name),
        }
    }

    fn message_mut(&mut self, raw_id: u32) -> Option<&mut Message> {
        self.messages.get_mut(&(raw_id & ID_MASK))
    }

    fn signal_mut(&mut self, raw_id: u32, name: &str) -> Option<&mut Signal> {
        self.message_mut(raw_id).and_then(|m| m.signal_mut(name))
    }
}

fn overlay_miss(kind: &str, raw_id: u32, signal: Option<&str>) {
    match signal {
        Some(signal) => log::warn!(
            "Ignoring {} for unknown signal {} in message 0x{:X}",
            kind,
            signal,
            raw_id & ID_MASK
        ),
        None => log::warn!(
            "Ignoring {} for unknown message 0x{:X}",
            kind,
            raw_id & ID_MASK
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::database::{ByteOrder, DataType, ValueType};
    use crate::signals::grammar::{
        AttributeValue, MessageCommentRecord, SignalCommentRecord,
    };

    fn message(raw_id: u32, name: &str, length: u8) -> StructuralRecord {
        StructuralRecord::Message(MessageRecord {
            raw_id,
            id: raw_id & ID_MASK,
            is_extended: raw_id & 0x8000_0000 != 0,
            length,
            name: name.to_string(),
            transmitter: "ECU".to_string(),
        })
    }

    fn signal(name: &str, multiplexing: Multiplexing, start_bit: u16, length: u16) -> StructuralRecord {
        StructuralRecord::Signal(SignalRecord {
            name: name.to_string(),
            multiplexing,
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            receivers: Vec::new(),
        })
    }

    fn violation(err: DbcError) -> SchemaViolation {
        match err {
            DbcError::Schema { violation, .. } => violation,
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_signals_attach_to_latest_message() {
        let draft = build_structural(vec![
            message(100, "A", 8),
            signal("A1", Multiplexing::None, 0, 8),
            message(200, "B", 8),
            signal("B1", Multiplexing::None, 0, 8),
            signal("B2", Multiplexing::None, 8, 8),
        ])
        .unwrap();
        let schema = draft.apply_overlays(Vec::new());

        assert_eq!(schema.message(100).unwrap().signal_count(), 1);
        assert_eq!(schema.message(200).unwrap().signal_count(), 2);
        assert!(schema.signal(200, "B2").is_some());
    }

    #[test]
    fn test_duplicate_signal() {
        let err = build_structural(vec![
            message(100, "A", 8),
            signal("X", Multiplexing::None, 0, 8),
            signal("X", Multiplexing::None, 8, 8),
        ])
        .unwrap_err();
        assert_eq!(violation(err), SchemaViolation::DuplicateSignal("X".to_string()));
    }

    #[test]
    fn test_signal_exceeds_capacity() {
        let err = build_structural(vec![
            message(100, "A", 2),
            signal("X", Multiplexing::None, 8, 16),
        ])
        .unwrap_err();
        assert!(matches!(
            violation(err),
            SchemaViolation::SignalOutOfBounds { required: 3, capacity: 2, .. }
        ));
    }

    #[test]
    fn test_fd_capacity() {
        // 10 declared bytes round up to a 12 byte CAN FD payload
        let draft = build_structural(vec![
            message(100, "Fd", 10),
            signal("X", Multiplexing::None, 80, 16),
        ]);
        assert!(draft.is_ok());
    }

    #[test]
    fn test_invalid_length() {
        let err = build_structural(vec![
            message(100, "A", 8),
            signal("X", Multiplexing::None, 0, 0),
        ])
        .unwrap_err();
        assert!(matches!(
            violation(err),
            SchemaViolation::InvalidSignalLength { length: 0, .. }
        ));
    }

    #[test]
    fn test_multiple_switches() {
        let err = build_structural(vec![
            message(100, "A", 8),
            signal("S1", Multiplexing::Switch, 0, 4),
            signal("S2", Multiplexing::Switch, 4, 4),
        ])
        .unwrap_err();
        assert!(matches!(violation(err), SchemaViolation::MultipleSwitches { .. }));
    }

    #[test]
    fn test_missing_switch() {
        let err = build_structural(vec![
            message(100, "A", 8),
            signal("C", Multiplexing::Conditional(1), 8, 8),
        ])
        .unwrap_err();
        assert_eq!(violation(err), SchemaViolation::MissingSwitch("C".to_string()));
    }

    #[test]
    fn test_switch_declared_after_conditionals() {
        let draft = build_structural(vec![
            message(100, "A", 8),
            signal("C", Multiplexing::Conditional(1), 8, 8),
            signal("S", Multiplexing::Switch, 0, 8),
        ])
        .unwrap();
        let schema = draft.apply_overlays(Vec::new());
        assert_eq!(schema.message(100).unwrap().switch_signal().unwrap().name(), "S");
    }

    #[test]
    fn test_signal_without_message() {
        let err = build_structural(vec![signal("X", Multiplexing::None, 0, 8)]).unwrap_err();
        assert_eq!(violation(err), SchemaViolation::SignalWithoutMessage("X".to_string()));
    }

    #[test]
    fn test_duplicate_message() {
        let err = build_structural(vec![message(100, "A", 8), message(100, "B", 8)]).unwrap_err();
        assert_eq!(violation(err), SchemaViolation::DuplicateMessage(100));
    }

    #[test]
    fn test_independent_signals_are_skipped() {
        let draft = build_structural(vec![
            message(0xC000_0000, INDEPENDENT_SIGNALS_MESSAGE, 0),
            signal("Loose", Multiplexing::None, 0, 8),
            message(100, "A", 8),
        ])
        .unwrap();
        let schema = draft.apply_overlays(Vec::new());
        assert_eq!(schema.stats().num_messages, 1);
    }

    #[test]
    fn test_structure_after_overlays() {
        let err = build_schema(vec![
            Record::Structural(message(100, "A", 8)),
            Record::EndOfStructure,
            Record::Structural(signal("Late", Multiplexing::None, 0, 8)),
        ])
        .unwrap_err();
        assert_eq!(violation(err), SchemaViolation::StructureAfterOverlays);
    }

    #[test]
    fn test_overlays() {
        let draft = build_structural(vec![
            message(100, "A", 8),
            signal("Temp", Multiplexing::None, 0, 32),
            signal("Wide", Multiplexing::None, 0, 16),
        ])
        .unwrap();

        let schema = draft.apply_overlays(vec![
            OverlayRecord::Comment(CommentRecord::Message(MessageCommentRecord {
                id: 100,
                text: "first".to_string(),
            })),
            OverlayRecord::Comment(CommentRecord::Message(MessageCommentRecord {
                id: 100,
                text: "second".to_string(),
            })),
            OverlayRecord::Comment(CommentRecord::Signal(SignalCommentRecord {
                id: 100,
                signal: "Temp".to_string(),
                text: "coolant".to_string(),
            })),
            OverlayRecord::ValueType(ValueTypeRecord {
                id: 100,
                signal: "Temp".to_string(),
                data_type: DataType::Float,
            }),
            OverlayRecord::ValueType(ValueTypeRecord {
                id: 100,
                signal: "Wide".to_string(),
                data_type: DataType::Double,
            }),
            OverlayRecord::Attribute(AttributeRecord {
                name: START_VALUE_ATTRIBUTE.to_string(),
                target: AttributeTarget::Signal(100, "Temp".to_string()),
                value: AttributeValue::Number(42.0),
            }),
            OverlayRecord::Attribute(AttributeRecord {
                name: CYCLE_TIME_ATTRIBUTE.to_string(),
                target: AttributeTarget::Message(100),
                value: AttributeValue::Number(20.0),
            }),
            // Unknown targets are skipped
            OverlayRecord::Comment(CommentRecord::Message(MessageCommentRecord {
                id: 999,
                text: "nobody".to_string(),
            })),
            OverlayRecord::Attribute(AttributeRecord {
                name: START_VALUE_ATTRIBUTE.to_string(),
                target: AttributeTarget::Signal(100, "Missing".to_string()),
                value: AttributeValue::Number(1.0),
            }),
            OverlayRecord::Comment(CommentRecord::Network("bus".to_string())),
        ]);

        let message = schema.message(100).unwrap();
        assert_eq!(message.comment(), Some("second"));
        assert_eq!(message.cycle_time_ms(), Some(20));
        let temp = message.signal("Temp").unwrap();
        assert_eq!(temp.comment(), Some("coolant"));
        assert_eq!(temp.data_type(), DataType::Float);
        assert_eq!(temp.initial_value(), Some(42.0));
        assert_eq!(message.signal("Wide").unwrap().data_type(), DataType::Integer);
        assert_eq!(schema.comment(), Some("bus"));
        assert!(schema.message(999).is_none());
    }
}
