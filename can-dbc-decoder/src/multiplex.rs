//! Multiplexed message decoding
//!
//! Decodes the switch signal first, then every other signal of the message.
//! Conditional signals whose declared value does not match the switch are
//! reported as [`SignalValue::Absent`].

use crate::codec::{SignalCodec, MAX_RAW_BITS};
use crate::signals::database::{Message, Multiplexing, Signal};
use crate::types::{DbcError, DecodedMessage, Frame, Result, SignalValue};
use std::collections::{BTreeMap, HashMap};

/// Resolves which signals a frame carries and decodes or encodes them
pub struct MultiplexResolver;

impl MultiplexResolver {
    /// Decode every signal of `message` from `frame`.
    ///
    /// Fails with the first range error of a signal that is present in the frame.
    /// Signals wider than the codec's raw width are left out of the result.
    pub fn decode_message(message: &Message, frame: &Frame) -> Result<DecodedMessage> {
        let multiplexer_value = Self::multiplexer_value(message, frame)?;
        let mut signals = BTreeMap::new();

        for signal in message.signals() {
            if signal.length() > MAX_RAW_BITS {
                log::debug!(
                    "Skipping {}-bit signal '{}' in message {}",
                    signal.length(),
                    signal.name(),
                    message.name()
                );
                continue;
            }

            let value = if Self::is_active(signal, multiplexer_value) {
                SignalValue::Present(SignalCodec::decode(signal, frame)?)
            } else {
                SignalValue::Absent
            };
            signals.insert(signal.name().to_string(), value);
        }

        Ok(DecodedMessage {
            id: message.id(),
            name: message.name().to_string(),
            multiplexer_value,
            signals,
        })
    }

    /// Raw value of the message's switch signal, or `None` if it has none
    pub fn multiplexer_value(message: &Message, frame: &Frame) -> Result<Option<i64>> {
        match message.switch_signal() {
            Some(switch) => {
                let raw = SignalCodec::decode_raw(switch, frame)?;
                Ok(Some(SignalCodec::raw_to_i64(switch, raw)))
            }
            None => Ok(None),
        }
    }

    /// Whether `signal` is carried by a frame whose switch decoded to `multiplexer_value`
    pub fn is_active(signal: &Signal, multiplexer_value: Option<i64>) -> bool {
        match signal.multiplexing() {
            Multiplexing::None | Multiplexing::Switch => true,
            Multiplexing::Conditional(value) => multiplexer_value == Some(value),
        }
    }

    /// Write the signals of `message` into `frame`.
    ///
    /// The switch value is taken from `values` (or the switch's initial value).
    /// Every signal active for that switch value is written: physical values from
    /// `values`, otherwise the signal's raw initial value, otherwise raw 0. Signals
    /// wider than the codec's raw width are only written when `values` names them.
    /// The frame is left untouched when any active signal does not fit.
    pub fn encode_message(
        message: &Message,
        values: &HashMap<String, f64>,
        frame: &mut Frame,
    ) -> Result<()> {
        if let Some(unknown) = values.keys().find(|name| message.signal(name).is_none()) {
            return Err(DbcError::SignalNotFound(format!(
                "{} in message {}",
                unknown,
                message.name()
            )));
        }

        let multiplexer_value = message.switch_signal().map(|switch| {
            let raw = Self::raw_for(switch, values);
            SignalCodec::raw_to_i64(switch, raw)
        });

        let active: Vec<&Signal> = message
            .signals()
            .filter(|s| Self::is_active(s, multiplexer_value))
            .filter(|s| s.length() <= MAX_RAW_BITS || values.contains_key(s.name()))
            .collect();

        for signal in &active {
            SignalCodec::check_fits(signal, frame)?;
        }

        for (name, _) in values {
            if !active.iter().any(|s| s.name() == name) {
                log::warn!(
                    "Signal '{}' is not active for multiplexer value {:?} in message {}, value ignored",
                    name,
                    multiplexer_value,
                    message.name()
                );
            }
        }

        for signal in active {
            let raw = Self::raw_for(signal, values);
            SignalCodec::encode_raw(signal, raw, frame)?;
        }

        Ok(())
    }

    fn raw_for(signal: &Signal, values: &HashMap<String, f64>) -> u64 {
        match values.get(signal.name()) {
            Some(&value) => SignalCodec::physical_to_raw(signal, value),
            None => signal
                .initial_value()
                .map(|raw| SignalCodec::raw_from_f64(signal, raw))
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::database::{ByteOrder, Schema, ValueType};
    use crate::signals::grammar::{MessageRecord, SignalRecord, StructuralRecord};
    use crate::signals::builder::build_structural;

    fn mux_message() -> Message {
        let message = MessageRecord {
            raw_id: 0x200,
            id: 0x200,
            is_extended: false,
            length: 8,
            name: "MuxMsg".to_string(),
            transmitter: "ECU".to_string(),
        };
        let signal = |name: &str, multiplexing, start_bit, length| SignalRecord {
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
        };

        let records = vec![
            StructuralRecord::Message(message),
            StructuralRecord::Signal(signal("Mode", Multiplexing::Switch, 0, 8)),
            StructuralRecord::Signal(signal("SignalA", Multiplexing::Conditional(0), 8, 16)),
            StructuralRecord::Signal(signal("SignalB", Multiplexing::Conditional(1), 8, 16)),
            StructuralRecord::Signal(signal("Counter", Multiplexing::None, 56, 8)),
        ];

        let schema = build_structural(records).unwrap().apply_overlays(Vec::new());
        schema.message(0x200).unwrap().clone()
    }

    #[test]
    fn test_switch_selects_signals() {
        let message = mux_message();

        let frame = Frame::new(0x200, &[0x00, 0x34, 0x12, 0, 0, 0, 0, 0x07]).unwrap();
        let decoded = MultiplexResolver::decode_message(&message, &frame).unwrap();
        assert_eq!(decoded.multiplexer_value, Some(0));
        assert_eq!(decoded.get("SignalA"), Some(SignalValue::Present(0x1234 as f64)));
        assert_eq!(decoded.get("SignalB"), Some(SignalValue::Absent));
        assert_eq!(decoded.value("Counter"), Some(7.0));

        let frame = Frame::new(0x200, &[0x01, 0x00, 0x00, 0, 0, 0, 0, 0]).unwrap();
        let decoded = MultiplexResolver::decode_message(&message, &frame).unwrap();
        assert_eq!(decoded.multiplexer_value, Some(1));
        assert_eq!(decoded.get("SignalA"), Some(SignalValue::Absent));
        assert_eq!(decoded.get("SignalB"), Some(SignalValue::Present(0.0)));
    }

    #[test]
    fn test_unmatched_switch_value() {
        let message = mux_message();
        let frame = Frame::new(0x200, &[0x05, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let decoded = MultiplexResolver::decode_message(&message, &frame).unwrap();
        assert!(!decoded.get("SignalA").unwrap().is_present());
        assert!(!decoded.get("SignalB").unwrap().is_present());
        assert!(decoded.get("Mode").unwrap().is_present());
    }

    #[test]
    fn test_encode_message_follows_switch() {
        let message = mux_message();
        let mut frame = Frame::zeroed(0x200, 8).unwrap();
        let values = HashMap::from([
            ("Mode".to_string(), 1.0),
            ("SignalB".to_string(), 0xBEEF as f64),
            ("SignalA".to_string(), 0x1111 as f64),
        ]);

        MultiplexResolver::encode_message(&message, &values, &mut frame).unwrap();
        assert_eq!(frame.data(), &[0x01, 0xEF, 0xBE, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_unknown_signal() {
        let message = mux_message();
        let mut frame = Frame::zeroed(0x200, 8).unwrap();
        let values = HashMap::from([("Nope".to_string(), 1.0)]);
        assert!(matches!(
            MultiplexResolver::encode_message(&message, &values, &mut frame),
            Err(DbcError::SignalNotFound(_))
        ));
    }

    #[test]
    fn test_short_frame_fails_whole_message() {
        let message = mux_message();
        let frame = Frame::new(0x200, &[0x00, 0x01]).unwrap();
        assert!(MultiplexResolver::decode_message(&message, &frame)
            .unwrap_err()
            .is_range());

        let mut frame = Frame::new(0x200, &[0xAA; 4]).unwrap();
        let err = MultiplexResolver::encode_message(&message, &HashMap::new(), &mut frame);
        assert!(err.unwrap_err().is_range());
        assert_eq!(frame.data(), &[0xAA; 4]);
    }

    const SIGNED_SWITCH_DBC: &str = r#"
BO_ 300 Paged: 8 ECU
 SG_ Page M : 0|4@1- (1,0) [-8|7] "" ECU
 SG_ Low m-1 : 8|8@1+ (1,0) [0|255] "" ECU
 SG_ High m7 : 8|8@1+ (1,0) [0|255] "" ECU
"#;

    #[test]
    fn test_signed_switch_decode() {
        let schema: Schema = SIGNED_SWITCH_DBC.parse().unwrap();
        let message = schema.message(300).unwrap();

        // 0xF in a signed 4-bit switch is -1
        let frame = Frame::new(300, &[0x0F, 0x2A, 0, 0, 0, 0, 0, 0]).unwrap();
        let decoded = MultiplexResolver::decode_message(message, &frame).unwrap();
        assert_eq!(decoded.multiplexer_value, Some(-1));
        assert_eq!(decoded.value("Page"), Some(-1.0));
        assert_eq!(decoded.value("Low"), Some(42.0));
        assert_eq!(decoded.get("High"), Some(SignalValue::Absent));

        let frame = Frame::new(300, &[0x07, 0x2A, 0, 0, 0, 0, 0, 0]).unwrap();
        let decoded = MultiplexResolver::decode_message(message, &frame).unwrap();
        assert_eq!(decoded.multiplexer_value, Some(7));
        assert_eq!(decoded.get("Low"), Some(SignalValue::Absent));
        assert_eq!(decoded.value("High"), Some(42.0));
    }

    #[test]
    fn test_signed_switch_encode() {
        let schema: Schema = SIGNED_SWITCH_DBC.parse().unwrap();
        let message = schema.message(300).unwrap();
        let mut frame = Frame::zeroed(300, 8).unwrap();
        let values = HashMap::from([
            ("Page".to_string(), -1.0),
            ("Low".to_string(), 0x55 as f64),
            ("High".to_string(), 0x99 as f64),
        ]);

        MultiplexResolver::encode_message(message, &values, &mut frame).unwrap();
        assert_eq!(frame.data(), &[0x0F, 0x55, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_wide_signal_does_not_hide_others() {
        let schema: Schema = r#"
BO_ 400 Bulk: 16 ECU
 SG_ Small : 0|8@1+ (1,0) [0|0] "" ECU
 SG_ Wide : 8|72@1+ (1,0) [0|0] "" ECU
"#
        .parse()
        .unwrap();
        let message = schema.message(400).unwrap();

        let mut data = [0u8; 16];
        data[0] = 0x2A;
        let frame = Frame::new(400, &data).unwrap();
        let decoded = MultiplexResolver::decode_message(message, &frame).unwrap();
        assert_eq!(decoded.value("Small"), Some(42.0));
        assert_eq!(decoded.get("Wide"), None);

        let mut frame = Frame::zeroed(400, 16).unwrap();
        let values = HashMap::from([("Small".to_string(), 7.0)]);
        MultiplexResolver::encode_message(message, &values, &mut frame).unwrap();
        assert_eq!(frame.data()[0], 7);

        let values = HashMap::from([("Wide".to_string(), 1.0)]);
        assert!(matches!(
            MultiplexResolver::encode_message(message, &values, &mut frame),
            Err(DbcError::UnsupportedWidth { length: 72, .. })
        ));
    }
}
