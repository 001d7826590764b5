//! Output rendering
//!
//! Renders the schema overview and decoded frames as plain text or JSON lines.

use crate::config::OutputFormat;
use crate::logfile::{format_frame, LogEntry};
use can_dbc_decoder::{DecodedEvent, DecodedMessage, Multiplexing, Result, Schema, SignalValue};
use chrono::SecondsFormat;
use serde_json::json;
use std::fmt;

/// Schema statistics followed by one row per message
pub fn schema_summary(schema: &Schema) -> String {
    SchemaSummary(schema).to_string()
}

struct SchemaSummary<'a>(&'a Schema);

impl fmt::Display for SchemaSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.0.stats();

        writeln!(f, "Signal schema:")?;
        writeln!(f, "  Messages:    {}", stats.num_messages)?;
        writeln!(f, "  Signals:     {}", stats.num_signals)?;
        writeln!(f, "  Multiplexed: {}", stats.num_multiplexed_messages)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<10} {:<32} {:>5} {:>8}  {}",
            "ID", "Name", "Bytes", "Signals", "Transmitter"
        )?;

        for message in self.0.messages() {
            let id = if message.is_extended() {
                format!("0x{:08X}x", message.id())
            } else {
                format!("0x{:03X}", message.id())
            };
            writeln!(
                f,
                "{:<10} {:<32} {:>5} {:>8}  {}",
                id,
                message.name(),
                message.length(),
                message.signal_count(),
                message.transmitter()
            )?;

            for signal in message.signals() {
                let role = match signal.multiplexing() {
                    Multiplexing::None => String::new(),
                    Multiplexing::Switch => " [switch]".to_string(),
                    Multiplexing::Conditional(value) => format!(" [m{}]", value),
                };
                writeln!(
                    f,
                    "           - {} {}|{}@{:?}{}",
                    signal.name(),
                    signal.start_bit(),
                    signal.length(),
                    signal.byte_order(),
                    role
                )?;
            }
        }

        Ok(())
    }
}

/// Render the outcome of decoding one log entry.
///
/// Returns `None` when the frame produced no event.
pub fn render_entry(
    schema: &Schema,
    entry: &LogEntry,
    outcome: &Result<Option<DecodedEvent>>,
    format: OutputFormat,
) -> Option<String> {
    let timestamp = entry
        .timestamp
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_else(|| "-".to_string());

    match (outcome, format) {
        (Ok(None), _) => None,
        (Ok(Some(DecodedEvent::Message(message))), OutputFormat::Txt) => Some(format!(
            "{} {} {}",
            timestamp,
            entry.interface,
            message_text(schema, message)
        )),
        (Ok(Some(DecodedEvent::Message(message))), OutputFormat::Json) => Some(
            json!({
                "timestamp": timestamp,
                "interface": entry.interface,
                "message": message,
            })
            .to_string(),
        ),
        (Ok(Some(DecodedEvent::RawFrame(frame))), OutputFormat::Txt) => Some(format!(
            "{} {} {}",
            timestamp,
            entry.interface,
            format_frame(frame)
        )),
        (Ok(Some(DecodedEvent::RawFrame(frame))), OutputFormat::Json) => Some(
            json!({
                "timestamp": timestamp,
                "interface": entry.interface,
                "raw": format_frame(frame),
            })
            .to_string(),
        ),
        (Err(e), OutputFormat::Txt) => Some(format!(
            "{} {} line {}: error: {}",
            timestamp, entry.interface, entry.line, e
        )),
        (Err(e), OutputFormat::Json) => Some(
            json!({
                "timestamp": timestamp,
                "interface": entry.interface,
                "line": entry.line,
                "error": e.to_string(),
            })
            .to_string(),
        ),
    }
}

/// `Name(0xID) signal=value unit, ...` with absent signals left out
fn message_text(schema: &Schema, message: &DecodedMessage) -> String {
    let signals: Vec<String> = message
        .signals
        .iter()
        .filter_map(|(name, value)| match value {
            SignalValue::Present(v) => {
                let unit = schema
                    .signal(message.id, name)
                    .and_then(|s| s.unit())
                    .map(|u| format!(" {}", u))
                    .unwrap_or_default();
                Some(format!("{}={}{}", name, v, unit))
            }
            SignalValue::Absent => None,
        })
        .collect();

    format!("{}(0x{:X}) {}", message.name, message.id, signals.join(", "))
}
