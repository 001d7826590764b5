//! candump log reading
//!
//! Parses the text format written by `candump -l`:
//!
//! ```text
//! (1436509052.249713) vcan0 044#2A366C2BBA
//! (1436509052.449847) vcan0 12345678#R
//! (1436509052.650004) can1 123##1DEADBEEF0011223344
//! ```
//!
//! IDs with more than three hex digits are extended. `##` introduces a CAN FD
//! payload preceded by one flags nibble.

use anyhow::{Context, Result};
use can_dbc_decoder::Frame;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

/// Error flag carried in the ID of candump error frames
const CAN_ERR_FLAG: u32 = 0x2000_0000;
const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// One frame read from a log file
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// 1-based line number in the source file
    pub line: usize,
    pub timestamp: Option<DateTime<Utc>>,
    pub interface: String,
    pub frame: Frame,
}

/// Problems with a single log line
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LogLineError {
    #[error("malformed timestamp '{0}'")]
    Timestamp(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("malformed CAN ID '{0}'")]
    CanId(String),

    #[error("malformed payload '{0}'")]
    Payload(String),
}

/// Read every frame of a candump log.
///
/// Malformed lines are logged and skipped.
pub fn read_log(path: &Path) -> Result<Vec<LogEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file: {:?}", path))?;

    let mut entries = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line, index + 1) {
            Ok(entry) => entries.push(entry),
            Err(e) => log::warn!("{:?}:{}: {}, line skipped", path, index + 1, e),
        }
    }

    log::info!("Read {} frames from {:?}", entries.len(), path);
    Ok(entries)
}

/// Parse one candump line
pub fn parse_line(line: &str, line_number: usize) -> std::result::Result<LogEntry, LogLineError> {
    let mut fields = line.split_whitespace();

    let stamp = fields.next().ok_or(LogLineError::MissingField("timestamp"))?;
    let timestamp = parse_timestamp(stamp)?;
    let interface = fields
        .next()
        .ok_or(LogLineError::MissingField("interface"))?
        .to_string();
    let body = fields.next().ok_or(LogLineError::MissingField("frame"))?;

    Ok(LogEntry {
        line: line_number,
        timestamp,
        interface,
        frame: parse_frame(body)?,
    })
}

fn parse_timestamp(field: &str) -> std::result::Result<Option<DateTime<Utc>>, LogLineError> {
    let bad = || LogLineError::Timestamp(field.to_string());

    let inner = field
        .strip_prefix('(')
        .and_then(|f| f.strip_suffix(')'))
        .ok_or_else(bad)?;
    let (secs, fraction) = inner.split_once('.').unwrap_or((inner, "0"));

    let secs: i64 = secs.parse().map_err(|_| bad())?;
    let digits = fraction.len().min(9);
    let fraction: u32 = fraction
        .get(..digits)
        .ok_or_else(bad)?
        .parse()
        .map_err(|_| bad())?;
    let nanos = fraction * 10u32.pow(9 - digits as u32);

    Ok(DateTime::<Utc>::from_timestamp(secs, nanos))
}

fn parse_frame(body: &str) -> std::result::Result<Frame, LogLineError> {
    let (id_text, rest) = body
        .split_once('#')
        .ok_or_else(|| LogLineError::CanId(body.to_string()))?;

    let raw_id =
        u32::from_str_radix(id_text, 16).map_err(|_| LogLineError::CanId(id_text.to_string()))?;
    let extended = id_text.len() > 3;
    let is_error = extended && raw_id & CAN_ERR_FLAG != 0;
    let id = if extended { raw_id & EXTENDED_ID_MASK } else { raw_id };

    let payload_error = || LogLineError::Payload(rest.to_string());

    let frame = if let Some(fd) = rest.strip_prefix('#') {
        // one flags nibble precedes the payload
        let data = fd.get(1..).ok_or_else(payload_error)?;
        Frame::new(id, &parse_hex(data).ok_or_else(payload_error)?)
            .map_err(|_| payload_error())?
            .with_fd(true)
    } else if rest.starts_with('R') {
        Frame::zeroed(id, 0).map_err(|_| payload_error())?.with_remote(true)
    } else {
        Frame::new(id, &parse_hex(rest).ok_or_else(payload_error)?)
            .map_err(|_| payload_error())?
    };

    Ok(frame.with_extended(extended).with_error(is_error))
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let text: String = text.chars().filter(|c| *c != '.').collect();
    if !text.is_ascii() || text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

/// Format a frame as a candump `ID#DATA` token
pub fn format_frame(frame: &Frame) -> String {
    let id = if frame.is_extended {
        format!("{:08X}", frame.id)
    } else {
        format!("{:03X}", frame.id)
    };
    let data: String = frame.data().iter().map(|b| format!("{:02X}", b)).collect();

    if frame.is_remote {
        format!("{}#R", id)
    } else if frame.is_fd {
        format!("{}##0{}", id, data)
    } else {
        format!("{}#{}", id, data)
    }
}
