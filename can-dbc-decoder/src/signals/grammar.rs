//! DBC record grammar
//!
//! One entry point per record kind. Each takes a [`Tokenizer`] positioned after the
//! record keyword and returns the typed record, or the first syntax error. The
//! parser never looks beyond the current record: whether a referenced message or
//! signal exists is decided by the schema builder.

use crate::signals::database::{
    ByteOrder, DataType, Multiplexing, ValueType, EXTENDED_ID_FLAG, ID_MASK,
};
use crate::signals::tokenizer::Tokenizer;
use crate::types::Result;

/// `BO_ <rawId> <name>: <length> <transmitter>`
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub raw_id: u32,
    pub id: u32,
    pub is_extended: bool,
    pub length: u8,
    pub name: String,
    pub transmitter: String,
}

/// `SG_ <name> <mux>: <start>|<length>@<order><sign> (<factor>,<offset>) [<min>|<max>] "<unit>" <receivers>`
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    pub name: String,
    pub multiplexing: Multiplexing,
    pub start_bit: u16,
    pub length: u16,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
    pub factor: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    pub unit: Option<String>,
    pub receivers: Vec<String>,
}

/// `SIG_VALTYPE_ <id> <signal> : <typeCode>`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTypeRecord {
    pub id: u32,
    pub signal: String,
    pub data_type: DataType,
}

/// `CM_ BO_ <id> "<text>"`
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCommentRecord {
    pub id: u32,
    pub text: String,
}

/// `CM_ SG_ <id> <signal> "<text>"`
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCommentRecord {
    pub id: u32,
    pub signal: String,
    pub text: String,
}

/// Any `CM_` record
#[derive(Debug, Clone, PartialEq)]
pub enum CommentRecord {
    Network(String),
    Node { node: String, text: String },
    Message(MessageCommentRecord),
    Signal(SignalCommentRecord),
    EnvVar { name: String, text: String },
}

/// Object an attribute value is assigned to
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeTarget {
    Network,
    Node(String),
    Message(u32),
    Signal(u32, String),
    EnvVar(String),
}

/// Value of an attribute assignment
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(v) => Some(*v),
            AttributeValue::Text(_) => None,
        }
    }
}

/// `BA_ "<name>" [<objectType> <id> [<signal>]] <value>`
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    pub name: String,
    pub target: AttributeTarget,
    pub value: AttributeValue,
}

/// Records that define messages and signals
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralRecord {
    Message(MessageRecord),
    Signal(SignalRecord),
}

/// Records that decorate already-built messages and signals
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayRecord {
    Comment(CommentRecord),
    ValueType(ValueTypeRecord),
    Attribute(AttributeRecord),
}

/// One parsed line of a DBC file, in file order
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Structural(StructuralRecord),
    /// First line of the metadata section; no message or signal may follow
    EndOfStructure,
    Overlay(OverlayRecord),
}

/// Parse the fields of a `BO_` record
pub fn parse_message(tok: &mut Tokenizer<'_>) -> Result<MessageRecord> {
    let raw_id = tok.read_uint("message id")?;
    let name = tok.read_identifier("message name")?.to_string();
    tok.seek_separator(':')?;
    let length = tok.read_u8("message size")?;
    let transmitter = tok.read_identifier("transmitter")?.to_string();

    Ok(MessageRecord {
        raw_id,
        id: raw_id & ID_MASK,
        is_extended: raw_id & EXTENDED_ID_FLAG != 0,
        length,
        name,
        transmitter,
    })
}

/// Parse the fields of a `SG_` record
pub fn parse_signal(tok: &mut Tokenizer<'_>) -> Result<SignalRecord> {
    let name = tok.read_identifier("signal name")?.to_string();

    let mux_at = tok.checkpoint();
    let multiplexing = match tok.next_char("multiplexer indicator or ':'")? {
        ':' => Multiplexing::None,
        'M' => {
            tok.seek_separator(':')?;
            Multiplexing::Switch
        }
        'm' => {
            let value = tok.read_int("multiplexer value")?;
            tok.seek_separator(':')?;
            Multiplexing::Conditional(value)
        }
        _ => return Err(tok.error_at(mux_at, "':', 'M' or 'm<value>'")),
    };

    let start_bit = tok.read_u16("start bit")?;
    tok.seek_separator('|')?;
    let length = tok.read_u16("signal size")?;
    tok.seek_separator('@')?;

    let order_at = tok.checkpoint();
    let byte_order = match tok.next_char("byte order")? {
        '0' => ByteOrder::BigEndian,
        '1' => ByteOrder::LittleEndian,
        _ => return Err(tok.error_at(order_at, "byte order '0' or '1'")),
    };

    let sign_at = tok.checkpoint();
    let value_type = match tok.next_char("value type")? {
        '+' => ValueType::Unsigned,
        '-' => ValueType::Signed,
        _ => return Err(tok.error_at(sign_at, "value type '+' or '-'")),
    };

    tok.seek_separator('(')?;
    let factor = tok.read_double("factor")?;
    tok.seek_separator(',')?;
    let offset = tok.read_double("offset")?;
    tok.seek_separator(')')?;

    tok.seek_separator('[')?;
    let min = tok.read_double("minimum")?;
    tok.seek_separator('|')?;
    let max = tok.read_double("maximum")?;
    tok.seek_separator(']')?;

    let unit = match tok.peek_char() {
        Some('"') => Some(tok.read_quoted_string()?).filter(|u| !u.is_empty()),
        _ => None,
    };

    let mut receivers = Vec::new();
    while let Some(c) = tok.peek_char() {
        if c == ',' {
            tok.seek_separator(',')?;
            continue;
        }
        receivers.push(tok.read_identifier("receiver")?.to_string());
    }

    Ok(SignalRecord {
        name,
        multiplexing,
        start_bit,
        length,
        byte_order,
        value_type,
        factor,
        offset,
        min,
        max,
        unit,
        receivers,
    })
}

/// Parse the fields of a `SIG_VALTYPE_` record
pub fn parse_value_type(tok: &mut Tokenizer<'_>) -> Result<ValueTypeRecord> {
    let id = tok.read_uint("message id")?;
    let signal = tok.read_identifier("signal name")?.to_string();
    tok.seek_separator(':')?;
    let data_type = match tok.read_uint("value type code")? {
        1 => DataType::Float,
        _ => DataType::Double,
    };

    Ok(ValueTypeRecord {
        id,
        signal,
        data_type,
    })
}

/// Parse the fields of a `CM_ BO_` record
pub fn parse_message_comment(tok: &mut Tokenizer<'_>) -> Result<MessageCommentRecord> {
    let id = tok.read_uint("message id")?;
    let text = tok.read_quoted_string()?;
    Ok(MessageCommentRecord { id, text })
}

/// Parse the fields of a `CM_ SG_` record
pub fn parse_signal_comment(tok: &mut Tokenizer<'_>) -> Result<SignalCommentRecord> {
    let id = tok.read_uint("message id")?;
    let signal = tok.read_identifier("signal name")?.to_string();
    let text = tok.read_quoted_string()?;
    Ok(SignalCommentRecord { id, signal, text })
}

/// Parse any `CM_` record, dispatching on the object keyword
pub fn parse_comment(tok: &mut Tokenizer<'_>) -> Result<CommentRecord> {
    if tok.peek_char() == Some('"') {
        return Ok(CommentRecord::Network(tok.read_quoted_string()?));
    }

    let object_at = tok.checkpoint();
    match tok.read_identifier("comment object type")? {
        "BO_" => Ok(CommentRecord::Message(parse_message_comment(tok)?)),
        "SG_" => Ok(CommentRecord::Signal(parse_signal_comment(tok)?)),
        "BU_" => {
            let node = tok.read_identifier("node name")?.to_string();
            let text = tok.read_quoted_string()?;
            Ok(CommentRecord::Node { node, text })
        }
        "EV_" => {
            let name = tok.read_identifier("environment variable")?.to_string();
            let text = tok.read_quoted_string()?;
            Ok(CommentRecord::EnvVar { name, text })
        }
        _ => Err(tok.error_at(object_at, "BO_, SG_, BU_, EV_ or quoted string")),
    }
}

/// Parse the fields of a `BA_` record
pub fn parse_attribute(tok: &mut Tokenizer<'_>) -> Result<AttributeRecord> {
    let name = tok.read_quoted_string()?;

    let target = match tok.peek_char() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            let object_at = tok.checkpoint();
            match tok.read_identifier("object type")? {
                "BU_" => AttributeTarget::Node(tok.read_identifier("node name")?.to_string()),
                "BO_" => AttributeTarget::Message(tok.read_uint("message id")?),
                "SG_" => {
                    let id = tok.read_uint("message id")?;
                    let signal = tok.read_identifier("signal name")?.to_string();
                    AttributeTarget::Signal(id, signal)
                }
                "EV_" => {
                    AttributeTarget::EnvVar(tok.read_identifier("environment variable")?.to_string())
                }
                _ => return Err(tok.error_at(object_at, "object type BU_, BO_, SG_ or EV_")),
            }
        }
        _ => AttributeTarget::Network,
    };

    let value = match tok.peek_char() {
        Some('"') => AttributeValue::Text(tok.read_quoted_string()?),
        _ => AttributeValue::Number(tok.read_double("attribute value")?),
    };

    Ok(AttributeRecord {
        name,
        target,
        value,
    })
}
