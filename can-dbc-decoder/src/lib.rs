//! CAN DBC Decoder Library
//!
//! A library for reading Vector DBC signal databases and converting CAN frame
//! payloads to and from physical signal values.
//!
//! # Architecture
//!
//! - A line tokenizer and record grammar turn DBC text into typed records
//! - A two-phase builder folds the records into a frozen [`Schema`]
//! - [`SignalCodec`] extracts and inserts individual signals (Intel and
//!   Motorola bit numbering, signed and IEEE float fields, scaling)
//! - [`MultiplexResolver`] decides which signals a multiplexed frame carries
//! - [`FrameDecoder`] streams frames through a shared schema
//!
//! A schema is immutable once loaded and can be shared by reference across
//! threads. Loading is fail-fast: the first syntax or schema error aborts it.
//!
//! # Example Usage
//!
//! ```
//! use can_dbc_decoder::{Frame, Schema};
//! use std::collections::HashMap;
//!
//! let schema: Schema = r#"
//! BO_ 100 EngineData: 8 ECU
//!  SG_ RPM : 0|16@1+ (0.25,0) [0|16000] "rpm" Dash
//! "#
//! .parse()
//! .unwrap();
//!
//! // Decode a received frame
//! let frame = Frame::new(100, &[0x40, 0x1F, 0, 0, 0, 0, 0, 0]).unwrap();
//! let decoded = schema.decode(&frame).unwrap();
//! assert_eq!(decoded.value("RPM"), Some(2000.0));
//!
//! // Build a frame from physical values
//! let values = HashMap::from([("RPM".to_string(), 3000.0)]);
//! let frame = schema.encode_frame(100, &values).unwrap();
//! assert_eq!(&frame.data()[..2], &[0xE0, 0x2E]);
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod decoder;
pub mod multiplex;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use codec::SignalCodec;
pub use config::DecoderConfig;
pub use decoder::{DecodingIterator, FrameDecoder};
pub use multiplex::MultiplexResolver;
pub use signals::{
    ByteOrder, DataType, Message, Multiplexing, Schema, SchemaStats, Signal, ValueType,
};
pub use types::{
    dlc_to_size, size_to_dlc, DbcError, DecodedEvent, DecodedMessage, Frame, Result,
    SchemaViolation, SignalValue,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
