//! Signal schema and the DBC parser
//!
//! This module contains the line tokenizer, the DBC record grammar, the
//! two-phase schema builder and the frozen signal schema.

pub mod builder;
pub mod database;
pub mod dbc;
pub mod grammar;
pub mod tokenizer;

// Re-export key types for convenience
pub use builder::{build_schema, build_structural, SchemaDraft};
pub use database::{
    ByteOrder, DataType, Message, Multiplexing, Schema, SchemaStats, Signal, ValueType,
};
pub use dbc::{parse_dbc_file, parse_dbc_str};
