//! DBC file loader
//!
//! Reads Vector DBC text line by line, dispatches each line on its leading
//! keyword to the grammar parser and hands the resulting records to the schema
//! builder. The first syntax or schema fault aborts the load.

use crate::signals::builder::build_schema;
use crate::signals::database::Schema;
use crate::signals::grammar::{
    parse_attribute, parse_comment, parse_message, parse_signal, parse_value_type,
    OverlayRecord, Record, StructuralRecord,
};
use crate::signals::tokenizer::Tokenizer;
use crate::types::Result;
use std::path::Path;

/// Parse a DBC file into a frozen schema
pub fn parse_dbc_file(path: &Path) -> Result<Schema> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path)?;

    // Try UTF-8 first, then fall back to Latin-1 (every byte is its own code point)
    let dbc_content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("DBC file {:?} is not UTF-8, decoding as Latin-1", path);
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let schema = parse_dbc_str(&dbc_content)?;

    log::info!(
        "Parsed {} messages from {:?}",
        schema.stats().num_messages,
        path
    );

    Ok(schema)
}

/// Parse DBC text into a frozen schema
pub fn parse_dbc_str(text: &str) -> Result<Schema> {
    build_schema(read_records(text)?)
}

/// Parse DBC text into records, in file order.
///
/// Lines with keywords that carry nothing for the schema are skipped. The
/// first `CM_`, `BA_`, `BA_DEF_`, `BA_DEF_DEF_`, `VAL_` or `SIG_VALTYPE_` line
/// ends the structural section.
pub fn read_records(text: &str) -> Result<Vec<Record>> {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let mut records = Vec::new();
    let mut lines = text.lines().enumerate();
    let mut in_symbol_block = false;

    while let Some((index, line)) = lines.next() {
        let line_number = index + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }

        // The NS_ block lists keyword names on indented lines
        if in_symbol_block {
            if line.starts_with(char::is_whitespace) {
                continue;
            }
            in_symbol_block = false;
        }

        let mut statement = line.to_string();
        if keyword_of(&statement) == Some("CM_") {
            // Comment text may span several lines
            while has_open_quote(&statement) {
                match lines.next() {
                    Some((_, next)) => {
                        statement.push('\n');
                        statement.push_str(next);
                    }
                    None => break,
                }
            }
        }
        let statement = strip_terminator(&statement);

        let mut tok = Tokenizer::new(statement, line_number);
        if !tok
            .peek_char()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        {
            log::trace!("Skipping line {}: no keyword", line_number);
            continue;
        }

        let keyword = tok.read_identifier("keyword")?;
        let record = match keyword {
            "BO_" => Record::Structural(StructuralRecord::Message(parse_message(&mut tok)?)),
            "SG_" => Record::Structural(StructuralRecord::Signal(parse_signal(&mut tok)?)),
            "CM_" => Record::Overlay(OverlayRecord::Comment(parse_comment(&mut tok)?)),
            "BA_" => Record::Overlay(OverlayRecord::Attribute(parse_attribute(&mut tok)?)),
            "SIG_VALTYPE_" => {
                Record::Overlay(OverlayRecord::ValueType(parse_value_type(&mut tok)?))
            }
            "BA_DEF_" | "BA_DEF_DEF_" | "VAL_" => Record::EndOfStructure,
            "NS_" => {
                in_symbol_block = true;
                continue;
            }
            other => {
                log::trace!("Skipping {} on line {}", other, line_number);
                continue;
            }
        };

        records.push(record);
    }

    log::debug!("Read {} DBC records", records.len());
    Ok(records)
}

fn keyword_of(statement: &str) -> Option<&str> {
    statement.split_whitespace().next()
}

/// Drop trailing whitespace and the `;` statement terminator
fn strip_terminator(line: &str) -> &str {
    let line = line.trim_end();
    line.strip_suffix(';').unwrap_or(line).trim_end()
}

/// True if `text` contains an unterminated quoted string
fn has_open_quote(text: &str) -> bool {
    let mut open = false;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if open => {
                chars.next();
            }
            '"' => open = !open,
            _ => {}
        }
    }
    open
}
