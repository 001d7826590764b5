//! Position-aware primitive reads over one line of DBC text
//!
//! Every read skips leading whitespace first. A read that does not find what it
//! expects fails immediately with a syntax error carrying the 1-based line and
//! column of the offending token.

use crate::types::{DbcError, Result};

/// Cursor over a single DBC line
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    line: &'a str,
    line_number: usize,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a tokenizer positioned at the start of `line`
    pub fn new(line: &'a str, line_number: usize) -> Self {
        Self {
            line,
            line_number,
            pos: 0,
        }
    }

    /// Current (line, column), both 1-based
    pub fn position(&self) -> (usize, usize) {
        (self.line_number, self.column_at(self.pos))
    }

    /// Unconsumed remainder of the line
    pub fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    /// True if only whitespace is left
    pub fn is_at_end(&mut self) -> bool {
        self.peek_char().is_none()
    }

    /// Skip whitespace and return the offset of the next token.
    ///
    /// Pass the result to [`Tokenizer::error_at`] to report a token that has
    /// already been consumed.
    pub fn checkpoint(&mut self) -> usize {
        self.skip_whitespace();
        self.pos
    }

    /// Syntax error for the token starting at the current position
    pub fn error(&self, expected: &str) -> DbcError {
        self.error_at(self.pos, expected)
    }

    /// Syntax error for the token starting at `checkpoint`
    pub fn error_at(&self, checkpoint: usize, expected: &str) -> DbcError {
        DbcError::Syntax {
            line: self.line_number,
            column: self.column_at(checkpoint),
            expected: expected.to_string(),
            found: self.token_at(checkpoint),
        }
    }

    /// Look at the next non-whitespace character without consuming it
    pub fn peek_char(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    /// Consume the next non-whitespace character
    pub fn next_char(&mut self, what: &str) -> Result<char> {
        match self.peek_char() {
            Some(c) => {
                self.pos += c.len_utf8();
                Ok(c)
            }
            None => Err(self.error(what)),
        }
    }

    /// Consume the separator `separator`, failing on anything else
    pub fn seek_separator(&mut self, separator: char) -> Result<()> {
        match self.peek_char() {
            Some(c) if c == separator => {
                self.pos += c.len_utf8();
                Ok(())
            }
            _ => Err(self.error(&format!("'{}'", separator))),
        }
    }

    /// Read a C identifier (`[A-Za-z_][A-Za-z0-9_]*`)
    pub fn read_identifier(&mut self, what: &str) -> Result<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.line.as_bytes();

        match bytes.get(start) {
            Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
            _ => return Err(self.error(what)),
        }

        let mut end = start + 1;
        while bytes
            .get(end)
            .map_or(false, |b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            end += 1;
        }

        self.pos = end;
        Ok(&self.line[start..end])
    }

    /// Read an unsigned decimal integer
    pub fn read_uint(&mut self, what: &str) -> Result<u32> {
        self.skip_whitespace();
        let start = self.pos;
        let end = self.digits_end(start);
        if end == start {
            return Err(self.error(what));
        }

        let value = self.line[start..end]
            .parse::<u32>()
            .map_err(|_| self.error_at(start, &format!("{} (out of range)", what)))?;
        self.pos = end;
        Ok(value)
    }

    /// Read an unsigned integer that must fit into a `u16`
    pub fn read_u16(&mut self, what: &str) -> Result<u16> {
        let start = self.checkpoint();
        let value = self.read_uint(what)?;
        u16::try_from(value).map_err(|_| self.error_at(start, &format!("{} (out of range)", what)))
    }

    /// Read an unsigned integer that must fit into a `u8`
    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        let start = self.checkpoint();
        let value = self.read_uint(what)?;
        u8::try_from(value).map_err(|_| self.error_at(start, &format!("{} (out of range)", what)))
    }

    /// Read a signed decimal integer
    pub fn read_int(&mut self, what: &str) -> Result<i64> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.line.as_bytes();

        let mut digits_start = start;
        if matches!(bytes.get(start), Some(b'+') | Some(b'-')) {
            digits_start += 1;
        }
        let end = self.digits_end(digits_start);
        if end == digits_start {
            return Err(self.error(what));
        }

        let value = self.line[start..end]
            .parse::<i64>()
            .map_err(|_| self.error_at(start, &format!("{} (out of range)", what)))?;
        self.pos = end;
        Ok(value)
    }

    /// Read a floating-point literal (`-1.5`, `3`, `.25`, `1e-3`)
    pub fn read_double(&mut self, what: &str) -> Result<f64> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.line.as_bytes();

        let mut end = start;
        if matches!(bytes.get(end), Some(b'+') | Some(b'-')) {
            end += 1;
        }

        let integer_end = self.digits_end(end);
        let mut mantissa_digits = integer_end - end;
        end = integer_end;

        if bytes.get(end) == Some(&b'.') {
            let fraction_end = self.digits_end(end + 1);
            mantissa_digits += fraction_end - (end + 1);
            end = fraction_end;
        }

        if mantissa_digits == 0 {
            return Err(self.error(what));
        }

        if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
            let mut exponent = end + 1;
            if matches!(bytes.get(exponent), Some(b'+') | Some(b'-')) {
                exponent += 1;
            }
            let exponent_end = self.digits_end(exponent);
            if exponent_end > exponent {
                end = exponent_end;
            }
        }

        let value = self.line[start..end]
            .parse::<f64>()
            .map_err(|_| self.error_at(start, what))?;
        self.pos = end;
        Ok(value)
    }

    /// Read a double-quoted string, resolving `\"` and `\\` escapes
    pub fn read_quoted_string(&mut self) -> Result<String> {
        self.skip_whitespace();
        let start = self.pos;

        if !self.rest().starts_with('"') {
            return Err(self.error("quoted string"));
        }

        let mut text = String::new();
        let mut chars = self.line[start + 1..].char_indices();

        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos = start + 1 + offset + 1;
                    return Ok(text);
                }
                '\\' => match chars.next() {
                    Some((_, escaped @ ('"' | '\\'))) => text.push(escaped),
                    Some((_, other)) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => text.push('\\'),
                },
                other => text.push(other),
            }
        }

        self.pos = self.line.len();
        Err(self.error("closing '\"'"))
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.line.len() - trimmed.len();
    }

    fn digits_end(&self, from: usize) -> usize {
        let bytes = self.line.as_bytes();
        let mut end = from;
        while bytes.get(end).map_or(false, u8::is_ascii_digit) {
            end += 1;
        }
        end
    }

    fn column_at(&self, offset: usize) -> usize {
        self.line[..offset].chars().count() + 1
    }

    fn token_at(&self, offset: usize) -> String {
        let token: String = self.line[offset..]
            .chars()
            .take_while(|c| !c.is_whitespace())
            .take(24)
            .collect();

        if token.is_empty() {
            "end of line".to_string()
        } else {
            format!("'{}'", token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let mut tok = Tokenizer::new("  100 EngineData: 8 ECU", 3);
        assert_eq!(tok.read_uint("id").unwrap(), 100);
        assert_eq!(tok.read_identifier("name").unwrap(), "EngineData");
        tok.seek_separator(':').unwrap();
        assert_eq!(tok.read_u8("size").unwrap(), 8);
        assert_eq!(tok.read_identifier("transmitter").unwrap(), "ECU");
        assert!(tok.is_at_end());
    }

    #[test]
    fn test_read_numbers() {
        let mut tok = Tokenizer::new("(0.25,-40) [-1e3|.5] -7 +3", 1);
        tok.seek_separator('(').unwrap();
        assert_eq!(tok.read_double("factor").unwrap(), 0.25);
        tok.seek_separator(',').unwrap();
        assert_eq!(tok.read_double("offset").unwrap(), -40.0);
        tok.seek_separator(')').unwrap();
        tok.seek_separator('[').unwrap();
        assert_eq!(tok.read_double("min").unwrap(), -1000.0);
        tok.seek_separator('|').unwrap();
        assert_eq!(tok.read_double("max").unwrap(), 0.5);
        tok.seek_separator(']').unwrap();
        assert_eq!(tok.read_int("int").unwrap(), -7);
        assert_eq!(tok.read_int("int").unwrap(), 3);
    }

    #[test]
    fn test_quoted_string_escapes() {
        let mut tok = Tokenizer::new(r#" "say \"hi\" \\ now" rest"#, 1);
        assert_eq!(tok.read_quoted_string().unwrap(), r#"say "hi" \ now"#);
        assert_eq!(tok.rest(), " rest");
    }

    #[test]
    fn test_unterminated_string() {
        let mut tok = Tokenizer::new(r#""never closed"#, 9);
        let err = tok.read_quoted_string().unwrap_err();
        assert!(matches!(err, DbcError::Syntax { line: 9, .. }));
    }

    #[test]
    fn test_error_position() {
        let mut tok = Tokenizer::new("BO_ abc", 12);
        tok.read_identifier("keyword").unwrap();
        match tok.read_uint("message id").unwrap_err() {
            DbcError::Syntax {
                line,
                column,
                expected,
                found,
            } => {
                assert_eq!(line, 12);
                assert_eq!(column, 5);
                assert_eq!(expected, "message id");
                assert_eq!(found, "'abc'");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_separator_mismatch_at_end() {
        let mut tok = Tokenizer::new("12", 1);
        tok.read_uint("start bit").unwrap();
        let err = tok.seek_separator('|').unwrap_err();
        assert!(err.to_string().contains("end of line"));
    }

    #[test]
    fn test_out_of_range() {
        let mut tok = Tokenizer::new("300", 1);
        assert!(tok.read_u8("size").is_err());
        let mut tok = Tokenizer::new("99999999999", 1);
        assert!(tok.read_uint("id").is_err());
    }
}
