//! Byte scanner for the descriptor notation.
//!
//! A thin reader with one-byte pushback over an in-memory descriptor. All
//! descriptor parsers (types, functions, section files) are built on the
//! helpers here.

use crate::error::{DfiError, Result};
use crate::map::StringMap;

/// Characters accepted in the value position of a `name=value` pair, on top
/// of the identifier characters.
const VALUE_EXTRA_CHARS: &[u8] = b".<>{}[]?;:~!@#$%^&*()_+-=,./\\'\"";

pub(crate) struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Scanner {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn next(&mut self) -> Option<u8> {
        let b = self.input.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Push the last consumed byte back.
    pub fn unread(&mut self) {
        if self.pos > 0 {
            self.pos -= 1;
        }
    }

    /// Consume one byte and require it to equal `expected`.
    pub fn eat(&mut self, expected: u8) -> Result<()> {
        match self.next() {
            Some(b) if b == expected => Ok(()),
            Some(b) => Err(DfiError::parse(format!(
                "expected token '{}' got '{}' at position {}",
                expected as char,
                b as char,
                self.pos
            ))),
            None => Err(DfiError::parse(format!(
                "expected token '{}' got end of input at position {}",
                expected as char, self.pos
            ))),
        }
    }

    /// Greedily read an identifier (`[A-Za-z0-9_]+`).
    pub fn parse_name(&mut self) -> Result<String> {
        self.parse_name_with(&[])
    }

    /// Like [`parse_name`](Self::parse_name), additionally accepting the
    /// bytes in `extra`.
    pub fn parse_name_with(&mut self, extra: &[u8]) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' || extra.contains(&b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(DfiError::parse(format!(
                "parsed empty name at position {}",
                self.pos
            )));
        }
        // The input is validated UTF-8 and the accepted bytes are ASCII.
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    /// Parse a `NAME '=' VALUE` pair, where the value accepts a wider
    /// character class than a name.
    pub fn parse_name_value(&mut self) -> Result<(String, String)> {
        let name = self.parse_name()?;
        self.eat(b'=')?;
        let value = self.parse_name_with(VALUE_EXTRA_CHARS)?;
        Ok((name, value))
    }

    /// Parse zero or more `NAME '=' VALUE '\n'` lines into `out`, stopping
    /// at end of input or at a line starting with `:` (which is left
    /// unconsumed).
    pub fn parse_name_value_section(&mut self, out: &mut StringMap<String>) -> Result<()> {
        loop {
            match self.peek() {
                None | Some(b':') => return Ok(()),
                Some(_) => {}
            }
            let (name, value) = self.parse_name_value()?;
            self.eat(b'\n')?;
            out.put(&name, value);
        }
    }
}
