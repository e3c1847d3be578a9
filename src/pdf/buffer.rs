//! Growable byte buffer with typed PDF append helpers
//!
//! The writer and the content-stream emitter both produce ASCII-with-binary
//! output; a single buffer type with typed appends keeps the numeric
//! formatting rules in one place: floats always carry exactly two decimals,
//! integers are written bare, literal strings escape `(`, `)` and `\`.

use std::fmt::Write as _;

#[derive(Debug, Default, Clone)]
pub struct PdfBuffer {
    bytes: Vec<u8>,
}

impl PdfBuffer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn push_str(&mut self, s: &str) {
        self.bytes.extend_from_slice(s.as_bytes());
    }

    /// Bare integer, no decimals
    pub fn push_int(&mut self, value: i64) {
        let mut s = String::new();
        let _ = write!(s, "{value}");
        self.push_str(&s);
    }

    /// Float with exactly two decimals
    pub fn push_f2(&mut self, value: f32) {
        let mut s = String::new();
        let _ = write!(s, "{value:.2}");
        self.push_str(&s);
    }

    /// `/Name`; assumes the name contains no delimiter characters
    pub fn push_name(&mut self, name: &str) {
        self.bytes.push(b'/');
        self.push_str(name);
    }

    /// `( ... )` literal string with backslash escapes
    pub fn push_literal_string(&mut self, text: &str) {
        self.bytes.push(b'(');
        for byte in text.bytes() {
            match byte {
                b'(' | b')' | b'\\' => {
                    self.bytes.push(b'\\');
                    self.bytes.push(byte);
                }
                _ => self.bytes.push(byte),
            }
        }
        self.bytes.push(b')');
    }

    /// `<ABCD...>` hex string from 16-bit codes, big-endian
    pub fn push_hex_string(&mut self, codes: &[u16]) {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        self.bytes.push(b'<');
        for &code in codes {
            for nibble in [code >> 12, code >> 8, code >> 4, code] {
                self.bytes.push(HEX[(nibble & 0xF) as usize]);
            }
        }
        self.bytes.push(b'>');
    }

    /// `N 0 R` indirect reference
    pub fn push_ref(&mut self, id: u32) {
        self.push_int(id as i64);
        self.push_str(" 0 R");
    }
}

/// Escape a string for a PDF literal without the surrounding parentheses
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Format a float with exactly two decimals
pub fn f2(value: f32) -> String {
    format!("{value:.2}")
}
