//! # Encoding Module
//!
//! This module renders raw link bytes for display and encodes operator input
//! for sending.
//!
//! Rendering supports three views:
//! - [`DisplayMode::Text`]: UTF-8 text, passed through unchanged
//! - [`DisplayMode::Hex`]: one `0x%02x ` group per byte
//! - [`DisplayMode::ByteLiteral`]: one `b'A' ` literal per byte
//!
//! [`Utf8Stream`] is the stateful Text decoder used on the receive path; it
//! holds back an incomplete trailing sequence until the rest of the character
//! arrives.

use regex::Regex;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::DecodeError;

/// Marker rendered in place of malformed UTF-8 on the receive path.
pub const REPLACEMENT_MARKER: char = '\u{FFFD}';

static NON_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)0x|[^0-9a-f]").expect("Invalid regex pattern"));

/// How received and echoed bytes are shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayMode {
    #[default]
    Text,
    Hex,
    ByteLiteral,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Text => write!(f, "text"),
            DisplayMode::Hex => write!(f, "hex"),
            DisplayMode::ByteLiteral => write!(f, "bytes"),
        }
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" | "utf8" => Ok(DisplayMode::Text),
            "hex" => Ok(DisplayMode::Hex),
            "bytes" | "byte" | "literal" => Ok(DisplayMode::ByteLiteral),
            other => Err(format!("unknown display mode '{other}'")),
        }
    }
}

/// How operator input is turned into bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputEncoding {
    #[default]
    Text,
    Hex,
}

/// Renders `bytes` in `mode`.
///
/// Text mode fails on malformed UTF-8; the other modes never fail.
///
/// # Examples
///
/// ```
/// use serial_mon::serial::encoding::{render, DisplayMode};
///
/// assert_eq!(render(&[0x41, 0x0a], DisplayMode::Hex).unwrap(), "0x41 0x0a ");
/// assert_eq!(render(b"hello", DisplayMode::Text).unwrap(), "hello");
/// assert_eq!(render(b"A", DisplayMode::ByteLiteral).unwrap(), "b'A' ");
/// ```
pub fn render(bytes: &[u8], mode: DisplayMode) -> Result<String, DecodeError> {
    match mode {
        DisplayMode::Text => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| DecodeError {
                offset: e.valid_up_to(),
            }),
        DisplayMode::Hex => Ok(render_hex(bytes)),
        DisplayMode::ByteLiteral => Ok(render_byte_literals(bytes)),
    }
}

/// Like [`render`], but malformed UTF-8 becomes [`REPLACEMENT_MARKER`].
#[must_use]
pub fn render_lossy(bytes: &[u8], mode: DisplayMode) -> String {
    match render(bytes, mode) {
        Ok(text) => text,
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Renders a display block: `prefix`, the rendered bytes, then an optional
/// trailing newline.
#[must_use]
pub fn render_block(bytes: &[u8], mode: DisplayMode, prefix: &str, newline: bool) -> String {
    let mut block = String::from(prefix);
    block.push_str(&render_lossy(bytes, mode));
    if newline {
        block.push('\n');
    }
    block
}

fn render_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 5);
    for b in bytes {
        let _ = write!(out, "0x{b:02x} ");
    }
    out
}

fn render_byte_literals(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 5);
    for &b in bytes {
        push_byte_literal(&mut out, b);
        out.push(' ');
    }
    out
}

fn push_byte_literal(out: &mut String, b: u8) {
    match b {
        b'\'' => out.push_str("b\"'\""),
        b'\\' => out.push_str("b'\\\\'"),
        b'\t' => out.push_str("b'\\t'"),
        b'\n' => out.push_str("b'\\n'"),
        b'\r' => out.push_str("b'\\r'"),
        0x20..=0x7e => {
            out.push_str("b'");
            out.push(b as char);
            out.push('\'');
        }
        _ => {
            let _ = write!(out, "b'\\x{b:02x}'");
        }
    }
}

/// Encodes operator input for the link.
///
/// Hex input drops `0x` prefixes and every non-hex character, then pads an odd
/// digit count with a leading zero, so `"4 8 6"` and `"0x486"` both become
/// `[0x04, 0x86]`.
pub fn encode_input(input: &str, encoding: InputEncoding) -> Result<Vec<u8>, String> {
    match encoding {
        InputEncoding::Text => Ok(input.as_bytes().to_vec()),
        InputEncoding::Hex => {
            let digits = NON_HEX.replace_all(input, "");
            if digits.is_empty() && !input.trim().is_empty() {
                return Err(format!("'{input}' contains no hex digits"));
            }
            let digits = if digits.len() % 2 == 1 {
                format!("0{digits}")
            } else {
                digits.into_owned()
            };
            hex::decode(&digits).map_err(|e| format!("Hex encoding error: {e}"))
        }
    }
}

/// Streaming UTF-8 decoder for the receive path.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes` after any bytes held back from the previous call.
    ///
    /// An incomplete sequence at the end is kept for the next call; malformed
    /// sequences in the middle are replaced with [`REPLACEMENT_MARKER`].
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        out.push_str(text);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT_MARKER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
