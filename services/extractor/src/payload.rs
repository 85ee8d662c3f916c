//! Payload normalization and image decoding.
//!
//! A row's `data` field either already holds raw bytes or holds a textual
//! rendering of them, as produced by recorders that dump byte arrays into CSV
//! as literals (`b'\x89PNG\r\n...'` or `[137, 80, 78, ...]`). Both forms are
//! normalized to a byte sequence before being decoded as an image container.

use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// Errors raised while turning a raw field into bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty payload literal")]
    Empty,

    #[error("Unsupported payload literal: {0}")]
    Unsupported(String),

    #[error("Unterminated bytes literal")]
    Unterminated,

    #[error("Invalid escape sequence at offset {0}")]
    InvalidEscape(usize),

    #[error("Non-ASCII character {0:?} in bytes literal")]
    NonAscii(char),

    #[error("Unexpected content after literal: {0:?}")]
    TrailingContent(String),

    #[error("Byte value out of range: {0}")]
    ByteOutOfRange(String),
}

/// Errors raised while decoding bytes as an image.
#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("Unrecognized image container ({len} bytes)")]
    UnrecognizedFormat { len: usize },

    #[error("Corrupt {format:?} image: {source}")]
    Corrupt {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },
}

/// The raw `data` field of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    /// A textual literal describing a byte sequence
    TextualLiteral(String),
    /// Bytes that need no normalization
    RawBytes(Vec<u8>),
}

impl RawPayload {
    /// Normalize the payload into raw bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>, DecodeError> {
        match self {
            RawPayload::RawBytes(bytes) => Ok(bytes),
            RawPayload::TextualLiteral(text) => parse_literal(&text),
        }
    }
}

/// A decoded full-colour frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// 8-bit RGB pixel grid
    pub pixels: RgbImage,
    /// Container format detected from the payload
    pub source_format: ImageFormat,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Re-encode the pixel grid as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        self.pixels.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

/// Decode an image container, detecting its format from the leading bytes.
///
/// Alpha is dropped and deeper samples are narrowed to 8 bits; no resizing or
/// colour-space conversion takes place.
pub fn decode_image(bytes: &[u8]) -> Result<DecodedFrame, ImageDecodeError> {
    let format = image::guess_format(bytes)
        .map_err(|_| ImageDecodeError::UnrecognizedFormat { len: bytes.len() })?;

    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|source| ImageDecodeError::Corrupt { format, source })?;

    Ok(DecodedFrame {
        pixels: image.to_rgb8(),
        source_format: format,
    })
}

/// Parse a textual literal into bytes.
///
/// Accepts bytes literals (`b'..'`, `rb".."`, triple-quoted forms, adjacent
/// literals concatenated) or a list or tuple of integers in `0..=255`,
/// optionally wrapped in grouping parentheses.
pub fn parse_literal(text: &str) -> Result<Vec<u8>, DecodeError> {
    let text = text.trim();
    let first = text.chars().next().ok_or(DecodeError::Empty)?;

    match first {
        '[' => {
            let inner = text[1..].strip_suffix(']').ok_or(DecodeError::Unterminated)?;
            parse_int_items(inner, text)
        }
        '(' => parse_parenthesized(text),
        'b' | 'B' | 'r' | 'R' => parse_bytes_literals(text),
        _ => Err(DecodeError::Unsupported(preview(text))),
    }
}

/// `(...)` is a tuple only when it is empty or holds a comma; otherwise the
/// parentheses just group the expression inside.
fn parse_parenthesized(text: &str) -> Result<Vec<u8>, DecodeError> {
    let inner = text[1..].strip_suffix(')').ok_or(DecodeError::Unterminated)?;
    let grouped = inner.trim();

    if grouped.starts_with(['b', 'B', 'r', 'R', '[', '(']) {
        return parse_literal(grouped);
    }
    if !grouped.is_empty() && !grouped.contains(',') {
        // A single integer, not a sequence of them
        return Err(DecodeError::Unsupported(preview(text)));
    }

    parse_int_items(inner, text)
}

fn parse_int_items(inner: &str, text: &str) -> Result<Vec<u8>, DecodeError> {
    let mut bytes = Vec::new();
    let mut items = inner.split(',').map(str::trim).peekable();
    while let Some(item) = items.next() {
        if item.is_empty() {
            // `[]` and a single trailing comma (`[1, 2,]`, `(1,)`) are fine
            let last = items.peek().is_none();
            if last && (!bytes.is_empty() || inner.trim().is_empty()) {
                break;
            }
            return Err(DecodeError::Unsupported(preview(text)));
        }
        bytes.push(parse_int_item(item)?);
    }

    Ok(bytes)
}

/// One integer literal: decimal, `0x`/`0o`/`0b` prefixed, with `_` digit
/// separators and an optional sign, or `True`/`False`.
fn parse_int_item(item: &str) -> Result<u8, DecodeError> {
    let unsupported = || DecodeError::Unsupported(item.to_string());
    let out_of_range = || DecodeError::ByteOutOfRange(item.to_string());

    match item {
        "True" => return Ok(1),
        "False" => return Ok(0),
        _ => {}
    }

    let (negative, unsigned) = match item.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, item.strip_prefix('+').unwrap_or(item).trim_start()),
    };

    let radix = match unsigned.get(..2).map(str::to_ascii_lowercase).as_deref() {
        Some("0x") => 16,
        Some("0o") => 8,
        Some("0b") => 2,
        _ => 10,
    };
    let digits = if radix == 10 {
        unsigned
    } else {
        // `0x_ff` is allowed, the separator may follow the prefix
        let rest = &unsigned[2..];
        rest.strip_prefix('_').unwrap_or(rest)
    };

    let well_formed = !digits.is_empty()
        && !digits.starts_with('_')
        && !digits.ends_with('_')
        && !digits.contains("__")
        && digits.chars().all(|c| c == '_' || c.is_digit(radix));
    if !well_formed {
        return Err(unsupported());
    }
    // Decimal literals may not have leading zeros unless they are all zeros
    if radix == 10 && digits.starts_with('0') && digits.chars().any(|c| c != '0' && c != '_') {
        return Err(unsupported());
    }

    let value = u64::from_str_radix(&digits.replace('_', ""), radix).map_err(|_| out_of_range())?;
    if negative && value != 0 {
        return Err(out_of_range());
    }

    u8::try_from(value).map_err(|_| out_of_range())
}

/// One or more adjacent bytes literals, concatenated.
fn parse_bytes_literals(text: &str) -> Result<Vec<u8>, DecodeError> {
    let (mut out, mut rest) = parse_bytes_literal(text)?;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(out);
        }
        if !rest.starts_with(['b', 'B', 'r', 'R']) {
            return Err(DecodeError::TrailingContent(preview(rest)));
        }
        let (more, next) = parse_bytes_literal(rest)?;
        out.extend_from_slice(&more);
        rest = next;
    }
}

/// Parse a single bytes literal, returning its value and the text after it.
fn parse_bytes_literal(text: &str) -> Result<(Vec<u8>, &str), DecodeError> {
    let prefix_len = text
        .chars()
        .take_while(|c| matches!(c, 'b' | 'B' | 'r' | 'R'))
        .count();
    let prefix = text[..prefix_len].to_ascii_lowercase();
    let raw = match prefix.as_str() {
        "b" => false,
        "br" | "rb" => true,
        _ => return Err(DecodeError::Unsupported(preview(text))),
    };

    let rest = &text[prefix_len..];
    let quote = ["'''", "\"\"\"", "'", "\""]
        .into_iter()
        .find(|q| rest.starts_with(q))
        .ok_or_else(|| DecodeError::Unsupported(preview(text)))?;
    let body = &rest[quote.len()..];
    let triple = quote.len() == 3;

    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if body[pos..].starts_with(quote) {
            return Ok((out, &body[pos + quote.len()..]));
        }

        match c {
            '\n' if !triple => return Err(DecodeError::Unterminated),
            '\\' => {
                let (_, next) = chars.next().ok_or(DecodeError::Unterminated)?;
                if raw {
                    // Raw literals keep the backslash; it still shields the quote.
                    out.push(b'\\');
                    push_ascii(&mut out, next)?;
                    continue;
                }
                match next {
                    '\n' => {}
                    '\\' => out.push(b'\\'),
                    '\'' => out.push(b'\''),
                    '"' => out.push(b'"'),
                    'a' => out.push(0x07),
                    'b' => out.push(0x08),
                    'f' => out.push(0x0c),
                    'n' => out.push(b'\n'),
                    'r' => out.push(b'\r'),
                    't' => out.push(b'\t'),
                    'v' => out.push(0x0b),
                    'x' => {
                        let hi = chars.next().and_then(|(_, h)| h.to_digit(16));
                        let lo = chars.next().and_then(|(_, l)| l.to_digit(16));
                        match (hi, lo) {
                            (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
                            _ => return Err(DecodeError::InvalidEscape(pos)),
                        }
                    }
                    '0'..='7' => {
                        let mut value = next.to_digit(8).unwrap_or(0);
                        for _ in 0..2 {
                            match chars.peek().and_then(|(_, d)| d.to_digit(8)) {
                                Some(digit) => {
                                    value = value * 8 + digit;
                                    chars.next();
                                }
                                None => break,
                            }
                        }
                        // Octal escapes above \377 keep only their low byte
                        out.push((value & 0xff) as u8);
                    }
                    other => {
                        out.push(b'\\');
                        push_ascii(&mut out, other)?;
                    }
                }
            }
            other => push_ascii(&mut out, other)?,
        }
    }

    Err(DecodeError::Unterminated)
}

fn push_ascii(out: &mut Vec<u8>, c: char) -> Result<(), DecodeError> {
    if c.is_ascii() {
        out.push(c as u8);
        Ok(())
    } else {
        Err(DecodeError::NonAscii(c))
    }
}

fn preview(text: &str) -> String {
    text.chars().take(32).collect()
}
