//! Incremental RESP Decoder
//!
//! The parser works over whatever bytes the connection has buffered so far
//! and returns either:
//! - `Ok(Some((value, consumed)))` - one complete value occupying exactly `consumed` bytes
//! - `Ok(None)` - the value is not complete yet, read more and try again
//! - `Err(ParseError)` - the bytes can never form a valid value
//!
//! The caller appends network data to a buffer, calls `parse()`, and on
//! success advances the buffer by `consumed`. Nothing past the first value
//! is touched, so pipelined requests stay in the buffer for the next call.
//!
//! Parsing runs in two passes. [`RespParser::check`] frames the value by
//! walking headers and skipping bulk payloads by length, and only a fully
//! buffered value is then decoded into a [`RespValue`]. A request that
//! arrives in many small reads therefore never has its payloads copied more
//! than once.
//!
//! Arrays and maps are decoded recursively. Nesting depth, bulk payload size
//! and aggregate element counts are all bounded so a hostile peer cannot make
//! the server recurse or allocate without limit.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use std::ops::Range;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("bad request (unknown type tag {0:#04x})")]
    UnknownPrefix(u8),

    /// Invalid integer format in an integer value or a length header
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array element count is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Map pair count is negative
    #[error("invalid map length: {0}")]
    InvalidMapLength(i64),

    /// Structural violation, such as nesting too deep
    #[error("{0}")]
    ProtocolError(String),

    /// A declared size exceeds the configured maximum
    #[error("message too large: {size} (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements an array or map may declare
pub const MAX_AGGREGATE_LEN: usize = 1024 * 1024;

/// Maximum array/map nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Upper bound on up-front allocation for a declared element count.
const PREALLOC_LIMIT: usize = 1024;

/// A recursive, incremental RESP parser.
///
/// # Example
///
/// ```
/// use pebblekv::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// let buffer = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (value, consumed) = parser.parse(buffer).unwrap().unwrap();
/// assert_eq!(consumed, buffer.len());
/// assert_eq!(value.as_array().map(|a| a.len()), Some(2));
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for array and map parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one RESP value from the start of `buf`.
    ///
    /// Values are only built once [`check`](Self::check) has framed a
    /// complete value, so an incomplete request costs a header walk and
    /// never a payload copy.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(len) = self.check(buf)? else {
            return Ok(None);
        };

        self.depth = 0;
        self.parse_value(&buf[..len])
    }

    /// Frames one value at the start of `buf` without allocating.
    ///
    /// Returns the number of bytes the value occupies once it is fully
    /// buffered. Bulk payloads are skipped by their declared length. Every
    /// error `parse` can report is reported here first.
    pub fn check(&mut self, buf: &[u8]) -> ParseResult<Option<usize>> {
        self.depth = 0;
        self.check_value(buf)
    }

    fn check_value(&mut self, buf: &[u8]) -> ParseResult<Option<usize>> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        match tag {
            prefix::SIMPLE_STRING | prefix::ERROR => {
                Ok(text_line(buf)?.map(|(_, consumed)| consumed))
            }
            prefix::INTEGER => match read_line(buf) {
                Some((line, consumed)) => parse_number(line).map(|_| Some(consumed)),
                None => Ok(None),
            },
            prefix::BULK_STRING => Ok(bulk_frame(buf)?.map(|(_, consumed)| consumed)),
            prefix::ARRAY | prefix::MAP => {
                let Some((count, header)) = aggregate_header(buf)? else {
                    return Ok(None);
                };

                self.enter()?;
                let mut consumed = header;
                for _ in 0..count {
                    match self.check_value(&buf[consumed..])? {
                        Some(used) => consumed += used,
                        None => return Ok(None),
                    }
                }
                self.depth -= 1;

                Ok(Some(consumed))
            }
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Dispatches on the type tag.
    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        match tag {
            prefix::SIMPLE_STRING => Ok(text_line(buf)?
                .map(|(s, n)| (RespValue::SimpleString(s.to_string()), n))),
            prefix::ERROR => {
                Ok(text_line(buf)?.map(|(s, n)| (RespValue::Error(s.to_string()), n)))
            }
            prefix::INTEGER => parse_integer(buf),
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            prefix::MAP => self.parse_map(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((count, header)) = aggregate_header(buf)? else {
            return Ok(None);
        };

        self.enter()?;
        let Some((elements, consumed)) = self.parse_sequence(buf, header, count)? else {
            return Ok(None);
        };
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }

    /// Parses a map: `%<pairs>\r\n<key1><value1>...`
    fn parse_map(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((count, header)) = aggregate_header(buf)? else {
            return Ok(None);
        };

        self.enter()?;
        let Some((elements, consumed)) = self.parse_sequence(buf, header, count)? else {
            return Ok(None);
        };
        self.depth -= 1;

        let mut items = Vec::with_capacity(elements.len() / 2);
        let mut iter = elements.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            items.push((key, value));
        }

        Ok(Some((RespValue::Map(items), consumed)))
    }

    /// Decodes `count` consecutive values starting at `offset`.
    fn parse_sequence(
        &mut self,
        buf: &[u8],
        offset: usize,
        count: usize,
    ) -> ParseResult<Option<(Vec<RespValue>, usize)>> {
        let mut elements = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        let mut consumed = offset;

        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((elements, consumed)))
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }
        Ok(())
    }
}

/// Reads the UTF-8 line of `+<text>\r\n` or `-<text>\r\n`.
fn text_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    let Some((line, consumed)) = read_line(buf) else {
        return Ok(None);
    };

    let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    Ok(Some((s, consumed)))
}

/// Parses an integer: `:<integer>\r\n`
fn parse_integer(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some((line, consumed)) = read_line(buf) else {
        return Ok(None);
    };

    Ok(Some((RespValue::Integer(parse_number(line)?), consumed)))
}

/// Reads the header of `*<count>\r\n` or `%<pairs>\r\n`.
///
/// Returns the number of child values (twice the pair count for a map) and
/// the header length.
fn aggregate_header(buf: &[u8]) -> ParseResult<Option<(usize, usize)>> {
    let Some((line, header)) = read_line(buf) else {
        return Ok(None);
    };

    let declared = parse_number(line)?;
    let count = if buf[0] == prefix::MAP {
        if declared < 0 {
            return Err(ParseError::InvalidMapLength(declared));
        }
        check_aggregate_len((declared as u64).saturating_mul(2))?
    } else {
        if declared < 0 {
            return Err(ParseError::InvalidArrayLength(declared));
        }
        check_aggregate_len(declared as u64)?
    };

    Ok(Some((count, header)))
}

/// Frames a bulk string: `$<length>\r\n<data>\r\n`
///
/// Returns the payload range (`None` for the null bulk string) and the total
/// length. The two bytes after the payload are consumed without being checked.
fn bulk_frame(buf: &[u8]) -> ParseResult<Option<(Option<Range<usize>>, usize)>> {
    let Some((line, header)) = read_line(buf) else {
        return Ok(None);
    };

    let length = parse_number(line)?;

    // Null bulk string
    if length == -1 {
        return Ok(Some((None, header)));
    }

    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = usize::try_from(length).unwrap_or(usize::MAX);
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total_needed = header + length + CRLF.len();
    if buf.len() < total_needed {
        return Ok(None);
    }

    Ok(Some((Some(header..header + length), total_needed)))
}

fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    Ok(bulk_frame(buf)?.map(|(payload, consumed)| {
        let value = match payload {
            Some(range) => RespValue::BulkString(Bytes::copy_from_slice(&buf[range])),
            None => RespValue::Null,
        };
        (value, consumed)
    }))
}

/// Returns the header line after the tag byte, and the number of bytes
/// up to and including its CRLF.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let pos = find_crlf(&buf[1..])?;
    Some((&buf[1..1 + pos], 1 + pos + CRLF.len()))
}

fn parse_number(line: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(line)
        .map_err(|_| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))?;

    s.parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(format!("{:?} ({})", s, e)))
}

fn check_aggregate_len(count: u64) -> ParseResult<usize> {
    match usize::try_from(count) {
        Ok(n) if n <= MAX_AGGREGATE_LEN => Ok(n),
        _ => Err(ParseError::MessageTooLarge {
            size: usize::try_from(count).unwrap_or(usize::MAX),
            max: MAX_AGGREGATE_LEN,
        }),
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Helper function to parse a single RESP message from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
