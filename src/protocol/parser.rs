//! RESP Protocol Parser
//!
//! This module decodes RESP messages from a byte buffer.
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - Successfully parsed a value, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the message is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call `parse()` to attempt parsing
//! 3. If successful, advance the buffer by `consumed` bytes
//! 4. If incomplete, wait for more data
//! 5. If error, disconnect the client
//!
//! When the buffer already holds the whole stream, [`decode`] turns an
//! incomplete message into [`ParseError::Truncated`].
//!
//! Arrays are assembled on an explicit stack rather than by recursion.
//! Decoded values are still dropped, encoded and compared recursively, so
//! arrays may nest at most [`MAX_NESTING_DEPTH`] levels deep; deeper input is
//! rejected with [`ParseError::NestingTooDeep`].
//!
//! A [`RespParser`] that returns `Ok(None)` remembers how far it got. The
//! next call must be given the same buffer with more bytes appended, and
//! parsing resumes at the first incomplete element instead of at byte 0.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
///
/// Every variant is fatal to the message being decoded; the connection
/// has no way to resynchronise framing afterwards.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Leading byte is not one of `+ - : $ *`
    #[error("invalid type tag: {0:#04x}")]
    InvalidTypeTag(u8),

    /// Input ended before a terminator or declared length was satisfied
    #[error("truncated message")]
    Truncated,

    /// An integer or length field is not valid base-10
    #[error("malformed integer: {0}")]
    MalformedInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk string payload not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Arrays nested deeper than [`MAX_NESTING_DEPTH`]
    #[error("maximum nesting depth exceeded (max: {max})")]
    NestingTooDeep { max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 128;

/// Upper bound on elements preallocated for an array from its declared count.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// One decoded unit: either a finished value or the header of an array
/// whose elements follow.
enum Item {
    Value(RespValue),
    ArrayHeader(usize),
}

/// An array whose header has been read but whose elements are still arriving.
#[derive(Debug)]
struct PendingArray {
    expected: usize,
    elements: Vec<RespValue>,
}

/// A RESP protocol parser.
///
/// When a message is incomplete the parser keeps the arrays it has already
/// assembled and the offset of the first unparsed element, so a message that
/// arrives over many reads is scanned once rather than once per read. The
/// state is dropped after a complete message, after an error, or on
/// [`RespParser::reset`].
///
/// # Example
///
/// ```
/// use resplite::protocol::parser::RespParser;
/// use resplite::protocol::RespValue;
///
/// let mut parser = RespParser::new();
/// let buffer = b"*1\r\n$4\r\nPING\r\n";
///
/// let (value, consumed) = parser.parse(buffer).unwrap().unwrap();
/// assert_eq!(consumed, buffer.len());
/// assert_eq!(value, RespValue::array(vec![RespValue::bulk_string("PING")]));
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    stack: Vec<PendingArray>,
    /// Offset of the first byte not yet folded into `stack`
    resume_at: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            resume_at: 0,
        }
    }

    /// Discards any partially parsed message.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.resume_at = 0;
    }

    /// Attempts to parse one RESP value from the start of the buffer.
    ///
    /// After `Ok(None)` the next call continues the same message, so `buf`
    /// must start with the bytes passed before. Call [`RespParser::reset`]
    /// to parse an unrelated buffer instead.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((value, consumed)))` - Successfully parsed a value
    /// - `Ok(None)` - Incomplete data, need more bytes
    /// - `Err(e)` - Parse error
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        // A shorter buffer can not be a continuation of the previous one.
        if self.resume_at > buf.len() {
            self.reset();
        }

        let result = self.resume(buf);
        if !matches!(result, Ok(None)) {
            self.reset();
        }
        result
    }

    fn resume(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        loop {
            let (item, item_len) = match parse_item(&buf[self.resume_at..])? {
                Some(parsed) => parsed,
                None => return Ok(None),
            };
            self.resume_at += item_len;

            let value = match item {
                Item::ArrayHeader(_) if self.stack.len() >= MAX_NESTING_DEPTH => {
                    return Err(ParseError::NestingTooDeep {
                        max: MAX_NESTING_DEPTH,
                    });
                }
                Item::ArrayHeader(0) => RespValue::Array(Some(Vec::new())),
                Item::ArrayHeader(count) => {
                    self.stack.push(PendingArray {
                        expected: count,
                        elements: Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS)),
                    });
                    continue;
                }
                Item::Value(value) => value,
            };

            if let Some(done) = self.complete(value) {
                return Ok(Some((done, self.resume_at)));
            }
        }
    }

    /// Pushes a finished value into the innermost pending array, closing
    /// every array it fills. Returns the top-level value once nothing is
    /// left pending.
    fn complete(&mut self, mut value: RespValue) -> Option<RespValue> {
        while let Some(mut pending) = self.stack.pop() {
            pending.elements.push(value);
            if pending.elements.len() < pending.expected {
                self.stack.push(pending);
                return None;
            }
            value = RespValue::Array(Some(pending.elements));
        }
        Some(value)
    }
}

/// Parses a single scalar value or array header from the buffer.
fn parse_item(buf: &[u8]) -> ParseResult<Option<(Item, usize)>> {
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };

    // Every type starts with a CRLF-terminated line after the tag.
    let line_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None if is_type_tag(tag) => return Ok(None),
        None => return Err(ParseError::InvalidTypeTag(tag)),
    };
    let line = &buf[1..1 + line_end];
    // +1 for prefix, +2 for CRLF
    let line_consumed = 1 + line_end + 2;

    match tag {
        prefix::SIMPLE_STRING => {
            let s = parse_text(line)?;
            Ok(Some((Item::Value(RespValue::SimpleString(s)), line_consumed)))
        }
        prefix::ERROR => {
            let s = parse_text(line)?;
            Ok(Some((Item::Value(RespValue::Error(s)), line_consumed)))
        }
        prefix::INTEGER => {
            let n = parse_integer(line)?;
            Ok(Some((Item::Value(RespValue::Integer(n)), line_consumed)))
        }
        prefix::BULK_STRING => parse_bulk_string(buf, line, line_consumed),
        prefix::ARRAY => {
            let count = parse_integer(line)?;
            match count {
                -1 => Ok(Some((Item::Value(RespValue::Array(None)), line_consumed))),
                n if n < 0 => Err(ParseError::InvalidArrayLength(n)),
                n => Ok(Some((Item::ArrayHeader(to_usize(n)?), line_consumed))),
            }
        }
        other => Err(ParseError::InvalidTypeTag(other)),
    }
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`
fn parse_bulk_string(
    buf: &[u8],
    length_line: &[u8],
    data_start: usize,
) -> ParseResult<Option<(Item, usize)>> {
    let length = parse_integer(length_line)?;

    // Handle null bulk string
    if length == -1 {
        return Ok(Some((Item::Value(RespValue::BulkString(None)), data_start)));
    }

    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = to_usize(length)?;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    // data + CRLF
    let total_needed = data_start + length + 2;
    if buf.len() < total_needed {
        return Ok(None);
    }

    if &buf[data_start + length..total_needed] != CRLF {
        return Err(ParseError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((Item::Value(RespValue::BulkString(Some(data))), total_needed)))
}

fn is_type_tag(byte: u8) -> bool {
    matches!(
        byte,
        prefix::SIMPLE_STRING
            | prefix::ERROR
            | prefix::INTEGER
            | prefix::BULK_STRING
            | prefix::ARRAY
    )
}

fn parse_text(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

/// Parses a base-10 signed integer, with an optional leading sign.
fn parse_integer(line: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::MalformedInteger(String::from_utf8_lossy(line).into_owned()))
}

fn to_usize(n: i64) -> ParseResult<usize> {
    usize::try_from(n).map_err(|_| ParseError::MalformedInteger(n.to_string()))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == CRLF)
}

/// Parses a single RESP message from the start of a buffer that may still grow.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Decodes exactly one RESP message from a buffer holding the whole stream.
///
/// Returns the value and the number of bytes it occupied. Running out of
/// input before the message is complete is [`ParseError::Truncated`].
pub fn decode(buf: &[u8]) -> ParseResult<(RespValue, usize)> {
    parse_message(buf)?.ok_or(ParseError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_value(input: &[u8]) -> RespValue {
        decode(input).unwrap().0
    }

    #[test]
    fn test_parse_simple_string() {
        let input = b"+OK\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::SimpleString("OK".to_string()));
        assert_eq!(result.1, 5);
    }

    #[test]
    fn test_parse_simple_string_incomplete() {
        assert!(parse_message(b"+OK").unwrap().is_none());
        assert_eq!(decode(b"+OK"), Err(ParseError::Truncated));
    }

    #[test]
    fn test_parse_error() {
        let input = b"-Error message\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Error("Error message".to_string()));
        assert_eq!(result.1, 16);
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(decode(b":1000\r\n").unwrap(), (RespValue::Integer(1000), 7));
        assert_eq!(decode_value(b":-42\r\n"), RespValue::Integer(-42));
        assert_eq!(decode_value(b":+7\r\n"), RespValue::Integer(7));
        assert_eq!(
            decode_value(b":9223372036854775807\r\n"),
            RespValue::Integer(i64::MAX)
        );
    }

    #[test]
    fn test_parse_malformed_integer() {
        assert!(matches!(
            decode(b":not_a_number\r\n"),
            Err(ParseError::MalformedInteger(_))
        ));
        assert!(matches!(
            decode(b":9223372036854775808\r\n"),
            Err(ParseError::MalformedInteger(_))
        ));
        assert!(matches!(
            decode(b"$abc\r\nfoo\r\n"),
            Err(ParseError::MalformedInteger(_))
        ));
        assert!(matches!(
            decode(b"*x\r\n"),
            Err(ParseError::MalformedInteger(_))
        ));
    }

    #[test]
    fn test_parse_bulk_string() {
        let input = b"$6\r\nfoobar\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::bulk_string(Bytes::from("foobar")));
        assert_eq!(result.1, 12);
    }

    #[test]
    fn test_null_bulk_string_is_not_empty() {
        let (null, null_len) = decode(b"$-1\r\n").unwrap();
        let (empty, empty_len) = decode(b"$0\r\n\r\n").unwrap();

        assert_eq!(null, RespValue::BulkString(None));
        assert_eq!(null_len, 5);
        assert_eq!(empty, RespValue::BulkString(Some(Bytes::new())));
        assert_eq!(empty_len, 6);
        assert_ne!(null, empty);
    }

    #[test]
    fn test_null_array_is_not_empty() {
        let null = decode_value(b"*-1\r\n");
        let empty = decode_value(b"*0\r\n");

        assert_eq!(null, RespValue::Array(None));
        assert_eq!(empty, RespValue::Array(Some(vec![])));
        assert_ne!(null, empty);
    }

    #[test]
    fn test_bulk_string_truncated() {
        // Declares 5 bytes, supplies 3.
        assert_eq!(decode(b"$5\r\nfoo\r\n"), Err(ParseError::Truncated));
        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
        assert!(parse_message(b"$5").unwrap().is_none());
    }

    #[test]
    fn test_bulk_string_missing_crlf() {
        assert_eq!(decode(b"$3\r\nfooXY"), Err(ParseError::MissingCrlf));
    }

    #[test]
    fn test_negative_lengths() {
        assert_eq!(decode(b"$-2\r\n"), Err(ParseError::InvalidBulkLength(-2)));
        assert_eq!(decode(b"*-5\r\n"), Err(ParseError::InvalidArrayLength(-5)));
    }

    #[test]
    fn test_bulk_string_too_large() {
        assert!(matches!(
            decode(b"$999999999999\r\n"),
            Err(ParseError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let input = b"$7\r\nhel\x00\r\no\xff\r\n";
        assert_eq!(
            decode_value(input),
            RespValue::bulk_string(Bytes::from_static(b"hel\x00\r\no\xff"))
        );
    }

    #[test]
    fn test_invalid_type_tag() {
        assert_eq!(decode(b"@invalid\r\n"), Err(ParseError::InvalidTypeTag(b'@')));
        // Rejected on the first byte, without waiting for a line.
        assert_eq!(parse_message(b"?"), Err(ParseError::InvalidTypeTag(b'?')));
    }

    #[test]
    fn test_invalid_utf8_simple_string() {
        assert!(matches!(
            decode(b"+\xff\xfe\r\n"),
            Err(ParseError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_message(b"").unwrap().is_none());
        assert_eq!(decode(b""), Err(ParseError::Truncated));
    }

    #[test]
    fn test_parse_array() {
        let input = b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("foo")),
                RespValue::bulk_string(Bytes::from("bar")),
            ])
        );
        assert_eq!(result.1, input.len());
    }

    #[test]
    fn test_parse_nested_array() {
        let input = b"*1\r\n*1\r\n$3\r\nfoo\r\n";
        assert_eq!(
            decode_value(input),
            RespValue::array(vec![RespValue::array(vec![RespValue::bulk_string(
                Bytes::from("foo")
            )])])
        );
    }

    #[test]
    fn test_parse_nested_array_siblings() {
        let input = b"*3\r\n*2\r\n:1\r\n:2\r\n*0\r\n*1\r\n+Hello\r\n";
        assert_eq!(
            decode_value(input),
            RespValue::array(vec![
                RespValue::array(vec![RespValue::integer(1), RespValue::integer(2)]),
                RespValue::array(vec![]),
                RespValue::array(vec![RespValue::simple_string("Hello")]),
            ])
        );
    }

    #[test]
    fn test_parse_null_in_the_middle() {
        let input = b"*4\r\n$5\r\nhello\r\n$-1\r\n*-1\r\n$5\r\nworld\r\n";
        assert_eq!(
            decode_value(input),
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("hello")),
                RespValue::null_bulk_string(),
                RespValue::null_array(),
                RespValue::bulk_string(Bytes::from("world")),
            ])
        );
    }

    #[test]
    fn test_parse_mixed_array() {
        let input = b"*3\r\n+OK\r\n:100\r\n-ERR oops\r\n";
        assert_eq!(
            decode_value(input),
            RespValue::array(vec![
                RespValue::simple_string("OK"),
                RespValue::integer(100),
                RespValue::error("ERR oops"),
            ])
        );
    }

    #[test]
    fn test_array_element_failure_fails_whole_array() {
        assert_eq!(
            decode(b"*2\r\n$3\r\nfoo\r\n!bad\r\n"),
            Err(ParseError::InvalidTypeTag(b'!'))
        );
        assert_eq!(decode(b"*3\r\n:1\r\n:2\r\n"), Err(ParseError::Truncated));
    }

    #[test]
    fn test_array_incomplete_at_element_boundary() {
        assert!(parse_message(b"*2\r\n$3\r\nfoo\r\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_only_consumes_one_message() {
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (_, consumed) = decode(input).unwrap();
        assert_eq!(consumed, input.len() / 2);
    }

    #[test]
    fn test_parser_resumes_incomplete_message() {
        let mut parser = RespParser::new();

        assert!(parser.parse(b"*2\r\n:1\r\n").unwrap().is_none());
        assert!(parser.parse(b"*2\r\n:1\r\n:").unwrap().is_none());

        let input = b"*2\r\n:1\r\n:2\r\n+next\r\n";
        let (value, consumed) = parser.parse(input).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::array(vec![RespValue::integer(1), RespValue::integer(2)])
        );
        assert_eq!(consumed, 12);

        // The caller advances past the message; the next one starts fresh.
        let (value, consumed) = parser.parse(&input[consumed..]).unwrap().unwrap();
        assert_eq!(value, RespValue::simple_string("next"));
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_parser_resumes_inside_bulk_string() {
        let mut parser = RespParser::new();
        let input = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n";

        for end in 1..input.len() {
            assert!(parser.parse(&input[..end]).unwrap().is_none(), "end {}", end);
        }
        let (value, consumed) = parser.parse(input).unwrap().unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(value, decode_value(input));
    }

    #[test]
    fn test_parser_reset() {
        let mut parser = RespParser::new();

        assert!(parser.parse(b"*2\r\n:1\r\n").unwrap().is_none());
        parser.reset();
        let (value, _) = parser.parse(b":5\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::integer(5));
    }

    #[test]
    fn test_parser_error_discards_partial_message() {
        let mut parser = RespParser::new();

        assert!(parser.parse(b"*2\r\n:1\r\n").unwrap().is_none());
        assert_eq!(
            parser.parse(b"*2\r\n:1\r\n?\r\n"),
            Err(ParseError::InvalidTypeTag(b'?'))
        );
        let (value, consumed) = parser.parse(b"*1\r\n:5\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::array(vec![RespValue::integer(5)]));
        assert_eq!(consumed, 8);
    }

    fn nested(depth: usize) -> Vec<u8> {
        let mut input = b"*1\r\n".repeat(depth);
        input.extend_from_slice(b":1\r\n");
        input
    }

    #[test]
    fn test_deeply_nested_array() {
        let input = nested(MAX_NESTING_DEPTH);

        let (mut current, consumed) = decode(&input).unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(current.serialize(), input);

        let mut levels = 0;
        let innermost = loop {
            match current {
                RespValue::Array(Some(mut inner)) => {
                    levels += 1;
                    current = inner.remove(0);
                }
                other => break other,
            }
        };
        assert_eq!(levels, MAX_NESTING_DEPTH);
        assert_eq!(innermost, RespValue::integer(1));
    }

    #[test]
    fn test_nesting_too_deep() {
        let too_deep = ParseError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        };

        assert_eq!(decode(&nested(MAX_NESTING_DEPTH + 1)), Err(too_deep.clone()));
        // Rejected as soon as the header arrives, long before the input ends.
        assert_eq!(parse_message(&nested(16_000)), Err(too_deep.clone()));

        // An empty array is one more level; a null array is a leaf.
        let mut input = b"*1\r\n".repeat(MAX_NESTING_DEPTH);
        input.extend_from_slice(b"*0\r\n");
        assert_eq!(decode(&input), Err(too_deep));

        let mut input = b"*1\r\n".repeat(MAX_NESTING_DEPTH);
        input.extend_from_slice(b"*-1\r\n");
        assert!(decode(&input).is_ok());
    }

    #[test]
    fn test_nesting_limit_holds_across_reads() {
        let mut parser = RespParser::new();
        let input = nested(MAX_NESTING_DEPTH + 1);
        let split = 4 * MAX_NESTING_DEPTH;

        assert!(parser.parse(&input[..split]).unwrap().is_none());
        assert_eq!(
            parser.parse(&input),
            Err(ParseError::NestingTooDeep {
                max: MAX_NESTING_DEPTH
            })
        );
    }

    #[test]
    fn test_roundtrip() {
        let values = vec![
            RespValue::simple_string("OK"),
            RespValue::simple_string(""),
            RespValue::error("ERR unknown command"),
            RespValue::integer(0),
            RespValue::integer(i64::MIN),
            RespValue::bulk_string(Bytes::from_static(b"\r\n\x00binary")),
            RespValue::bulk_string(Bytes::new()),
            RespValue::null_bulk_string(),
            RespValue::null_array(),
            RespValue::array(vec![]),
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("ECHO")),
                RespValue::array(vec![RespValue::null_bulk_string(), RespValue::integer(-1)]),
                RespValue::null_array(),
            ]),
        ];

        for original in values {
            let serialized = original.serialize();
            let (parsed, consumed) = decode(&serialized).unwrap();
            assert_eq!(parsed, original);
            assert_eq!(consumed, serialized.len());
        }
    }
}
