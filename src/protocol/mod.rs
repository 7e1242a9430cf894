//! RESP Protocol Implementation
//!
//! This module provides the codec for the Redis Serialization Protocol (RESP).
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and its serialization
//! - `parser`: Decoder for incoming RESP data
//!
//! ## Example
//!
//! ```
//! use resplite::protocol::{decode, RespValue};
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
//! let (value, consumed) = decode(data).unwrap();
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! let response = RespValue::bulk_string("hi");
//! assert_eq!(response.serialize(), b"$2\r\nhi\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode, parse_message, ParseError, ParseResult, RespParser, MAX_NESTING_DEPTH};
pub use types::RespValue;
