//! Error types for the IRC protocol library.
//!
//! Two families live here: framing errors raised by
//! [`DelimitedDataBuffer`](crate::buffer::DelimitedDataBuffer) and line
//! parse errors raised by [`LineParser`](crate::parse::LineParser).

use thiserror::Error;

/// Convenience type alias for Results using [`ParseError`].
pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// Errors from the delimited framing buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BufferError {
    /// A delimiter must contain at least one byte.
    #[error("invalid argument: delimiter must not be empty")]
    EmptyDelimiter,
}

/// Errors produced while parsing a raw IRC line.
///
/// Only structurally unusable lines are rejected. Unknown commands and
/// unknown numerics are *not* errors; they are passed through with the
/// `unknown_numeric` flag set or without a refined [`Detail`](crate::Detail).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line was empty after stripping CR/LF and whitespace.
    #[error("empty line")]
    EmptyLine,

    /// The line carried a prefix but no command.
    #[error("missing command in line: {raw:?}")]
    MissingCommand {
        /// The offending raw line.
        raw: String,
    },
}
