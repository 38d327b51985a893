//! # bnc-proto
//!
//! IRC wire-format building blocks for the `ircbnc` bouncer.
//!
//! ## Features
//!
//! - Delimited framing that reassembles lines from arbitrary socket reads
//! - Line parsing with numeric-to-name translation and per-command refinements
//! - Lenient hostmask grammar (`nick!~user@host` or bare server name)
//! - Static, bidirectional numeric reply table
//! - One encoder per outbound command
//!
//! ## Quick Start
//!
//! ```rust
//! use bnc_proto::{encode, parse_line, Detail};
//!
//! let line = parse_line(":irc.example.net 001 nick :Welcome").unwrap();
//! assert_eq!(line.cmd, "rpl_welcome");
//! assert!(matches!(line.detail, Detail::Welcome { .. }));
//!
//! assert_eq!(encode::pong("irc.example.net"), "PONG :irc.example.net");
//! ```

#![deny(clippy::all)]

pub mod buffer;
pub mod ctcp;
pub mod encode;
pub mod error;
pub mod hostmask;
pub mod numeric;
pub mod parse;

pub use self::buffer::{DelimitedDataBuffer, QueueOrder, MAX_LINE_LEN};
pub use self::ctcp::Ctcp;
pub use self::error::{BufferError, ParseError};
pub use self::hostmask::{parse_hostmask, Hostmask};
pub use self::numeric::Response;
pub use self::parse::{parse_line, Detail, IrcLine, LineParser};
