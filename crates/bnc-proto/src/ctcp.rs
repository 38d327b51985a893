//! CTCP (Client-to-Client Protocol) detection inside PRIVMSG/NOTICE bodies.
//!
//! A CTCP body is wrapped in `\x01`. The closing delimiter is optional on
//! receive since several clients omit it.
//!
//! # Reference
//! - <https://modern.ircdocs.horse/ctcp.html>

use std::fmt;

/// The CTCP delimiter byte.
pub const CTCP_DELIM: char = '\x01';

/// A CTCP request or reply extracted from a message body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ctcp {
    /// Upper-cased CTCP command (`ACTION`, `VERSION`, ...).
    pub command: String,
    /// Everything after the first space, if non-empty.
    pub params: Option<String>,
}

impl Ctcp {
    /// Extract a CTCP from a message body, or `None` if it is plain text.
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix(CTCP_DELIM)?;
        let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
        if inner.is_empty() {
            return None;
        }

        let (command, params) = match inner.split_once(' ') {
            Some((cmd, rest)) => (cmd, (!rest.is_empty()).then(|| rest.to_string())),
            None => (inner, None),
        };
        if command.is_empty() {
            return None;
        }

        Some(Self {
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Build a CTCP with the given command and optional parameters.
    pub fn new(command: &str, params: Option<&str>) -> Self {
        Self {
            command: command.to_ascii_uppercase(),
            params: params.map(str::to_string),
        }
    }

    /// Whether this is a `/me` action.
    pub fn is_action(&self) -> bool {
        self.command == "ACTION"
    }
}

impl fmt::Display for Ctcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.params {
            Some(p) => write!(f, "{CTCP_DELIM}{} {p}{CTCP_DELIM}", self.command),
            None => write!(f, "{CTCP_DELIM}{}{CTCP_DELIM}", self.command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action() {
        let ctcp = Ctcp::parse("\x01ACTION waves hello\x01").unwrap();
        assert!(ctcp.is_action());
        assert_eq!(ctcp.params.as_deref(), Some("waves hello"));
    }

    #[test]
    fn parse_without_params_or_closing_delim() {
        let ctcp = Ctcp::parse("\x01version").unwrap();
        assert_eq!(ctcp.command, "VERSION");
        assert_eq!(ctcp.params, None);
    }

    #[test]
    fn plain_text_is_not_ctcp() {
        assert_eq!(Ctcp::parse("hello"), None);
        assert_eq!(Ctcp::parse("\x01\x01"), None);
        assert_eq!(Ctcp::parse("\x01 x\x01"), None);
    }

    #[test]
    fn display_wraps_in_delimiters() {
        assert_eq!(Ctcp::new("ping", Some("123")).to_string(), "\x01PING 123\x01");
        assert_eq!(Ctcp::new("VERSION", None).to_string(), "\x01VERSION\x01");
    }
}
