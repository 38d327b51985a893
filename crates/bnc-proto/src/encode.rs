//! Outbound line encoders.
//!
//! One function per command, each producing exactly one wire line without
//! the CRLF terminator; framing is left to the transport.
//!
//! ```
//! use bnc_proto::encode;
//!
//! assert_eq!(encode::privmsg("#rust", "hi all"), "PRIVMSG #rust :hi all");
//! assert_eq!(encode::join("#rust", None), "JOIN #rust");
//! ```

use std::fmt;

use crate::numeric::Response;

/// Builder for an arbitrary IRC line.
///
/// The last argument is written as a trailing (`:`-prefixed) argument when
/// it is empty, contains a space, starts with `:`, or was added with
/// [`LineBuilder::trailing`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineBuilder {
    prefix: Option<String>,
    command: String,
    args: Vec<String>,
    force_trailing: bool,
}

impl LineBuilder {
    /// Start a line with the given command (written as-is).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            args: Vec::new(),
            force_trailing: false,
        }
    }

    /// Set the `:prefix` origin.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Append a middle argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self.force_trailing = false;
        self
    }

    /// Append the final argument, always written with a leading `:`.
    #[must_use]
    pub fn trailing(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self.force_trailing = true;
        self
    }

    /// Render the line.
    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let Some((last, middle)) = self.args.split_last() else {
            return Ok(());
        };
        for arg in middle {
            write!(f, " {arg}")?;
        }
        if self.force_trailing || needs_trailing(last) {
            write!(f, " :{last}")
        } else {
            write!(f, " {last}")
        }
    }
}

fn needs_trailing(arg: &str) -> bool {
    arg.is_empty() || arg.contains(' ') || arg.starts_with(':')
}

/// Prepend a `:prefix` to an already-encoded line.
pub fn with_prefix(prefix: &str, line: &str) -> String {
    format!(":{prefix} {line}")
}

pub fn pass(password: &str) -> String {
    LineBuilder::new("PASS").arg(password).build()
}

pub fn nick(nick: &str) -> String {
    LineBuilder::new("NICK").arg(nick).build()
}

/// `USER <user> 0 * :<realname>`
pub fn user(username: &str, realname: &str) -> String {
    LineBuilder::new("USER")
        .arg(username)
        .arg("0")
        .arg("*")
        .trailing(realname)
        .build()
}

pub fn join(channel: &str, key: Option<&str>) -> String {
    let builder = LineBuilder::new("JOIN").arg(channel);
    match key {
        Some(key) => builder.arg(key).build(),
        None => builder.build(),
    }
}

pub fn part(channel: &str, reason: Option<&str>) -> String {
    let builder = LineBuilder::new("PART").arg(channel);
    match reason {
        Some(reason) => builder.trailing(reason).build(),
        None => builder.build(),
    }
}

pub fn privmsg(target: &str, text: &str) -> String {
    LineBuilder::new("PRIVMSG").arg(target).trailing(text).build()
}

pub fn notice(target: &str, text: &str) -> String {
    LineBuilder::new("NOTICE").arg(target).trailing(text).build()
}

pub fn ping(token: &str) -> String {
    LineBuilder::new("PING").trailing(token).build()
}

pub fn pong(token: &str) -> String {
    LineBuilder::new("PONG").trailing(token).build()
}

pub fn quit(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => LineBuilder::new("QUIT").trailing(reason).build(),
        None => "QUIT".to_string(),
    }
}

/// `TOPIC <channel>` queries; `TOPIC <channel> :<text>` sets.
pub fn topic(channel: &str, text: Option<&str>) -> String {
    let builder = LineBuilder::new("TOPIC").arg(channel);
    match text {
        Some(text) => builder.trailing(text).build(),
        None => builder.build(),
    }
}

pub fn error(message: &str) -> String {
    LineBuilder::new("ERROR").trailing(message).build()
}

/// Reply to `CAP LS` advertising no capabilities.
pub fn cap_ls_empty() -> String {
    "CAP * LS :".to_string()
}

/// `:<server> <code> <target> <args...>`, last argument always trailing.
pub fn numeric(server: &str, code: Response, target: &str, args: &[&str]) -> String {
    let mut builder = LineBuilder::new(code.to_string())
        .prefix(server)
        .arg(target);
    if let Some((last, middle)) = args.split_last() {
        for arg in middle {
            builder = builder.arg(*arg);
        }
        builder = builder.trailing(*last);
    }
    builder.build()
}
