//! IRC line parser.
//!
//! [`LineParser::parse`] turns one raw line into an [`IrcLine`]. The
//! generic part (prefix, command, positional args) is always filled in.
//! Command-specific fields are attached afterwards by a refinement looked
//! up in an explicit registry keyed by lowercase command name; a command
//! with no entry simply keeps [`Detail::None`].
//!
//! Numeric commands are translated to their symbolic name through
//! [`Response`], so `001` becomes `rpl_welcome`. Unknown numerics are kept
//! verbatim and flagged.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::debug;

use crate::ctcp::Ctcp;
use crate::error::{ParseError, Result};
use crate::hostmask::{parse_hostmask, Hostmask};
use crate::numeric::{parse_numeric, Response};

/// Command-specific fields attached by a refinement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Detail {
    /// No refinement registered, or the line was too short for one.
    #[default]
    None,
    /// `PRIVMSG` / `NOTICE`.
    Message {
        to: String,
        msg: String,
        ctcp: Option<Ctcp>,
    },
    /// `JOIN`; the channel argument is kept as sent, comma lists included.
    Join {
        channel: String,
        key: Option<String>,
    },
    /// `PART`.
    Part {
        channel: String,
        reason: Option<String>,
    },
    /// `KICK`; `nick` is the user removed.
    Kick {
        channel: String,
        nick: String,
        reason: Option<String>,
    },
    /// `NICK`; the new nickname.
    Nick {
        nick: String,
    },
    /// `QUIT`.
    Quit {
        reason: Option<String>,
    },
    /// `TOPIC`, `RPL_TOPIC` and `RPL_NOTOPIC`.
    Topic {
        channel: String,
        topic: Option<String>,
    },
    /// `PING` / `PONG`.
    Token {
        token: String,
    },
    /// `RPL_NAMREPLY`, names still carrying their mode prefixes.
    NameReply {
        channel: String,
        names: Vec<String>,
    },
    /// `RPL_ENDOFNAMES`.
    EndOfNames {
        channel: String,
    },
    /// `RPL_WELCOME`; `nick` is the nickname the server assigned.
    Welcome {
        nick: String,
        text: Option<String>,
    },
}

/// One parsed IRC line. Never mutated after parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrcLine {
    /// The line as received, without trailing CR/LF.
    pub raw: String,
    /// Message origin, if the line carried a prefix.
    pub from: Option<Hostmask>,
    /// Lowercase command, or the symbolic name for known numerics.
    pub cmd: String,
    /// Numeric code when the command was three digits.
    pub numeric: Option<u16>,
    /// Set when `numeric` is not in the numeric table.
    pub unknown_numeric: bool,
    /// Positional arguments; the trailing argument (if any) is last.
    pub args: Vec<String>,
    /// Whether the last argument was introduced by ` :`.
    pub args_has_trailing: bool,
    /// Command-specific fields.
    pub detail: Detail,
}

impl IrcLine {
    /// Positional argument `i`.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(String::as_str)
    }

    /// The last argument.
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    /// The nickname (or server name) of the origin.
    pub fn source_name(&self) -> Option<&str> {
        self.from.as_ref().and_then(Hostmask::name)
    }

    /// Whether the command was a three-digit numeric.
    pub fn is_numeric(&self) -> bool {
        self.numeric.is_some()
    }
}

/// A refinement attaches command-specific fields to a generic line.
pub type Refinement = fn(&IrcLine) -> Option<Detail>;

/// Parser with a registry of per-command refinements.
pub struct LineParser {
    refinements: HashMap<&'static str, Refinement>,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    /// Build a parser with the standard refinements registered.
    pub fn new() -> Self {
        let mut refinements: HashMap<&'static str, Refinement> = HashMap::new();
        refinements.insert("privmsg", refine_message);
        refinements.insert("notice", refine_message);
        refinements.insert("join", refine_join);
        refinements.insert("part", refine_part);
        refinements.insert("kick", refine_kick);
        refinements.insert("nick", refine_nick);
        refinements.insert("quit", refine_quit);
        refinements.insert("topic", refine_topic);
        refinements.insert("ping", refine_token);
        refinements.insert("pong", refine_token);
        refinements.insert("rpl_topic", refine_rpl_topic);
        refinements.insert("rpl_notopic", refine_rpl_topic);
        refinements.insert("rpl_namreply", refine_namreply);
        refinements.insert("rpl_endofnames", refine_endofnames);
        refinements.insert("rpl_welcome", refine_welcome);
        Self { refinements }
    }

    /// Register (or replace) the refinement for a lowercase command.
    pub fn register(&mut self, cmd: &'static str, refine: Refinement) {
        self.refinements.insert(cmd, refine);
    }

    /// Whether a refinement exists for `cmd`.
    pub fn has_refinement(&self, cmd: &str) -> bool {
        self.refinements.contains_key(cmd)
    }

    /// Parse one raw line.
    ///
    /// Trailing CR/LF is stripped. Whitespace-only input is
    /// [`ParseError::EmptyLine`]; a prefix with nothing after it is
    /// [`ParseError::MissingCommand`].
    pub fn parse(&self, raw: &str) -> Result<IrcLine> {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ParseError::EmptyLine);
        }

        let mut rest = line.trim_start_matches(' ');
        let from = match rest.strip_prefix(':') {
            Some(after_colon) => {
                let (prefix, tail) = after_colon.split_once(' ').unwrap_or((after_colon, ""));
                rest = tail.trim_start_matches(' ');
                Some(parse_hostmask(prefix))
            }
            None => None,
        };

        let (token, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        if token.is_empty() {
            return Err(ParseError::MissingCommand {
                raw: line.to_string(),
            });
        }

        let numeric = parse_numeric(token);
        let mut unknown_numeric = false;
        let cmd = match numeric {
            Some(code) => match Response::from_code(code) {
                Some(resp) => resp.command_name(),
                None => {
                    debug!(code, "unmapped numeric");
                    unknown_numeric = true;
                    token.to_string()
                }
            },
            None => token.to_ascii_lowercase(),
        };

        let (args, args_has_trailing) = split_args(tail);

        let mut parsed = IrcLine {
            raw: line.to_string(),
            from,
            cmd,
            numeric,
            unknown_numeric,
            args,
            args_has_trailing,
            detail: Detail::None,
        };
        if let Some(refine) = self.refinements.get(parsed.cmd.as_str()) {
            parsed.detail = refine(&parsed).unwrap_or_default();
        }
        Ok(parsed)
    }
}

/// Parse a line with the shared default parser.
pub fn parse_line(raw: &str) -> Result<IrcLine> {
    static PARSER: OnceLock<LineParser> = OnceLock::new();
    PARSER.get_or_init(LineParser::new).parse(raw)
}

fn split_args(mut rest: &str) -> (Vec<String>, bool) {
    let mut args = Vec::new();
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            return (args, false);
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            args.push(trailing.to_string());
            return (args, true);
        }
        match rest.split_once(' ') {
            Some((arg, tail)) => {
                args.push(arg.to_string());
                rest = tail;
            }
            None => {
                args.push(rest.to_string());
                return (args, false);
            }
        }
    }
}

// ============================================================================
// Refinements
// ============================================================================

fn owned(line: &IrcLine, i: usize) -> Option<String> {
    line.arg(i).map(str::to_string)
}

fn refine_message(line: &IrcLine) -> Option<Detail> {
    let to = owned(line, 0)?;
    let msg = owned(line, 1)?;
    let ctcp = Ctcp::parse(&msg);
    Some(Detail::Message { to, msg, ctcp })
}

fn refine_join(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Join {
        channel: owned(line, 0)?,
        key: owned(line, 1),
    })
}

fn refine_part(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Part {
        channel: owned(line, 0)?,
        reason: owned(line, 1),
    })
}

fn refine_kick(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Kick {
        channel: owned(line, 0)?,
        nick: owned(line, 1)?,
        reason: owned(line, 2),
    })
}

fn refine_nick(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Nick {
        nick: owned(line, 0)?,
    })
}

fn refine_quit(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Quit {
        reason: owned(line, 0),
    })
}

fn refine_topic(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Topic {
        channel: owned(line, 0)?,
        topic: owned(line, 1),
    })
}

fn refine_token(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Token {
        token: line.last_arg()?.to_string(),
    })
}

// :server 332 me #chan :topic text
fn refine_rpl_topic(line: &IrcLine) -> Option<Detail> {
    let topic = if line.cmd == "rpl_notopic" {
        None
    } else {
        owned(line, 2)
    };
    Some(Detail::Topic {
        channel: owned(line, 1)?,
        topic,
    })
}

// :server 353 me = #chan :a @b +c
fn refine_namreply(line: &IrcLine) -> Option<Detail> {
    if line.args.len() < 3 {
        return None;
    }
    let channel = line.args[line.args.len() - 2].clone();
    let names = line
        .last_arg()?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    Some(Detail::NameReply { channel, names })
}

fn refine_endofnames(line: &IrcLine) -> Option<Detail> {
    Some(Detail::EndOfNames {
        channel: owned(line, 1)?,
    })
}

fn refine_welcome(line: &IrcLine) -> Option<Detail> {
    Some(Detail::Welcome {
        nick: owned(line, 0)?,
        text: owned(line, 1),
    })
}
