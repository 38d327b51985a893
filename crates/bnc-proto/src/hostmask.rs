//! IRC message origin (hostmask) grammar.
//!
//! A prefix is either `nick!user@host` (any of the `!user` / `@host` parts
//! may be missing) or a bare server name. A mask with no `!` and no `@` is
//! always a server name, even if it has no dot.
//!
//! # Reference
//! - RFC 2812 Section 2.3.1: Message format

use std::fmt;

/// A parsed message origin.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Hostmask {
    /// Nickname, for user origins.
    pub nick: Option<String>,
    /// Username with any leading `~` removed.
    pub user: Option<String>,
    /// Hostname, for user origins.
    pub host: Option<String>,
    /// Server name, for server origins.
    pub server: Option<String>,
    /// `false` when the username carried a leading `~` (ident not verified).
    pub ident: bool,
}

impl Hostmask {
    /// Build a user origin from its parts. A `~` on `user` is kept verbatim.
    pub fn user_mask(
        nick: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            nick: Some(nick.into()),
            user: Some(user.into()),
            host: Some(host.into()),
            server: None,
            ident: true,
        }
    }

    /// Build a server origin.
    pub fn server(name: impl Into<String>) -> Self {
        Self {
            server: Some(name.into()),
            ..Self::default()
        }
    }

    /// Whether this origin names a server rather than a user.
    pub fn is_server(&self) -> bool {
        self.server.is_some()
    }

    /// The nickname if present, else the server name.
    pub fn name(&self) -> Option<&str> {
        self.nick.as_deref().or(self.server.as_deref())
    }
}

impl fmt::Display for Hostmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(server) = &self.server {
            return f.write_str(server);
        }
        f.write_str(self.nick.as_deref().unwrap_or(""))?;
        if let Some(user) = &self.user {
            let tilde = if self.ident { "" } else { "~" };
            write!(f, "!{tilde}{user}")?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

/// Parse a raw prefix such as `:nick!~user@host` or `irc.example.net`.
///
/// A leading `:` is ignored. This parser is lenient: it never fails, and
/// empty components come back as `None`.
pub fn parse_hostmask(raw: &str) -> Hostmask {
    let raw = raw.strip_prefix(':').unwrap_or(raw);

    if !raw.contains('!') && !raw.contains('@') {
        return Hostmask::server(raw);
    }

    let (before_at, host) = match raw.split_once('@') {
        Some((left, host)) => (left, Some(host)),
        None => (raw, None),
    };
    let (nick, user) = match before_at.split_once('!') {
        Some((nick, user)) => (nick, Some(user)),
        None => (before_at, None),
    };

    let (user, ident) = match user {
        Some(u) => match u.strip_prefix('~') {
            Some(stripped) => (Some(stripped), false),
            None => (Some(u), true),
        },
        None => (None, true),
    };

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    Hostmask {
        nick: non_empty(nick),
        user: user.and_then(non_empty),
        host: host.and_then(non_empty),
        server: None,
        ident,
    }
}
