//! Local shadow of upstream network and channel state.
//!
//! Mirrors are updated only from bus events and exist to replay current
//! state to clients that register later. They may lag the real network.
//!
//! Locally, channel `#chan` on network `net` is called `#chan/net` and a
//! private peer `alice` on `net` is `alice/net`.

use std::collections::BTreeMap;

use bnc_proto::parse_hostmask;
use chrono::{DateTime, Utc};

/// Mode prefixes that may precede a nick in a NAMES reply.
const NAME_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

/// RFC 1459 case folding: ASCII plus `[]\~` → `{}|^`.
pub fn irc_lower(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Channel name prefixes, also advertised to clients as `CHANTYPES`.
pub const CHANNEL_PREFIXES: &str = "#&!+";

pub fn is_channel(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| CHANNEL_PREFIXES.contains(c))
}

/// `#chan` on `net` → `#chan/net`.
pub fn local_name(name: &str, network: &str) -> String {
    format!("{name}/{network}")
}

/// Split a local name into `(upstream name, network)`.
pub fn split_local(target: &str) -> Option<(&str, &str)> {
    let (name, network) = target.rsplit_once('/')?;
    if name.is_empty() || network.is_empty() {
        return None;
    }
    Some((name, network))
}

/// Rewrite an upstream origin for local display: `alice!u@h` on `net`
/// becomes `alice/net!u@h`. Server origins are kept as-is.
pub fn local_origin(from: &str, network: &str) -> String {
    let mask = parse_hostmask(from);
    match (&mask.nick, &mask.server) {
        (Some(nick), _) => {
            let mut out = local_name(nick, network);
            if let Some(user) = &mask.user {
                out.push('!');
                if !mask.ident {
                    out.push('~');
                }
                out.push_str(user);
            }
            if let Some(host) = &mask.host {
                out.push('@');
                out.push_str(host);
            }
            out
        }
        (None, Some(server)) => server.clone(),
        (None, None) => network.to_string(),
    }
}

/// Mirrored state of one upstream channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMirror {
    pub name: String,
    pub joined_since: DateTime<Utc>,
    pub topic: Option<String>,
    pub topic_setter: Option<String>,
    pub modes: String,
    pub names: Vec<String>,
}

impl ChannelMirror {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            joined_since: Utc::now(),
            topic: None,
            topic_setter: None,
            modes: String::new(),
            names: Vec::new(),
        }
    }

    /// Add `nick` to the name list unless already present.
    pub fn add_name(&mut self, nick: &str) {
        let folded = irc_lower(nick);
        if !self.names.iter().any(|n| irc_lower(strip_prefix(n)) == folded) {
            self.names.push(nick.to_string());
        }
    }

    /// Name list with the upstream nick replaced by `local_nick`.
    pub fn names_for(&self, upstream_nick: &str, local_nick: &str) -> Vec<String> {
        let folded = irc_lower(upstream_nick);
        self.names
            .iter()
            .map(|entry| {
                let bare = strip_prefix(entry);
                if !folded.is_empty() && irc_lower(bare) == folded {
                    let modes = &entry[..entry.len() - bare.len()];
                    format!("{modes}{local_nick}")
                } else {
                    entry.clone()
                }
            })
            .collect()
    }
}

fn strip_prefix(name: &str) -> &str {
    name.trim_start_matches(NAME_PREFIXES)
}

/// Mirrored state of one upstream network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMirror {
    pub name: String,
    /// Our current nick on the network.
    pub nick: String,
    /// Keyed by folded channel name.
    pub channels: BTreeMap<String, ChannelMirror>,
    pub connected: bool,
}

impl NetworkMirror {
    pub fn new(name: &str, nick: &str) -> Self {
        Self {
            name: name.to_string(),
            nick: nick.to_string(),
            channels: BTreeMap::new(),
            connected: true,
        }
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelMirror> {
        self.channels.get(&irc_lower(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut ChannelMirror> {
        self.channels.get_mut(&irc_lower(name))
    }

    /// The channel, created if missing.
    pub fn ensure_channel(&mut self, name: &str) -> &mut ChannelMirror {
        self.channels
            .entry(irc_lower(name))
            .or_insert_with(|| ChannelMirror::new(name))
    }

    pub fn remove_channel(&mut self, name: &str) -> Option<ChannelMirror> {
        self.channels.remove(&irc_lower(name))
    }
}
