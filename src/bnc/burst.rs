//! Welcome burst sent to a client right after registration.
//!
//! Server-info numerics, the MOTD, then a replay of every mirrored network
//! and channel so the client starts with the same view as everyone else.

use std::collections::BTreeMap;

use bnc_proto::encode;
use bnc_proto::Response;
use chrono::{DateTime, Utc};

use super::mirror::{local_name, NetworkMirror, CHANNEL_PREFIXES};
use crate::config::BncConfig;

/// Upper bound on the names payload of one `RPL_NAMREPLY`.
const NAMES_CHUNK: usize = 400;

pub const VERSION: &str = concat!("ircbnc-", env!("CARGO_PKG_VERSION"));

/// Everything needed to build one client's burst.
pub struct BurstContext<'a> {
    pub config: &'a BncConfig,
    pub created: &'a DateTime<Utc>,
    pub motd: Option<&'a [String]>,
    pub nick: &'a str,
    pub user: &'a str,
    pub networks: &'a BTreeMap<String, NetworkMirror>,
}

pub fn welcome_burst(ctx: &BurstContext<'_>) -> Vec<String> {
    let server = ctx.config.server_name.as_str();
    let nick = ctx.nick;
    let mut lines = vec![
        encode::numeric(
            server,
            Response::RPL_WELCOME,
            nick,
            &[&format!(
                "Welcome to the {} IRC bouncer {}!{}@{}",
                ctx.config.network_name, nick, ctx.user, server
            )],
        ),
        encode::numeric(
            server,
            Response::RPL_YOURHOST,
            nick,
            &[&format!("Your host is {server}, running version {VERSION}")],
        ),
        encode::numeric(
            server,
            Response::RPL_CREATED,
            nick,
            &[&format!(
                "This server was created {}",
                ctx.created.format("%a %b %d %Y at %H:%M:%S UTC")
            )],
        ),
        encode::numeric(server, Response::RPL_MYINFO, nick, &[server, VERSION, "iw", "nt"]),
        encode::numeric(
            server,
            Response::RPL_ISUPPORT,
            nick,
            &[
                &format!("CHANTYPES={CHANNEL_PREFIXES}"),
                &format!("NETWORK={}", ctx.config.network_name),
                "CASEMAPPING=rfc1459",
                "are supported by this server",
            ],
        ),
    ];

    lines.extend(motd_lines(server, nick, ctx.motd));
    for network in ctx.networks.values() {
        lines.extend(network_replay(server, nick, ctx.user, network));
    }
    lines
}

pub fn motd_lines(server: &str, nick: &str, motd: Option<&[String]>) -> Vec<String> {
    let Some(motd) = motd else {
        return vec![encode::numeric(
            server,
            Response::ERR_NOMOTD,
            nick,
            &["MOTD File is missing"],
        )];
    };
    let mut lines = Vec::with_capacity(motd.len() + 2);
    lines.push(encode::numeric(
        server,
        Response::RPL_MOTDSTART,
        nick,
        &[&format!("- {server} Message of the day - ")],
    ));
    for text in motd {
        lines.push(encode::numeric(server, Response::RPL_MOTD, nick, &[&format!("- {text}")]));
    }
    lines.push(encode::numeric(
        server,
        Response::RPL_ENDOFMOTD,
        nick,
        &["End of /MOTD command."],
    ));
    lines
}

fn network_replay(server: &str, nick: &str, user: &str, network: &NetworkMirror) -> Vec<String> {
    let mut lines = vec![encode::with_prefix(
        server,
        &encode::notice(
            nick,
            &format!(
                "Network {} ({} as {}): {} channel(s)",
                network.name,
                if network.connected { "connected" } else { "disconnected" },
                network.nick,
                network.channels.len()
            ),
        ),
    )];

    let self_prefix = format!("{nick}!{user}@{server}");
    for channel in network.channels.values() {
        let local = local_name(&channel.name, &network.name);
        lines.push(encode::with_prefix(&self_prefix, &encode::join(&local, None)));
        lines.push(match &channel.topic {
            Some(topic) => encode::numeric(server, Response::RPL_TOPIC, nick, &[&local, topic]),
            None => encode::numeric(server, Response::RPL_NOTOPIC, nick, &[&local, "No topic is set"]),
        });
        let names = channel.names_for(&network.nick, nick);
        lines.extend(names_lines(server, nick, &local, &names));
    }
    lines
}

/// `RPL_NAMREPLY` split into bounded chunks, then `RPL_ENDOFNAMES`.
pub fn names_lines(server: &str, nick: &str, channel: &str, names: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut chunk = String::new();
    for name in names {
        if !chunk.is_empty() && chunk.len() + 1 + name.len() > NAMES_CHUNK {
            lines.push(encode::numeric(server, Response::RPL_NAMREPLY, nick, &["=", channel, &chunk]));
            chunk.clear();
        }
        if !chunk.is_empty() {
            chunk.push(' ');
        }
        chunk.push_str(name);
    }
    if !chunk.is_empty() {
        lines.push(encode::numeric(server, Response::RPL_NAMREPLY, nick, &["=", channel, &chunk]));
    }
    lines.push(encode::numeric(
        server,
        Response::RPL_ENDOFNAMES,
        nick,
        &[channel, "End of /NAMES list."],
    ));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bnc::mirror::is_channel;

    fn ctx<'a>(
        config: &'a BncConfig,
        created: &'a DateTime<Utc>,
        networks: &'a BTreeMap<String, NetworkMirror>,
        motd: Option<&'a [String]>,
    ) -> BurstContext<'a> {
        BurstContext {
            config,
            created,
            motd,
            nick: "foo",
            user: "bar",
            networks,
        }
    }

    #[test]
    fn burst_starts_with_welcome_and_isupport() {
        let config = BncConfig::default();
        let created = Utc::now();
        let networks = BTreeMap::new();
        let lines = welcome_burst(&ctx(&config, &created, &networks, None));

        assert!(lines[0].starts_with(":ircbnc 001 foo :Welcome"));
        assert!(lines[4].contains("CASEMAPPING=rfc1459"));
        assert!(lines[4].contains(" CHANTYPES=#&!+ "));
        assert!(lines[4].contains("NETWORK=ircbnc"));
        assert_eq!(lines[5], ":ircbnc 422 foo :MOTD File is missing");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn advertised_chantypes_match_channel_detection() {
        let config = BncConfig::default();
        let created = Utc::now();
        let networks = BTreeMap::new();
        let lines = welcome_burst(&ctx(&config, &created, &networks, None));
        let chantypes = lines[4]
            .split(' ')
            .find_map(|token| token.strip_prefix("CHANTYPES="))
            .unwrap();
        for prefix in chantypes.chars() {
            assert!(is_channel(&format!("{prefix}chan")));
        }
        assert_eq!(chantypes, CHANNEL_PREFIXES);
    }

    #[test]
    fn motd_is_wrapped() {
        let motd = vec!["hello".to_string(), "world".to_string()];
        let lines = motd_lines("bnc", "foo", Some(&motd));
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(":bnc 375 foo"));
        assert_eq!(lines[1], ":bnc 372 foo :- hello");
        assert!(lines[3].starts_with(":bnc 376 foo"));
    }

    #[test]
    fn channels_are_replayed() {
        let config = BncConfig::default();
        let created = Utc::now();
        let mut net = NetworkMirror::new("libera", "upnick");
        let chan = net.ensure_channel("#rust");
        chan.topic = Some("Rust talk".into());
        chan.names = vec!["@upnick".into(), "alice".into()];
        net.ensure_channel("#quiet");
        let networks = BTreeMap::from([("libera".to_string(), net)]);

        let lines = welcome_burst(&ctx(&config, &created, &networks, None));
        let replay: Vec<&str> = lines[6..].iter().map(String::as_str).collect();
        assert!(replay[0].starts_with(":ircbnc NOTICE foo :Network libera"));
        assert_eq!(replay[1], ":foo!bar@ircbnc JOIN #quiet/libera");
        assert_eq!(replay[2], ":ircbnc 331 foo #quiet/libera :No topic is set");
        assert_eq!(replay[3], ":ircbnc 366 foo #quiet/libera :End of /NAMES list.");
        assert_eq!(replay[4], ":foo!bar@ircbnc JOIN #rust/libera");
        assert_eq!(replay[5], ":ircbnc 332 foo #rust/libera :Rust talk");
        assert_eq!(replay[6], ":ircbnc 353 foo = #rust/libera :@foo alice");
        assert!(replay[7].starts_with(":ircbnc 366 foo #rust/libera"));
    }

    #[test]
    fn names_are_chunked() {
        let names: Vec<String> = (0..200).map(|i| format!("user{i:03}")).collect();
        let lines = names_lines("bnc", "foo", "#big/net", &names);
        let replies: Vec<_> = lines.iter().filter(|l| l.contains(" 353 ")).collect();
        assert!(replies.len() > 1);
        for line in &replies {
            assert!(line.len() < 512);
        }
        let total: usize = replies
            .iter()
            .map(|l| l.rsplit_once(" :").unwrap().1.split(' ').count())
            .sum();
        assert_eq!(total, 200);
        assert!(lines.last().unwrap().contains(" 366 "));
    }
}
