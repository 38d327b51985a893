//! Upstream server line handlers.

use std::collections::HashMap;

use bnc_proto::{encode, Detail, IrcLine};
use tracing::{debug, info};

use super::UpstreamNetwork;
use crate::bnc::mirror::irc_lower;

pub(super) type UpstreamHandler = fn(&mut UpstreamNetwork, &IrcLine);

pub(super) fn registry() -> HashMap<&'static str, UpstreamHandler> {
    let mut map: HashMap<&'static str, UpstreamHandler> = HashMap::new();
    map.insert("ping", on_ping);
    map.insert("rpl_welcome", on_welcome);
    map.insert("err_nicknameinuse", on_nick_in_use);
    map.insert("nick", on_nick);
    map.insert("join", on_join);
    map.insert("part", on_part);
    map.insert("kick", on_kick);
    map.insert("topic", on_topic);
    map.insert("rpl_topic", on_topic);
    map.insert("rpl_namreply", on_names);
    map.insert("rpl_endofnames", on_end_of_names);
    map.insert("privmsg", on_privmsg);
    map
}

fn origin(line: &IrcLine) -> Option<String> {
    line.from.as_ref().map(ToString::to_string)
}

fn on_ping(net: &mut UpstreamNetwork, line: &IrcLine) {
    if let Detail::Token { token } = &line.detail {
        net.send_line(&encode::pong(token));
    }
}

fn on_welcome(net: &mut UpstreamNetwork, line: &IrcLine) {
    if let Detail::Welcome { nick, .. } = &line.detail {
        net.nick = nick.clone();
    }
    net.registered = true;
    info!(network = %net.config.name, nick = %net.nick, "Registered upstream");
    net.publish(net.event("create").with("nick", net.nick.as_str()));

    let mut channels: Vec<String> = net.config.channels.clone();
    for joined in &net.joined {
        if !channels.iter().any(|c| irc_lower(c) == *joined) {
            channels.push(joined.clone());
        }
    }
    for channel in channels {
        net.send_line(&encode::join(&channel, None));
    }
}

fn on_nick_in_use(net: &mut UpstreamNetwork, _line: &IrcLine) {
    if net.registered {
        return;
    }
    net.nick.push('_');
    debug!(network = %net.config.name, nick = %net.nick, "Nick in use, retrying");
    let line = encode::nick(&net.nick);
    net.send_line(&line);
}

fn on_nick(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::Nick { nick } = &line.detail else { return };
    if line.source_name().is_some_and(|from| net.is_self(from)) {
        info!(network = %net.config.name, nick = %nick, "Upstream nick changed");
        net.nick = nick.clone();
    }
}

fn on_join(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::Join { channel, .. } = &line.detail else { return };
    let Some(from) = line.source_name() else { return };
    if net.is_self(from) {
        net.joined.insert(irc_lower(channel));
        net.publish(net.event("subscribe").with("channel", channel.as_str()));
    } else if let Some(origin) = origin(line) {
        net.publish(
            net.event("join")
                .with("channel", channel.as_str())
                .with("from", origin),
        );
    }
}

fn left(net: &mut UpstreamNetwork, channel: &str) {
    net.joined.remove(&irc_lower(channel));
    net.pending_names.remove(&irc_lower(channel));
    net.publish(net.event("unsubscribe").with("channel", channel));
}

fn on_part(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::Part { channel, .. } = &line.detail else { return };
    if line.source_name().is_some_and(|from| net.is_self(from)) {
        left(net, channel);
    }
}

fn on_kick(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::Kick { channel, nick, .. } = &line.detail else { return };
    if net.is_self(nick) {
        info!(network = %net.config.name, channel = %channel, "Kicked from channel");
        left(net, channel);
    }
}

fn on_topic(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::Topic { channel, topic } = &line.detail else { return };
    let mut msg = net
        .event("topic")
        .with("channel", channel.as_str())
        .with("topic", topic.clone().unwrap_or_default());
    // RPL_TOPIC comes from the server; only a live TOPIC has a setter.
    if line.cmd == "topic" {
        if let Some(origin) = origin(line) {
            msg = msg.with("from", origin);
        }
    }
    net.publish(msg);
}

fn on_names(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::NameReply { channel, names } = &line.detail else { return };
    net.pending_names
        .entry(irc_lower(channel))
        .or_default()
        .extend(names.iter().cloned());
}

fn on_end_of_names(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::EndOfNames { channel } = &line.detail else { return };
    let names = net
        .pending_names
        .remove(&irc_lower(channel))
        .unwrap_or_default();
    net.publish(
        net.event("nameList")
            .with("channel", channel.as_str())
            .with("names", names),
    );
}

fn on_privmsg(net: &mut UpstreamNetwork, line: &IrcLine) {
    let Detail::Message { to, msg, .. } = &line.detail else { return };
    let Some(origin) = origin(line) else { return };
    net.publish(
        net.event("privmsg")
            .with("from", origin)
            .with("to", to.as_str())
            .with("msg", msg.as_str()),
    );
}
