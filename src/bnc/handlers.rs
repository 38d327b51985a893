//! Local client command handlers.
//!
//! Dispatch goes through an explicit registry from lowercase command name
//! to handler, built once per [`Bnc`]. A command with no entry is the
//! "unknown command" path.

use std::collections::HashMap;

use bnc_proto::{encode, Detail, IrcLine, Response};
use tracing::debug;

use super::mirror::{is_channel, local_name, split_local};
use super::{Bnc, RegistrationState};
use crate::bus::BusMessage;
use crate::error::BncError;
use crate::net::ConnectionId;

pub(super) type ClientHandler = fn(&mut Bnc, ConnectionId, &IrcLine) -> Result<(), BncError>;

pub(super) fn registry() -> HashMap<&'static str, ClientHandler> {
    let mut map: HashMap<&'static str, ClientHandler> = HashMap::new();
    map.insert("nick", handle_nick);
    map.insert("user", handle_user);
    map.insert("pass", handle_pass);
    map.insert("quit", handle_quit);
    map.insert("ping", handle_ping);
    map.insert("pong", handle_pong);
    map.insert("cap", handle_cap);
    map.insert("privmsg", handle_message);
    map.insert("notice", handle_message);
    map.insert("join", handle_join);
    map.insert("part", handle_part);
    map
}

fn state(bnc: &Bnc, id: ConnectionId) -> Result<RegistrationState, BncError> {
    bnc.clients
        .get(&id)
        .map(|c| c.state())
        .ok_or(BncError::UnknownClient(id))
}

// ============================================================================
// Registration
// ============================================================================

fn handle_nick(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    let current = state(bnc, id)?;
    if current == RegistrationState::Registered {
        bnc.send_notice(
            id,
            "*** Nick changes are not supported; the nick is owned by each upstream network",
        );
        return Ok(());
    }
    let Some(nick) = line.arg(0).filter(|n| !n.is_empty()) else {
        bnc.send_numeric(id, Response::ERR_NONICKNAMEGIVEN, &["No nickname given"]);
        return Ok(());
    };
    if let Some(client) = bnc.clients.get_mut(&id) {
        client.nick = Some(nick.to_string());
    }

    match current {
        RegistrationState::Preauth => bnc.try_advance(id),
        // Nick-only credentials can be retried by changing the nick.
        _ if bnc.config.require_pass.is_none() && bnc.config.has_credentials() => {
            bnc.check_credentials(id, None)
        }
        _ => {}
    }
    Ok(())
}

fn handle_user(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    if state(bnc, id)? != RegistrationState::Preauth {
        bnc.send_numeric(
            id,
            Response::ERR_ALREADYREGISTRED,
            &["You may not reregister"],
        );
        return Ok(());
    }
    if line.args.len() < 4 {
        bnc.send_numeric(id, Response::ERR_NEEDMOREPARAMS, &["USER", "Not enough parameters"]);
        return Ok(());
    }
    if let Some(client) = bnc.clients.get_mut(&id) {
        client.user = Some(line.args[0].clone());
        client.real_name = Some(line.args[3].clone());
    }
    bnc.try_advance(id);
    Ok(())
}

fn handle_pass(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    let Some(pass) = line.arg(0) else {
        bnc.send_numeric(id, Response::ERR_NEEDMOREPARAMS, &["PASS", "Not enough parameters"]);
        return Ok(());
    };
    match state(bnc, id)? {
        RegistrationState::Preauth => {
            if let Some(client) = bnc.clients.get_mut(&id) {
                client.pending_pass = Some(pass.to_string());
            }
        }
        RegistrationState::Unregistered => bnc.check_credentials(id, Some(pass)),
        RegistrationState::Registered => bnc.send_numeric(
            id,
            Response::ERR_ALREADYREGISTRED,
            &["You may not reregister"],
        ),
    }
    Ok(())
}

fn handle_quit(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    let reason = match line.arg(0) {
        Some(reason) => format!("Quit: {reason}"),
        None => "Client Quit".to_string(),
    };
    bnc.disconnect_client(id, &reason);
    Ok(())
}

fn handle_ping(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    let token = match &line.detail {
        Detail::Token { token } => token.as_str(),
        _ => bnc.config.server_name.as_str(),
    };
    let reply = encode::with_prefix(
        &bnc.config.server_name,
        &encode::LineBuilder::new("PONG")
            .arg(bnc.config.server_name.as_str())
            .trailing(token)
            .build(),
    );
    bnc.send_line(id, &reply);
    Ok(())
}

fn handle_pong(_bnc: &mut Bnc, _id: ConnectionId, _line: &IrcLine) -> Result<(), BncError> {
    Ok(())
}

fn handle_cap(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    let sub = line.arg(0).unwrap_or("").to_ascii_uppercase();
    match sub.as_str() {
        "LS" | "LIST" => bnc.send_line(id, &encode::cap_ls_empty()),
        "REQ" => {
            let requested = line.arg(1).unwrap_or("");
            let reply = encode::LineBuilder::new("CAP")
                .prefix(bnc.config.server_name.as_str())
                .arg("*")
                .arg("NAK")
                .trailing(requested)
                .build();
            bnc.send_line(id, &reply);
        }
        _ => {}
    }
    Ok(())
}

// ============================================================================
// Registered commands
// ============================================================================

/// PRIVMSG/NOTICE to `#chan/net` or `nick/net`: forwarded to the owning
/// network and echoed to the other local clients.
fn handle_message(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    let is_notice = line.cmd == "notice";
    let Detail::Message { to, msg, .. } = &line.detail else {
        if !is_notice {
            bnc.send_numeric(id, Response::ERR_NORECIPIENT, &["No recipient given (PRIVMSG)"]);
        }
        return Ok(());
    };

    let Some((target, network)) = split_local(to).filter(|(_, net)| bnc.networks.contains_key(*net))
    else {
        if !is_notice {
            bnc.send_numeric(id, Response::ERR_NOSUCHNICK, &[to, "No such nick/channel"]);
        }
        return Ok(());
    };

    let action = if is_notice { "notice" } else { "privmsg" };
    bnc.publish(
        BusMessage::action(network, action)
            .with("to", target)
            .with("msg", msg.as_str()),
    );

    // Private messages are only echoed when they name a channel.
    if is_channel(target) {
        let server = bnc.config.server_name.clone();
        let Some(sender) = bnc.clients.get(&id).map(|c| c.prefix(&server)) else {
            return Ok(());
        };
        let local = local_name(target, network);
        let echoed = if is_notice {
            encode::notice(&local, msg)
        } else {
            encode::privmsg(&local, msg)
        };
        let echoed = encode::with_prefix(&sender, &echoed);
        bnc.fan_out(Some(id), |_| echoed.clone());
    }
    Ok(())
}

fn handle_join(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    channel_action(bnc, id, line, "join")
}

fn handle_part(bnc: &mut Bnc, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
    channel_action(bnc, id, line, "part")
}

fn channel_action(
    bnc: &mut Bnc,
    id: ConnectionId,
    line: &IrcLine,
    action: &str,
) -> Result<(), BncError> {
    let Some(targets) = line.arg(0) else {
        let cmd = action.to_ascii_uppercase();
        bnc.send_numeric(id, Response::ERR_NEEDMOREPARAMS, &[&cmd, "Not enough parameters"]);
        return Ok(());
    };

    for target in targets.split(',').filter(|t| !t.is_empty()) {
        match split_local(target) {
            Some((channel, network)) if is_channel(channel) && bnc.networks.contains_key(network) => {
                debug!(conn = %id, channel = %channel, network = %network, action = %action, "Channel request");
                bnc.publish(BusMessage::action(network, action).with("channel", channel));
            }
            _ => bnc.send_numeric(id, Response::ERR_NOSUCHCHANNEL, &[target, "No such channel"]),
        }
    }
    Ok(())
}
