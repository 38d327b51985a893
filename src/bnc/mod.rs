//! The local bouncer server.
//!
//! [`Bnc`] owns the listening socket, one [`BncClient`] per accepted
//! connection, the registration timers and the network mirrors. Local
//! clients register with NICK/USER/PASS; once registered they get a welcome
//! burst replaying the mirrored networks and then receive every mirrored
//! event as it arrives over the bus.
//!
//! # Bus delivery
//!
//! The bus callback only queues messages into a mailbox. They are applied
//! at the start of the next [`Bnc::iterate`], so a publish never needs a
//! mutable borrow of the `Bnc` itself.

pub mod burst;
pub mod client;
mod handlers;
pub mod mirror;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use bnc_proto::{encode, IrcLine, LineParser, Response, MAX_LINE_LEN};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

pub use client::{BncClient, RegistrationState};
pub use mirror::{ChannelMirror, NetworkMirror};

use self::burst::BurstContext;
use self::handlers::ClientHandler;
use self::mirror::{is_channel, local_name, local_origin};
use crate::bus::{filter, BusMessage, MessageBus, SubscriptionId};
use crate::config::BncConfig;
use crate::error::BncError;
use crate::net::{ConnectionId, ServerEvent, StreamServer};
use crate::scheduler::Iterable;
use crate::timer::{run_due, Clock, TimerList};

/// Commands accepted before registration completes.
const PRE_REGISTRATION: &[&str] = &["nick", "user", "pass", "quit", "ping", "pong", "cap"];

const LISTEN_RETRY_TIMER: &str = "listen-retry";

fn registration_timer(id: ConnectionId) -> String {
    format!("registration-{id}")
}

/// Shared collaborators handed to [`Bnc::new`].
pub struct BncDeps {
    pub bus: Rc<MessageBus>,
    pub parser: Rc<LineParser>,
    pub clock: Rc<dyn Clock>,
}

/// The bouncer's local side.
pub struct Bnc {
    config: BncConfig,
    server: StreamServer,
    parser: Rc<LineParser>,
    bus: Rc<MessageBus>,
    subscription: SubscriptionId,
    mailbox: Rc<RefCell<VecDeque<BusMessage>>>,
    timers: TimerList<Bnc>,
    clients: HashMap<ConnectionId, BncClient>,
    networks: BTreeMap<String, NetworkMirror>,
    handlers: HashMap<&'static str, ClientHandler>,
    motd: Option<Vec<String>>,
    created: DateTime<Utc>,
    started: bool,
}

impl Bnc {
    pub fn new(config: BncConfig, deps: BncDeps) -> Result<Self, BncError> {
        let server = StreamServer::new()?;
        let mailbox: Rc<RefCell<VecDeque<BusMessage>>> = Rc::default();
        let inbox = Rc::clone(&mailbox);
        let subscription = deps.bus.subscribe(filter([("protocol", "irc")]), move |msg| {
            if msg.get("event").is_some() {
                inbox.borrow_mut().push_back(msg.clone());
            }
        });

        let motd = load_motd(config.motd_file.as_deref());

        Ok(Self {
            server,
            parser: deps.parser,
            bus: deps.bus,
            subscription,
            mailbox,
            timers: TimerList::new(deps.clock),
            clients: HashMap::new(),
            networks: BTreeMap::new(),
            handlers: handlers::registry(),
            motd,
            created: Utc::now(),
            started: false,
            config,
        })
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn config(&self) -> &BncConfig {
        &self.config
    }

    pub fn client(&self, id: ConnectionId) -> Option<&BncClient> {
        self.clients.get(&id)
    }

    pub fn client_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn network(&self, name: &str) -> Option<&NetworkMirror> {
        self.networks.get(name)
    }

    pub fn is_listening(&self) -> bool {
        self.server.is_listening()
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.local_addr()
    }

    pub fn has_timer(&self, name: &str) -> bool {
        self.timers.contains(name)
    }

    /// Observe every line written to local clients (including CRLF).
    pub fn set_send_hook<F>(&mut self, hook: F)
    where
        F: FnMut(ConnectionId, &[u8]) + 'static,
    {
        self.server.set_send_hook(hook);
    }

    // ========================================================================
    // Listener lifecycle
    // ========================================================================

    /// Try to listen on the configured address. On failure a retry timer is
    /// armed; without an address the bouncer stays idle.
    pub fn start_listening(&mut self) {
        self.started = true;
        if self.server.is_listening() {
            return;
        }
        let Some(addr) = self.config.listen.clone().filter(|a| !a.is_empty()) else {
            error!("irc.bnc.listen is not configured; not accepting local clients");
            return;
        };
        match self.server.listen(&addr) {
            Ok(local) => info!(addr = %local, "Bouncer listening"),
            Err(e) => {
                let retry = self.config.listen_retry();
                warn!(addr = %addr, error = %e, retry_secs = retry.as_secs(), "Listen failed, will retry");
                self.timers
                    .add_by_seconds(retry, Some(LISTEN_RETRY_TIMER), |bnc: &mut Bnc| {
                        bnc.start_listening();
                        Ok(())
                    });
            }
        }
    }

    // ========================================================================
    // Socket events
    // ========================================================================

    pub fn on_client_connect(&mut self, id: ConnectionId) {
        let now = self.timers.clock().now();
        info!(conn = %id, peer = ?self.server.peer_addr(id), "Client connected");
        self.clients.insert(id, BncClient::new(id, now));
        self.timers.add_by_seconds(
            self.config.registration_timeout(),
            Some(&registration_timer(id)),
            move |bnc: &mut Bnc| bnc.registration_expired(id),
        );
    }

    pub fn on_client_recv(&mut self, id: ConnectionId, data: &[u8]) {
        let lines = match self.clients.get_mut(&id) {
            Some(client) => {
                client.buffer.receive(data);
                if client.buffer.overflowed() {
                    warn!(conn = %id, limit = MAX_LINE_LEN, "Client line too long");
                    self.disconnect_client(id, "line too long");
                    return;
                }
                client.buffer.consume_all()
            }
            None => {
                debug!(conn = %id, "Data for unknown client dropped");
                return;
            }
        };

        for raw in lines {
            if !self.clients.contains_key(&id) {
                break;
            }
            match self.parser.parse(&raw) {
                Ok(line) => {
                    debug!(conn = %id, line = %line.raw, "<- client");
                    if let Err(e) = self.dispatch(id, &line) {
                        warn!(conn = %id, cmd = %line.cmd, error = %e, "Client command failed");
                    }
                }
                Err(e) => debug!(conn = %id, error = %e, "Unparsable client line skipped"),
            }
        }
    }

    pub fn on_client_disconnect(&mut self, id: ConnectionId, reason: &str) {
        self.timers.remove(&registration_timer(id));
        if let Some(client) = self.clients.remove(&id) {
            info!(conn = %id, nick = client.reply_target(), reason = %reason, "Client disconnected");
        }
    }

    fn dispatch(&mut self, id: ConnectionId, line: &IrcLine) -> Result<(), BncError> {
        let registered = self
            .clients
            .get(&id)
            .ok_or(BncError::UnknownClient(id))?
            .is_registered();

        if !registered && !PRE_REGISTRATION.contains(&line.cmd.as_str()) {
            self.send_numeric(id, Response::ERR_NOTREGISTERED, &["You have not registered"]);
            return Ok(());
        }

        match self.handlers.get(line.cmd.as_str()).copied() {
            Some(handler) => handler(self, id, line),
            None => {
                let name = line.cmd.to_ascii_uppercase();
                self.send_numeric(id, Response::ERR_UNKNOWNCOMMAND, &[&name, "Unknown command"]);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Write one line (CRLF appended) to a client.
    pub fn send_line(&mut self, id: ConnectionId, line: &str) {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        if let Err(e) = self.server.client_send(id, &data) {
            debug!(conn = %id, error = %e, "Send to client failed");
        }
    }

    fn send_numeric(&mut self, id: ConnectionId, code: Response, args: &[&str]) {
        let target = self
            .clients
            .get(&id)
            .map(|c| c.reply_target().to_string())
            .unwrap_or_else(|| "*".to_string());
        let line = encode::numeric(&self.config.server_name, code, &target, args);
        self.send_line(id, &line);
    }

    fn send_notice(&mut self, id: ConnectionId, text: &str) {
        let target = self
            .clients
            .get(&id)
            .map(|c| c.reply_target().to_string())
            .unwrap_or_else(|| "*".to_string());
        let line = encode::with_prefix(&self.config.server_name, &encode::notice(&target, text));
        self.send_line(id, &line);
    }

    /// Send a per-client line to every registered client, optionally
    /// skipping one.
    fn fan_out<F>(&mut self, except: Option<ConnectionId>, render: F)
    where
        F: Fn(&BncClient) -> String,
    {
        let mut out: Vec<(ConnectionId, String)> = self
            .clients
            .values()
            .filter(|c| c.is_registered() && Some(c.id) != except)
            .map(|c| (c.id, render(c)))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        for (id, line) in out {
            self.send_line(id, &line);
        }
    }

    /// Close a client with an `ERROR` line.
    pub fn disconnect_client(&mut self, id: ConnectionId, reason: &str) {
        self.send_line(id, &encode::error(&format!("Closing Link: {reason}")));
        self.timers.remove(&registration_timer(id));
        if let Some(client) = self.clients.remove(&id) {
            info!(conn = %id, nick = client.reply_target(), reason = %reason, "Disconnecting client");
        }
        self.server.client_disconnect(id, reason);
    }

    fn registration_expired(&mut self, id: ConnectionId) -> anyhow::Result<()> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        if client.is_registered() {
            return Ok(());
        }
        warn!(conn = %id, state = ?client.state(), "Registration timed out");
        self.send_notice(id, "*** Registration timed out");
        self.disconnect_client(id, "registration timeout");
        Ok(())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Move `preauth` → `unregistered` once NICK and USER are known, then
    /// evaluate credentials if possible.
    fn try_advance(&mut self, id: ConnectionId) {
        let now = self.timers.clock().now();
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if client.state() != RegistrationState::Preauth || !client.has_identity() {
            return;
        }
        client.set_state(RegistrationState::Unregistered, now);
        let pending = client.pending_pass.take();

        if self.config.no_authentication {
            self.complete_registration(id);
        } else if !self.config.has_credentials() {
            warn!(conn = %id, "No credentials configured, refusing registration");
            self.disconnect_client(id, "no authentication configured");
        } else if pending.is_some() || self.config.require_pass.is_none() {
            self.check_credentials(id, pending.as_deref());
        } else {
            self.send_notice(id, "*** This bouncer requires a password: /quote PASS <password>");
        }
    }

    fn credentials_match(&self, client: &BncClient, pass: Option<&str>) -> bool {
        let cfg = &self.config;
        if cfg.no_authentication {
            return true;
        }
        if !cfg.has_credentials() {
            return false;
        }
        let matches = |required: &Option<String>, given: Option<&str>| match required {
            Some(required) => given == Some(required.as_str()),
            None => true,
        };
        matches(&cfg.require_pass, pass)
            && matches(&cfg.require_nick, client.nick.as_deref())
            && matches(&cfg.require_user, client.user.as_deref())
            && matches(&cfg.require_name, client.real_name.as_deref())
    }

    fn check_credentials(&mut self, id: ConnectionId, pass: Option<&str>) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        if self.credentials_match(client, pass) {
            self.complete_registration(id);
            return;
        }

        let max = self.config.max_auth_attempts;
        let attempts = match self.clients.get_mut(&id) {
            Some(client) => {
                client.auth_attempts += 1;
                client.auth_attempts
            }
            None => return,
        };
        warn!(conn = %id, attempts, max, "Authentication failed");
        self.send_numeric(id, Response::ERR_PASSWDMISMATCH, &["Password incorrect"]);
        self.send_notice(
            id,
            &format!("*** Authentication failed (attempt {attempts} of {max})"),
        );
        if attempts > max {
            self.disconnect_client(id, "too many authentication attempts");
        }
    }

    fn complete_registration(&mut self, id: ConnectionId) {
        let now = self.timers.clock().now();
        self.timers.remove(&registration_timer(id));
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.set_state(RegistrationState::Registered, now);
        let nick = client.reply_target().to_string();
        let user = client.user.clone().unwrap_or_else(|| nick.clone());
        info!(conn = %id, nick = %nick, user = %user, "Client registered");

        let lines = burst::welcome_burst(&BurstContext {
            config: &self.config,
            created: &self.created,
            motd: self.motd.as_deref(),
            nick: &nick,
            user: &user,
            networks: &self.networks,
        });
        for line in lines {
            self.send_line(id, &line);
        }
    }

    // ========================================================================
    // Bus events
    // ========================================================================

    fn publish(&self, message: BusMessage) {
        self.bus.publish(&message);
    }

    /// Apply one upstream event to the mirrors and fan it out.
    pub fn handle_bus(&mut self, msg: &BusMessage) {
        let (Some(event), Some(network)) = (msg.str("event"), msg.str("network")) else {
            debug!(message = %msg, "Bus message without event/network ignored");
            return;
        };
        let network = network.to_string();
        let server = self.config.server_name.clone();

        match event {
            "create" => {
                let nick = msg.str("nick").unwrap_or("*");
                info!(network = %network, nick = %nick, "Network registered upstream");
                let notice = format!("*** Connected to network {network} as {nick}");
                self.networks
                    .insert(network.clone(), NetworkMirror::new(&network, nick));
                self.fan_out(None, |c| {
                    encode::with_prefix(&server, &encode::notice(c.reply_target(), &notice))
                });
            }
            "subscribe" => {
                let Some(channel) = msg.str("channel") else { return };
                self.mirror(&network).ensure_channel(channel);
                let local = local_name(channel, &network);
                self.fan_out(None, |c| {
                    encode::with_prefix(&c.prefix(&server), &encode::join(&local, None))
                });
            }
            "unsubscribe" => {
                let Some(channel) = msg.str("channel") else { return };
                self.mirror(&network).remove_channel(channel);
                let local = local_name(channel, &network);
                self.fan_out(None, |c| {
                    encode::with_prefix(&c.prefix(&server), &encode::part(&local, None))
                });
            }
            "topic" => {
                let Some(channel) = msg.str("channel") else { return };
                let topic = msg.str("topic").unwrap_or("").to_string();
                let from = msg.str("from").map(|f| local_origin(f, &network));
                let mirror = self.mirror(&network).ensure_channel(channel);
                mirror.topic = (!topic.is_empty()).then(|| topic.clone());
                mirror.topic_setter = from.clone();
                let local = local_name(channel, &network);
                let origin = from.unwrap_or_else(|| server.clone());
                self.fan_out(None, |_| {
                    encode::with_prefix(&origin, &encode::topic(&local, Some(topic.as_str())))
                });
            }
            "nameList" => {
                let Some(channel) = msg.str("channel") else { return };
                let names = msg.strings("names");
                let mirror = self.mirror(&network);
                let upstream_nick = mirror.nick.clone();
                let chan = mirror.ensure_channel(channel);
                chan.names = names;
                let chan = chan.clone();
                let local = local_name(channel, &network);
                let mut out = Vec::new();
                for client in self.clients.values().filter(|c| c.is_registered()) {
                    let names = chan.names_for(&upstream_nick, client.reply_target());
                    for line in burst::names_lines(&server, client.reply_target(), &local, &names) {
                        out.push((client.id, line));
                    }
                }
                out.sort_by_key(|(id, _)| *id);
                for (id, line) in out {
                    self.send_line(id, &line);
                }
            }
            "join" => {
                let (Some(channel), Some(from)) = (msg.str("channel"), msg.str("from")) else {
                    return;
                };
                if let Some(nick) = bnc_proto::parse_hostmask(from).nick {
                    self.mirror(&network).ensure_channel(channel).add_name(&nick);
                }
                let origin = local_origin(from, &network);
                let local = local_name(channel, &network);
                self.fan_out(None, |_| {
                    encode::with_prefix(&origin, &encode::join(&local, None))
                });
            }
            "privmsg" => {
                let (Some(from), Some(to), Some(text)) =
                    (msg.str("from"), msg.str("to"), msg.str("msg"))
                else {
                    return;
                };
                let origin = local_origin(from, &network);
                if is_channel(to) {
                    let local = local_name(to, &network);
                    self.fan_out(None, |_| {
                        encode::with_prefix(&origin, &encode::privmsg(&local, text))
                    });
                } else {
                    self.fan_out(None, |c| {
                        encode::with_prefix(&origin, &encode::privmsg(c.reply_target(), text))
                    });
                }
            }
            "disconnect" => {
                let reason = msg.str("reason").unwrap_or("connection lost").to_string();
                warn!(network = %network, reason = %reason, "Network disconnected upstream");
                let channels: Vec<String> = match self.networks.get_mut(&network) {
                    Some(mirror) => {
                        mirror.connected = false;
                        let names = mirror.channels.values().map(|c| c.name.clone()).collect();
                        mirror.channels.clear();
                        names
                    }
                    None => Vec::new(),
                };
                for channel in channels {
                    let local = local_name(&channel, &network);
                    self.fan_out(None, |c| {
                        encode::with_prefix(&c.prefix(&server), &encode::part(&local, Some(reason.as_str())))
                    });
                }
                let notice = format!("*** Disconnected from network {network}: {reason}");
                self.fan_out(None, |c| {
                    encode::with_prefix(&server, &encode::notice(c.reply_target(), &notice))
                });
            }
            other => debug!(event = %other, network = %network, "Unhandled bus event"),
        }
    }

    fn mirror(&mut self, network: &str) -> &mut NetworkMirror {
        self.networks
            .entry(network.to_string())
            .or_insert_with(|| NetworkMirror::new(network, ""))
    }

    fn drain_mailbox(&mut self) {
        loop {
            let next = self.mailbox.borrow_mut().pop_front();
            let Some(msg) = next else { break };
            self.handle_bus(&msg);
        }
    }
}

impl Iterable for Bnc {
    fn iterate(&mut self) -> anyhow::Result<()> {
        if !self.started {
            self.start_listening();
        }

        self.drain_mailbox();

        for event in self.server.poll_sockets() {
            match event {
                ServerEvent::Connected(id) => self.on_client_connect(id),
                ServerEvent::Received(id, data) => self.on_client_recv(id, &data),
                ServerEvent::Disconnected { id, reason } => self.on_client_disconnect(id, &reason),
            }
        }

        let due = self.timers.take_due();
        run_due(self, due);
        Ok(())
    }
}

impl Drop for Bnc {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
        self.server.shutdown();
    }
}

fn load_motd(path: Option<&str>) -> Option<Vec<String>> {
    let path = path?;
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content.lines().map(str::to_string).collect()),
        Err(e) => {
            warn!(path = %path, error = %e, "Failed to read MOTD file");
            None
        }
    }
}

#[cfg(test)]
mod tests;
