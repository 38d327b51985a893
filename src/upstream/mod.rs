//! Upstream IRC network connection.
//!
//! One [`UpstreamNetwork`] per `[[irc.network]]` entry keeps the bouncer's
//! identity registered on that network. Server lines are translated into
//! bus events for the local side; bus actions addressed to this network
//! are written back upstream.

mod handlers;

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use bnc_proto::{encode, DelimitedDataBuffer, LineParser, MAX_LINE_LEN};
use tracing::{debug, info, trace, warn};

use self::handlers::UpstreamHandler;
use crate::bnc::mirror::irc_lower;
use crate::bus::{filter, BusMessage, MessageBus, SubscriptionId};
use crate::config::NetworkConfig;
use crate::error::NetError;
use crate::net::{ClientState, StreamClient, StreamEvent};
use crate::scheduler::Iterable;
use crate::timer::{run_due, Clock, TimerList};

const RECONNECT_TIMER: &str = "reconnect";

/// A persistent client connection to one upstream network.
pub struct UpstreamNetwork {
    config: NetworkConfig,
    client: StreamClient,
    parser: Rc<LineParser>,
    bus: Rc<MessageBus>,
    subscription: SubscriptionId,
    mailbox: Rc<RefCell<VecDeque<BusMessage>>>,
    timers: TimerList<UpstreamNetwork>,
    buffer: DelimitedDataBuffer,
    handlers: HashMap<&'static str, UpstreamHandler>,
    nick: String,
    registered: bool,
    /// Channels we are in, by folded name, for rejoin after reconnect.
    joined: BTreeSet<String>,
    /// `RPL_NAMREPLY` chunks collected until `RPL_ENDOFNAMES`.
    pending_names: HashMap<String, Vec<String>>,
    started: bool,
}

impl UpstreamNetwork {
    pub fn new(
        config: NetworkConfig,
        bus: Rc<MessageBus>,
        parser: Rc<LineParser>,
        clock: Rc<dyn Clock>,
    ) -> Result<Self, NetError> {
        let client = StreamClient::new()?;
        let mailbox: Rc<RefCell<VecDeque<BusMessage>>> = Rc::default();
        let inbox = Rc::clone(&mailbox);
        let subscription = bus.subscribe(
            filter([("protocol", "irc"), ("network", config.name.as_str())]),
            move |msg| {
                if msg.get("action").is_some() {
                    inbox.borrow_mut().push_back(msg.clone());
                }
            },
        );

        Ok(Self {
            nick: config.nick.clone(),
            client,
            parser,
            bus,
            subscription,
            mailbox,
            timers: TimerList::new(clock),
            buffer: DelimitedDataBuffer::new().with_max_len(MAX_LINE_LEN),
            handlers: handlers::registry(),
            registered: false,
            joined: BTreeSet::new(),
            pending_names: HashMap::new(),
            started: false,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Our current nick on the network.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Whether the server has sent `RPL_WELCOME` on this connection.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn connection_state(&self) -> ClientState {
        self.client.state()
    }

    pub fn has_timer(&self, name: &str) -> bool {
        self.timers.contains(name)
    }

    /// Start connecting. A failure arms the reconnect timer.
    pub fn connect(&mut self) {
        self.started = true;
        if self.client.state() != ClientState::Disconnected {
            return;
        }
        info!(network = %self.config.name, address = %self.config.address, "Connecting upstream");
        if let Err(e) = self.client.connect(&self.config.address) {
            warn!(network = %self.config.name, error = %e, "Upstream connect failed");
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect_delay();
        debug!(network = %self.config.name, delay_secs = delay.as_secs(), "Reconnect scheduled");
        self.timers
            .add_by_seconds(delay, Some(RECONNECT_TIMER), |net: &mut UpstreamNetwork| {
                net.connect();
                Ok(())
            });
    }

    // ========================================================================
    // Connection events
    // ========================================================================

    fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected => self.on_connect(),
            StreamEvent::Received(data) => self.on_recv(&data),
            StreamEvent::Sent(data) => {
                trace!(network = %self.config.name, bytes = data.len(), "-> upstream");
            }
            StreamEvent::Disconnected {
                reason,
                errno,
                errstr,
            } => self.on_disconnect(&reason, errno, errstr.as_deref()),
        }
    }

    fn on_connect(&mut self) {
        info!(network = %self.config.name, "Upstream connected, registering");
        self.nick = self.config.nick.clone();
        if let Some(password) = self.config.password.clone() {
            self.send_line(&encode::pass(&password));
        }
        let nick = encode::nick(&self.nick);
        let user = encode::user(self.config.user(), self.config.realname());
        self.send_line(&nick);
        self.send_line(&user);
    }

    fn on_recv(&mut self, data: &[u8]) {
        self.buffer.receive(data);
        if self.buffer.overflowed() {
            warn!(network = %self.config.name, limit = MAX_LINE_LEN, "Upstream line too long, dropping connection");
            self.client.disconnect();
            return;
        }
        for raw in self.buffer.consume_all() {
            match self.parser.parse(&raw) {
                Ok(line) => {
                    debug!(network = %self.config.name, line = %line.raw, "<- upstream");
                    match self.handlers.get(line.cmd.as_str()).copied() {
                        Some(handler) => handler(self, &line),
                        None => trace!(network = %self.config.name, cmd = %line.cmd, "Unhandled upstream line"),
                    }
                }
                Err(e) => debug!(network = %self.config.name, error = %e, "Unparsable upstream line skipped"),
            }
        }
    }

    fn on_disconnect(&mut self, reason: &str, errno: Option<i32>, errstr: Option<&str>) {
        warn!(
            network = %self.config.name,
            reason = %reason,
            errno = errno.unwrap_or(0),
            errstr = errstr.unwrap_or(""),
            "Upstream disconnected"
        );
        self.registered = false;
        self.buffer.clear();
        self.pending_names.clear();
        self.publish(BusMessage::event(&self.config.name, "disconnect").with("reason", reason));
        self.schedule_reconnect();
    }

    /// Write one line (CRLF appended) upstream.
    pub fn send_line(&mut self, line: &str) {
        let data = format!("{line}\r\n");
        if let Err(e) = self.client.send(data.as_bytes()) {
            warn!(network = %self.config.name, error = %e, "Upstream send failed");
        }
    }

    fn publish(&self, message: BusMessage) {
        self.bus.publish(&message);
    }

    fn event(&self, event: &str) -> BusMessage {
        BusMessage::event(&self.config.name, event)
    }

    fn is_self(&self, nick: &str) -> bool {
        irc_lower(nick) == irc_lower(&self.nick)
    }

    // ========================================================================
    // Bus actions
    // ========================================================================

    /// Apply one bus action addressed to this network.
    pub fn handle_action(&mut self, msg: &BusMessage) {
        let Some(action) = msg.str("action") else {
            return;
        };
        if !self.registered {
            warn!(network = %self.config.name, action = %action, "Not connected upstream, action dropped");
            return;
        }
        let line = match action {
            "privmsg" | "notice" => {
                let (Some(to), Some(text)) = (msg.str("to"), msg.str("msg")) else {
                    return;
                };
                if action == "privmsg" {
                    encode::privmsg(to, text)
                } else {
                    encode::notice(to, text)
                }
            }
            "join" => match msg.str("channel") {
                Some(channel) => encode::join(channel, None),
                None => return,
            },
            "part" => match msg.str("channel") {
                Some(channel) => encode::part(channel, None),
                None => return,
            },
            other => {
                debug!(network = %self.config.name, action = %other, "Unhandled bus action");
                return;
            }
        };
        self.send_line(&line);
    }

    fn drain_mailbox(&mut self) {
        loop {
            let next = self.mailbox.borrow_mut().pop_front();
            let Some(msg) = next else { break };
            self.handle_action(&msg);
        }
    }
}

impl Iterable for UpstreamNetwork {
    fn iterate(&mut self) -> anyhow::Result<()> {
        if !self.started {
            self.connect();
        }

        self.drain_mailbox();

        for event in self.client.iterate() {
            self.handle_event(event);
        }

        let due = self.timers.take_due();
        run_due(self, due);
        Ok(())
    }
}

impl Drop for UpstreamNetwork {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
        self.client.disconnect();
    }
}

#[cfg(test)]
mod tests;
