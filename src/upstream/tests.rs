use std::cell::RefCell;
use std::rc::Rc;

use bnc_proto::LineParser;

use super::*;
use crate::timer::ManualClock;

struct Harness {
    net: UpstreamNetwork,
    bus: Rc<MessageBus>,
    events: Rc<RefCell<Vec<BusMessage>>>,
}

impl Harness {
    fn new() -> Self {
        let bus = Rc::new(MessageBus::new());
        let config = NetworkConfig {
            name: "net".into(),
            address: "no-port-here".into(),
            nick: "up".into(),
            channels: vec!["#a".into()],
            reconnect_delay: 30,
            ..NetworkConfig::default()
        };
        let net = UpstreamNetwork::new(
            config,
            bus.clone(),
            Rc::new(LineParser::new()),
            Rc::new(ManualClock::new()),
        )
        .unwrap();

        let events: Rc<RefCell<Vec<BusMessage>>> = Rc::default();
        let sink = events.clone();
        bus.subscribe(filter([("protocol", "irc"), ("network", "net")]), move |msg| {
            if msg.get("event").is_some() {
                sink.borrow_mut().push(msg.clone());
            }
        });
        Self { net, bus, events }
    }

    fn feed(&mut self, lines: &[&str]) {
        let data: String = lines.iter().map(|l| format!("{l}\r\n")).collect();
        self.net.on_recv(data.as_bytes());
    }

    fn take(&self) -> Vec<BusMessage> {
        self.events.borrow_mut().drain(..).collect()
    }

    fn welcome(&mut self) {
        self.feed(&[":irc.test 001 up :Welcome to the test network"]);
        self.take();
    }
}

#[test]
fn welcome_publishes_create() {
    let mut h = Harness::new();
    h.feed(&[":irc.test 001 up_ :Welcome to the test network"]);
    assert!(h.net.is_registered());
    assert_eq!(h.net.nick(), "up_");

    let events = h.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].str("event"), Some("create"));
    assert_eq!(events[0].str("nick"), Some("up_"));
}

#[test]
fn nick_in_use_appends_underscore_before_welcome_only() {
    let mut h = Harness::new();
    h.feed(&[":irc.test 433 * up :Nickname is already in use"]);
    assert_eq!(h.net.nick(), "up_");

    h.welcome();
    h.feed(&[":irc.test 433 up_ other :Nickname is already in use"]);
    assert_eq!(h.net.nick(), "up_");
}

#[test]
fn self_nick_change_is_tracked() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[":someone!s@h NICK :other", ":UP!u@h NICK :renamed"]);
    assert_eq!(h.net.nick(), "renamed");
}

#[test]
fn joins_become_subscribe_or_join_events() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[":up!u@h JOIN #a", ":bob!~b@host JOIN :#a"]);

    let events = h.take();
    assert_eq!(events[0].str("event"), Some("subscribe"));
    assert_eq!(events[0].str("channel"), Some("#a"));
    assert_eq!(events[1].str("event"), Some("join"));
    assert_eq!(events[1].str("from"), Some("bob!~b@host"));
    assert!(h.net.joined.contains("#a"));
}

#[test]
fn names_are_collected_until_end() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[
        ":irc.test 353 up = #a :alice @bob",
        ":irc.test 353 up = #a :+carol",
    ]);
    assert!(h.take().is_empty());

    h.feed(&[":irc.test 366 up #a :End of /NAMES list."]);
    let events = h.take();
    assert_eq!(events[0].str("event"), Some("nameList"));
    assert_eq!(events[0].strings("names"), vec!["alice", "@bob", "+carol"]);
    assert!(h.net.pending_names.is_empty());
}

#[test]
fn topic_reply_and_live_topic() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[
        ":irc.test 332 up #a :old topic",
        ":op!o@host TOPIC #a :new topic",
    ]);

    let events = h.take();
    assert_eq!(events[0].str("topic"), Some("old topic"));
    assert_eq!(events[0].str("from"), None);
    assert_eq!(events[1].str("topic"), Some("new topic"));
    assert_eq!(events[1].str("from"), Some("op!o@host"));
}

#[test]
fn only_own_part_or_kick_unsubscribes() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[":up!u@h JOIN #a", ":up!u@h JOIN #b"]);
    h.take();

    h.feed(&[
        ":bob!b@h PART #a :bye",
        ":up!u@h PART #a",
        ":op!o@h KICK #b bob :out",
        ":op!o@h KICK #b up :out",
    ]);
    let events = h.take();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].str("event"), Some("unsubscribe"));
    assert_eq!(events[0].str("channel"), Some("#a"));
    assert_eq!(events[1].str("channel"), Some("#b"));
    assert!(h.net.joined.is_empty());
}

#[test]
fn privmsg_is_published() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[":alice!a@h PRIVMSG #a :hello there"]);
    let events = h.take();
    assert_eq!(events[0].str("event"), Some("privmsg"));
    assert_eq!(events[0].str("from"), Some("alice!a@h"));
    assert_eq!(events[0].str("to"), Some("#a"));
    assert_eq!(events[0].str("msg"), Some("hello there"));
}

#[test]
fn unhandled_lines_publish_nothing() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[":irc.test 002 up :Your host is irc.test", ":irc.test 999 up :odd"]);
    assert!(h.take().is_empty());
}

#[test]
fn only_actions_reach_the_mailbox() {
    let h = Harness::new();
    h.bus.publish(&BusMessage::event("net", "create"));
    h.bus
        .publish(&BusMessage::action("other", "join").with("channel", "#x"));
    h.bus
        .publish(&BusMessage::action("net", "join").with("channel", "#x"));
    assert_eq!(h.net.mailbox.borrow().len(), 1);
}

#[test]
fn actions_while_disconnected_are_dropped() {
    let mut h = Harness::new();
    h.bus
        .publish(&BusMessage::action("net", "privmsg").with("to", "#a").with("msg", "x"));
    h.net.drain_mailbox();
    assert!(h.net.mailbox.borrow().is_empty());
    assert_eq!(h.net.connection_state(), ClientState::Disconnected);
}

#[test]
fn disconnect_publishes_and_arms_reconnect() {
    let mut h = Harness::new();
    h.welcome();
    h.feed(&[":irc.test 353 up = #a :alice"]);
    h.net.on_disconnect("EOF", None, None);

    assert!(!h.net.is_registered());
    assert!(h.net.pending_names.is_empty());
    assert!(h.net.has_timer("reconnect"));
    let events = h.take();
    assert_eq!(events[0].str("event"), Some("disconnect"));
    assert_eq!(events[0].str("reason"), Some("EOF"));
}

#[test]
fn failed_connect_arms_reconnect() {
    let mut h = Harness::new();
    h.net.iterate().unwrap();
    assert_eq!(h.net.connection_state(), ClientState::Disconnected);
    assert!(h.net.has_timer("reconnect"));
}

#[test]
fn drop_unsubscribes() {
    let h = Harness::new();
    let bus = h.bus.clone();
    assert_eq!(bus.len(), 2);
    drop(h.net);
    assert_eq!(bus.len(), 1);
}

#[test]
fn overlong_upstream_line_is_not_buffered() {
    let mut h = Harness::new();
    h.welcome();
    h.net.on_recv(&vec![b'A'; MAX_LINE_LEN + 1]);
    assert!(h.net.buffer.overflowed());
    assert!(h.net.buffer.fragment().is_empty());

    h.feed(&[":alice!a@h PRIVMSG #a :after"]);
    assert!(h.take().is_empty());
}
