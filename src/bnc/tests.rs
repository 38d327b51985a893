use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use bnc_proto::LineParser;

use super::*;
use crate::bus::{filter, BusMessage, MessageBus};
use crate::config::BncConfig;
use crate::net::ConnectionId;
use crate::scheduler::Iterable;
use crate::timer::{Clock, ManualClock};

type Sent = Rc<RefCell<Vec<(ConnectionId, String)>>>;

struct Harness {
    bnc: Bnc,
    sent: Sent,
    clock: Rc<ManualClock>,
    bus: Rc<MessageBus>,
}

impl Harness {
    fn new(config: BncConfig) -> Self {
        let clock = Rc::new(ManualClock::new());
        let bus = Rc::new(MessageBus::new());
        let mut bnc = Bnc::new(
            config,
            BncDeps {
                bus: bus.clone(),
                parser: Rc::new(LineParser::new()),
                clock: clock.clone() as Rc<dyn Clock>,
            },
        )
        .unwrap();
        let sent: Sent = Rc::default();
        let sink = sent.clone();
        bnc.set_send_hook(move |id, data| {
            let line = String::from_utf8_lossy(data).trim_end().to_string();
            sink.borrow_mut().push((id, line));
        });
        Self {
            bnc,
            sent,
            clock,
            bus,
        }
    }

    fn connect(&mut self, n: u64) -> ConnectionId {
        let id = ConnectionId(n);
        self.bnc.on_client_connect(id);
        id
    }

    fn feed(&mut self, id: ConnectionId, text: &str) {
        self.bnc.on_client_recv(id, format!("{text}\r\n").as_bytes());
    }

    /// Lines sent to `id` since the last call.
    fn take(&self, id: ConnectionId) -> Vec<String> {
        let mut sent = self.sent.borrow_mut();
        let (mine, rest): (Vec<_>, Vec<_>) = sent.drain(..).partition(|(to, _)| *to == id);
        *sent = rest;
        mine.into_iter().map(|(_, line)| line).collect()
    }

    fn state(&self, id: ConnectionId) -> Option<RegistrationState> {
        self.bnc.client(id).map(|c| c.state())
    }

    fn register(&mut self, id: ConnectionId, nick: &str) {
        self.feed(id, "PASS correct");
        self.feed(id, &format!("NICK {nick}"));
        self.feed(id, "USER bar 0 * :Real Name");
        assert_eq!(self.state(id), Some(RegistrationState::Registered));
        self.take(id);
    }
}

fn pass_config() -> BncConfig {
    BncConfig {
        require_pass: Some("correct".into()),
        max_auth_attempts: 2,
        ..BncConfig::default()
    }
}

// ============================================================================
// Registration state machine
// ============================================================================

#[test]
fn nick_user_then_correct_pass_registers() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    assert_eq!(h.state(id), Some(RegistrationState::Preauth));

    h.feed(id, "NICK foo");
    assert_eq!(h.state(id), Some(RegistrationState::Preauth));
    h.feed(id, "USER bar 0 * :Real Name");
    assert_eq!(h.state(id), Some(RegistrationState::Unregistered));
    assert!(h.take(id)[0].contains("requires a password"));

    h.feed(id, "PASS correct");
    assert_eq!(h.state(id), Some(RegistrationState::Registered));
    let lines = h.take(id);
    assert!(lines[0].starts_with(":ircbnc 001 foo :Welcome"), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with(":ircbnc 005 foo")));
    assert!(!h.bnc.has_timer("registration-1"));
}

#[test]
fn wrong_pass_counts_attempts() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.feed(id, "NICK foo");
    h.feed(id, "USER bar 0 * :Real Name");
    h.take(id);

    h.feed(id, "PASS wrong");
    assert_eq!(h.state(id), Some(RegistrationState::Unregistered));
    assert_eq!(h.bnc.client(id).unwrap().auth_attempts, 1);
    let lines = h.take(id);
    assert_eq!(lines[0], ":ircbnc 464 foo :Password incorrect");
    assert!(lines[1].contains("attempt 1 of 2"));

    h.feed(id, "PASS correct");
    assert_eq!(h.state(id), Some(RegistrationState::Registered));
}

#[test]
fn too_many_attempts_disconnects() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.feed(id, "NICK foo");
    h.feed(id, "USER bar 0 * :Real Name");
    h.feed(id, "PASS a");
    h.feed(id, "PASS b");
    assert!(h.bnc.client(id).is_some());
    h.take(id);

    h.feed(id, "PASS c");
    assert!(h.bnc.client(id).is_none());
    let lines = h.take(id);
    assert_eq!(
        lines.last().map(String::as_str),
        Some("ERROR :Closing Link: too many authentication attempts")
    );
}

#[test]
fn pass_before_nick_user_is_remembered() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.register(id, "foo");
}

#[test]
fn registration_timeout_disconnects() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(7);
    assert!(h.bnc.has_timer("registration-7"));

    h.clock.advance(Duration::from_secs(29));
    h.bnc.iterate().unwrap();
    assert!(h.bnc.client(id).is_some());

    h.clock.advance(Duration::from_secs(1));
    h.bnc.iterate().unwrap();
    assert!(h.bnc.client(id).is_none());
    let lines = h.take(id);
    assert!(lines[0].contains("Registration timed out"));
    assert_eq!(lines[1], "ERROR :Closing Link: registration timeout");
}

#[test]
fn unterminated_flood_before_registration_disconnects() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    let chunk = vec![b'A'; 4000];
    h.bnc.on_client_recv(id, &chunk);
    h.bnc.on_client_recv(id, &chunk);
    assert!(h.bnc.client(id).is_some());

    h.bnc.on_client_recv(id, &chunk);
    assert!(h.bnc.client(id).is_none());
    assert!(!h.bnc.has_timer("registration-1"));
    assert_eq!(
        h.take(id).last().map(String::as_str),
        Some("ERROR :Closing Link: line too long")
    );
}

#[test]
fn long_but_terminated_line_is_accepted() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.register(id, "foo");
    let text = "x".repeat(MAX_LINE_LEN - 20);
    h.feed(id, &format!("PING :{text}"));
    assert!(h.bnc.client(id).is_some());
    assert!(h.take(id)[0].ends_with(&text));
}

#[test]
fn no_credentials_fails_closed() {
    let mut h = Harness::new(BncConfig::default());
    let id = h.connect(1);
    h.feed(id, "NICK foo");
    h.feed(id, "USER bar 0 * :Real Name");
    assert!(h.bnc.client(id).is_none());
    assert_eq!(
        h.take(id).last().map(String::as_str),
        Some("ERROR :Closing Link: no authentication configured")
    );
}

#[test]
fn no_authentication_registers_immediately() {
    let mut h = Harness::new(BncConfig {
        no_authentication: true,
        ..BncConfig::default()
    });
    let id = h.connect(1);
    h.feed(id, "NICK foo");
    h.feed(id, "USER bar 0 * :Real Name");
    assert_eq!(h.state(id), Some(RegistrationState::Registered));
}

#[test]
fn required_nick_can_be_corrected() {
    let mut h = Harness::new(BncConfig {
        require_nick: Some("owner".into()),
        ..BncConfig::default()
    });
    let id = h.connect(1);
    h.feed(id, "NICK guest");
    h.feed(id, "USER bar 0 * :Real Name");
    assert_eq!(h.state(id), Some(RegistrationState::Unregistered));
    assert_eq!(h.bnc.client(id).unwrap().auth_attempts, 1);

    h.feed(id, "NICK owner");
    assert_eq!(h.state(id), Some(RegistrationState::Registered));
}

#[test]
fn commands_before_registration_get_451() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.feed(id, "PRIVMSG #a/net :hi");
    assert_eq!(h.take(id), vec![":ircbnc 451 * :You have not registered"]);
}

#[test]
fn unknown_command_after_registration_gets_421() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.register(id, "foo");
    h.feed(id, "WHOIS someone");
    assert_eq!(h.take(id), vec![":ircbnc 421 foo WHOIS :Unknown command"]);
}

#[test]
fn ping_and_cap() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.feed(id, "CAP LS 302");
    h.feed(id, "PING :abc");
    assert_eq!(h.take(id), vec!["CAP * LS :", ":ircbnc PONG ircbnc :abc"]);
}

// ============================================================================
// Bus interaction
// ============================================================================

#[test]
fn bus_events_reach_only_registered_clients() {
    let mut h = Harness::new(pass_config());
    let registered = h.connect(1);
    let pending = h.connect(2);
    h.register(registered, "foo");
    h.feed(pending, "NICK bar");
    h.take(pending);

    h.bus.publish(&BusMessage::event("libera", "create").with("nick", "up"));
    h.bus
        .publish(&BusMessage::event("libera", "subscribe").with("channel", "#rust"));
    h.bnc.iterate().unwrap();

    let lines = h.take(registered);
    assert!(lines[0].contains("Connected to network libera as up"));
    assert_eq!(lines[1], ":foo!bar@ircbnc JOIN #rust/libera");
    assert!(h.take(pending).is_empty());

    let mirror = h.bnc.network("libera").unwrap();
    assert_eq!(mirror.nick, "up");
    assert!(mirror.channel("#rust").is_some());
}

#[test]
fn mirror_tracks_topic_names_and_disconnect() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.register(id, "foo");

    h.bnc.handle_bus(&BusMessage::event("net", "create").with("nick", "up"));
    h.bnc
        .handle_bus(&BusMessage::event("net", "subscribe").with("channel", "#a"));
    h.bnc.handle_bus(
        &BusMessage::event("net", "topic")
            .with("channel", "#a")
            .with("topic", "hello")
            .with("from", "op!o@host"),
    );
    h.bnc.handle_bus(
        &BusMessage::event("net", "nameList")
            .with("channel", "#a")
            .with("names", vec!["@up", "alice"]),
    );
    h.bnc.handle_bus(
        &BusMessage::event("net", "join")
            .with("channel", "#a")
            .with("from", "bob!b@host"),
    );
    let lines = h.take(id);
    assert!(lines.contains(&":op/net!o@host TOPIC #a/net :hello".to_string()));
    assert!(lines.contains(&":ircbnc 353 foo = #a/net :@foo alice".to_string()));
    assert!(lines.contains(&":bob/net!b@host JOIN #a/net".to_string()));

    let chan = h.bnc.network("net").unwrap().channel("#a").unwrap().clone();
    assert_eq!(chan.topic.as_deref(), Some("hello"));
    assert_eq!(chan.names, vec!["@up", "alice", "bob"]);

    h.bnc
        .handle_bus(&BusMessage::event("net", "disconnect").with("reason", "EOF"));
    let lines = h.take(id);
    assert_eq!(lines[0], ":foo!bar@ircbnc PART #a/net :EOF");
    assert!(lines[1].contains("Disconnected from network net"));
    assert!(h.bnc.network("net").unwrap().channels.is_empty());
}

#[test]
fn upstream_privmsg_is_relayed_with_local_names() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.register(id, "foo");

    h.bnc.handle_bus(
        &BusMessage::event("net", "privmsg")
            .with("from", "alice!a@h")
            .with("to", "#a")
            .with("msg", "hi all"),
    );
    h.bnc.handle_bus(
        &BusMessage::event("net", "privmsg")
            .with("from", "alice!a@h")
            .with("to", "up")
            .with("msg", "psst"),
    );
    assert_eq!(
        h.take(id),
        vec![
            ":alice/net!a@h PRIVMSG #a/net :hi all",
            ":alice/net!a@h PRIVMSG foo :psst",
        ]
    );
}

#[test]
fn client_privmsg_becomes_bus_action_and_is_echoed() {
    let mut h = Harness::new(pass_config());
    let a = h.connect(1);
    let b = h.connect(2);
    h.register(a, "foo");
    h.register(b, "baz");
    h.bnc.handle_bus(&BusMessage::event("net", "create").with("nick", "up"));
    h.take(a);
    h.take(b);

    let actions = Rc::new(RefCell::new(Vec::new()));
    let sink = actions.clone();
    h.bus.subscribe(
        filter([("protocol", "irc"), ("network", "net"), ("action", "privmsg")]),
        move |msg| sink.borrow_mut().push(msg.clone()),
    );

    h.feed(a, "PRIVMSG #a/net :hello there");
    let published = actions.borrow();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].str("to"), Some("#a"));
    assert_eq!(published[0].str("msg"), Some("hello there"));

    assert!(h.take(a).is_empty());
    assert_eq!(h.take(b), vec![":foo!bar@ircbnc PRIVMSG #a/net :hello there"]);
}

#[test]
fn unknown_network_targets_are_rejected() {
    let mut h = Harness::new(pass_config());
    let id = h.connect(1);
    h.register(id, "foo");
    h.feed(id, "PRIVMSG #a/nowhere :x");
    h.feed(id, "JOIN #a");
    assert_eq!(
        h.take(id),
        vec![
            ":ircbnc 401 foo #a/nowhere :No such nick/channel",
            ":ircbnc 403 foo #a :No such channel",
        ]
    );
}

#[test]
fn missing_listen_address_stays_idle() {
    let mut h = Harness::new(pass_config());
    h.bnc.iterate().unwrap();
    assert!(!h.bnc.is_listening());
    assert!(!h.bnc.has_timer("listen-retry"));
}

#[test]
fn drop_unsubscribes_from_bus() {
    let h = Harness::new(pass_config());
    let bus = h.bus.clone();
    assert_eq!(bus.len(), 1);
    drop(h);
    assert!(bus.is_empty());
}

#[test]
fn motd_file_is_sent_in_burst() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"first line\nsecond line\n").unwrap();
    let mut h = Harness::new(BncConfig {
        motd_file: Some(file.path().to_string_lossy().into_owned()),
        ..pass_config()
    });
    let id = h.connect(1);
    h.feed(id, "PASS correct");
    h.feed(id, "NICK foo");
    h.feed(id, "USER bar 0 * :Real Name");

    let lines = h.take(id);
    assert!(lines.contains(&":ircbnc 372 foo :- first line".to_string()));
    assert!(lines.contains(&":ircbnc 372 foo :- second line".to_string()));
    assert!(lines.iter().any(|l| l.starts_with(":ircbnc 376 foo")));
}

#[test]
fn unreadable_motd_degrades_to_422() {
    let mut h = Harness::new(BncConfig {
        motd_file: Some("/nonexistent/ircbnc/motd.txt".into()),
        ..pass_config()
    });
    let id = h.connect(1);
    h.feed(id, "PASS correct");
    h.feed(id, "NICK foo");
    h.feed(id, "USER bar 0 * :Real Name");
    assert!(h.take(id).contains(&":ircbnc 422 foo :MOTD File is missing".to_string()));
}
