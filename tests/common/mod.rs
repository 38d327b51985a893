//! Integration test common infrastructure.
//!
//! Everything runs on the test thread: the bouncer components are pumped
//! by hand while a plain blocking [`TestClient`] with a short read timeout
//! plays the other side of the socket.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::time::{Duration, Instant};

use bnc_proto::{DelimitedDataBuffer, LineParser};
use ircbnc::bnc::{Bnc, BncDeps};
use ircbnc::bus::MessageBus;
use ircbnc::config::BncConfig;
use ircbnc::scheduler::Iterable;
use ircbnc::timer::{Clock, SystemClock};

/// How long `expect` keeps pumping before giving up.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Line-oriented blocking peer: a local IRC client or a fake upstream server.
pub struct TestClient {
    stream: TcpStream,
    buffer: DelimitedDataBuffer,
    closed: bool,
    /// Received lines not yet examined by `expect`.
    pending: VecDeque<String>,
    /// Every line received so far, for failure messages.
    pub seen: Vec<String>,
}

impl TestClient {
    pub fn connect(addr: SocketAddr) -> Self {
        Self::from_stream(TcpStream::connect(addr).expect("connect"))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_millis(5)))
            .expect("set_read_timeout");
        Self {
            stream,
            buffer: DelimitedDataBuffer::new(),
            closed: false,
            pending: VecDeque::new(),
            seen: Vec::new(),
        }
    }

    pub fn send(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .expect("write");
    }

    /// Write bytes as-is, without a line terminator.
    pub fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).expect("write");
    }

    /// One read attempt. Returns the complete lines it produced.
    fn poll(&mut self) -> Vec<String> {
        if self.closed {
            return Vec::new();
        }
        let mut chunk = [0u8; 4096];
        match self.stream.read(&mut chunk) {
            Ok(0) => self.closed = true,
            Ok(n) => self.buffer.receive(&chunk[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => self.closed = true,
        }
        // The buffer splits on `\n` and leaves the CR for the parser; this
        // peer compares raw lines, so drop it here.
        let lines: Vec<String> = self
            .buffer
            .consume_all()
            .into_iter()
            .map(|l| l.strip_suffix('\r').map(str::to_owned).unwrap_or(l))
            .collect();
        self.seen.extend(lines.iter().cloned());
        lines
    }

    /// Pump until a line matching `pred` arrives and return it. Lines that
    /// do not match are skipped.
    pub fn expect(&mut self, mut pump: impl FnMut(), pred: impl Fn(&str) -> bool) -> String {
        let start = Instant::now();
        while start.elapsed() < DEADLINE {
            pump();
            let lines = self.poll();
            self.pending.extend(lines);
            while let Some(line) = self.pending.pop_front() {
                if pred(&line) {
                    return line;
                }
            }
        }
        panic!("no matching line within {DEADLINE:?}; saw {:#?}", self.seen);
    }

    /// Pump until the peer closes the connection.
    pub fn expect_closed(&mut self, mut pump: impl FnMut()) {
        let start = Instant::now();
        while start.elapsed() < DEADLINE {
            pump();
            self.poll();
            if self.closed {
                return;
            }
        }
        panic!("connection still open after {DEADLINE:?}");
    }

    /// Drop the connection from this side.
    pub fn close(self) {
        drop(self.stream);
    }
}

/// Accept one connection on `listener` while pumping.
pub fn accept(listener: &TcpListener, mut pump: impl FnMut()) -> TestClient {
    listener.set_nonblocking(true).expect("set_nonblocking");
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        pump();
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).expect("set_nonblocking");
                return TestClient::from_stream(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(e) => panic!("accept failed: {e}"),
        }
    }
    panic!("no connection within {DEADLINE:?}");
}

pub fn bnc_config() -> BncConfig {
    BncConfig {
        listen: Some("127.0.0.1:0".into()),
        require_pass: Some("secret".into()),
        max_auth_attempts: 2,
        ..BncConfig::default()
    }
}

/// A bouncer listening on an ephemeral loopback port.
pub fn spawn_bnc(config: BncConfig, bus: Rc<MessageBus>) -> (Bnc, SocketAddr) {
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    let mut bnc = Bnc::new(
        config,
        BncDeps {
            bus,
            parser: Rc::new(LineParser::new()),
            clock,
        },
    )
    .expect("bnc");
    bnc.iterate().expect("iterate");
    let addr = bnc.local_addr().expect("listening");
    (bnc, addr)
}

/// Send PASS/NICK/USER and wait for RPL_WELCOME.
pub fn register(client: &mut TestClient, bnc: &mut Bnc, nick: &str) {
    client.send("PASS secret");
    client.send(&format!("NICK {nick}"));
    client.send("USER bar 0 * :Test User");
    client.expect(
        || {
            bnc.iterate().expect("iterate");
        },
        |l| l.contains(" 001 "),
    );
}
