//! Outbound non-blocking connection.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::{read_bounded, resolve, write_best_effort, ReadOutcome};
use crate::error::NetError;

const STREAM: Token = Token(0);

/// Connection lifecycle of a [`StreamClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Something that happened on a [`StreamClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connected,
    Received(Vec<u8>),
    Sent(Vec<u8>),
    Disconnected {
        reason: String,
        errno: Option<i32>,
        errstr: Option<String>,
    },
}

/// A single outbound TCP connection driven by [`StreamClient::iterate`].
pub struct StreamClient {
    state: ClientState,
    poll: Poll,
    events: Events,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    readable: bool,
    pending: Vec<StreamEvent>,
}

impl StreamClient {
    pub fn new() -> Result<Self, NetError> {
        Ok(Self {
            state: ClientState::Disconnected,
            poll: Poll::new()?,
            events: Events::with_capacity(16),
            stream: None,
            peer: None,
            readable: false,
            pending: Vec::new(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// The resolved remote address of the current or last attempt.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Start connecting to `address` (`host:port`).
    ///
    /// Name resolution happens here and may block the calling tick. Fails
    /// unless the client is currently disconnected.
    pub fn connect(&mut self, address: &str) -> Result<(), NetError> {
        if self.state != ClientState::Disconnected {
            return Err(NetError::InvalidState(self.state));
        }
        let addr = resolve(address)?;
        let mut stream = TcpStream::connect(addr)?;
        self.poll
            .registry()
            .register(&mut stream, STREAM, Interest::READABLE | Interest::WRITABLE)?;

        debug!(address = %address, peer = %addr, "Connecting");
        self.stream = Some(stream);
        self.peer = Some(addr);
        self.readable = false;
        self.state = ClientState::Connecting;
        Ok(())
    }

    /// One non-blocking step. Returns everything that happened since the
    /// previous call, in order.
    pub fn iterate(&mut self) -> Vec<StreamEvent> {
        if self.state != ClientState::Disconnected {
            self.poll_once();
        }
        self.drain_events()
    }

    /// Events queued outside `iterate` (sends, explicit disconnects).
    pub fn drain_events(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.pending)
    }

    fn poll_once(&mut self) {
        if let Err(e) = self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            if e.kind() != io::ErrorKind::Interrupted {
                self.fail("poll-error", Some(e));
            }
            return;
        }

        let mut ready = false;
        for event in self.events.iter() {
            if event.token() != STREAM {
                continue;
            }
            ready = true;
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                self.readable = true;
            }
        }

        if self.state == ClientState::Connecting && ready {
            self.finish_connect();
        }
        if self.state == ClientState::Connected && self.readable {
            self.read_ready();
        }
    }

    fn finish_connect(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        match stream.take_error() {
            Ok(Some(e)) | Err(e) => {
                self.fail("connect-failed", Some(e));
                return;
            }
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(peer) => {
                info!(peer = %peer, "Connected");
                self.state = ClientState::Connected;
                self.pending.push(StreamEvent::Connected);
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => self.fail("connect-failed", Some(e)),
        }
    }

    fn read_ready(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match read_bounded(stream) {
            ReadOutcome::Data { chunks, drained } => {
                self.readable = !drained;
                self.pending
                    .extend(chunks.into_iter().map(StreamEvent::Received));
            }
            ReadOutcome::Closed(chunks) => {
                self.pending
                    .extend(chunks.into_iter().map(StreamEvent::Received));
                self.fail("connection closed by peer", None);
            }
            ReadOutcome::Failed(chunks, e) => {
                self.pending
                    .extend(chunks.into_iter().map(StreamEvent::Received));
                self.fail("read-error", Some(e));
            }
        }
    }

    /// Write `data` now. There is no send buffer: whatever the socket does
    /// not accept immediately is dropped with a warning.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, NetError> {
        if self.state != ClientState::Connected {
            return Err(NetError::NotConnected);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::NotConnected);
        };
        match write_best_effort(stream, data) {
            Ok(n) => {
                if n < data.len() {
                    warn!(written = n, total = data.len(), "Short write, remainder dropped");
                }
                self.pending.push(StreamEvent::Sent(data[..n].to_vec()));
                Ok(n)
            }
            Err(e) => {
                let err = io::Error::new(e.kind(), e.to_string());
                self.fail("write-error", Some(e));
                Err(NetError::Io(err))
            }
        }
    }

    /// Close the connection. Calling this while already disconnected does
    /// nothing, so at most one `Disconnected` event is produced.
    pub fn disconnect(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        self.close();
        self.pending.push(StreamEvent::Disconnected {
            reason: "disconnect-called".to_string(),
            errno: None,
            errstr: None,
        });
    }

    fn fail(&mut self, reason: &str, err: Option<io::Error>) {
        if self.state == ClientState::Disconnected {
            return;
        }
        warn!(
            reason = %reason,
            error = err.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "Connection lost"
        );
        self.close();
        self.pending.push(StreamEvent::Disconnected {
            reason: reason.to_string(),
            errno: err.as_ref().and_then(io::Error::raw_os_error),
            errstr: err.map(|e| e.to_string()),
        });
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = self.poll.registry().deregister(&mut stream);
        }
        self.readable = false;
        self.state = ClientState::Disconnected;
    }
}
