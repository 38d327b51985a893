//! Non-blocking multiplexed listener.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::{read_bounded, resolve, write_best_effort, ConnectionId, ReadOutcome};
use crate::error::NetError;

const LISTENER: Token = Token(0);

/// Something that happened on a [`StreamServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected(ConnectionId),
    Received(ConnectionId, Vec<u8>),
    Disconnected { id: ConnectionId, reason: String },
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    readable: bool,
}

type SendHook = Box<dyn FnMut(ConnectionId, &[u8])>;

/// A listening socket plus its table of accepted connections.
pub struct StreamServer {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
    pending: Vec<ServerEvent>,
    on_send: Option<SendHook>,
}

impl StreamServer {
    pub fn new() -> Result<Self, NetError> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            listener: None,
            connections: HashMap::new(),
            next_id: 1,
            pending: Vec::new(),
            on_send: None,
        })
    }

    /// Install an observer called before every [`client_send`](Self::client_send).
    pub fn set_send_hook<F>(&mut self, hook: F)
    where
        F: FnMut(ConnectionId, &[u8]) + 'static,
    {
        self.on_send = Some(Box::new(hook));
    }

    /// Bind and listen on `address`. A failure leaves the server idle.
    pub fn listen(&mut self, address: &str) -> Result<SocketAddr, NetError> {
        let addr = resolve(address)?;
        let mut listener = TcpListener::bind(addr).map_err(|source| NetError::Bind {
            addr: address.to_string(),
            source,
        })?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local = listener.local_addr()?;
        info!(addr = %local, "Listening");
        self.listener = Some(listener);
        Ok(local)
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|c| c.peer)
    }

    /// One non-blocking pass: report forced disconnects queued since the
    /// last call, then accept and read whatever is ready.
    pub fn poll_sockets(&mut self) -> Vec<ServerEvent> {
        let mut out = std::mem::take(&mut self.pending);

        if let Err(e) = self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            if e.kind() != io::ErrorKind::Interrupted {
                warn!(error = %e, "Poll failed");
            }
            return out;
        }

        let mut accept = false;
        for event in self.events.iter() {
            if event.token() == LISTENER {
                accept = true;
            } else if let Some(conn) = self.connections.get_mut(&ConnectionId(event.token().0 as u64))
                && (event.is_readable() || event.is_read_closed() || event.is_error())
            {
                conn.readable = true;
            }
        }

        if accept {
            self.accept_ready(&mut out);
        }

        for id in self.connection_ids() {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            if !conn.readable {
                continue;
            }
            match read_bounded(&mut conn.stream) {
                ReadOutcome::Data { chunks, drained } => {
                    conn.readable = !drained;
                    out.extend(chunks.into_iter().map(|c| ServerEvent::Received(id, c)));
                }
                ReadOutcome::Closed(chunks) => {
                    out.extend(chunks.into_iter().map(|c| ServerEvent::Received(id, c)));
                    self.close(id, "connection closed by peer");
                }
                ReadOutcome::Failed(chunks, e) => {
                    out.extend(chunks.into_iter().map(|c| ServerEvent::Received(id, c)));
                    debug!(conn = %id, error = %e, "Read failed");
                    self.close(id, "read-error");
                }
            }
        }

        // Disconnects from this pass were queued by `close`.
        out.append(&mut self.pending);
        out
    }

    fn accept_ready(&mut self, out: &mut Vec<ServerEvent>) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        loop {
            let (mut stream, peer) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            };
            let id = ConnectionId(self.next_id);
            self.next_id += 1;
            if let Err(e) = self
                .poll
                .registry()
                .register(&mut stream, Token(id.0 as usize), Interest::READABLE)
            {
                warn!(peer = %peer, error = %e, "Failed to register connection");
                continue;
            }
            debug!(conn = %id, peer = %peer, "Accepted");
            self.connections.insert(
                id,
                Connection {
                    stream,
                    peer,
                    readable: true,
                },
            );
            out.push(ServerEvent::Connected(id));
        }
    }

    /// Write `data` to one connection. The send hook sees the data first.
    pub fn client_send(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize, NetError> {
        if let Some(hook) = self.on_send.as_mut() {
            hook(id, data);
        }
        let Some(conn) = self.connections.get_mut(&id) else {
            return Err(NetError::UnknownConnection(id));
        };
        match write_best_effort(&mut conn.stream, data) {
            Ok(n) => {
                if n < data.len() {
                    warn!(conn = %id, written = n, total = data.len(), "Short write, remainder dropped");
                }
                Ok(n)
            }
            Err(e) => {
                self.close(id, "write-error");
                Err(NetError::Io(e))
            }
        }
    }

    /// Force a connection closed. The `Disconnected` event is reported by
    /// the next [`poll_sockets`](Self::poll_sockets).
    pub fn client_disconnect(&mut self, id: ConnectionId, reason: &str) -> bool {
        self.close(id, reason)
    }

    /// Close every connection and stop listening.
    pub fn shutdown(&mut self) {
        for id in self.connection_ids() {
            self.close(id, "shutdown");
        }
        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(&mut listener);
        }
    }

    fn close(&mut self, id: ConnectionId, reason: &str) -> bool {
        let Some(mut conn) = self.connections.remove(&id) else {
            return false;
        };
        let _ = self.poll.registry().deregister(&mut conn.stream);
        debug!(conn = %id, reason = %reason, "Connection closed");
        self.pending.push(ServerEvent::Disconnected {
            id,
            reason: reason.to_string(),
        });
        true
    }
}
