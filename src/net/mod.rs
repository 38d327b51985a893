//! Non-blocking TCP transport.
//!
//! Both halves poll with a zero timeout through `mio` and never block the
//! scheduler tick, except for DNS resolution in [`StreamClient::connect`].
//! Instead of invoking callbacks, each `iterate`/`poll_sockets` call returns
//! the events that happened since the previous call, in order.

mod client;
mod server;

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

pub use client::{ClientState, StreamClient, StreamEvent};
pub use server::{ServerEvent, StreamServer};

use crate::error::NetError;

/// Bytes requested per `read` call.
pub const READ_CHUNK: usize = 8 * 1024;

/// Upper bound on `read` calls per socket per tick.
pub const MAX_READS_PER_TICK: usize = 16;

/// Opaque identifier for one socket. Never reused within a process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolve `address` to its first socket address. May block on DNS.
pub(crate) fn resolve(address: &str) -> Result<SocketAddr, NetError> {
    address
        .to_socket_addrs()
        .map_err(|_| NetError::Resolve(address.to_string()))?
        .next()
        .ok_or_else(|| NetError::Resolve(address.to_string()))
}

/// Outcome of one bounded read pass over a socket.
pub(crate) enum ReadOutcome {
    /// Chunks read; `drained` is false when the read budget ran out first.
    Data { chunks: Vec<Vec<u8>>, drained: bool },
    /// Peer closed the stream (zero-length read) after the given chunks.
    Closed(Vec<Vec<u8>>),
    /// A read failed after the given chunks.
    Failed(Vec<Vec<u8>>, io::Error),
}

pub(crate) fn read_bounded<R: io::Read>(reader: &mut R) -> ReadOutcome {
    let mut chunks = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut reads = 0;
    while reads < MAX_READS_PER_TICK {
        match reader.read(&mut buf) {
            Ok(0) => return ReadOutcome::Closed(chunks),
            Ok(n) => {
                reads += 1;
                chunks.push(buf[..n].to_vec());
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return ReadOutcome::Data {
                    chunks,
                    drained: true,
                };
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Failed(chunks, e),
        }
    }
    ReadOutcome::Data {
        chunks,
        drained: false,
    }
}

/// Write as much of `data` as the socket takes right now.
pub(crate) fn write_best_effort<W: io::Write>(writer: &mut W, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match writer.write(&data[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_bounded_reports_close_after_data() {
        let mut src = Cursor::new(b"hello".to_vec());
        match read_bounded(&mut src) {
            ReadOutcome::Closed(chunks) => assert_eq!(chunks, vec![b"hello".to_vec()]),
            _ => panic!("expected close"),
        }
    }

    #[test]
    fn read_bounded_stops_at_budget() {
        let mut src = Cursor::new(vec![b'x'; READ_CHUNK * (MAX_READS_PER_TICK + 1)]);
        match read_bounded(&mut src) {
            ReadOutcome::Data { chunks, drained } => {
                assert_eq!(chunks.len(), MAX_READS_PER_TICK);
                assert!(!drained);
            }
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn resolve_rejects_garbage() {
        assert!(matches!(resolve("not an address"), Err(NetError::Resolve(_))));
        assert!(resolve("127.0.0.1:6667").is_ok());
    }

    #[test]
    fn write_best_effort_writes_everything_to_vec() {
        let mut out = Vec::new();
        assert_eq!(write_best_effort(&mut out, b"PING :x\r\n").unwrap(), 9);
        assert_eq!(out, b"PING :x\r\n");
    }
}
