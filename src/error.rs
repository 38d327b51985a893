//! Unified error handling for ircbnc.
//!
//! Transport failures are [`NetError`]; bouncer-level failures are
//! [`BncError`]. Configuration errors live with the config loader.
//! Component steps and timer callbacks use `anyhow::Result` so any of
//! these can be propagated with `?` and logged by the scheduler.

use std::io;

use thiserror::Error;

use crate::net::{ClientState, ConnectionId};

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors raised by the non-blocking socket layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("could not resolve address: {0}")]
    Resolve(String),

    #[error("connect called while {0:?}")]
    InvalidState(ClientState),

    #[error("not connected")]
    NotConnected,

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// The OS error number, if this wraps an I/O error that carries one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Bind { source, .. } => source.raw_os_error(),
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

// ============================================================================
// Bouncer Errors
// ============================================================================

/// Errors raised while servicing local bouncer clients.
#[derive(Debug, Error)]
pub enum BncError {
    #[error("no such client: {0}")]
    UnknownClient(ConnectionId),

    #[error("not listening")]
    NotListening,

    #[error(transparent)]
    Net(#[from] NetError),
}
