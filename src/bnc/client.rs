//! Per-connection state of a local bouncer client.

use std::time::Instant;

use bnc_proto::{DelimitedDataBuffer, MAX_LINE_LEN};

use crate::net::ConnectionId;

/// Registration progress of a local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Waiting for NICK and USER.
    Preauth,
    /// NICK and USER known, credentials not yet accepted.
    Unregistered,
    /// Fully registered; receives mirrored traffic.
    Registered,
}

/// One local client connection, owned by [`Bnc`](super::Bnc).
#[derive(Debug)]
pub struct BncClient {
    pub id: ConnectionId,
    pub nick: Option<String>,
    pub user: Option<String>,
    pub real_name: Option<String>,
    pub auth_attempts: u32,
    pub connected_at: Instant,
    /// PASS received before NICK/USER completed.
    pub(crate) pending_pass: Option<String>,
    pub(crate) buffer: DelimitedDataBuffer,
    state: RegistrationState,
    state_entered_at: Instant,
}

impl BncClient {
    pub fn new(id: ConnectionId, now: Instant) -> Self {
        Self {
            id,
            nick: None,
            user: None,
            real_name: None,
            auth_attempts: 0,
            connected_at: now,
            pending_pass: None,
            buffer: DelimitedDataBuffer::new().with_max_len(MAX_LINE_LEN),
            state: RegistrationState::Preauth,
            state_entered_at: now,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn state_entered_at(&self) -> Instant {
        self.state_entered_at
    }

    pub(crate) fn set_state(&mut self, state: RegistrationState, now: Instant) {
        self.state = state;
        self.state_entered_at = now;
    }

    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    /// Both NICK and USER have been seen.
    pub fn has_identity(&self) -> bool {
        self.nick.is_some() && self.user.is_some()
    }

    /// Target for numeric replies: the nick, or `*` before one is known.
    pub fn reply_target(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    /// `nick!user@host` as shown back to this client.
    pub fn prefix(&self, host: &str) -> String {
        format!(
            "{}!{}@{}",
            self.reply_target(),
            self.user.as_deref().unwrap_or("*"),
            host
        )
    }
}
