//! Default value functions for configuration.

use super::ThrottleKind;

// =============================================================================
// Bouncer Defaults
// =============================================================================

pub fn default_server_name() -> String {
    "ircbnc".to_string()
}

pub fn default_network_name() -> String {
    "ircbnc".to_string()
}

pub fn default_max_auth_attempts() -> u32 {
    3
}

pub fn default_registration_timeout() -> u64 {
    30
}

pub fn default_listen_retry() -> u64 {
    30
}

// =============================================================================
// Upstream Defaults
// =============================================================================

pub fn default_reconnect_delay() -> u64 {
    30
}

// =============================================================================
// Scheduler Defaults
// =============================================================================

pub fn default_throttle() -> ThrottleKind {
    ThrottleKind::Adaptive
}

pub fn default_tick_ms() -> u64 {
    10
}
