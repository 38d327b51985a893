//! Configuration validation.
//!
//! Problems found here are reported at startup but do not stop the
//! process; the bouncer degrades instead (idle listener, refused logins).

use std::collections::HashSet;

use thiserror::Error;

use super::Config;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("irc.bnc.listen is not set; no local clients can connect")]
    MissingListen,
    #[error("irc.bnc.max-auth-attempts is 0; every wrong password disconnects")]
    ZeroMaxAuthAttempts,
    #[error("no credentials configured and no-authentication is off; all logins will be refused")]
    NoCredentials,
    #[error("irc.network entry {0} has no name")]
    NetworkMissingName(usize),
    #[error("irc.network '{0}' has no address")]
    NetworkMissingAddress(String),
    #[error("irc.network '{0}' has no nick")]
    NetworkMissingNick(String),
    #[error("irc.network '{0}' is defined more than once")]
    DuplicateNetwork(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let bnc = &config.irc.bnc;

    if bnc.listen.as_deref().is_none_or(str::is_empty) {
        errors.push(ValidationError::MissingListen);
    }
    if bnc.max_auth_attempts == 0 {
        errors.push(ValidationError::ZeroMaxAuthAttempts);
    }
    if !bnc.no_authentication && !bnc.has_credentials() {
        errors.push(ValidationError::NoCredentials);
    }

    let mut seen = HashSet::new();
    for (index, net) in config.irc.networks.iter().enumerate() {
        if net.name.is_empty() {
            errors.push(ValidationError::NetworkMissingName(index));
            continue;
        }
        if !seen.insert(net.name.as_str()) {
            errors.push(ValidationError::DuplicateNetwork(net.name.clone()));
        }
        if net.address.is_empty() {
            errors.push(ValidationError::NetworkMissingAddress(net.name.clone()));
        }
        if net.nick.is_empty() {
            errors.push(ValidationError::NetworkMissingNick(net.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
