//! Configuration loading and management.
//!
//! - [`types`]: config structs, TOML loading and dotted-path lookup
//! - [`validation`]: startup sanity checks
//! - [`defaults`]: serde default functions

mod defaults;
mod types;
pub mod validation;

pub use types::{
    BncConfig, Config, ConfigError, IrcConfig, NetworkConfig, SchedulerConfig, ThrottleKind,
};
pub use validation::{validate, ValidationError};
