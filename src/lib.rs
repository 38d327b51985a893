//! ircbnc - a single-threaded IRC bouncer.
//!
//! Local IRC clients connect to [`bnc::Bnc`]; each configured upstream
//! network is kept alive by an [`upstream::UpstreamNetwork`]. The two
//! sides only talk through the [`bus::MessageBus`], and the
//! [`scheduler::Scheduler`] drives every component with non-blocking ticks.

pub mod bnc;
pub mod bus;
pub mod config;
pub mod error;
pub mod net;
pub mod scheduler;
pub mod timer;
pub mod upstream;
