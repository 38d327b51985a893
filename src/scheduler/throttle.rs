//! Tick-rate policies.
//!
//! The scheduler calls [`Throttle::throttle`] once after every full pass
//! over its components. All policies sleep on the scheduler thread.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::ThrottleKind;

pub trait Throttle {
    fn throttle(&mut self);
}

/// Never sleeps. Used by tests that drive ticks by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThrottle;

impl Throttle for NoThrottle {
    fn throttle(&mut self) {}
}

/// Sleeps a fixed interval every tick.
#[derive(Debug, Clone, Copy)]
pub struct FixedThrottle {
    interval: Duration,
}

impl FixedThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Throttle for FixedThrottle {
    fn throttle(&mut self) {
        thread::sleep(self.interval);
    }
}

/// Sleeps whatever is left of `target` since the previous tick ended.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveThrottle {
    target: Duration,
    last: Option<Instant>,
}

impl AdaptiveThrottle {
    pub fn new(target: Duration) -> Self {
        Self { target, last: None }
    }

    /// How long to sleep if a tick ends at `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self.target.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

impl Throttle for AdaptiveThrottle {
    fn throttle(&mut self) {
        let pause = self.remaining(Instant::now());
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        self.last = Some(Instant::now());
    }
}

/// Build the configured policy.
pub fn from_config(kind: ThrottleKind, tick: Duration) -> Box<dyn Throttle> {
    match kind {
        ThrottleKind::None => Box::new(NoThrottle),
        ThrottleKind::Fixed => Box::new(FixedThrottle::new(tick)),
        ThrottleKind::Adaptive => Box::new(AdaptiveThrottle::new(tick)),
    }
}
