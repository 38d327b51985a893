//! Deferred callbacks keyed by name.
//!
//! A [`TimerList`] is owned by the component whose state its callbacks
//! mutate. Because a callback needs `&mut` access to that owner, the list
//! never runs callbacks itself while borrowed: the owner detaches due
//! timers with [`TimerList::take_due`] and fires them with
//! [`run_due`].
//!
//! At most one timer exists per name; adding a timer under a name that is
//! already scheduled replaces the old one.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::warn;

// ============================================================================
// Clocks
// ============================================================================

/// Monotonic time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

// ============================================================================
// Timer List
// ============================================================================

/// Callback run with the owning component when a timer fires.
pub type TimerCallback<C> = Box<dyn FnOnce(&mut C) -> anyhow::Result<()>>;

struct Timer<C> {
    seq: u64,
    fire_at: Instant,
    callback: TimerCallback<C>,
}

/// A timer detached from its list, ready to fire.
pub struct DueTimer<C> {
    pub name: String,
    callback: TimerCallback<C>,
}

impl<C> DueTimer<C> {
    pub fn fire(self, ctx: &mut C) -> anyhow::Result<()> {
        (self.callback)(ctx)
    }
}

/// Outcome of one round of timer firing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerReport {
    pub fired: usize,
    pub failed: usize,
}

/// Longest delay [`TimerList::add_by_seconds`] schedules (about 100 years).
pub const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Named timers over a context type `C`.
pub struct TimerList<C> {
    clock: Rc<dyn Clock>,
    timers: HashMap<String, Timer<C>>,
    seq: u64,
    auto_names: u64,
}

impl<C> TimerList<C> {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            timers: HashMap::new(),
            seq: 0,
            auto_names: 0,
        }
    }

    /// The clock this list schedules against.
    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Schedule `callback` to run `delay` from now. Returns the timer name.
    ///
    /// A delay that does not fit in an [`Instant`] is clamped to
    /// [`MAX_DELAY`].
    pub fn add_by_seconds<F>(&mut self, delay: Duration, name: Option<&str>, callback: F) -> String
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + 'static,
    {
        let now = self.clock.now();
        let fire_at = match now.checked_add(delay) {
            Some(at) => at,
            None => {
                warn!(?delay, "Timer delay out of range, clamping");
                now.checked_add(MAX_DELAY).unwrap_or(now)
            }
        };
        self.add_by_time(fire_at, name, callback)
    }

    /// Schedule `callback` to run at `fire_at`. Returns the timer name.
    pub fn add_by_time<F>(&mut self, fire_at: Instant, name: Option<&str>, callback: F) -> String
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + 'static,
    {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.next_auto_name(),
        };
        self.seq += 1;
        self.timers.insert(
            name.clone(),
            Timer {
                seq: self.seq,
                fire_at,
                callback: Box::new(callback),
            },
        );
        name
    }

    /// Generated names skip any name already scheduled, so an anonymous
    /// timer never replaces an explicit one.
    fn next_auto_name(&mut self) -> String {
        loop {
            self.auto_names += 1;
            let name = format!("timer-{}", self.auto_names);
            if !self.timers.contains_key(&name) {
                return name;
            }
        }
    }

    /// Cancel a timer. Returns whether one was scheduled.
    pub fn remove(&mut self, name: &str) -> bool {
        self.timers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// When the named timer is due.
    pub fn fire_at(&self, name: &str) -> Option<Instant> {
        self.timers.get(name).map(|t| t.fire_at)
    }

    /// Detach every timer with `fire_at <= now`.
    pub fn take_due(&mut self) -> Vec<DueTimer<C>> {
        let now = self.clock.now();
        let due_names: Vec<String> = self
            .timers
            .iter()
            .filter(|(_, t)| t.fire_at <= now)
            .map(|(name, _)| name.clone())
            .collect();

        let mut due: Vec<(Instant, u64, DueTimer<C>)> = due_names
            .into_iter()
            .filter_map(|name| {
                self.timers.remove(&name).map(|t| {
                    (t.fire_at, t.seq, DueTimer {
                        name,
                        callback: t.callback,
                    })
                })
            })
            .collect();
        due.sort_by_key(|(at, seq, _)| (*at, *seq));
        due.into_iter().map(|(_, _, timer)| timer).collect()
    }

    /// Fire due timers against a context that does not own this list.
    pub fn check_timers(&mut self, ctx: &mut C) -> TimerReport {
        run_due(ctx, self.take_due())
    }
}

/// Fire detached timers in order. A failing callback is logged and does not
/// stop the rest.
pub fn run_due<C>(ctx: &mut C, due: Vec<DueTimer<C>>) -> TimerReport {
    let mut report = TimerReport::default();
    for timer in due {
        let name = timer.name.clone();
        report.fired += 1;
        if let Err(e) = timer.fire(ctx) {
            report.failed += 1;
            warn!(timer = %name, error = %e, "Timer callback failed");
        }
    }
    report
}
