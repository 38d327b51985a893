//! Cooperative single-threaded scheduler.
//!
//! Every registered component gets one non-blocking `iterate()` call per
//! tick, in registration order, followed by one call to the throttle.
//! A component that returns an error is logged and stays registered.

pub mod throttle;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, warn};

pub use throttle::{AdaptiveThrottle, FixedThrottle, NoThrottle, Throttle};

/// A unit of work driven by the scheduler. `iterate` must not block.
pub trait Iterable {
    fn iterate(&mut self) -> anyhow::Result<()>;
}

/// Shared handle to a scheduled component.
pub type Component = Rc<RefCell<dyn Iterable>>;

/// Why [`Scheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A [`StopHandle`] asked the loop to end.
    Stopped,
    /// No components were left to run.
    Exhausted,
}

/// Cloneable request to end [`Scheduler::run`] after the current tick.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }

    fn reset(&self) {
        self.0.set(false);
    }
}

struct Entry {
    alias: Option<String>,
    component: Component,
}

/// Runs components round-robin until stopped or empty.
pub struct Scheduler {
    entries: Vec<Entry>,
    throttle: Box<dyn Throttle>,
    stop: StopHandle,
}

impl Scheduler {
    pub fn new(throttle: Box<dyn Throttle>) -> Self {
        Self {
            entries: Vec::new(),
            throttle,
            stop: StopHandle::default(),
        }
    }

    /// Register a component, optionally under an alias for later removal.
    pub fn add(&mut self, component: Component, alias: Option<&str>) {
        debug!(alias = alias.unwrap_or("-"), "Component added");
        self.entries.push(Entry {
            alias: alias.map(str::to_string),
            component,
        });
    }

    /// Remove every component registered under `alias`.
    pub fn remove_by_alias(&mut self, alias: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.alias.as_deref() != Some(alias));
        self.entries.len() != before
    }

    /// Remove a component by identity.
    pub fn remove_by_object(&mut self, component: &Component) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !std::ptr::addr_eq(Rc::as_ptr(&e.component), Rc::as_ptr(component)));
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// One pass over every component, then the throttle. Returns the number
    /// of components that failed.
    pub fn tick(&mut self) -> usize {
        let snapshot: Vec<(Option<String>, Component)> = self
            .entries
            .iter()
            .map(|e| (e.alias.clone(), Rc::clone(&e.component)))
            .collect();

        let mut failed = 0;
        for (alias, component) in snapshot {
            let result = match component.try_borrow_mut() {
                Ok(mut c) => c.iterate(),
                Err(_) => {
                    warn!(alias = alias.as_deref().unwrap_or("-"), "Component busy, skipped");
                    continue;
                }
            };
            if let Err(e) = result {
                failed += 1;
                warn!(
                    alias = alias.as_deref().unwrap_or("-"),
                    error = %e,
                    "Component iterate failed"
                );
            }
        }

        self.throttle.throttle();
        failed
    }

    /// Tick until stopped or until no components remain.
    pub fn run(&mut self) -> RunOutcome {
        loop {
            if self.stop.is_stopped() {
                self.stop.reset();
                return RunOutcome::Stopped;
            }
            if self.entries.is_empty() {
                return RunOutcome::Exhausted;
            }
            self.tick();
        }
    }
}
