//! In-process publish/subscribe bus.
//!
//! Messages are untyped JSON-like maps. A subscription carries a filter
//! map; a message is delivered only when every filter key is present on
//! the message with an equal value. Delivery is synchronous, in
//! subscription order.
//!
//! The bus lives behind an `Rc` and is mutated through `&self`, so a
//! subscriber may subscribe or unsubscribe while a publish is running.
//! Subscribers must not publish from inside their callback; components
//! queue received messages and act on them from their own `iterate()`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::trace;

/// An untyped bus message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BusMessage(Map<String, Value>);

impl BusMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// An upstream event for `network`: `protocol=irc, event=<event>`.
    pub fn event(network: &str, event: &str) -> Self {
        Self::new()
            .with("protocol", "irc")
            .with("network", network)
            .with("event", event)
    }

    /// A request towards an upstream network: `protocol=irc, action=<action>`.
    pub fn action(network: &str, action: &str) -> Self {
        Self::new()
            .with("protocol", "irc")
            .with("network", network)
            .with("action", action)
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A string-valued key.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// An array-of-strings key; non-string entries are skipped.
    pub fn strings(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether every key in `filter` is present here with an equal value.
    pub fn matches(&self, filter: &Map<String, Value>) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.0.get(key) == Some(expected))
    }
}

impl From<Map<String, Value>> for BusMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// Build a filter map from string pairs.
pub fn filter<const N: usize>(pairs: [(&str, &str); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::from(v)))
        .collect()
}

/// Identifier returned by [`MessageBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Rc<dyn Fn(&BusMessage)>;

struct Subscription {
    id: SubscriptionId,
    filter: Map<String, Value>,
    callback: Callback,
}

/// Filtered, synchronous publish/subscribe bus.
#[derive(Default)]
pub struct MessageBus {
    subscriptions: RefCell<Vec<Subscription>>,
    next_id: Cell<u64>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for messages matching `filter`. An empty filter
    /// matches everything.
    pub fn subscribe<F>(&self, filter: Map<String, Value>, callback: F) -> SubscriptionId
    where
        F: Fn(&BusMessage) + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            filter,
            callback: Rc::new(callback),
        });
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver `message` to every matching subscriber. Returns how many
    /// callbacks ran.
    ///
    /// Matching is decided against a snapshot taken before delivery; a
    /// subscription removed by an earlier callback in the same cycle is
    /// skipped.
    pub fn publish(&self, message: &BusMessage) -> usize {
        let targets: Vec<(SubscriptionId, Callback)> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|s| message.matches(&s.filter))
            .map(|s| (s.id, Rc::clone(&s.callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in targets {
            if !self.is_subscribed(id) {
                continue;
            }
            callback(message);
            delivered += 1;
        }
        trace!(delivered, message = %message, "Bus publish");
        delivered
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.borrow().iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.borrow().is_empty()
    }
}
