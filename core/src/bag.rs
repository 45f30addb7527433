//! # ERROR BAG
//!
//! Field-scoped error store. A `required` entry always sits first in its key's list; in exclusive
//! mode it is also the only entry. Listeners run synchronously, in subscription order, after every
//! mutating call, so state read right after a mutation is already current.

use crate::rules::REQUIRED;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    /// Scoped key: `field` in the default scope, `scope.field` elsewhere.
    pub field: String,
    pub message: String,
    pub rule_kind: String,
}

impl ErrorEntry {
    pub fn new(field: impl Into<String>, message: impl Into<String>, rule_kind: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rule_kind: rule_kind.into(),
        }
    }

    pub fn is_required(&self) -> bool {
        self.rule_kind == REQUIRED
    }
}

/// Observer invoked with the bag after each mutation.
pub type Listener = Arc<dyn Fn(&ErrorBag) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Disposer returned by [`ListenerSet::subscribe`].
pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    id: u64,
}

impl Subscription {
    /// Stop receiving notifications. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Ordered listener registry. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct ListenerSet {
    inner: Arc<Mutex<Listeners>>,
}

impl ListenerSet {
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ErrorBag) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let mut listeners = self.inner.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, listener));
        Subscription {
            listeners: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener, in subscription order, with `bag`.
    pub fn notify(&self, bag: &ErrorBag) {
        // Snapshot so a listener may unsubscribe itself.
        let snapshot: Vec<Listener> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(bag);
        }
    }
}

/// **ERROR BAG**
///
/// **PURPOSE**: Ordered per-key error lists with change notification.
pub struct ErrorBag {
    entries: BTreeMap<String, Vec<ErrorEntry>>,
    exclusive_required: bool,
    /// Bumped by every mutating call.
    revision: u64,
    listeners: ListenerSet,
}

impl ErrorBag {
    pub fn new() -> Self {
        Self::with_exclusive_required(true)
    }

    /// `exclusive` makes a `required` entry supersede every other entry of its key.
    pub fn with_exclusive_required(exclusive: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            exclusive_required: exclusive,
            revision: 0,
            listeners: ListenerSet::default(),
        }
    }

    /// Copy of the recorded entries without any listeners attached.
    pub fn snapshot(&self) -> ErrorBag {
        Self {
            entries: self.entries.clone(),
            exclusive_required: self.exclusive_required,
            revision: self.revision,
            listeners: ListenerSet::default(),
        }
    }

    /// **ADD ENTRY**
    ///
    /// No-op for an empty key or message.
    pub fn add(&mut self, key: &str, message: &str, rule_kind: &str) {
        if self.push(ErrorEntry::new(key, message, rule_kind)) {
            self.notify();
        }
    }

    /// Replace a key's list with `entries`, applying the usual ordering, and notify once.
    pub fn replace(&mut self, key: &str, entries: Vec<ErrorEntry>) {
        self.entries.remove(key);
        for entry in entries {
            self.push(ErrorEntry { field: key.to_string(), ..entry });
        }
        self.notify();
    }

    fn push(&mut self, entry: ErrorEntry) -> bool {
        if entry.field.is_empty() || entry.message.is_empty() {
            return false;
        }

        let exclusive = self.exclusive_required;
        let list = self.entries.entry(entry.field.clone()).or_default();
        if entry.is_required() {
            if exclusive {
                list.clear();
            }
            list.insert(0, entry);
        } else if exclusive && list.first().map_or(false, ErrorEntry::is_required) {
            return false;
        } else {
            list.push(entry);
        }
        true
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.notify();
    }

    /// Drop several keys with a single notification.
    pub fn remove_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.entries.remove(key);
        }
        self.notify();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.notify();
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.get(key).map_or(false, |list| !list.is_empty())
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|list| list.first())
            .map(|entry| entry.message.as_str())
    }

    /// Every message recorded for `key`, in display order.
    pub fn get(&self, key: &str) -> Vec<&str> {
        self.entries(key)
            .iter()
            .map(|entry| entry.message.as_str())
            .collect()
    }

    pub fn entries(&self, key: &str) -> &[ErrorEntry] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn any(&self) -> bool {
        self.entries.values().any(|list| !list.is_empty())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Flattened `key -> messages` map.
    pub fn all_by_field(&self) -> BTreeMap<String, Vec<String>> {
        self.entries
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(key, list)| {
                (
                    key.clone(),
                    list.iter().map(|entry| entry.message.clone()).collect(),
                )
            })
            .collect()
    }

    /// **SUBSCRIBE**
    ///
    /// Listeners receive the bag itself and must not call back into whatever owns it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ErrorBag) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of mutating calls so far, including ones that changed nothing.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn notify(&mut self) {
        self.revision += 1;
        self.listeners.notify(self);
    }
}

impl Default for ErrorBag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorBag")
            .field("entries", &self.entries)
            .field("exclusive_required", &self.exclusive_required)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mod ordering_tests {
        use super::*;

        #[test]
        fn test_required_goes_first() {
            let mut bag = ErrorBag::with_exclusive_required(false);
            bag.add("email", "bad format", "email");
            bag.add("email", "missing", "required");
            assert_eq!(bag.get("email"), vec!["missing", "bad format"]);
            assert_eq!(bag.first("email"), Some("missing"));
        }

        #[test]
        fn test_exclusive_required_supersedes() {
            let mut bag = ErrorBag::new();
            bag.add("email", "bad format", "email");
            bag.add("email", "missing", "required");
            bag.add("email", "too short", "min");
            assert_eq!(bag.get("email"), vec!["missing"]);
        }

        #[test]
        fn test_append_order() {
            let mut bag = ErrorBag::new();
            bag.add("name", "one", "min");
            bag.add("name", "two", "alpha");
            assert_eq!(bag.get("name"), vec!["one", "two"]);
            assert_eq!(bag.count(), 2);
        }

        #[test]
        fn test_empty_key_or_message_ignored() {
            let mut bag = ErrorBag::new();
            bag.add("", "message", "min");
            bag.add("name", "", "min");
            assert!(!bag.any());
            assert!(bag.keys().is_empty());
        }

        #[test]
        fn test_replace_rekeys_entries() {
            let mut bag = ErrorBag::new();
            bag.add("login.email", "stale", "email");
            bag.replace(
                "login.email",
                vec![
                    ErrorEntry::new("ignored", "fresh", "email"),
                    ErrorEntry::new("ignored", "missing", "required"),
                ],
            );
            assert_eq!(bag.get("login.email"), vec!["missing"]);
            assert_eq!(bag.entries("login.email")[0].field, "login.email");
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_queries() {
            let mut bag = ErrorBag::new();
            bag.add("b", "b1", "min");
            bag.add("a", "a1", "email");
            assert!(bag.has("a"));
            assert!(!bag.has("c"));
            assert_eq!(bag.keys(), vec!["a", "b"]);
            assert!(bag.get("c").is_empty());

            let all = bag.all_by_field();
            assert_eq!(all.get("a"), Some(&vec!["a1".to_string()]));

            bag.remove("a");
            assert!(!bag.has("a"));
            bag.clear();
            assert!(!bag.any());
        }

        #[test]
        fn test_entries_serialize() {
            let entry = ErrorEntry::new("login.email", "Bad", "email");
            let json = serde_json::to_value(&entry).unwrap();
            assert_eq!(json["ruleKind"], "email");
            assert_eq!(json["field"], "login.email");
        }
    }

    mod listener_tests {
        use super::*;

        #[test]
        fn test_listeners_run_in_order_with_fresh_state() {
            let mut bag = ErrorBag::new();
            let seen = Arc::new(Mutex::new(Vec::new()));

            let first = Arc::clone(&seen);
            let _a = bag.subscribe(move |bag| first.lock().push(format!("first:{}", bag.count())));
            let second = Arc::clone(&seen);
            let _b = bag.subscribe(move |bag| second.lock().push(format!("second:{}", bag.count())));

            bag.add("name", "missing", "required");
            assert_eq!(*seen.lock(), vec!["first:1", "second:1"]);
        }

        #[test]
        fn test_every_mutation_notifies() {
            let mut bag = ErrorBag::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let _sub = bag.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

            bag.add("name", "missing", "required");
            bag.remove("name");
            bag.clear();
            bag.replace("name", Vec::new());
            assert_eq!(calls.load(Ordering::SeqCst), 4);
            assert_eq!(bag.revision(), 4);
        }

        #[test]
        fn test_snapshot_detaches_listeners() {
            let mut bag = ErrorBag::with_exclusive_required(false);
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let _sub = bag.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            bag.add("name", "one", "min");

            let mut copy = bag.snapshot();
            assert_eq!(copy.get("name"), vec!["one"]);
            assert_eq!(copy.listener_count(), 0);

            copy.add("name", "two", "min");
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(bag.get("name"), vec!["one"]);
        }

        #[test]
        fn test_shared_listener_set_notifies_with_given_bag() {
            let listeners = ListenerSet::default();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let sub = listeners.subscribe(move |bag| sink.lock().push(bag.count()));

            let mut bag = ErrorBag::new();
            bag.add("a", "missing", "required");
            listeners.notify(&bag);
            sub.unsubscribe();
            listeners.notify(&bag);

            assert_eq!(*seen.lock(), vec![1]);
            assert!(listeners.is_empty());
        }

        #[test]
        fn test_unsubscribe_is_idempotent() {
            let mut bag = ErrorBag::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let sub = bag.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

            bag.add("name", "one", "min");
            sub.unsubscribe();
            sub.unsubscribe();
            bag.add("name", "two", "min");

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(bag.listener_count(), 0);
        }
    }
}
