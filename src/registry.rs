//! Type-keyed subscriber registry.

use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde_json::Value;

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle for one registration, pass it to [`Registry::off`] to remove
/// exactly that registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    type_name: String,
    id: u64,
}

struct Entry {
    id: u64,
    callback: Callback,
}

/// In-memory pub/sub map from message type to listener callbacks.
///
/// All mutation goes through [`on`][Registry::on] / [`off`][Registry::off] /
/// [`emit`][Registry::emit]. Callbacks for one type run in insertion order,
/// and a panicking callback never prevents its siblings from running.
#[derive(Default)]
pub struct Registry {
    subscribers: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        // callbacks never run under the lock, so poisoning is benign
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback for a message type.
    pub fn on<S, F>(&self, type_name: &S, callback: F) -> Token
    where
        S: AsRef<str> + ?Sized,
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let type_name = type_name.as_ref();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        log::trace!("Register subscriber {} for type {}", id, type_name);

        self.lock()
            .entry(type_name.to_string())
            .or_default()
            .push(Entry {
                id,
                callback: Arc::new(callback),
            });

        Token {
            type_name: type_name.to_string(),
            id,
        }
    }

    /// Remove one registration, a no-op when it is already gone.
    pub fn off(&self, token: &Token) {
        let mut subscribers = self.lock();

        if let Some(entries) = subscribers.get_mut(&token.type_name) {
            entries.retain(|entry| entry.id != token.id);

            if entries.is_empty() {
                subscribers.remove(&token.type_name);
            }
        }
    }

    /// Invoke every callback registered for a message type.
    pub fn emit<S: AsRef<str> + ?Sized>(&self, type_name: &S, data: &Value) {
        let type_name = type_name.as_ref();

        let callbacks: Vec<Callback> = self
            .lock()
            .get(type_name)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
            .unwrap_or_default();

        log::trace!(
            "Emit {} to {} subscriber(s)",
            type_name,
            callbacks.len()
        );

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                log::error!("Subscriber callback for type {} panicked", type_name);
            }
        }
    }

    /// count of callbacks currently registered for a type
    pub fn subscriber_count<S: AsRef<str> + ?Sized>(&self, type_name: &S) -> usize {
        self.lock()
            .get(type_name.as_ref())
            .map(Vec::len)
            .unwrap_or_default()
    }
}
