//! Values recorded while seeding and attached to later sessions.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// Typed values a schema records during seeding, such as the ids of seeded
/// rows.
///
/// When the schema opts in, every session created afterwards carries a
/// shared, read-only view of this data.
#[derive(Default)]
pub struct GlobalData {
    items: BTreeMap<String, Box<dyn Any + Send + Sync>>,
}

impl GlobalData {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` under `key`, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        let _ = self.items.insert(key.into(), Box::new(value));
    }

    /// Returns the value under `key` if it holds a `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.items.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns the recorded keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Returns the number of recorded values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for GlobalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.items.keys()).finish()
    }
}
