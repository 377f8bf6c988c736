use std::collections::VecDeque;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ApiError;

pub const CACHE_CAPACITY: usize = 10;

/// Bounded result cache keyed by serialized query parameters.
///
/// There is no expiry, entries only leave when the cache is full, oldest inserted first.
/// Reads don't change the eviction order.
pub struct QueryCache<V> {
    capacity: usize,
    entries: ahash::HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Default::default(),
            order: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: String, value: V) {
        // a refreshed key keeps its original insertion slot
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }

        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Serializes `params` with object keys sorted at every level, so two structurally equal
/// parameter sets produce the same key no matter how they were built.
pub fn cache_key<P: Serialize + ?Sized>(params: &P) -> Result<String, ApiError> {
    let value = canonicalize(serde_json::to_value(params)?);
    Ok(serde_json::to_string(&value)?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut entries = obj.into_iter().collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
