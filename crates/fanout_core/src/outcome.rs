//! Outcome keys and count aggregation.
//!
//! Every target in a batch contributes exactly one count to some key, so the
//! total of an [`OutcomeMap`] produced for a batch of `n` targets is `n`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SUCCESS_KEY: &str = "200";
pub const RETRIES_EXHAUSTED_KEY: &str = "Error Fetching URL";
pub const DISPATCH_FAILED_PREFIX: &str = "500 - Failed to fetch self";
pub const INTERNAL_FAILURE_KEY: &str = "Catch in handling multiple URLs";
pub const TREE_FAILURE_KEY: &str = "500";
pub const RETRYABLE_STATUS_CODES: [u16; 2] = [429, 503];
pub const BODY_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeMap(BTreeMap<String, u64>);

impl OutcomeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes `count` targets to a single key.
    pub fn single(key: impl Into<String>, count: u64) -> Self {
        let mut map = Self::new();
        map.add(key, count);
        map
    }

    pub fn record(&mut self, key: impl Into<String>) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: impl Into<String>, count: u64) {
        if count == 0 {
            return;
        }
        *self.0.entry(key.into()).or_insert(0) += count;
    }

    pub fn absorb(&mut self, other: &OutcomeMap) {
        for (key, count) in &other.0 {
            self.add(key.clone(), *count);
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, u64>> for OutcomeMap {
    fn from(value: BTreeMap<String, u64>) -> Self {
        Self(value.into_iter().filter(|(_, count)| *count > 0).collect())
    }
}

impl<K: Into<String>> FromIterator<K> for OutcomeMap {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut map = Self::new();
        for key in iter {
            map.record(key);
        }
        map
    }
}

/// Sums counts per key across all inputs.
pub fn merge(maps: impl IntoIterator<Item = OutcomeMap>) -> OutcomeMap {
    let mut merged = OutcomeMap::new();
    for map in maps {
        merged.absorb(&map);
    }
    merged
}

pub fn is_retryable_status(status_code: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status_code)
}

/// Key for a response that ends the retry loop.
pub fn response_key(status_code: u16, body: &str) -> String {
    if status_code == 200 {
        return SUCCESS_KEY.to_string();
    }
    format!("{status_code}:{}", body_excerpt(body))
}

pub fn dispatch_failed_key(reason: &str) -> String {
    format!("{DISPATCH_FAILED_PREFIX} - {reason}")
}

fn body_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}
