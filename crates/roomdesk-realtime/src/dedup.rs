//! Bounded window of recently-seen event keys.

use std::collections::{HashSet, VecDeque};

use crate::protocol::Event;

/// Drops events already seen on this connection.
///
/// The key is `type:entityId:bucket`, where `bucket` is the event timestamp
/// divided by the bucket width. Once `capacity` keys are held, the oldest key
/// is evicted for each new one.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    bucket_ms: i64,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    /// Window holding at most `capacity` keys, bucketing timestamps to
    /// `bucket_ms`.
    pub fn new(capacity: usize, bucket_ms: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            bucket_ms: i64::try_from(bucket_ms).unwrap_or(i64::MAX).max(1),
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Dedup key for an event.
    pub fn key(&self, event: &Event) -> String {
        format!(
            "{}:{}:{}",
            event.event_type,
            event.entity_id,
            event.timestamp.div_euclid(self.bucket_ms)
        )
    }

    /// Record the event; returns `false` if it was already in the window.
    pub fn insert(&mut self, event: &Event) -> bool {
        let key = self.key(event);
        if self.seen.contains(&key) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                let _ = self.seen.remove(&oldest);
            }
        }
        let _ = self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget every key.
    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}
