use std::collections::{HashSet, VecDeque};

/// Remembers the most recent `capacity` idempotency keys.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    seen: HashSet<(u64, u64)>,
    order: VecDeque<(u64, u64)>,
}

impl DedupWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `key`. Returns `false` if it is already in the window.
    pub fn insert(&mut self, key: (u64, u64)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
