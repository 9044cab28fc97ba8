use std::collections::VecDeque;

/// Fixed-capacity FIFO buffer. Pushing past capacity silently evicts
/// the oldest entry, so memory stays bounded for the whole session.
#[derive(Debug, Clone)]
pub struct RecentWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentWindow<T> {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        if self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }
}

impl<T: Clone> RecentWindow<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
