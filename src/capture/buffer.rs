//! Bounded, oldest-evicting sequence used for every capture buffer.

use std::collections::vec_deque::{Iter, IterMut};
use std::collections::VecDeque;

/// Rolling buffer holding only the most recent `cap` entries.
///
/// Pushing onto a full buffer evicts the oldest entry, so `len() <= cap()` always holds.
#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
    items: VecDeque<T>,
    cap: usize,
}

impl<T> RollingBuffer<T> {
    /// Create an empty buffer. A capacity of 0 is treated as 1.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            items: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    /// Append an entry, evicting the oldest one if the buffer is full.
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.cap {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Oldest-first iterator
    pub fn iter(&self) -> Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.items.back_mut()
    }

    /// The most recent `n` entries, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }

    /// Remove and return every entry, oldest first
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_exceeds_cap() {
        let mut buffer = RollingBuffer::new(3);
        for i in 0..10 {
            buffer.push(i);
            assert!(buffer.len() <= buffer.cap());
        }
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn test_push_returns_evicted() {
        let mut buffer = RollingBuffer::new(2);
        assert_eq!(buffer.push('a'), None);
        assert_eq!(buffer.push('b'), None);
        assert_eq!(buffer.push('c'), Some('a'));
    }

    #[test]
    fn test_zero_cap_coerced() {
        let mut buffer = RollingBuffer::new(0);
        assert_eq!(buffer.cap(), 1);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.last(), Some(&2));
    }

    #[test]
    fn test_recent_and_drain() {
        let mut buffer = RollingBuffer::new(10);
        for i in 0..6 {
            buffer.push(i);
        }
        assert_eq!(buffer.recent(3).copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(buffer.recent(50).count(), 6);

        let drained = buffer.drain();
        assert_eq!(drained, vec![0, 1, 2, 3, 4, 5]);
        assert!(buffer.is_empty());
    }
}
