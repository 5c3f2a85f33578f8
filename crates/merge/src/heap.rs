//! Binary min-heap ordered by a caller-supplied comparator.
//!
//! `std::collections::BinaryHeap` needs `Ord` on its elements, but the merge
//! order is a runtime strategy (raw bytes or a typed comparator), so the
//! heap takes the comparison function instead.

use std::cmp::Ordering;

/// A min-heap: [`pop`](Self::pop) returns the smallest element according to
/// the comparator.
pub struct MergeHeap<T, C> {
    items: Vec<T>,
    cmp: C,
}

impl<T, C> MergeHeap<T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    pub fn new(cmp: C) -> Self {
        Self::with_capacity(0, cmp)
    }

    pub fn with_capacity(capacity: usize, cmp: C) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        let last = self.items.pop()?;
        if self.items.is_empty() {
            return Some(last);
        }
        let top = std::mem::replace(&mut self.items[0], last);
        self.sift_down(0);
        Some(top)
    }

    /// Replaces the smallest element with `item` and returns the old one.
    /// One sift instead of a pop followed by a push.
    ///
    /// # Panics
    ///
    /// Panics if the heap is empty.
    pub fn replace_top(&mut self, item: T) -> T {
        assert!(!self.items.is_empty(), "replace_top on an empty heap");
        let top = std::mem::replace(&mut self.items[0], item);
        self.sift_down(0);
        top
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    fn less(&self, a: usize, b: usize) -> bool {
        (self.cmp)(&self.items[a], &self.items[b]) == Ordering::Less
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.items.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, pos) {
                break;
            }
            self.items.swap(pos, child);
            pos = child;
        }
    }
}
