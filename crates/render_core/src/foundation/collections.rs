//! Specialized collection types

pub use slotmap::{new_key_type, SlotMap};

/// Monotonic identifier source passed explicitly to whoever mints ids
///
/// Id 0 is never handed out so it can stand for a null handle.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Create an allocator whose first id is 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Hand out the next id
    pub fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next - 1
    }

    /// Start again from 1
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_non_null() {
        let mut ids = IdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut ids = IdAllocator::new();
        ids.allocate();
        ids.allocate();
        ids.reset();
        assert_eq!(ids.allocate(), 1);
    }

    #[test]
    fn test_independent_allocators_do_not_share_state() {
        let mut first = IdAllocator::new();
        let mut second = IdAllocator::new();
        first.allocate();
        first.allocate();
        assert_eq!(second.allocate(), 1);
    }
}
