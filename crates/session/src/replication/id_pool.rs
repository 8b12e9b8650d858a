use crate::error::SyncError;

use super::entity::NetworkEntityId;

/// Number of distinct [`NetworkEntityId`] values.
pub const NETWORK_ID_SPACE: usize = 1 << 16;

const WORD_BITS: usize = 64;

/// Allocator for the per-peer network id space.
///
/// A rotating cursor proposes the next id; if that id is still live, the
/// bitmap is scanned forward (wrapping) a word at a time for a free slot.
/// Allocation fails only when every id below `capacity` is live.
#[derive(Debug, Clone)]
pub struct NetworkIdPool {
    words: Vec<u64>,
    capacity: usize,
    next: usize,
    allocated: usize,
}

impl Default for NetworkIdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkIdPool {
    pub fn new() -> Self {
        Self::with_capacity(NETWORK_ID_SPACE)
    }

    /// Restricts the pool to ids `0..capacity`; clamped to `1..=NETWORK_ID_SPACE`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, NETWORK_ID_SPACE);
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            next: 0,
            allocated: 0,
        }
    }

    pub fn allocate(&mut self) -> Result<NetworkEntityId, SyncError> {
        if self.allocated >= self.capacity {
            return Err(SyncError::IdSpaceExhausted(self.allocated));
        }

        let index = if self.is_set(self.next) {
            self.find_free_from(self.next)
                .ok_or(SyncError::IdSpaceExhausted(self.allocated))?
        } else {
            self.next
        };

        self.set(index, true);
        self.allocated += 1;
        self.next = (index + 1) % self.capacity;
        Ok(index as NetworkEntityId)
    }

    /// Returns `false` if `id` was not allocated.
    pub fn release(&mut self, id: NetworkEntityId) -> bool {
        let index = id as usize;
        if index >= self.capacity || !self.is_set(index) {
            return false;
        }
        self.set(index, false);
        self.allocated -= 1;
        true
    }

    pub fn is_allocated(&self, id: NetworkEntityId) -> bool {
        let index = id as usize;
        index < self.capacity && self.is_set(index)
    }

    pub fn len(&self) -> usize {
        self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.allocated = 0;
        self.next = 0;
    }

    fn find_free_from(&self, start: usize) -> Option<usize> {
        let mut index = start;
        let mut scanned = 0;

        while scanned < self.capacity {
            let word = self.words[index / WORD_BITS];
            let bit = index % WORD_BITS;

            if bit == 0 && word == u64::MAX && index + WORD_BITS <= self.capacity {
                scanned += WORD_BITS;
                index = (index + WORD_BITS) % self.capacity;
                continue;
            }
            if word & (1 << bit) == 0 {
                return Some(index);
            }

            scanned += 1;
            index = (index + 1) % self.capacity;
        }
        None
    }

    fn is_set(&self, index: usize) -> bool {
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    fn set(&mut self, index: usize, value: bool) {
        let mask = 1u64 << (index % WORD_BITS);
        if value {
            self.words[index / WORD_BITS] |= mask;
        } else {
            self.words[index / WORD_BITS] &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let mut pool = NetworkIdPool::new();

        assert_eq!(pool.allocate(), Ok(0));
        assert_eq!(pool.allocate(), Ok(1));
        assert_eq!(pool.allocate(), Ok(2));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_cursor_keeps_moving_after_release() {
        let mut pool = NetworkIdPool::new();

        let first = pool.allocate().unwrap();
        pool.allocate().unwrap();
        assert!(pool.release(first));

        assert_eq!(pool.allocate(), Ok(2));
    }

    #[test]
    fn test_wraps_and_skips_live_ids() {
        let mut pool = NetworkIdPool::with_capacity(4);

        for expected in 0..4 {
            assert_eq!(pool.allocate(), Ok(expected));
        }
        assert!(pool.release(2));

        assert_eq!(pool.allocate(), Ok(2));
        assert!(pool.release(1));
        assert_eq!(pool.allocate(), Ok(1));
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut pool = NetworkIdPool::with_capacity(2);

        pool.allocate().unwrap();
        pool.allocate().unwrap();

        assert_eq!(pool.allocate(), Err(SyncError::IdSpaceExhausted(2)));
        pool.release(0);
        assert_eq!(pool.allocate(), Ok(0));
    }

    #[test]
    fn test_release_unknown_id() {
        let mut pool = NetworkIdPool::with_capacity(8);

        assert!(!pool.release(3));
        assert!(!pool.release(200));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_full_id_space_scan_skips_whole_words() {
        let mut pool = NetworkIdPool::new();

        for _ in 0..NETWORK_ID_SPACE {
            pool.allocate().unwrap();
        }
        assert!(pool.allocate().is_err());

        assert!(pool.release(40_000));
        assert_eq!(pool.allocate(), Ok(40_000));
        assert_eq!(pool.len(), NETWORK_ID_SPACE);
    }
}
