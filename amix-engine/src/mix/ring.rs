//! Circular cursor arithmetic
//!
//! Every position in the mix buffer and the capture rings is an index in
//! `0..capacity`. All modulo bookkeeping goes through [`Ring`] so the
//! reconciliation code only ever talks about advancing cursors and measuring
//! forward distances.
//!
//! ```text
//!   0                 rd            wr                 capacity
//!   |.................|=============|..................|
//!                      readable      writable up to rd - 1 (wrapping)
//! ```
//!
//! One slot is always left between the write limit and `rd` so that a full
//! buffer and an empty buffer never look the same.

/// Index arithmetic for a circular buffer of `capacity` samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ring {
    capacity: u32,
}

impl Ring {
    /// Create a ring of `capacity` samples (must be at least 2)
    pub fn new(capacity: u32) -> Self {
        debug_assert!(capacity >= 2, "ring capacity must be at least 2");
        Self { capacity }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Move `ptr` forward by `n` samples, wrapping
    pub fn advance(&self, ptr: u32, n: u32) -> u32 {
        ((ptr as u64 + n as u64) % self.capacity as u64) as u32
    }

    /// Move `ptr` backward by `n` samples, wrapping
    pub fn retreat(&self, ptr: u32, n: u32) -> u32 {
        let n = n % self.capacity;
        if ptr >= n {
            ptr - n
        } else {
            ptr + self.capacity - n
        }
    }

    /// Forward distance from `from` to `to`
    ///
    /// Equal cursors are zero apart, never `capacity`.
    pub fn distance(&self, from: u32, to: u32) -> u32 {
        if to >= from {
            to - from
        } else {
            to + self.capacity - from
        }
    }

    /// Last position (exclusive) a writer may reach while the read frontier is at `rd`
    pub fn write_limit(&self, rd: u32) -> u32 {
        self.retreat(rd, 1)
    }

    /// Samples that can be written starting at `wr` without crossing `rd - 1`
    pub fn available_space(&self, wr: u32, rd: u32) -> u32 {
        self.distance(wr, self.write_limit(rd))
    }

    /// True if `ptr` lies in the circular window `[from, to]`
    pub fn contains(&self, from: u32, to: u32, ptr: u32) -> bool {
        self.distance(from, ptr) <= self.distance(from, to)
    }

    /// Split `len` samples starting at `start` into at most two contiguous runs
    ///
    /// Each run is `(start, len)` in sample units; the second run, if any,
    /// always starts at 0.
    pub fn segments(&self, start: u32, len: u32) -> Segments {
        let len = len.min(self.capacity);
        let tail = self.capacity - start;
        if len <= tail {
            Segments {
                first: (start, len),
                second: None,
            }
        } else {
            Segments {
                first: (start, tail),
                second: Some((0, len - tail)),
            }
        }
    }
}

/// Up to two contiguous `(start, len)` runs produced by [`Ring::segments`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments {
    first: (u32, u32),
    second: Option<(u32, u32)>,
}

impl Iterator for Segments {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.first.1 > 0 {
            let run = self.first;
            self.first.1 = 0;
            return Some((run.0 as usize, run.1 as usize));
        }
        self.second
            .take()
            .filter(|run| run.1 > 0)
            .map(|run| (run.0 as usize, run.1 as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps() {
        let ring = Ring::new(10);
        assert_eq!(ring.advance(3, 4), 7);
        assert_eq!(ring.advance(8, 4), 2);
        assert_eq!(ring.advance(0, 10), 0);
        assert_eq!(ring.advance(9, 21), 0);
    }

    #[test]
    fn test_retreat_wraps() {
        let ring = Ring::new(10);
        assert_eq!(ring.retreat(5, 2), 3);
        assert_eq!(ring.retreat(1, 3), 8);
        assert_eq!(ring.retreat(0, 1), 9);
    }

    #[test]
    fn test_distance_is_forward() {
        let ring = Ring::new(10);
        assert_eq!(ring.distance(2, 7), 5);
        assert_eq!(ring.distance(7, 2), 5);
        assert_eq!(ring.distance(4, 4), 0);
        assert_eq!(ring.distance(9, 0), 1);
    }

    #[test]
    fn test_available_space_leaves_one_slot() {
        let ring = Ring::new(10);
        // rd == wr: everything but the guard slot is writable
        assert_eq!(ring.available_space(0, 0), 9);
        // writer sits right behind the reader: full
        assert_eq!(ring.available_space(4, 5), 0);
        assert_eq!(ring.available_space(9, 0), 0);
        assert_eq!(ring.available_space(2, 6), 3);
    }

    #[test]
    fn test_contains_wrapping_window() {
        let ring = Ring::new(10);
        assert!(ring.contains(8, 2, 9));
        assert!(ring.contains(8, 2, 0));
        assert!(ring.contains(8, 2, 2));
        assert!(!ring.contains(8, 2, 3));
        assert!(ring.contains(4, 4, 4));
        assert!(!ring.contains(4, 4, 5));
    }

    #[test]
    fn test_segments_split_at_wrap() {
        let ring = Ring::new(10);
        let runs: Vec<_> = ring.segments(7, 5).collect();
        assert_eq!(runs, vec![(7, 3), (0, 2)]);

        let runs: Vec<_> = ring.segments(2, 3).collect();
        assert_eq!(runs, vec![(2, 3)]);

        let runs: Vec<_> = ring.segments(7, 3).collect();
        assert_eq!(runs, vec![(7, 3)]);

        assert_eq!(ring.segments(4, 0).count(), 0);
    }
}
