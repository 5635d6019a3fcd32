//! Fixed-capacity circular buffer of (value, timetag) pairs, one per slot
//! instance.
//!
//! Values are stored as `f64` vectors regardless of the slot's nominal wire
//! type: the router treats payloads as opaque `length`-element blocks and
//! leaves type coercion to the expression evaluator, so `f64` is simply the
//! common arithmetic representation used internally.
//! Capacity never shrinks and `position` never resets except on release.

use crate::clock::Timetag;

#[derive(Debug, Clone)]
pub struct HistoryRing {
    /// Flat buffer of `capacity * length` elements.
    values: Vec<f64>,
    timetags: Vec<Timetag>,
    length: usize,
    capacity: usize,
    /// Index of the most recent sample, or -1 if the ring is empty.
    position: isize,
    /// Number of valid samples held, capped at `capacity`.
    filled: usize,
}

impl HistoryRing {
    pub fn new(length: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be positive");
        Self {
            values: vec![0.0; length * capacity],
            timetags: vec![Timetag::ZERO; capacity],
            length,
            capacity,
            position: -1,
            filled: 0,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn position(&self) -> isize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position < 0
    }

    /// Advance the ring and write a new sample, returning the slot index it
    /// landed in. Call [`HistoryRing::rollback`] to undo this if the sample
    /// is subsequently dropped by boundary processing.
    pub fn push(&mut self, value: &[f64], tt: Timetag) -> usize {
        debug_assert_eq!(value.len(), self.length);
        let next = Self::advance(self.position, self.capacity);
        let start = next * self.length;
        self.values[start..start + self.length].copy_from_slice(value);
        self.timetags[next] = tt;
        self.position = next as isize;
        self.filled = (self.filled + 1).min(self.capacity);
        next
    }

    /// Undo the most recent `push`, restoring the pre-push position. Does
    /// not need to erase the written bytes -- `position` governs visibility
    /// and the slot will simply be overwritten by the next `push`.
    pub fn rollback(&mut self) {
        debug_assert!(self.position >= 0, "rollback on an empty history ring");
        self.position = Self::retreat(self.position, self.capacity);
        if self.filled < self.capacity {
            self.filled -= 1;
        }
    }

    /// Reset to empty and zero every buffer, as required by the release
    /// handling in `process_signal`.
    pub fn reset(&mut self) {
        self.position = -1;
        self.filled = 0;
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.timetags.iter_mut().for_each(|t| *t = Timetag::ZERO);
    }

    /// Overwrite the values at the current `position` in place, leaving the
    /// timetag untouched. Used by boundary processing to clamp/wrap a sample
    /// that was just written by [`HistoryRing::push`].
    pub fn overwrite_latest(&mut self, value: &[f64]) {
        debug_assert!(self.position >= 0, "overwrite on an empty history ring");
        debug_assert_eq!(value.len(), self.length);
        let start = self.position as usize * self.length;
        self.values[start..start + self.length].copy_from_slice(value);
    }

    /// The latest sample, or `None` if the ring is empty.
    pub fn latest(&self) -> Option<(&[f64], Timetag)> {
        if self.position < 0 {
            return None;
        }
        let idx = self.position as usize;
        let start = idx * self.length;
        Some((&self.values[start..start + self.length], self.timetags[idx]))
    }

    /// Sample `offset` back from latest (0 = latest, 1 = previous, ...).
    pub fn at_offset(&self, offset: usize) -> Option<(&[f64], Timetag)> {
        if self.position < 0 || offset >= self.capacity {
            return None;
        }
        let mut idx = self.position as usize;
        for _ in 0..offset {
            idx = Self::retreat(idx as isize, self.capacity) as usize;
        }
        let start = idx * self.length;
        Some((&self.values[start..start + self.length], self.timetags[idx]))
    }

    /// Number of valid samples currently held, capped at `capacity`.
    pub fn len(&self) -> usize {
        self.filled
    }

    fn advance(position: isize, capacity: usize) -> usize {
        if position < 0 {
            0
        } else {
            (position as usize + 1) % capacity
        }
    }

    fn retreat(position: isize, capacity: usize) -> isize {
        if position == 0 {
            capacity as isize - 1
        } else {
            position - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tt(n: u32) -> Timetag {
        Timetag::new(n, 0)
    }

    #[test]
    fn starts_empty_at_position_negative_one() {
        let ring = HistoryRing::new(3, 4);
        assert_eq!(ring.position(), -1);
        assert!(ring.is_empty());
        assert!(ring.latest().is_none());
    }

    #[test]
    fn position_wraps_after_k_updates_with_capacity_h() {
        // Invariant 4: position = (k-1) mod H after k updates.
        let mut ring = HistoryRing::new(1, 4);
        for k in 1..=10usize {
            ring.push(&[k as f64], tt(k as u32));
            assert_eq!(ring.position(), ((k - 1) % 4) as isize);
        }
    }

    #[test]
    fn holds_the_last_min_k_h_samples() {
        let mut ring = HistoryRing::new(1, 3);
        for k in 1..=5 {
            ring.push(&[k as f64], tt(k));
        }
        // capacity 3, 5 pushes: ring holds [3, 4, 5]
        assert_eq!(ring.latest().unwrap().0, &[5.0]);
        assert_eq!(ring.at_offset(1).unwrap().0, &[4.0]);
        assert_eq!(ring.at_offset(2).unwrap().0, &[3.0]);
    }

    #[test]
    fn rollback_restores_pre_update_position() {
        let mut ring = HistoryRing::new(1, 4);
        ring.push(&[1.0], tt(1));
        let pos_before = ring.position();
        ring.push(&[2.0], tt(2));
        ring.rollback();
        assert_eq!(ring.position(), pos_before);
        assert_eq!(ring.latest().unwrap().0, &[1.0]);
    }

    #[test]
    fn reset_zeroes_buffers_and_empties_ring() {
        let mut ring = HistoryRing::new(2, 2);
        ring.push(&[1.0, 2.0], tt(1));
        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.position(), -1);
    }
}
