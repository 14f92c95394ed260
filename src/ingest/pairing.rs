//! Exact-timestamp pairing of camera images with their intrinsics.
//!
//! Images and intrinsics arrive as separate messages. A pair is emitted as
//! soon as both halves with the same timestamp are present. Once a pair is
//! emitted, unmatched entries older than it can never complete and are
//! dropped. Each side is bounded: overflow drops its oldest entry.

use std::collections::VecDeque;

/// A matched pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Paired<A, B> {
    pub timestamp_us: u64,
    pub first: A,
    pub second: B,
}

/// Result of adding one half.
#[derive(Debug, Clone, PartialEq)]
pub struct PairResult<A, B> {
    pub paired: Option<Paired<A, B>>,
    /// Unmatched entries discarded by this call
    pub dropped: usize,
}

impl<A, B> PairResult<A, B> {
    fn none(dropped: usize) -> Self {
        Self {
            paired: None,
            dropped,
        }
    }
}

/// Exact-time matcher for two message types.
#[derive(Debug)]
pub struct ExactTimePairer<A, B> {
    capacity: usize,
    firsts: VecDeque<(u64, A)>,
    seconds: VecDeque<(u64, B)>,
    last_paired_us: Option<u64>,
}

impl<A, B> ExactTimePairer<A, B> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            firsts: VecDeque::new(),
            seconds: VecDeque::new(),
            last_paired_us: None,
        }
    }

    pub fn add_first(&mut self, timestamp_us: u64, value: A) -> PairResult<A, B> {
        if self.is_superseded(timestamp_us) {
            return PairResult::none(1);
        }
        let matched = self
            .seconds
            .iter()
            .position(|(t, _)| *t == timestamp_us)
            .and_then(|pos| self.seconds.remove(pos));
        if let Some((_, second)) = matched {
            return self.emit(timestamp_us, value, second);
        }
        let dropped = insert_bounded(&mut self.firsts, self.capacity, timestamp_us, value);
        PairResult::none(dropped)
    }

    pub fn add_second(&mut self, timestamp_us: u64, value: B) -> PairResult<A, B> {
        if self.is_superseded(timestamp_us) {
            return PairResult::none(1);
        }
        let matched = self
            .firsts
            .iter()
            .position(|(t, _)| *t == timestamp_us)
            .and_then(|pos| self.firsts.remove(pos));
        if let Some((_, first)) = matched {
            return self.emit(timestamp_us, first, value);
        }
        let dropped = insert_bounded(&mut self.seconds, self.capacity, timestamp_us, value);
        PairResult::none(dropped)
    }

    /// Unmatched (firsts, seconds) currently held.
    pub fn pending(&self) -> (usize, usize) {
        (self.firsts.len(), self.seconds.len())
    }

    fn is_superseded(&self, timestamp_us: u64) -> bool {
        self.last_paired_us.is_some_and(|last| timestamp_us <= last)
    }

    fn emit(&mut self, timestamp_us: u64, first: A, second: B) -> PairResult<A, B> {
        self.last_paired_us = Some(timestamp_us);
        let before = self.firsts.len() + self.seconds.len();
        self.firsts.retain(|(t, _)| *t > timestamp_us);
        self.seconds.retain(|(t, _)| *t > timestamp_us);
        let dropped = before - (self.firsts.len() + self.seconds.len());
        PairResult {
            paired: Some(Paired {
                timestamp_us,
                first,
                second,
            }),
            dropped,
        }
    }
}

fn insert_bounded<T>(buf: &mut VecDeque<(u64, T)>, capacity: usize, t: u64, value: T) -> usize {
    // Replace a duplicate timestamp rather than holding both
    if let Some(slot) = buf.iter_mut().find(|(ts, _)| *ts == t) {
        slot.1 = value;
        return 1;
    }
    let pos = buf.partition_point(|(ts, _)| *ts < t);
    buf.insert(pos, (t, value));
    let mut dropped = 0;
    while buf.len() > capacity {
        buf.pop_front();
        dropped += 1;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_exact_timestamps_either_order() {
        let mut pairer: ExactTimePairer<&str, u32> = ExactTimePairer::new(4);
        assert!(pairer.add_first(100, "img").paired.is_none());
        let result = pairer.add_second(100, 7);
        let paired = result.paired.unwrap();
        assert_eq!(paired.timestamp_us, 100);
        assert_eq!(paired.first, "img");
        assert_eq!(paired.second, 7);

        assert!(pairer.add_second(200, 8).paired.is_none());
        assert_eq!(pairer.add_first(200, "img2").paired.unwrap().second, 8);
        assert_eq!(pairer.pending(), (0, 0));
    }

    #[test]
    fn test_mismatched_timestamps_never_pair() {
        let mut pairer: ExactTimePairer<u8, u8> = ExactTimePairer::new(4);
        assert!(pairer.add_first(100, 1).paired.is_none());
        assert!(pairer.add_second(101, 2).paired.is_none());
        assert_eq!(pairer.pending(), (1, 1));
    }

    #[test]
    fn test_pairing_drops_older_unmatched() {
        let mut pairer: ExactTimePairer<u8, u8> = ExactTimePairer::new(8);
        pairer.add_first(100, 1);
        pairer.add_second(150, 2);
        pairer.add_first(200, 3);
        let result = pairer.add_second(200, 4);
        assert!(result.paired.is_some());
        assert_eq!(result.dropped, 2);
        assert_eq!(pairer.pending(), (0, 0));

        // Late half of an already superseded timestamp
        let late = pairer.add_second(100, 5);
        assert!(late.paired.is_none());
        assert_eq!(late.dropped, 1);
    }

    #[test]
    fn test_unmatched_side_is_bounded() {
        let mut pairer: ExactTimePairer<u64, u8> = ExactTimePairer::new(3);
        let mut dropped = 0;
        for t in 0..10 {
            dropped += pairer.add_first(t, t).dropped;
        }
        assert_eq!(pairer.pending(), (3, 0));
        assert_eq!(dropped, 7);
        // The newest three survive and can still pair
        assert!(pairer.add_second(9, 0).paired.is_some());
    }
}
