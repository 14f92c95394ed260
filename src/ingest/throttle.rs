//! Per-stream rate throttle.
//!
//! Applied on arrival, before a sample is queued, so throttled samples never
//! take queue space. Rejection is a drop policy, not a fault.

use std::collections::HashMap;

use crate::core::StreamId;

/// Accept/reject gate keyed by stream.
#[derive(Debug, Clone, Default)]
pub struct RateThrottle {
    /// Last accepted timestamp per stream (microseconds)
    last_accepted_us: HashMap<StreamId, u64>,
    accepted_count: u64,
    rejected_count: u64,
}

impl RateThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a sample stamped `timestamp_us` may enter `stream`.
    ///
    /// Always true when `max_rate_hz <= 0` or for the first sample of a
    /// stream. Otherwise true iff at least `1 / max_rate_hz` seconds have
    /// passed since the last accepted sample. A timestamp earlier than the
    /// last accepted one is rejected.
    pub fn should_accept(&mut self, stream: StreamId, timestamp_us: u64, max_rate_hz: f32) -> bool {
        let accept = if max_rate_hz <= 0.0 {
            true
        } else {
            match self.last_accepted_us.get(&stream) {
                None => true,
                Some(&last) if timestamp_us < last => false,
                Some(&last) => {
                    let elapsed_s = (timestamp_us - last) as f64 / 1_000_000.0;
                    elapsed_s >= 1.0 / max_rate_hz as f64
                }
            }
        };

        if accept {
            self.last_accepted_us.insert(stream, timestamp_us);
            self.accepted_count += 1;
        } else {
            self.rejected_count += 1;
            log::trace!(
                "Throttled stream {} sample at {}us ({} Hz limit)",
                stream,
                timestamp_us,
                max_rate_hz
            );
        }
        accept
    }

    /// Last accepted timestamp of a stream.
    pub fn last_accepted(&self, stream: StreamId) -> Option<u64> {
        self.last_accepted_us.get(&stream).copied()
    }

    /// (accepted, rejected) totals across streams.
    pub fn stats(&self) -> (u64, u64) {
        (self.accepted_count, self.rejected_count)
    }
}
