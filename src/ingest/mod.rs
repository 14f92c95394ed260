//! Sensor ingest: pairing, throttling, bounded queues and drain selection.
//!
//! ```text
//! image ─┐
//!        ├─> ExactTimePairer ─> RateThrottle ─> BoundedQueue ─> select_ready
//! intr. ─┘                                          ▲
//! cloud ──────────────────────> RateThrottle ───────┘
//! ```

pub mod drain;
pub mod pairing;
pub mod queue;
pub mod stream;
pub mod throttle;

pub use drain::{DrainOutcome, select_ready};
pub use pairing::{ExactTimePairer, PairResult, Paired};
pub use queue::BoundedQueue;
pub use stream::{StreamRegistry, StreamState, StreamStats, StreamStatsSnapshot};
pub use throttle::RateThrottle;
