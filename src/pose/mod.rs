//! Pose readiness: the gate trait, the default history-backed transformer
//! and the last-known-pose cache.

pub mod cache;
pub mod gate;
pub mod transformer;

pub use cache::LastKnownPose;
pub use gate::{PoseGate, PoseReadiness};
pub use transformer::{Transformer, static_transform};
