//! Sanchaya - sensor ingestion front end for 3D mapping engines
//!
//! Sensors arrive at their own rates (depth and color cameras, lidar). Each
//! stream gets a bounded queue that evicts its oldest sample when full, a
//! rate throttle, and a drain loop that integrates the newest sample whose
//! pose is known and drops everything older. Every engine call goes through
//! one map guard, so integration, extraction and radius clearing never
//! overlap.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  main / sim                         │  ← Entry point
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                 node / threads/                     │  ← Orchestration
//! │      (delivery, scheduler, worker pool)             │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │         ingest/   pose/   mapping/   publish/       │  ← Pipeline stages
//! │  (queues, throttle, pairing, drain, pose gate,      │
//! │   map guard, clearing, sinks)                       │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │              core/  config  error                   │  ← Foundation
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! # Synthetic rig with default config
//! cargo run --release
//!
//! # Custom config, stop after 30 seconds
//! cargo run --release -- --config sanchaya.toml --duration 30
//! ```

// Layer 1: Foundation
pub mod config;
pub mod core;
pub mod error;

// Layer 2: Pipeline stages
pub mod ingest;
pub mod mapping;
pub mod pose;
pub mod publish;

// Layer 3: Orchestration
pub mod node;
pub mod threads;

// Layer 4: Test rig
pub mod sim;

pub use config::SanchayaConfig;
pub use core::{Sample, SensorPayload, StreamId, StreamKind, TimedTransform, Transform};
pub use error::{EngineError, Error, Result};
pub use mapping::{BlockMap, MapGuard, MappingEngine};
pub use node::{Node, NodeStats};
pub use pose::{PoseGate, PoseReadiness};
pub use publish::{Artifact, ChannelSink, LogSink, PublicationSink};
pub use threads::{DeliveryHandle, SensorMessage};
