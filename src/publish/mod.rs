//! Artifact publication sinks.

pub mod sink;

pub use sink::{Artifact, ChannelSink, LogSink, PublicationSink};
