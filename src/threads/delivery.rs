//! Delivery thread: the lightweight context between the transport and the
//! stream queues.
//!
//! Transport callbacks hand messages to a [`DeliveryHandle`], which only does
//! a non-blocking `try_send` into the bounded intake channel. The delivery
//! thread then pairs camera images with their intrinsics, validates and
//! throttles the result and pushes it onto the stream's queue. Pose messages
//! go straight into the [`Transformer`].
//!
//! This thread never touches the map.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::SanchayaConfig;
use crate::core::{
    CameraIntrinsics, ColorImage, DepthImage, LidarIntrinsics, PointCloud, Sample, SensorPayload,
    StreamId, StreamKind, TimedTransform, Transform,
};
use crate::error::{Error, Result};
use crate::ingest::{ExactTimePairer, PairResult, RateThrottle, StreamRegistry, StreamState, StreamStats};
use crate::pose::Transformer;

/// A message from the transport.
#[derive(Debug, Clone)]
pub enum SensorMessage {
    DepthImage {
        stream: StreamId,
        timestamp_us: u64,
        frame_id: String,
        image: DepthImage,
    },
    ColorImage {
        stream: StreamId,
        timestamp_us: u64,
        frame_id: String,
        image: ColorImage,
    },
    /// Intrinsics of the camera behind `stream`
    CameraInfo {
        stream: StreamId,
        timestamp_us: u64,
        intrinsics: CameraIntrinsics,
    },
    PointCloud {
        stream: StreamId,
        timestamp_us: u64,
        frame_id: String,
        cloud: PointCloud,
    },
    /// `T_global_pose` sample
    Pose(TimedTransform),
    /// `T_pose_sensor` mounting transform
    StaticTransform { frame_id: String, transform: Transform },
}

impl SensorMessage {
    fn stream(&self) -> Option<StreamId> {
        match self {
            SensorMessage::DepthImage { stream, .. }
            | SensorMessage::ColorImage { stream, .. }
            | SensorMessage::CameraInfo { stream, .. }
            | SensorMessage::PointCloud { stream, .. } => Some(*stream),
            SensorMessage::Pose(_) | SensorMessage::StaticTransform { .. } => None,
        }
    }
}

/// Cheap, cloneable entry point for transport callbacks.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    tx: Sender<SensorMessage>,
    dropped: Arc<AtomicU64>,
}

impl DeliveryHandle {
    /// Hand a message to the delivery thread without blocking.
    ///
    /// Returns false if the message was dropped (intake full or node
    /// stopped).
    pub fn deliver(&self, message: SensorMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Intake channel full, dropping message for stream {:?}",
                    message.stream()
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Delivery thread stopped, message dropped");
                false
            }
        }
    }

    /// Messages dropped at the intake.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create the intake channel and its handle.
pub fn intake_channel(capacity: usize) -> (DeliveryHandle, Receiver<SensorMessage>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        DeliveryHandle {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[derive(Debug, Clone)]
enum CameraImage {
    Depth(DepthImage),
    Color(ColorImage),
}

type CameraPairer = ExactTimePairer<(String, CameraImage), CameraIntrinsics>;

/// State owned by the delivery thread.
pub struct DeliveryWorker {
    streams: Arc<StreamRegistry>,
    transformer: Arc<Transformer>,
    throttle: RateThrottle,
    /// Indexed by stream id, `None` for streams that need no pairing
    pairers: Vec<Option<CameraPairer>>,
    lidar_intrinsics: LidarIntrinsics,
}

impl DeliveryWorker {
    pub fn new(config: &SanchayaConfig, streams: Arc<StreamRegistry>, transformer: Arc<Transformer>) -> Self {
        let pairers = streams
            .iter()
            .map(|s| {
                s.kind()
                    .needs_intrinsics()
                    .then(|| ExactTimePairer::new(config.processing.pairing_queue_size))
            })
            .collect();
        Self {
            streams,
            transformer,
            throttle: RateThrottle::new(),
            pairers,
            lidar_intrinsics: config.lidar.intrinsics(),
        }
    }

    /// Process one message.
    pub fn handle(&mut self, message: SensorMessage) {
        let streams = Arc::clone(&self.streams);
        match message {
            SensorMessage::Pose(pose) => self.transformer.insert_pose(pose),
            SensorMessage::StaticTransform { frame_id, transform } => {
                self.transformer.set_static_transform(frame_id, transform)
            }
            SensorMessage::DepthImage {
                stream,
                timestamp_us,
                frame_id,
                image,
            } => {
                let Some(state) = receive(&streams, stream, StreamKind::Depth) else {
                    return;
                };
                let result = self.pairer(stream).map(|p| {
                    p.add_first(timestamp_us, (frame_id, CameraImage::Depth(image)))
                });
                self.on_pair_result(state, result);
            }
            SensorMessage::ColorImage {
                stream,
                timestamp_us,
                frame_id,
                image,
            } => {
                let Some(state) = receive(&streams, stream, StreamKind::Color) else {
                    return;
                };
                let result = self.pairer(stream).map(|p| {
                    p.add_first(timestamp_us, (frame_id, CameraImage::Color(image)))
                });
                self.on_pair_result(state, result);
            }
            SensorMessage::CameraInfo {
                stream,
                timestamp_us,
                intrinsics,
            } => {
                let Some(state) = streams.get(stream) else {
                    log::warn!("Camera info for unknown stream {}", stream);
                    return;
                };
                StreamStats::add(&state.stats.received, 1);
                if !state.kind().needs_intrinsics() {
                    log::warn!("Stream '{}' takes no camera info, ignoring", state.name());
                    StreamStats::add(&state.stats.rejected, 1);
                    return;
                }
                let result = self.pairer(stream).map(|p| p.add_second(timestamp_us, intrinsics));
                self.on_pair_result(state, result);
            }
            SensorMessage::PointCloud {
                stream,
                timestamp_us,
                frame_id,
                cloud,
            } => {
                let Some(state) = receive(&streams, stream, StreamKind::Lidar) else {
                    return;
                };
                let payload = SensorPayload::Lidar {
                    cloud,
                    intrinsics: self.lidar_intrinsics,
                };
                self.admit(state, Sample::new(timestamp_us, frame_id, payload));
            }
        }
    }

    fn pairer(&mut self, stream: StreamId) -> Option<&mut CameraPairer> {
        self.pairers.get_mut(stream.index()).and_then(Option::as_mut)
    }

    fn on_pair_result(
        &mut self,
        state: &StreamState,
        result: Option<PairResult<(String, CameraImage), CameraIntrinsics>>,
    ) {
        let Some(result) = result else { return };
        if result.dropped > 0 {
            log::debug!(
                "Stream '{}': {} unpaired image/intrinsics dropped",
                state.name(),
                result.dropped
            );
            StreamStats::add(&state.stats.unpaired, result.dropped as u64);
        }
        let Some(paired) = result.paired else { return };
        let (frame_id, image) = paired.first;
        let intrinsics = paired.second;

        let (width, height) = match &image {
            CameraImage::Depth(img) => (img.width, img.height),
            CameraImage::Color(img) => (img.width, img.height),
        };
        if let Err(e) = intrinsics.validate_for(width, height) {
            log::warn!(
                "Stream '{}': dropping sample at {}us: {}",
                state.name(),
                paired.timestamp_us,
                e
            );
            StreamStats::add(&state.stats.rejected, 1);
            return;
        }

        let payload = match image {
            CameraImage::Depth(image) => SensorPayload::Depth { image, intrinsics },
            CameraImage::Color(image) => SensorPayload::Color { image, intrinsics },
        };
        self.admit(state, Sample::new(paired.timestamp_us, frame_id, payload));
    }

    /// Throttle, then enqueue.
    fn admit(&mut self, state: &StreamState, sample: Sample) {
        let rate = state.config.effective_max_rate_hz();
        if !self.throttle.should_accept(state.id, sample.timestamp_us, rate) {
            StreamStats::add(&state.stats.throttled, 1);
            return;
        }
        log::trace!(
            "Stream '{}': queued sample at {}us",
            state.name(),
            sample.timestamp_us
        );
        state.queue.push(sample);
    }
}

/// Look up a stream for a data message and check its kind.
fn receive(streams: &StreamRegistry, stream: StreamId, kind: StreamKind) -> Option<&StreamState> {
    let Some(state) = streams.get(stream) else {
        log::warn!("Message for unknown stream {}", stream);
        return None;
    };
    StreamStats::add(&state.stats.received, 1);
    if state.kind() != kind {
        log::warn!(
            "Stream '{}' is {}, ignoring {} message",
            state.name(),
            state.kind(),
            kind
        );
        StreamStats::add(&state.stats.rejected, 1);
        return None;
    }
    Some(state)
}

/// Delivery thread handle.
pub struct DeliveryThread {
    handle: JoinHandle<()>,
}

impl DeliveryThread {
    /// Spawn the delivery thread.
    pub fn spawn(mut worker: DeliveryWorker, rx: Receiver<SensorMessage>, running: Arc<AtomicBool>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("delivery".into())
            .spawn(move || {
                log::info!("Delivery thread started");
                while running.load(Ordering::Relaxed) {
                    match rx.recv_timeout(Duration::from_millis(50)) {
                        Ok(message) => worker.handle(message),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            log::debug!("Intake channel closed");
                            break;
                        }
                    }
                }
                log::info!("Delivery thread stopped");
            })
            .map_err(|source| Error::Spawn {
                name: "delivery".into(),
                source,
            })?;
        Ok(Self { handle })
    }

    /// Wait for thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}
