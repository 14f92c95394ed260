//! End-to-end tests: messages in through the delivery handle, artifacts out
//! of the sink, with the real threads in between.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use nalgebra::Point3;

use sanchaya::config::{SanchayaConfig, StreamConfig};
use sanchaya::core::{CameraIntrinsics, DepthImage, PointCloud, StreamId, StreamKind, TimedTransform, Transform};
use sanchaya::mapping::{BlockMap, MappingEngine};
use sanchaya::node::Node;
use sanchaya::pose::{PoseGate, PoseReadiness};
use sanchaya::publish::{Artifact, ChannelSink};
use sanchaya::threads::SensorMessage;

const TIMEOUT: Duration = Duration::from_secs(5);

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics {
        fx: 4.0,
        fy: 4.0,
        cx: 2.0,
        cy: 2.0,
        width: 4,
        height: 4,
    }
}

/// Flat wall 1m in front of the camera.
fn depth_messages(stream: StreamId, t: u64) -> [SensorMessage; 2] {
    [
        SensorMessage::DepthImage {
            stream,
            timestamp_us: t,
            frame_id: "cam".into(),
            image: DepthImage::new(4, 4, vec![1.0; 16]),
        },
        SensorMessage::CameraInfo {
            stream,
            timestamp_us: t,
            intrinsics: intrinsics(),
        },
    ]
}

fn pose(t: u64, x: f32) -> SensorMessage {
    SensorMessage::Pose(TimedTransform::new(t, Transform::translation(x, 0.0, 0.0)))
}

fn depth_config() -> SanchayaConfig {
    let mut config = SanchayaConfig::default();
    config.streams = vec![StreamConfig::new("front", StreamKind::Depth)];
    config.esdf.enabled = false;
    config
}

/// Poll `check` until it returns true or the timeout expires.
fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn recv_matching(rx: &Receiver<Artifact>, mut pred: impl FnMut(&Artifact) -> bool) -> Option<Artifact> {
    let start = Instant::now();
    while let Some(left) = TIMEOUT.checked_sub(start.elapsed()) {
        match rx.recv_timeout(left) {
            Ok(artifact) if pred(&artifact) => return Some(artifact),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn test_depth_sample_integrates_once_pose_arrives() {
    let config = depth_config();
    let engine = BlockMap::new(&config.map);
    let (sink, rx) = ChannelSink::new(64);
    let node = Node::start(config, engine, Arc::new(sink)).unwrap();
    let front = node.stream_id("front").unwrap();

    node.deliver(SensorMessage::StaticTransform {
        frame_id: "cam".into(),
        transform: Transform::identity(),
    });
    for m in depth_messages(front, 100_000) {
        assert!(node.deliver(m));
    }

    // No pose after the sample yet: it must wait in the queue
    node.deliver(pose(0, 0.0));
    std::thread::sleep(Duration::from_millis(100));
    let stats = node.stats();
    assert_eq!(stats.streams[0].integrated, 0);
    assert_eq!(stats.streams[0].queued, 1);

    node.deliver(pose(200_000, 0.0));
    assert!(wait_until(|| node.stats().streams[0].integrated == 1));

    let mesh = recv_matching(&rx, |a| matches!(a, Artifact::Mesh(_)));
    let Some(Artifact::Mesh(update)) = mesh else {
        panic!("expected a mesh update");
    };
    assert!(!update.blocks.is_empty());
    assert!(update.vertex_count() > 0);

    let last = node.last_known_pose().unwrap();
    assert_eq!(last.timestamp_us, 100_000);

    let stats = node.shutdown();
    assert_eq!(stats.streams[0].received, 2);
    assert_eq!(stats.streams[0].unpaired, 0);
    assert_eq!(stats.streams[0].queued, 0);
}

#[test]
fn test_mismatched_intrinsics_rejected() {
    let config = depth_config();
    let engine = BlockMap::new(&config.map);
    let (sink, _rx) = ChannelSink::new(8);
    let node = Node::start(config, engine, Arc::new(sink)).unwrap();
    let front = node.stream_id("front").unwrap();

    node.deliver(SensorMessage::DepthImage {
        stream: front,
        timestamp_us: 10,
        frame_id: "cam".into(),
        image: DepthImage::new(2, 2, vec![1.0; 4]),
    });
    node.deliver(SensorMessage::CameraInfo {
        stream: front,
        timestamp_us: 10,
        intrinsics: intrinsics(),
    });

    assert!(wait_until(|| node.stats().streams[0].rejected == 1));
    let stats = node.shutdown();
    assert_eq!(stats.streams[0].queued, 0);
    assert_eq!(stats.streams[0].integrated, 0);
}

#[test]
fn test_cleared_blocks_are_announced() {
    let mut config = depth_config();
    config.mesh.enabled = false;
    config.clearing.radius_m = 5.0;
    config.clearing.rate_hz = 20.0;
    let engine = BlockMap::new(&config.map);
    let (sink, rx) = ChannelSink::new(64);
    let node = Node::start(config, engine, Arc::new(sink)).unwrap();
    let front = node.stream_id("front").unwrap();

    node.deliver(SensorMessage::StaticTransform {
        frame_id: "cam".into(),
        transform: Transform::identity(),
    });
    node.deliver(pose(0, 0.0));
    node.deliver(pose(200_000, 0.0));
    for m in depth_messages(front, 100_000) {
        node.deliver(m);
    }
    assert!(wait_until(|| node.stats().streams[0].integrated == 1));
    let near_origin = node.map().with_map(|m| m.block_count());
    assert!(near_origin > 0);

    // Move 50m away and integrate there
    node.deliver(pose(1_000_000, 50.0));
    node.deliver(pose(1_200_000, 50.0));
    for m in depth_messages(front, 1_100_000) {
        node.deliver(m);
    }
    assert!(wait_until(|| node.stats().streams[0].integrated == 2));

    let removed = recv_matching(&rx, |a| matches!(a, Artifact::RemovedBlocks(_)));
    let Some(Artifact::RemovedBlocks(blocks)) = removed else {
        panic!("expected removed blocks");
    };
    assert_eq!(blocks.len(), near_origin);

    // Only blocks around the current pose remain
    let center = Point3::new(50.0, 0.0, 0.0);
    node.map().with_map(|m| {
        let size = m.block_size();
        for p in m.extract_occupancy() {
            assert!((p - center).norm() < 5.0 + size, "voxel {:?} survived clearing", p);
        }
    });
    node.shutdown();
}

#[test]
fn test_custom_gate_drops_unavailable_samples() {
    let mut config = SanchayaConfig::default();
    let mut lidar = StreamConfig::new("roof", StreamKind::Lidar);
    lidar.max_rate_hz = Some(0.0);
    config.streams = vec![lidar];
    config.mesh.enabled = false;
    config.esdf.enabled = false;

    // Nothing before t=500 will ever be resolvable
    let gate: Arc<dyn PoseGate> = Arc::new(|_: &str, t: u64| {
        if t < 500 {
            PoseReadiness::PermanentlyUnavailable
        } else {
            PoseReadiness::Ready(Transform::identity())
        }
    });

    let engine = BlockMap::new(&config.map);
    let (sink, _rx) = ChannelSink::new(8);
    let node = Node::start_with_gate(config, engine, gate, Arc::new(sink)).unwrap();
    let roof = node.stream_id("roof").unwrap();

    for t in [100, 200, 600] {
        node.deliver(SensorMessage::PointCloud {
            stream: roof,
            timestamp_us: t,
            frame_id: "lidar".into(),
            cloud: PointCloud::new(vec![Point3::new(2.0, 0.0, 0.0), Point3::new(0.0, 2.0, 0.0)]),
        });
    }

    assert!(wait_until(|| node.stats().streams[0].integrated == 1));
    let stats = node.shutdown();
    assert_eq!(stats.streams[0].unavailable, 2);
    assert_eq!(stats.streams[0].throttled, 0);
    assert_eq!(stats.streams[0].queued, 0);
}

#[test]
fn test_config_file_round_trip_through_node() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[processing]
worker_threads = 3

[[streams]]
name = "left"
kind = "depth"
max_queue_length = 4

[[streams]]
name = "roof"
kind = "lidar"
"#
    )
    .unwrap();

    let config = SanchayaConfig::load(file.path()).unwrap();
    assert_eq!(config.processing.worker_threads, 3);
    let engine = BlockMap::new(&config.map);
    let (sink, _rx) = ChannelSink::new(8);
    let node = Node::start(config, engine, Arc::new(sink)).unwrap();
    assert_eq!(node.stream_id("roof").unwrap(), StreamId(1));
    let stats = node.shutdown();
    assert_eq!(stats.streams.len(), 2);
}
