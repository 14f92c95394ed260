//! Map access is exclusive: no two engine calls ever overlap, no matter how
//! many workers and periodic jobs are running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::Point3;

use sanchaya::config::{SanchayaConfig, StreamConfig};
use sanchaya::core::{PointCloud, SensorPayload, StreamKind, Transform};
use sanchaya::error::EngineError;
use sanchaya::mapping::{BlockIndex, DistanceSlice, MappingEngine, MeshUpdate, SliceRequest};
use sanchaya::node::Node;
use sanchaya::pose::PoseReadiness;
use sanchaya::publish::ChannelSink;
use sanchaya::threads::SensorMessage;

#[derive(Debug, Default)]
struct CallLog {
    inside: AtomicBool,
    overlaps: AtomicUsize,
    integrate: AtomicUsize,
    mesh: AtomicUsize,
    esdf: AtomicUsize,
    occupancy: AtomicUsize,
    clear: AtomicUsize,
}

/// Engine that records every call and flags any that start while another is
/// still running.
struct InstrumentedEngine {
    calls: Arc<CallLog>,
}

impl InstrumentedEngine {
    fn call<R>(&self, counter: &AtomicUsize, body: impl FnOnce() -> R) -> R {
        if self.calls.inside.swap(true, Ordering::SeqCst) {
            self.calls.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        counter.fetch_add(1, Ordering::SeqCst);
        // Widen the window a concurrent caller would hit
        thread::sleep(Duration::from_micros(200));
        let result = body();
        self.calls.inside.store(false, Ordering::SeqCst);
        result
    }
}

impl MappingEngine for InstrumentedEngine {
    fn integrate(&mut self, _payload: &SensorPayload, _pose: &Transform) -> Result<(), EngineError> {
        let calls = Arc::clone(&self.calls);
        self.call(&calls.integrate, || Ok(()))
    }

    fn extract_mesh(&mut self) -> MeshUpdate {
        let calls = Arc::clone(&self.calls);
        self.call(&calls.mesh, MeshUpdate::default)
    }

    fn extract_distance_slice(&mut self, request: &SliceRequest) -> DistanceSlice {
        let calls = Arc::clone(&self.calls);
        self.call(&calls.esdf, || DistanceSlice {
            origin: [request.center.x, request.center.y],
            height: request.slice_height,
            resolution: request.resolution,
            width: 0,
            rows: 0,
            distances: Vec::new(),
            max_distance: request.extent_m,
        })
    }

    fn extract_occupancy(&mut self) -> Vec<Point3<f32>> {
        let calls = Arc::clone(&self.calls);
        self.call(&calls.occupancy, Vec::new)
    }

    fn clear_outside_radius(&mut self, _center: &Point3<f32>, _radius: f32) -> Vec<BlockIndex> {
        let calls = Arc::clone(&self.calls);
        self.call(&calls.clear, || vec![BlockIndex::new(0, 0, 0)])
    }
}

fn busy_config(clearing_radius_m: f32) -> SanchayaConfig {
    let mut config = SanchayaConfig::default();
    config.processing.worker_threads = 4;
    config.processing.poll_rate_hz = 200.0;
    config.streams = ["a", "b", "c", "d"]
        .iter()
        .map(|name| {
            let mut s = StreamConfig::new(*name, StreamKind::Lidar);
            s.max_rate_hz = Some(0.0);
            s
        })
        .collect();
    config.mesh.rate_hz = 50.0;
    config.esdf.rate_hz = 50.0;
    config.occupancy.enabled = true;
    config.occupancy.publication_rate_hz = 50.0;
    config.clearing.radius_m = clearing_radius_m;
    config.clearing.rate_hz = 50.0;
    config
}

fn run_busy_node(config: SanchayaConfig, calls: &Arc<CallLog>, run_for: Duration) {
    let engine = InstrumentedEngine {
        calls: Arc::clone(calls),
    };
    let gate = Arc::new(|_: &str, t: u64| PoseReadiness::Ready(Transform::translation(t as f32 * 1e-6, 0.0, 0.0)));
    let (sink, rx) = ChannelSink::new(4096);
    let node = Node::start_with_gate(config, engine, gate, Arc::new(sink)).unwrap();
    let ids: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|n| node.stream_id(n).unwrap())
        .collect();

    let handle = node.delivery_handle();
    let start = Instant::now();
    let mut t = 0u64;
    while start.elapsed() < run_for {
        t += 1_000;
        for &stream in &ids {
            handle.deliver(SensorMessage::PointCloud {
                stream,
                timestamp_us: t,
                frame_id: "lidar".into(),
                cloud: PointCloud::new(vec![Point3::new(1.0, 0.0, 0.0)]),
            });
        }
        // Keep the sink from filling up
        while rx.try_recv().is_ok() {}
        thread::sleep(Duration::from_millis(1));
    }
    node.shutdown();
}

#[test]
fn test_engine_calls_never_overlap() {
    let calls = Arc::new(CallLog::default());
    run_busy_node(busy_config(2.0), &calls, Duration::from_millis(800));

    assert_eq!(calls.overlaps.load(Ordering::SeqCst), 0);
    assert!(calls.integrate.load(Ordering::SeqCst) > 10);
    assert!(calls.mesh.load(Ordering::SeqCst) > 0);
    assert!(calls.esdf.load(Ordering::SeqCst) > 0);
    assert!(calls.occupancy.load(Ordering::SeqCst) > 0);
    assert!(calls.clear.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_non_positive_radius_never_clears() {
    for radius in [0.0, -1.0] {
        let calls = Arc::new(CallLog::default());
        run_busy_node(busy_config(radius), &calls, Duration::from_millis(300));
        assert_eq!(calls.clear.load(Ordering::SeqCst), 0);
        assert!(calls.integrate.load(Ordering::SeqCst) > 0);
        assert_eq!(calls.overlaps.load(Ordering::SeqCst), 0);
    }
}
