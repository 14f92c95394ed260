//! Synthetic sensor rig for running the node without hardware.
//!
//! The rig drives around a circle inside a cylindrical room. Every tick it
//! emits the body pose, then one sample per configured stream: a depth image
//! of the wall ahead, a matching color image, or a lidar ring, each followed
//! by the camera info the pairer needs.
//!
//! ```text
//!          wall (room_radius_m)
//!       .-~~~~~~~~~~~~~~~-.
//!     /    .-~~~~~~~-.      \
//!    |    (  path r   )  -> |   camera looks along the direction of travel
//!     \    '-._____.-'      /
//!       '-._____________.-'
//! ```

use std::f32::consts::{FRAC_PI_2, TAU};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::core::{CameraIntrinsics, ColorImage, DepthImage, PointCloud, StreamId, StreamKind, TimedTransform, Transform};
use crate::error::{Error, Result};
use crate::threads::{DeliveryHandle, SensorMessage};

/// Frame the rig's cameras report in.
pub const CAMERA_FRAME: &str = "sim_camera";
/// Frame the rig's lidar reports in.
pub const LIDAR_FRAME: &str = "sim_lidar";

/// Rig geometry and timing.
#[derive(Debug, Clone)]
pub struct RigConfig {
    /// Tick rate (Hz)
    pub rate_hz: f32,
    pub path_radius_m: f32,
    pub room_radius_m: f32,
    /// Angular speed along the path (rad/s)
    pub angular_speed: f32,
    pub image_width: u32,
    pub image_height: u32,
    pub lidar_points: usize,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            rate_hz: 15.0,
            path_radius_m: 1.0,
            room_radius_m: 4.0,
            angular_speed: 0.3,
            image_width: 32,
            image_height: 24,
            lidar_points: 360,
        }
    }
}

/// Deterministic message generator.
#[derive(Debug, Clone)]
pub struct SyntheticRig {
    config: RigConfig,
    streams: Vec<(StreamId, StreamKind)>,
    intrinsics: CameraIntrinsics,
}

impl SyntheticRig {
    pub fn new(config: RigConfig, streams: Vec<(StreamId, StreamKind)>) -> Self {
        let (w, h) = (config.image_width, config.image_height);
        let intrinsics = CameraIntrinsics {
            fx: w as f32,
            fy: w as f32,
            cx: w as f32 / 2.0,
            cy: h as f32 / 2.0,
            width: w,
            height: h,
        };
        Self {
            config,
            streams,
            intrinsics,
        }
    }

    /// Mounting transforms the rig's sensors need.
    pub fn static_transforms(&self) -> Vec<SensorMessage> {
        // Optical frame: z forward, x right, y down
        let camera = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.3),
            UnitQuaternion::from_euler_angles(-FRAC_PI_2, 0.0, -FRAC_PI_2),
        );
        let lidar = Isometry3::translation(0.0, 0.0, 0.5);
        vec![
            SensorMessage::StaticTransform {
                frame_id: CAMERA_FRAME.into(),
                transform: camera,
            },
            SensorMessage::StaticTransform {
                frame_id: LIDAR_FRAME.into(),
                transform: lidar,
            },
        ]
    }

    /// Body pose at time `t_us`.
    pub fn body_pose(&self, t_us: u64) -> Transform {
        let angle = self.config.angular_speed * (t_us as f64 / 1_000_000.0) as f32;
        let r = self.config.path_radius_m;
        // Heading is tangent to the circle
        Isometry3::new(
            Vector3::new(r * angle.cos(), r * angle.sin(), 0.0),
            Vector3::z() * (angle + FRAC_PI_2),
        )
    }

    /// All messages for one tick, pose first.
    pub fn messages_at(&self, t_us: u64) -> Vec<SensorMessage> {
        let mut out = Vec::with_capacity(1 + 2 * self.streams.len());
        let body = self.body_pose(t_us);
        out.push(SensorMessage::Pose(TimedTransform::new(t_us, body)));

        for &(stream, kind) in &self.streams {
            match kind {
                StreamKind::Depth => {
                    out.push(SensorMessage::DepthImage {
                        stream,
                        timestamp_us: t_us,
                        frame_id: CAMERA_FRAME.into(),
                        image: self.depth_image(&body),
                    });
                    out.push(self.camera_info(stream, t_us));
                }
                StreamKind::Color => {
                    out.push(SensorMessage::ColorImage {
                        stream,
                        timestamp_us: t_us,
                        frame_id: CAMERA_FRAME.into(),
                        image: self.color_image(t_us),
                    });
                    out.push(self.camera_info(stream, t_us));
                }
                StreamKind::Lidar => out.push(SensorMessage::PointCloud {
                    stream,
                    timestamp_us: t_us,
                    frame_id: LIDAR_FRAME.into(),
                    cloud: self.lidar_ring(&body),
                }),
            }
        }
        out
    }

    fn camera_info(&self, stream: StreamId, t_us: u64) -> SensorMessage {
        SensorMessage::CameraInfo {
            stream,
            timestamp_us: t_us,
            intrinsics: self.intrinsics,
        }
    }

    /// Distance from `origin` along horizontal `dir` to the room wall.
    fn wall_range(&self, origin: &Point3<f32>, dir: &Vector3<f32>) -> f32 {
        // |o + s d|^2 = R^2 in the XY plane
        let (ox, oy, dx, dy) = (origin.x, origin.y, dir.x, dir.y);
        let a = (dx * dx + dy * dy).max(f32::EPSILON);
        let b = 2.0 * (ox * dx + oy * dy);
        let c = ox * ox + oy * oy - self.config.room_radius_m.powi(2);
        (-b + (b * b - 4.0 * a * c).max(0.0).sqrt()) / (2.0 * a)
    }

    fn depth_image(&self, body: &Transform) -> DepthImage {
        let (w, h) = (self.config.image_width, self.config.image_height);
        let k = &self.intrinsics;
        let origin = body * Point3::origin();
        let forward = body * Vector3::x();
        let left = body * Vector3::y();
        // The wall is vertical, so optical-axis depth only varies by column.
        // With a unit forward component the ray parameter is the depth.
        let row: Vec<f32> = (0..w)
            .map(|u| {
                let x = (u as f32 - k.cx) / k.fx;
                self.wall_range(&origin, &(forward - left * x))
            })
            .collect();
        let depths = (0..h).flat_map(|_| row.iter().copied()).collect();
        DepthImage::new(w, h, depths)
    }

    fn color_image(&self, t_us: u64) -> ColorImage {
        let (w, h) = (self.config.image_width, self.config.image_height);
        let shade = ((t_us / 10_000) % 256) as u8;
        ColorImage::new(w, h, vec![[shade, 128, 255 - shade]; (w * h) as usize])
    }

    fn lidar_ring(&self, body: &Transform) -> PointCloud {
        let origin = body * Point3::origin();
        let n = self.config.lidar_points.max(1);
        let points = (0..n)
            .map(|i| {
                let bearing = TAU * i as f32 / n as f32;
                let local = Vector3::new(bearing.cos(), bearing.sin(), 0.0);
                let range = self.wall_range(&origin, &(body * local));
                Point3::from(local * range)
            })
            .collect();
        PointCloud::new(points)
    }

    /// Run the rig on its own thread until `running` clears.
    pub fn spawn(self, handle: DeliveryHandle, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("sim".into())
            .spawn(move || {
                let interval = Duration::from_secs_f32(1.0 / self.config.rate_hz.max(0.1));
                log::info!(
                    "Synthetic rig running at {:.1} Hz with {} streams",
                    self.config.rate_hz,
                    self.streams.len()
                );
                for message in self.static_transforms() {
                    handle.deliver(message);
                }
                let start = Instant::now();
                while running.load(Ordering::Relaxed) {
                    let tick = Instant::now();
                    let t_us = start.elapsed().as_micros() as u64;
                    for message in self.messages_at(t_us) {
                        handle.deliver(message);
                    }
                    let elapsed = tick.elapsed();
                    if elapsed < interval {
                        thread::sleep(interval - elapsed);
                    }
                }
                log::info!("Synthetic rig stopped");
            })
            .map_err(|source| Error::Spawn {
                name: "sim".into(),
                source,
            })
    }
}
