use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{info, warn};
use nalgebra as na;

use super::message::{BodyTransformMessage, FrameMessage, PointMessage, VizMessage};
use crate::replay::error::BoxError;

pub const DEFAULT_VIEWER_ADDR: &str = "127.0.0.1:9123";

/// Where the engine sends whatever it wants the viewer to show.
pub trait OutputSink: Send + Sync {
    fn publish(&self, msg: VizMessage) -> Result<(), BoxError>;

    fn publish_pose(&self, id: usize, transform: na::Isometry3<f64>) -> Result<(), BoxError> {
        self.publish(VizMessage::Pose(BodyTransformMessage { id, transform }))
    }

    fn publish_points(&self, points: &[na::Point3<f64>]) -> Result<(), BoxError> {
        for (id, position) in points.iter().enumerate() {
            self.publish(VizMessage::Point(PointMessage {
                id,
                position: *position,
            }))?;
        }
        Ok(())
    }

    fn publish_frame(&self, id: usize, timestamp: f64) -> Result<(), BoxError> {
        self.publish(VizMessage::Frame(FrameMessage { id, timestamp }))
    }
}

pub type SharedSink = Arc<dyn OutputSink>;

pub struct NullSink;

impl OutputSink for NullSink {
    fn publish(&self, _msg: VizMessage) -> Result<(), BoxError> {
        Ok(())
    }
}

/// In-process sink backed by a bounded channel. Publishing never blocks:
/// a full channel drops the message and reports it.
pub struct ChannelSink {
    tx: Sender<VizMessage>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<VizMessage>) {
        let (tx, rx) = bounded::<VizMessage>(capacity);
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn publish(&self, msg: VizMessage) -> Result<(), BoxError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err("viewer channel full, message dropped".into()),
            Err(TrySendError::Disconnected(_)) => Err("viewer channel closed".into()),
        }
    }
}

/// Line protocol client for the viewer's TCP server.
pub struct TcpSink {
    stream: Mutex<TcpStream>,
}

impl TcpSink {
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A) -> Result<Self, BoxError> {
        let stream = TcpStream::connect(&addr)?;
        stream.set_nodelay(true)?;
        info!("connected to viewer at {:?}", addr);
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }
}

impl OutputSink for TcpSink {
    fn publish(&self, msg: VizMessage) -> Result<(), BoxError> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| "viewer stream lock poisoned")?;
        stream.write_all(msg.encode().as_bytes())?;
        Ok(())
    }
}

/// Connects to the viewer at `addr`, or at `DEFAULT_VIEWER_ADDR` when none
/// is configured. Without a viewer, messages go to the ROS topics when the
/// `ros` feature is on and are discarded otherwise.
pub fn open(addr: Option<&str>) -> SharedSink {
    let target = addr.unwrap_or(DEFAULT_VIEWER_ADDR);
    match TcpSink::connect(target) {
        Ok(sink) => return Arc::new(sink),
        Err(e) if addr.is_some() => warn!("viewer at {} unavailable ({})", target, e),
        Err(e) => info!("no viewer at {} ({})", target, e),
    }

    #[cfg(feature = "ros")]
    match RosSink::new() {
        Ok(sink) => return Arc::new(sink),
        Err(e) => warn!("ros publishers unavailable ({}), not publishing", e),
    }

    Arc::new(NullSink)
}

#[cfg(feature = "ros")]
pub use ros::RosSink;

#[cfg(feature = "ros")]
mod ros {
    use std::sync::Mutex;

    use rosrust_msg::*;

    use super::{BoxError, OutputSink, PointMessage, VizMessage};

    struct RosState {
        seq: u32,
        path_pub: rosrust::Publisher<nav_msgs::Path>,
        pose_pub: rosrust::Publisher<geometry_msgs::PoseStamped>,
        point_cloud_pub: rosrust::Publisher<sensor_msgs::PointCloud>,
        path_msg: nav_msgs::Path,
        point_cloud_msg: sensor_msgs::PointCloud,
    }

    fn ros_err(e: rosrust::error::Error) -> BoxError {
        e.to_string().into()
    }

    /// Point ids restart at 0 for every published cloud, so id 0 replaces
    /// whatever the previous engine left behind.
    fn push_point(cloud: &mut sensor_msgs::PointCloud, point: &PointMessage) {
        if point.id == 0 {
            cloud.points.clear();
        }
        cloud.points.push(geometry_msgs::Point32 {
            x: point.position.x as f32,
            y: point.position.y as f32,
            z: point.position.z as f32,
        });
    }

    /// Publishes poses, the trajectory and the map cloud as ROS topics.
    pub struct RosSink {
        state: Mutex<RosState>,
    }

    impl RosSink {
        pub fn new() -> Result<Self, BoxError> {
            Ok(Self {
                state: Mutex::new(RosState {
                    seq: 0,
                    path_pub: rosrust::publish("trajectory", 100).map_err(ros_err)?,
                    pose_pub: rosrust::publish("pose", 100).map_err(ros_err)?,
                    point_cloud_pub: rosrust::publish("slam_point_cloud", 10).map_err(ros_err)?,
                    path_msg: nav_msgs::Path::default(),
                    point_cloud_msg: sensor_msgs::PointCloud::default(),
                }),
            })
        }
    }

    impl OutputSink for RosSink {
        fn publish(&self, msg: VizMessage) -> Result<(), BoxError> {
            let mut state = self.state.lock().map_err(|_| "ros sink lock poisoned")?;
            let header = std_msgs::Header {
                seq: state.seq,
                stamp: rosrust::now(),
                frame_id: "odom".to_string(),
            };
            state.seq += 1;

            match msg {
                VizMessage::Pose(pose) => {
                    let t = pose.transform.translation;
                    let q = pose.transform.rotation;
                    let msg = geometry_msgs::PoseStamped {
                        header: header.clone(),
                        pose: geometry_msgs::Pose {
                            position: geometry_msgs::Point { x: t.x, y: t.y, z: t.z },
                            orientation: geometry_msgs::Quaternion {
                                x: q.i,
                                y: q.j,
                                z: q.k,
                                w: q.w,
                            },
                        },
                    };
                    state.pose_pub.send(msg.clone()).map_err(ros_err)?;

                    state.path_msg.header = header;
                    state.path_msg.poses.push(msg);
                    state.path_pub.send(state.path_msg.clone()).map_err(ros_err)?;
                }
                VizMessage::Point(point) => {
                    state.point_cloud_msg.header = header;
                    push_point(&mut state.point_cloud_msg, &point);
                }
                VizMessage::Frame(_) => {
                    if !state.point_cloud_msg.points.is_empty() {
                        state.point_cloud_pub.send(state.point_cloud_msg.clone()).map_err(ros_err)?;
                    }
                }
            }
            Ok(())
        }
    }

}
