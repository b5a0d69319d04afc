use image::GrayImage;
use log::{debug, info, warn};
use nalgebra as na;

use super::camera::CalibrationModel;
use super::depth::DepthFrame;
use super::error::EngineError;
use crate::visualizer::sink::SharedSink;

/// The tracking/mapping engine fed by the replay loop.
pub trait SlamEngine {
    /// Initializes the map from a ground-truth depth map of the first frame.
    fn gt_depth_init(
        &mut self,
        image: &GrayImage,
        depth: &DepthFrame,
        timestamp: f64,
        frame_index: usize,
    ) -> Result<(), EngineError>;

    /// Initializes the map with random depth when no ground truth exists.
    fn random_init(
        &mut self,
        image: &GrayImage,
        timestamp: f64,
        frame_index: usize,
    ) -> Result<(), EngineError>;

    /// `unconstrained` is set when frames are replayed without a target rate.
    fn track_frame(
        &mut self,
        image: &GrayImage,
        frame_index: usize,
        unconstrained: bool,
        timestamp: f64,
    ) -> Result<(), EngineError>;

    fn finalize(&mut self) -> Result<(), EngineError>;
}

/// Builds a fresh engine, at startup and on every full reset.
pub trait EngineFactory {
    type Engine: SlamEngine;

    fn build(&mut self, calib: &CalibrationModel, sink: SharedSink)
        -> Result<Self::Engine, EngineError>;
}

impl<E, F> EngineFactory for F
where
    E: SlamEngine,
    F: FnMut(&CalibrationModel, SharedSink) -> Result<E, EngineError>,
{
    type Engine = E;

    fn build(&mut self, calib: &CalibrationModel, sink: SharedSink) -> Result<E, EngineError> {
        self(calib, sink)
    }
}

const POINT_STRIDE: u32 = 4;

/// Stand-in engine: publishes every dispatched frame and the ground-truth
/// depth of the first frame as a point cloud, without tracking.
pub struct EchoEngine {
    k_inv: na::Matrix3<f64>,
    sink: SharedSink,
    pose: na::Isometry3<f64>,
    frames: usize,
}

impl EchoEngine {
    pub fn new(calib: &CalibrationModel, sink: SharedSink) -> Result<Self, EngineError> {
        let k_inv = calib
            .k()
            .try_inverse()
            .ok_or("intrinsic matrix is not invertible")?;
        Ok(Self {
            k_inv,
            sink,
            pose: na::Isometry3::identity(),
            frames: 0,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Back-projects every `POINT_STRIDE`-th pixel with positive depth.
    pub fn back_project(&self, depth: &DepthFrame) -> Vec<na::Point3<f64>> {
        let mut points = Vec::new();
        for v in (0..depth.height()).step_by(POINT_STRIDE as usize) {
            for u in (0..depth.width()).step_by(POINT_STRIDE as usize) {
                let z = match depth.get(u, v) {
                    Some(z) if z > 0.0 && z.is_finite() => z as f64,
                    _ => continue,
                };
                let ray = self.k_inv * na::Vector3::new(u as f64, v as f64, 1.0);
                points.push(na::Point3::from(ray * z));
            }
        }
        points
    }

    fn publish_frame(&mut self, frame_index: usize, timestamp: f64) {
        self.frames += 1;
        if let Err(e) = self.sink.publish_pose(frame_index, self.pose) {
            warn!("publish pose failed: {}", e);
        }
        if let Err(e) = self.sink.publish_frame(frame_index, timestamp) {
            warn!("publish frame failed: {}", e);
        }
    }
}

impl SlamEngine for EchoEngine {
    fn gt_depth_init(
        &mut self,
        _image: &GrayImage,
        depth: &DepthFrame,
        timestamp: f64,
        frame_index: usize,
    ) -> Result<(), EngineError> {
        let points = self.back_project(depth);
        info!("ground-truth init with {} points", points.len());
        if let Err(e) = self.sink.publish_points(&points) {
            warn!("publish points failed: {}", e);
        }
        self.publish_frame(frame_index, timestamp);
        Ok(())
    }

    fn random_init(
        &mut self,
        _image: &GrayImage,
        timestamp: f64,
        frame_index: usize,
    ) -> Result<(), EngineError> {
        info!("random init at frame {}", frame_index);
        self.publish_frame(frame_index, timestamp);
        Ok(())
    }

    fn track_frame(
        &mut self,
        _image: &GrayImage,
        frame_index: usize,
        unconstrained: bool,
        timestamp: f64,
    ) -> Result<(), EngineError> {
        debug!(
            "track frame {} at {:.2} (unconstrained: {})",
            frame_index, timestamp, unconstrained
        );
        self.publish_frame(frame_index, timestamp);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), EngineError> {
        info!("engine finalized after {} frames", self.frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::replay::depth::{DepthFileFormat, DepthNoise};
    use crate::visualizer::message::VizMessage;
    use crate::visualizer::sink::ChannelSink;

    #[test]
    fn back_projection_recovers_depth() {
        let calib = CalibrationModel::pinhole(40.0, 40.0, 31.5, 23.5, 64, 48).unwrap();
        let engine = EchoEngine::new(&calib, Arc::new(crate::visualizer::sink::NullSink)).unwrap();
        let text = vec!["2"; 64 * 48].join(" ");
        let (depth, _) =
            DepthFrame::from_text(&text, &calib, DepthFileFormat::AxialZ, &mut DepthNoise::none());

        let points = engine.back_project(&depth);
        assert_eq!(points.len(), 16 * 12);
        assert!(points.iter().all(|p| (p.z - 2.0).abs() < 1e-9));
        // pixel (0, 0) sits left of and above the principal point
        assert!(points[0].x < 0.0 && points[0].y < 0.0);
    }

    #[test]
    fn publishes_each_dispatched_frame() {
        let calib = CalibrationModel::pinhole(40.0, 40.0, 31.5, 23.5, 64, 48).unwrap();
        let (sink, rx) = ChannelSink::new(16);
        let mut engine = EchoEngine::new(&calib, Arc::new(sink)).unwrap();
        let image = GrayImage::new(64, 48);

        engine.random_init(&image, 0.0, 0).unwrap();
        engine.track_frame(&image, 1, true, 0.03).unwrap();

        let frames = rx
            .try_iter()
            .filter_map(|m| match m {
                VizMessage::Frame(f) => Some(f.id),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(frames, [0, 1]);
        assert_eq!(engine.frames(), 2);
    }

    #[test]
    fn ground_truth_init_does_not_wait_for_a_slow_viewer() {
        let calib = CalibrationModel::pinhole(40.0, 40.0, 31.5, 23.5, 64, 48).unwrap();
        let (sink, rx) = ChannelSink::new(16);
        let mut engine = EchoEngine::new(&calib, Arc::new(sink)).unwrap();
        let text = vec!["2"; 64 * 48].join(" ");
        let (depth, _) =
            DepthFrame::from_text(&text, &calib, DepthFileFormat::AxialZ, &mut DepthNoise::none());

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let image = GrayImage::new(64, 48);
            let result = engine.gt_depth_init(&image, &depth, 0.0, 0).is_ok();
            let _ = done_tx.send(result);
        });

        let finished = done_rx.recv_timeout(std::time::Duration::from_secs(2));
        assert_eq!(finished, Ok(true));
        assert_eq!(rx.try_iter().count(), 16);
    }

    #[test]
    fn closures_are_factories() {
        let calib = CalibrationModel::pinhole(40.0, 40.0, 31.5, 23.5, 64, 48).unwrap();
        let mut factory = |c: &CalibrationModel, s: SharedSink| EchoEngine::new(c, s);
        let engine = factory
            .build(&calib, Arc::new(crate::visualizer::sink::NullSink))
            .unwrap();
        assert_eq!(engine.frames(), 0);
    }
}
