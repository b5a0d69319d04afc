use log::{debug, info, warn};
use serde::Serialize;

use super::camera::CalibrationModel;
use super::config::ReplayConfig;
use super::control::{Acknowledger, ControlToken, NoAck};
use super::depth::{DepthFrame, DepthNoise};
use super::engine::{EngineFactory, SlamEngine};
use super::error::ReplayError;
use super::frame_source::{FrameSource, RectifiedFrame};
use super::manifest::FileManifest;
use super::rate::Rate;
use super::undistort::{self, Undistorter};
use crate::visualizer::sink::SharedSink;

/// Replay time advanced per dispatched frame, independent of wall time.
pub const FRAME_INTERVAL: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplayPhase {
    Idle,
    Initializing,
    Tracking,
    Resetting,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReplayState {
    /// Index handed to the engine with the next frame; 0 means initialize.
    pub frame_index: usize,
    pub timestamp: f64,
    pub reset_requested: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub dispatched: usize,
    pub skipped: usize,
    pub resets: usize,
    pub gt_inits: usize,
    pub random_inits: usize,
    pub tracked: usize,
    pub last_timestamp: f64,
    pub image_count: usize,
    pub depth_count: usize,
    pub shutdown: bool,
    /// Replay state when the run ended.
    pub final_state: ReplayState,
}

/// Drives one replay: reads frames in manifest order, initializes the engine
/// on frame index 0 and tracks every later frame.
pub struct ReplayController<F: EngineFactory> {
    config: ReplayConfig,
    images: FileManifest,
    depths: FileManifest,
    undistorter: Box<dyn Undistorter>,
    session: Session<F>,
}

/// The part of the controller that changes while frames are dispatched.
struct Session<F: EngineFactory> {
    calib: CalibrationModel,
    factory: F,
    engine: F::Engine,
    sink: SharedSink,
    control: ControlToken,
    ack: Box<dyn Acknowledger>,
    noise: DepthNoise,
    rate: Rate,
    state: ReplayState,
    phase: ReplayPhase,
    dispatched: usize,
    summary: ReplaySummary,
}

impl<F: EngineFactory> ReplayController<F> {
    /// Loads calibration and file lists named by `config` and builds the
    /// first engine. Missing image or depth sources leave empty lists.
    pub fn new(
        config: ReplayConfig,
        factory: F,
        sink: SharedSink,
        control: ControlToken,
    ) -> Result<Self, ReplayError> {
        let calib = CalibrationModel::from_file(&config.calib)?;
        let (w, h) = calib.output_size();
        info!("output {}x{}, K =\n{}", w, h, calib.k());
        let undistorter = undistort::for_calibration(&calib)?;

        let images = FileManifest::resolve_or_empty(&config.files, "image");
        let depths = FileManifest::resolve_or_empty(&config.depth_files, "depth");

        Self::with_parts(config, undistorter, images, depths, factory, sink, control)
    }

    pub fn with_parts(
        config: ReplayConfig,
        undistorter: Box<dyn Undistorter>,
        images: FileManifest,
        depths: FileManifest,
        mut factory: F,
        sink: SharedSink,
        control: ControlToken,
    ) -> Result<Self, ReplayError> {
        let calib = undistorter.calibration().clone();
        let engine = factory
            .build(&calib, sink.clone())
            .map_err(|e| ReplayError::engine("construction", e))?;

        let session = Session {
            calib,
            factory,
            engine,
            sink,
            control,
            ack: Box::new(NoAck),
            noise: DepthNoise::new(config.noise_on_init_gt, config.noise_model, config.noise_seed),
            rate: Rate::new(config.hz),
            state: ReplayState {
                frame_index: 0,
                timestamp: 0.0,
                reset_requested: false,
            },
            phase: ReplayPhase::Idle,
            dispatched: 0,
            summary: ReplaySummary {
                image_count: images.len(),
                depth_count: depths.len(),
                ..ReplaySummary::default()
            },
        };

        Ok(Self {
            config,
            images,
            depths,
            undistorter,
            session,
        })
    }

    /// Who lets the replay continue after each of the first `step_frames`
    /// frames.
    pub fn with_acknowledger(mut self, ack: Box<dyn Acknowledger>) -> Self {
        self.session.ack = ack;
        self
    }

    pub fn images(&self) -> &FileManifest {
        &self.images
    }

    pub fn depths(&self) -> &FileManifest {
        &self.depths
    }

    pub fn phase(&self) -> ReplayPhase {
        self.session.phase
    }

    /// Replays until the image list is exhausted or a shutdown arrives, then
    /// finalizes the engine and releases everything the controller owns.
    pub fn run(self) -> Result<ReplaySummary, ReplayError> {
        let Self {
            config,
            images,
            depths,
            undistorter,
            mut session,
        } = self;

        info!(
            "replaying {} images ({} depth files) at {}",
            images.len(),
            depths.len(),
            if config.hz > 0.0 {
                format!("{} Hz", config.hz)
            } else {
                "full speed".to_string()
            }
        );

        session.rate.reset();
        'replay: loop {
            let mut source = FrameSource::new(&images, &*undistorter);
            let mut rewind = false;

            for item in source.by_ref() {
                let frame = match item {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("{}. Skipping.", e);
                        session.summary.skipped += 1;
                        continue;
                    }
                };

                let frame_index = session.dispatch(&frame, &depths, &config)?;
                session.rate.sleep();

                let signals = session.control.poll();
                if signals.reset {
                    session.state.reset_requested = true;
                    session.full_reset()?;
                    rewind = config.rewind_manifest_on_reset;
                }
                if signals.shutdown {
                    info!("shutdown requested after frame {}", frame.manifest_pos);
                    session.summary.shutdown = true;
                    break 'replay;
                }

                if frame_index < config.step_frames {
                    session.ack.wait(frame_index);
                }
                if rewind {
                    break;
                }
            }

            if !rewind {
                debug!("image list exhausted at position {}", source.position());
                break;
            }
            info!("rewinding image list");
        }

        let summary = session.finish()?;
        drop(undistorter);
        Ok(summary)
    }
}

impl<F: EngineFactory> Session<F> {
    /// Hands one accepted frame to the engine and advances the replay clock.
    /// Returns the frame index used for the frame.
    fn dispatch(
        &mut self,
        frame: &RectifiedFrame,
        depths: &FileManifest,
        config: &ReplayConfig,
    ) -> Result<usize, ReplayError> {
        let index = self.state.frame_index;
        let timestamp = self.state.timestamp;

        if index == 0 {
            self.set_phase(ReplayPhase::Initializing);
            self.initialize(frame, depths, config, timestamp)?;
            self.set_phase(ReplayPhase::Tracking);
        } else {
            let unconstrained = self.rate.is_unconstrained();
            self.engine
                .track_frame(&frame.image, index, unconstrained, timestamp)
                .map_err(|e| ReplayError::engine("track-frame", e))?;
            self.summary.tracked += 1;
        }

        self.dispatched += 1;
        self.state.frame_index += 1;
        self.state.timestamp = self.dispatched as f64 * FRAME_INTERVAL;
        self.summary.dispatched += 1;
        self.summary.last_timestamp = timestamp;
        Ok(index)
    }

    fn initialize(
        &mut self,
        frame: &RectifiedFrame,
        depths: &FileManifest,
        config: &ReplayConfig,
        timestamp: f64,
    ) -> Result<(), ReplayError> {
        let index = self.state.frame_index;
        let depth = match depths.get(index) {
            Some(path) => match DepthFrame::read(
                path,
                &self.calib,
                config.depth_format,
                &mut self.noise,
                config.depth_length_policy,
            ) {
                Ok(depth) => Some(depth),
                Err(e) => {
                    warn!("{}; falling back to random initialization", e);
                    None
                }
            },
            None => None,
        };

        match depth {
            Some(depth) => {
                self.engine
                    .gt_depth_init(&frame.image, &depth, timestamp, index)
                    .map_err(|e| ReplayError::engine("depth-initialize", e))?;
                self.summary.gt_inits += 1;
            }
            None => {
                self.engine
                    .random_init(&frame.image, timestamp, index)
                    .map_err(|e| ReplayError::engine("random-initialize", e))?;
                self.summary.random_inits += 1;
            }
        }
        Ok(())
    }

    /// Replaces the engine with a freshly built one and restarts frame
    /// indexing. The replay clock keeps running.
    fn full_reset(&mut self) -> Result<(), ReplayError> {
        info!("FULL RESET!");
        self.set_phase(ReplayPhase::Resetting);

        let engine = self
            .factory
            .build(&self.calib, self.sink.clone())
            .map_err(|e| ReplayError::engine("reset", e))?;
        let old = std::mem::replace(&mut self.engine, engine);
        drop(old);

        self.state.frame_index = 0;
        self.state.reset_requested = false;
        self.summary.resets += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<ReplaySummary, ReplayError> {
        self.set_phase(ReplayPhase::Finished);
        let Session {
            mut engine,
            sink,
            state,
            mut summary,
            ..
        } = self;
        summary.final_state = state;
        engine
            .finalize()
            .map_err(|e| ReplayError::engine("finalize", e))?;
        drop(engine);
        drop(sink);

        info!(
            "replay finished: {} dispatched, {} skipped, {} resets",
            summary.dispatched, summary.skipped, summary.resets
        );
        Ok(summary)
    }

    fn set_phase(&mut self, phase: ReplayPhase) {
        if self.phase != phase {
            debug!("{:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}
