use std::error::Error;

use log::{error, info};

use gt_replay::replay::config::ReplayConfig;
use gt_replay::replay::control::{self, ControlHandle, NoAck, StdinAck};
use gt_replay::replay::controller::ReplayController;
use gt_replay::replay::engine::EchoEngine;
use gt_replay::visualizer::sink;

#[cfg(not(feature = "ros"))]
fn load_config() -> Result<ReplayConfig, Box<dyn Error>> {
    use clap::Parser;
    use gt_replay::replay::config::ReplayArgs;

    Ok(ReplayConfig::from_params(&ReplayArgs::parse())?)
}

#[cfg(feature = "ros")]
fn load_config() -> Result<ReplayConfig, Box<dyn Error>> {
    use gt_replay::replay::config::RosParams;

    rosrust::init("LSD_SLAM");
    Ok(ReplayConfig::from_params(&RosParams)?)
}

#[cfg(feature = "ros")]
fn watch_ros_shutdown(handle: ControlHandle) {
    std::thread::spawn(move || {
        while rosrust::is_ok() {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        handle.shutdown();
    });
}

#[cfg(not(feature = "ros"))]
fn watch_ros_shutdown(_handle: ControlHandle) {}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    };
    info!("config: {}", serde_json::to_string(&config)?);

    let sink = sink::open(config.viewer_addr.as_deref());
    let (handle, token) = control::channel();
    watch_ros_shutdown(handle.clone());

    let step_frames = config.step_frames;
    let controller = ReplayController::new(config, EchoEngine::new, sink, token)?;
    let controller = if step_frames > 0 {
        controller.with_acknowledger(Box::new(StdinAck::new(handle)))
    } else {
        controller.with_acknowledger(Box::new(NoAck))
    };

    let summary = controller.run()?;
    info!("summary: {}", serde_json::to_string(&summary)?);
    Ok(())
}
