use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use log::warn;
use serde::{Deserialize, Serialize};

use super::depth::{DepthFileFormat, DepthLengthPolicy, NoiseModel};
use super::error::ConfigError;

pub const DEFAULT_STEP_FRAMES: usize = 3;

/// Everything the replay needs, fixed before the first frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub calib: PathBuf,
    pub files: PathBuf,
    pub depth_files: PathBuf,
    /// Target dispatch rate, 0 replays as fast as frames can be processed.
    pub hz: f64,
    pub depth_format: DepthFileFormat,
    pub noise_on_init_gt: f32,
    pub noise_model: NoiseModel,
    pub noise_seed: u64,
    /// Restart the image list from its first entry after a full reset.
    pub rewind_manifest_on_reset: bool,
    pub depth_length_policy: DepthLengthPolicy,
    /// Frames after which the replay waits for an acknowledgment.
    pub step_frames: usize,
    pub viewer_addr: Option<String>,
}

impl ReplayConfig {
    pub fn new<P: Into<PathBuf>>(calib: P, files: P, depth_files: P) -> Self {
        Self {
            calib: calib.into(),
            files: files.into(),
            depth_files: depth_files.into(),
            hz: 0.0,
            depth_format: DepthFileFormat::default(),
            noise_on_init_gt: 0.0,
            noise_model: NoiseModel::default(),
            noise_seed: 0,
            rewind_manifest_on_reset: false,
            depth_length_policy: DepthLengthPolicy::default(),
            step_frames: DEFAULT_STEP_FRAMES,
            viewer_addr: None,
        }
    }

    pub fn from_params(params: &dyn ParamSource) -> Result<Self, ConfigError> {
        let calib = required(params, "calib", "camera calibration file")?;
        let files = required(params, "files", "source files")?;
        let depth_files = required(params, "depthFiles", "depth source files")?;
        let mut config = Self::new(calib, files, depth_files);

        if let Some(hz) = optional::<f64>(params, "hz")? {
            if !hz.is_finite() || hz < 0.0 {
                warn!("invalid _hz:={}, replaying unconstrained", hz);
            } else {
                config.hz = hz;
            }
        }
        if let Some(raw) = params.get("depthFormat")? {
            match raw.parse::<DepthFileFormat>() {
                Ok(format) => config.depth_format = format,
                Err(e) => warn!(
                    "{}; specify _depthFormat:=axial (TUM, 0) or _depthFormat:=euclidean (ICL-NUIM, 1). Using {:?}",
                    e, config.depth_format
                ),
            }
        }
        if let Some(noise) = optional::<f32>(params, "noiseOnInitGT")? {
            config.noise_on_init_gt = noise;
        }
        if let Some(model) = optional::<NoiseModel>(params, "noiseModel")? {
            config.noise_model = model;
        }
        if let Some(seed) = optional::<u64>(params, "noiseSeed")? {
            config.noise_seed = seed;
        }
        if let Some(rewind) = optional_bool(params, "rewindOnReset")? {
            config.rewind_manifest_on_reset = rewind;
        }
        if let Some(strict) = optional_bool(params, "strictDepthLength")? {
            config.depth_length_policy = if strict {
                DepthLengthPolicy::Strict
            } else {
                DepthLengthPolicy::Lenient
            };
        }
        if let Some(steps) = optional::<usize>(params, "stepFrames")? {
            config.step_frames = steps;
        }
        config.viewer_addr = params.get("viewer")?;

        Ok(config)
    }

    pub fn unconstrained(&self) -> bool {
        self.hz <= 0.0
    }
}

fn required(
    params: &dyn ParamSource,
    param: &'static str,
    what: &'static str,
) -> Result<PathBuf, ConfigError> {
    match params.get(param)? {
        Some(value) if !value.trim().is_empty() => Ok(PathBuf::from(value.trim())),
        _ => Err(ConfigError::Missing { param, what }),
    }
}

/// Unparsable optional values are reported and ignored.
fn optional<T: FromStr>(params: &dyn ParamSource, param: &'static str) -> Result<Option<T>, ConfigError> {
    let Some(raw) = params.get(param)? else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            warn!("invalid _{}:={}, ignoring", param, raw);
            Ok(None)
        }
    }
}

fn optional_bool(params: &dyn ParamSource, param: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = params.get(param)? else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => {
            warn!("invalid _{}:={}, ignoring", param, raw);
            Ok(None)
        }
    }
}

/// Where named node parameters come from.
pub trait ParamSource {
    fn get(&self, name: &'static str) -> Result<Option<String>, ConfigError>;
}

/// Command line of the replay node. Every parameter can be given as an
/// option (`--calib cam.cfg`) or as a ROS private remapping
/// (`_calib:=cam.cfg`); options win.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "slam_node", about = "Replays a recorded sequence into the SLAM engine")]
pub struct ReplayArgs {
    /// Camera calibration file.
    #[arg(long)]
    calib: Option<String>,
    /// Image directory or list file.
    #[arg(long)]
    files: Option<String>,
    /// Depth directory or list file.
    #[arg(long)]
    depth_files: Option<String>,
    /// Target dispatch rate, 0 for unconstrained.
    #[arg(long)]
    hz: Option<String>,
    /// axial (0) or euclidean (1).
    #[arg(long)]
    depth_format: Option<String>,
    #[arg(long)]
    noise_on_init_gt: Option<String>,
    /// additive or symmetric.
    #[arg(long)]
    noise_model: Option<String>,
    #[arg(long)]
    noise_seed: Option<String>,
    #[arg(long)]
    rewind_on_reset: Option<String>,
    #[arg(long)]
    strict_depth_length: Option<String>,
    #[arg(long)]
    step_frames: Option<String>,
    /// Viewer address, host:port.
    #[arg(long)]
    viewer: Option<String>,
    /// ROS style `_name:=value` parameters.
    #[arg(value_name = "_NAME:=VALUE", value_parser = parse_remap)]
    remaps: Vec<(String, String)>,
}

fn parse_remap(arg: &str) -> Result<(String, String), String> {
    arg.strip_prefix('_')
        .and_then(|a| a.split_once(":="))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected _name:=value, got '{}'", arg))
}

impl ReplayArgs {
    fn option(&self, name: &str) -> Option<&String> {
        match name {
            "calib" => self.calib.as_ref(),
            "files" => self.files.as_ref(),
            "depthFiles" => self.depth_files.as_ref(),
            "hz" => self.hz.as_ref(),
            "depthFormat" => self.depth_format.as_ref(),
            "noiseOnInitGT" => self.noise_on_init_gt.as_ref(),
            "noiseModel" => self.noise_model.as_ref(),
            "noiseSeed" => self.noise_seed.as_ref(),
            "rewindOnReset" => self.rewind_on_reset.as_ref(),
            "strictDepthLength" => self.strict_depth_length.as_ref(),
            "stepFrames" => self.step_frames.as_ref(),
            "viewer" => self.viewer.as_ref(),
            _ => None,
        }
    }
}

impl ParamSource for ReplayArgs {
    fn get(&self, name: &'static str) -> Result<Option<String>, ConfigError> {
        if let Some(value) = self.option(name) {
            return Ok(Some(value.clone()));
        }
        // the last remapping of a name wins, as with rosrun
        Ok(self
            .remaps
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone()))
    }
}

#[cfg(feature = "ros")]
pub use ros::RosParams;

#[cfg(feature = "ros")]
mod ros {
    use super::{ConfigError, ParamSource};

    /// Node-private parameters on the ROS parameter server.
    pub struct RosParams;

    impl ParamSource for RosParams {
        fn get(&self, name: &'static str) -> Result<Option<String>, ConfigError> {
            let param = match rosrust::param(&format!("~{}", name)) {
                Some(param) => param,
                None => return Ok(None),
            };
            if !param.exists().unwrap_or(false) {
                return Ok(None);
            }
            if let Ok(value) = param.get::<String>() {
                return Ok(Some(value));
            }
            if let Ok(value) = param.get::<f64>() {
                return Ok(Some(value.to_string()));
            }
            if let Ok(value) = param.get::<i32>() {
                return Ok(Some(value.to_string()));
            }
            param
                .get::<bool>()
                .map(|value| Some(value.to_string()))
                .map_err(|e| ConfigError::Source {
                    param: name,
                    msg: e.to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(args: &[&str]) -> ReplayArgs {
        ReplayArgs::try_parse_from(std::iter::once("slam_node").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn reads_all_parameters() {
        let config = ReplayConfig::from_params(&params(&[
            "_calib:=/data/cam.cfg",
            "_files:=/data/images",
            "_depthFiles:=/data/depthlist.txt",
            "_hz:=10",
            "_depthFormat:=1",
            "_noiseOnInitGT:=0.05",
            "_noiseSeed:=7",
            "_rewindOnReset:=true",
            "_strictDepthLength:=1",
            "_stepFrames:=0",
        ]))
        .unwrap();

        assert_eq!(config.calib, PathBuf::from("/data/cam.cfg"));
        assert_eq!(config.depth_files, PathBuf::from("/data/depthlist.txt"));
        assert_eq!(config.hz, 10.0);
        assert!(!config.unconstrained());
        assert_eq!(config.depth_format, DepthFileFormat::EuclideanRange);
        assert_eq!(config.noise_on_init_gt, 0.05);
        assert_eq!(config.noise_seed, 7);
        assert!(config.rewind_manifest_on_reset);
        assert_eq!(config.depth_length_policy, DepthLengthPolicy::Strict);
        assert_eq!(config.step_frames, 0);
    }

    #[test]
    fn defaults_apply() {
        let config = ReplayConfig::from_params(&params(&[
            "_calib:=cam.cfg",
            "_files:=images",
            "_depthFiles:=depth",
        ]))
        .unwrap();

        assert!(config.unconstrained());
        assert_eq!(config.depth_format, DepthFileFormat::AxialZ);
        assert_eq!(config.noise_on_init_gt, 0.0);
        assert_eq!(config.noise_model, NoiseModel::Additive);
        assert!(!config.rewind_manifest_on_reset);
        assert_eq!(config.depth_length_policy, DepthLengthPolicy::Lenient);
        assert_eq!(config.step_frames, DEFAULT_STEP_FRAMES);
        assert_eq!(config.viewer_addr, None);
    }

    #[test]
    fn missing_source_is_fatal() {
        let err = ReplayConfig::from_params(&params(&["_calib:=cam.cfg", "_depthFiles:=depth"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { param: "files", .. }));
    }

    #[test]
    fn bad_depth_format_keeps_default() {
        let config = ReplayConfig::from_params(&params(&[
            "_calib:=cam.cfg",
            "_files:=images",
            "_depthFiles:=depth",
            "_depthFormat:=7",
            "_hz:=fast",
        ]))
        .unwrap();
        assert_eq!(config.depth_format, DepthFileFormat::AxialZ);
        assert_eq!(config.hz, 0.0);
    }

    #[test]
    fn rejects_malformed_arguments() {
        let err = ReplayArgs::try_parse_from(["slam_node", "_calib:=cam.cfg", "files=images"]);
        assert!(err.is_err());
        assert!(ReplayArgs::try_parse_from(["slam_node", "--verbose"]).is_err());
    }

    #[test]
    fn options_override_remappings() {
        let p = params(&[
            "_viewer:=127.0.0.1:9123",
            "_hz:=5",
            "_hz:=10",
            "--calib",
            "/data/cam.cfg",
            "_calib:=ignored.cfg",
        ]);
        assert_eq!(p.get("viewer").unwrap().as_deref(), Some("127.0.0.1:9123"));
        assert_eq!(p.get("hz").unwrap().as_deref(), Some("10"));
        assert_eq!(p.get("calib").unwrap().as_deref(), Some("/data/cam.cfg"));
        assert_eq!(p.get("noiseSeed").unwrap(), None);
    }

    #[test]
    fn long_options_fill_the_config() {
        let config = ReplayConfig::from_params(&params(&[
            "--calib",
            "cam.cfg",
            "--files",
            "images",
            "--depth-files",
            "depth",
            "--depth-format",
            "euclidean",
            "--step-frames",
            "1",
        ]))
        .unwrap();
        assert_eq!(config.files, PathBuf::from("images"));
        assert_eq!(config.depth_format, DepthFileFormat::EuclideanRange);
        assert_eq!(config.step_frames, 1);
    }

    #[test]
    fn non_finite_rate_is_ignored() {
        for hz in ["NaN", "inf", "-2"] {
            let config = ReplayConfig::from_params(&params(&[
                "_calib:=cam.cfg",
                "_files:=images",
                "_depthFiles:=depth",
                &format!("_hz:={}", hz),
            ]))
            .unwrap();
            assert_eq!(config.hz, 0.0, "{}", hz);
            assert!(config.unconstrained());
        }
    }
}
