use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::camera::{pixel_count, CalibrationModel};
use super::error::DepthError;

const NOISE_STEPS: u32 = 100_000;

/// Convention of the raw samples stored in a depth file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthFileFormat {
    /// Depth along the optical axis (TUM RGB-D).
    #[default]
    AxialZ,
    /// Line-of-sight distance from the camera center (ICL-NUIM).
    EuclideanRange,
}

impl fmt::Display for DepthFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepthFileFormat::AxialZ => write!(f, "z-direction depth"),
            DepthFileFormat::EuclideanRange => write!(f, "euclidean distance depth"),
        }
    }
}

impl FromStr for DepthFileFormat {
    type Err = String;

    /// Names are preferred. The numeric codes follow the legacy launch files:
    /// `0` for TUM axial depth, `1` for ICL-NUIM range.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "axial" | "axialz" | "z" | "tum" | "0" => Ok(DepthFileFormat::AxialZ),
            "euclidean" | "euclideanrange" | "range" | "icl" | "1" => {
                Ok(DepthFileFormat::EuclideanRange)
            }
            other => Err(format!("unknown depth format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoiseModel {
    /// Non-negative perturbation in `[0, A]`.
    #[default]
    Additive,
    /// Zero-mean perturbation in `[-A, A]`.
    Symmetric,
}

impl FromStr for NoiseModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "additive" => Ok(NoiseModel::Additive),
            "symmetric" => Ok(NoiseModel::Symmetric),
            other => Err(format!("unknown noise model '{}'", other)),
        }
    }
}

/// What to do when a depth file does not hold exactly width x height samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthLengthPolicy {
    /// Drop extra samples, leave missing ones at zero.
    #[default]
    Lenient,
    Strict,
}

/// Seeded noise source for the initial depth map.
pub struct DepthNoise {
    amplitude: f32,
    model: NoiseModel,
    rng: StdRng,
}

impl DepthNoise {
    pub fn new(amplitude: f32, model: NoiseModel, seed: u64) -> Self {
        Self {
            amplitude,
            model,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn none() -> Self {
        Self::new(0.0, NoiseModel::Additive, 0)
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn sample(&mut self) -> f32 {
        if self.amplitude == 0.0 {
            return 0.0;
        }
        let step = self.rng.gen_range(0..=NOISE_STEPS) as f32 / NOISE_STEPS as f32;
        match self.model {
            NoiseModel::Additive => self.amplitude * step,
            NoiseModel::Symmetric => self.amplitude * (2.0 * step - 1.0),
        }
    }
}

/// Canonical axial depth of one raw sample at pixel `(u, v)`.
pub fn canonical_depth(
    raw: f32,
    u: u32,
    v: u32,
    calib: &CalibrationModel,
    format: DepthFileFormat,
) -> f32 {
    match format {
        DepthFileFormat::AxialZ => raw,
        DepthFileFormat::EuclideanRange => {
            let nx = (u as f64 - calib.cx()) / calib.fx();
            let ny = (v as f64 - calib.cy()) / calib.fy();
            (raw as f64 / (nx * nx + ny * ny + 1.0).sqrt()) as f32
        }
    }
}

/// `canonical_depth` plus the configured perturbation.
pub fn convert(
    raw: f32,
    u: u32,
    v: u32,
    calib: &CalibrationModel,
    format: DepthFileFormat,
    noise: &mut DepthNoise,
) -> f32 {
    let z = canonical_depth(raw, u, v, calib, format);
    if noise.amplitude() != 0.0 {
        z + noise.sample()
    } else {
        z
    }
}

/// Dense row-major depth map in the output image geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; pixel_count(width, height)],
        }
    }

    pub fn read<P: AsRef<Path>>(
        path: P,
        calib: &CalibrationModel,
        format: DepthFileFormat,
        noise: &mut DepthNoise,
        policy: DepthLengthPolicy,
    ) -> Result<Self, DepthError> {
        let path = path.as_ref();
        info!("reading {} ({})", path.display(), format);
        let text = fs::read_to_string(path).map_err(|e| DepthError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let (frame, found) = Self::from_text(&text, calib, format, noise);

        let expected = frame.data.len();
        if found != expected {
            match policy {
                DepthLengthPolicy::Strict => {
                    return Err(DepthError::LengthMismatch {
                        path: path.to_path_buf(),
                        expected,
                        found,
                    })
                }
                DepthLengthPolicy::Lenient => warn!(
                    "depth file {} holds {} samples, expected {}",
                    path.display(),
                    found,
                    expected
                ),
            }
        }
        Ok(frame)
    }

    /// Converts a whitespace separated sample stream in raster order.
    /// Returns the frame and the number of samples found in the stream.
    pub fn from_text(
        text: &str,
        calib: &CalibrationModel,
        format: DepthFileFormat,
        noise: &mut DepthNoise,
    ) -> (Self, usize) {
        let (width, height) = calib.output_size();
        let mut frame = Self::new(width, height);
        let capacity = frame.data.len();

        let mut found = 0;
        let (mut u, mut v) = (0u32, 0u32);
        for token in text.split_whitespace() {
            let raw = match token.parse::<f32>() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("stopping at depth sample {} ('{}'): {}", found, token, e);
                    break;
                }
            };
            if u == width {
                v += 1;
                u = 0;
            }
            if found < capacity {
                frame.data[found] = convert(raw, u, v, calib, format, noise);
            }
            found += 1;
            u += 1;
        }
        (frame, found)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, u: u32, v: u32) -> Option<f32> {
        if u >= self.width || v >= self.height {
            return None;
        }
        self.data
            .get(v as usize * self.width as usize + u as usize)
            .copied()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calib() -> CalibrationModel {
        CalibrationModel::pinhole(40.0, 30.0, 31.5, 23.5, 64, 48).unwrap()
    }

    fn uniform_text(value: f32, count: usize) -> String {
        vec![format!("{}", value); count].join(" ")
    }

    #[test]
    fn axial_z_is_unchanged() {
        let calib = calib();
        let mut noise = DepthNoise::none();
        for (raw, u, v) in [(2.0, 0, 0), (0.5, 63, 47), (13.25, 10, 40)] {
            assert_eq!(convert(raw, u, v, &calib, DepthFileFormat::AxialZ, &mut noise), raw);
        }
    }

    #[test]
    fn euclidean_range_projects_onto_axis() {
        let calib = calib();
        let mut noise = DepthNoise::none();
        for (raw, u, v) in [(2.0f32, 0u32, 0u32), (3.0, 63, 47), (1.0, 31, 23)] {
            let nx = (u as f64 - 31.5) / 40.0;
            let ny = (v as f64 - 23.5) / 30.0;
            let expected = raw as f64 / (nx * nx + ny * ny + 1.0).sqrt();
            let z = convert(raw, u, v, &calib, DepthFileFormat::EuclideanRange, &mut noise);
            assert!((z as f64 - expected).abs() < 1e-5, "{} vs {}", z, expected);
            assert!(z <= raw);
        }
    }

    #[test]
    fn zero_noise_is_deterministic() {
        let calib = calib();
        let mut a = DepthNoise::new(0.0, NoiseModel::Additive, 1);
        let mut b = DepthNoise::new(0.0, NoiseModel::Additive, 99);
        let fmt = DepthFileFormat::EuclideanRange;
        assert_eq!(
            convert(4.0, 5, 7, &calib, fmt, &mut a),
            convert(4.0, 5, 7, &calib, fmt, &mut b)
        );
    }

    #[test]
    fn additive_noise_stays_in_bounds() {
        let calib = calib();
        let mut noise = DepthNoise::new(0.25, NoiseModel::Additive, 7);
        for _ in 0..1000 {
            let z = convert(2.0, 3, 4, &calib, DepthFileFormat::AxialZ, &mut noise);
            assert!((2.0..=2.25).contains(&z), "{}", z);
        }
    }

    #[test]
    fn symmetric_noise_stays_in_bounds() {
        let mut noise = DepthNoise::new(0.5, NoiseModel::Symmetric, 3);
        let draws = (0..1000).map(|_| noise.sample()).collect::<Vec<_>>();
        assert!(draws.iter().all(|d| (-0.5..=0.5).contains(d)));
        assert!(draws.iter().any(|d| *d < 0.0));
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let mut a = DepthNoise::new(1.0, NoiseModel::Additive, 42);
        let mut b = DepthNoise::new(1.0, NoiseModel::Additive, 42);
        for _ in 0..16 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn uniform_axial_file_gives_uniform_frame() {
        let calib = calib();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth_0.txt");
        fs::write(&path, uniform_text(2.0, 64 * 48)).unwrap();

        let frame = DepthFrame::read(
            &path,
            &calib,
            DepthFileFormat::AxialZ,
            &mut DepthNoise::none(),
            DepthLengthPolicy::Strict,
        )
        .unwrap();
        assert_eq!(frame.as_slice().len(), 64 * 48);
        assert!(frame.as_slice().iter().all(|z| *z == 2.0));
    }

    #[test]
    fn raster_order_follows_width() {
        let calib = calib();
        let text = (0..64 * 48).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let (frame, found) =
            DepthFrame::from_text(&text, &calib, DepthFileFormat::AxialZ, &mut DepthNoise::none());
        assert_eq!(found, 64 * 48);
        assert_eq!(frame.get(0, 1), Some(64.0));
        assert_eq!(frame.get(63, 47), Some((64 * 48 - 1) as f32));
        assert_eq!(frame.get(64, 0), None);
    }

    #[test]
    fn short_file_is_underfilled_or_rejected() {
        let calib = calib();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.txt");
        fs::write(&path, uniform_text(1.5, 100)).unwrap();
        let fmt = DepthFileFormat::AxialZ;

        let frame = DepthFrame::read(&path, &calib, fmt, &mut DepthNoise::none(), DepthLengthPolicy::Lenient)
            .unwrap();
        assert_eq!(frame.get(99 % 64, 99 / 64), Some(1.5));
        assert_eq!(frame.get(100 % 64, 100 / 64), Some(0.0));

        let err = DepthFrame::read(&path, &calib, fmt, &mut DepthNoise::none(), DepthLengthPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, DepthError::LengthMismatch { expected: 3072, found: 100, .. }));
    }

    #[test]
    fn long_file_is_truncated() {
        let calib = calib();
        let (frame, found) = DepthFrame::from_text(
            &uniform_text(3.0, 64 * 48 + 10),
            &calib,
            DepthFileFormat::AxialZ,
            &mut DepthNoise::none(),
        );
        assert_eq!(found, 64 * 48 + 10);
        assert_eq!(frame.as_slice().len(), 64 * 48);
    }

    #[test]
    fn parses_format_names_and_codes() {
        assert_eq!("axial".parse::<DepthFileFormat>(), Ok(DepthFileFormat::AxialZ));
        assert_eq!("0".parse::<DepthFileFormat>(), Ok(DepthFileFormat::AxialZ));
        assert_eq!("Euclidean".parse::<DepthFileFormat>(), Ok(DepthFileFormat::EuclideanRange));
        assert_eq!("1".parse::<DepthFileFormat>(), Ok(DepthFileFormat::EuclideanRange));
        assert!("2".parse::<DepthFileFormat>().is_err());
    }
}
