use std::fs;
use std::path::Path;

use nalgebra as na;
use serde::{Deserialize, Serialize};

use super::error::CalibrationError;

/// Number of pixels in a `width` x `height` image, without `u32` overflow.
pub fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Values stored relative to image size, with the pixel-center offset.
    fn from_normalized(values: &[f64], width: u32, height: u32) -> Self {
        Self {
            fx: values[0] * width as f64,
            fy: values[1] * height as f64,
            cx: values[2] * width as f64 - 0.5,
            cy: values[3] * height as f64 - 0.5,
        }
    }

    fn rescaled(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        let sx = to.0 as f64 / from.0 as f64;
        let sy = to.1 as f64 / from.1 as f64;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: (self.cx + 0.5) * sx - 0.5,
            cy: (self.cy + 0.5) * sy - 0.5,
        }
    }

    pub fn matrix(&self) -> na::Matrix3<f64> {
        na::Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DistortionModel {
    /// Field-of-view (ATAN) model with a single parameter.
    Fov { omega: f64 },
    RadTan { k1: f64, k2: f64, p1: f64, p2: f64 },
}

impl DistortionModel {
    pub fn is_identity(&self) -> bool {
        match *self {
            DistortionModel::Fov { omega } => omega == 0.0,
            DistortionModel::RadTan { k1, k2, p1, p2 } => {
                k1 == 0.0 && k2 == 0.0 && p1 == 0.0 && p2 == 0.0
            }
        }
    }

    /// Maps an undistorted normalized ray to distorted normalized coordinates.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            DistortionModel::Fov { omega } => {
                let ru = (x * x + y * y).sqrt();
                if omega == 0.0 || ru == 0.0 {
                    return (x, y);
                }
                let factor = (ru * 2.0 * (omega / 2.0).tan()).atan() / (omega * ru);
                (x * factor, y * factor)
            }
            DistortionModel::RadTan { k1, k2, p1, p2 } => {
                let r2 = x * x + y * y;
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
                let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                (xd, yd)
            }
        }
    }
}

/// Camera calibration of the replayed sequence: distorted input camera and
/// rectified output camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    input: Intrinsics,
    distortion: DistortionModel,
    output: Intrinsics,
    in_width: u32,
    in_height: u32,
    out_width: u32,
    out_height: u32,
}

impl CalibrationModel {
    pub fn new(
        input: Intrinsics,
        distortion: DistortionModel,
        in_size: (u32, u32),
        output: Intrinsics,
        out_size: (u32, u32),
    ) -> Result<Self, CalibrationError> {
        for k in [&input, &output] {
            if !(k.fx > 0.0 && k.fy > 0.0) {
                return Err(CalibrationError::InvalidIntrinsics { fx: k.fx, fy: k.fy });
            }
        }
        if in_size.0 == 0 || in_size.1 == 0 || out_size.0 == 0 || out_size.1 == 0 {
            return Err(CalibrationError::Parse {
                line: 0,
                msg: format!(
                    "image sizes must be non-zero (input {}x{}, output {}x{})",
                    in_size.0, in_size.1, out_size.0, out_size.1
                ),
            });
        }
        Ok(Self {
            input,
            distortion,
            output,
            in_width: in_size.0,
            in_height: in_size.1,
            out_width: out_size.0,
            out_height: out_size.1,
        })
    }

    /// Undistorted camera whose input and output geometry coincide.
    pub fn pinhole(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, CalibrationError> {
        let k = Intrinsics::new(fx, fy, cx, cy);
        Self::new(
            k,
            DistortionModel::RadTan { k1: 0.0, k2: 0.0, p1: 0.0, p2: 0.0 },
            (width, height),
            k,
            (width, height),
        )
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|e| CalibrationError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_reader(file)
    }

    /// Four lines: input model (`fx fy cx cy d` normalized, or
    /// `fx fy cx cy k1 k2 p1 p2` in pixels), `in_w in_h`, output mode
    /// (`none` or normalized `fx fy cx cy 0`), `out_w out_h`.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, CalibrationError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut lines: Vec<(usize, Vec<String>)> = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CalibrationError::Parse {
                line: e.position().map(|p| p.line() as usize).unwrap_or(0),
                msg: e.to_string(),
            })?;
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
            let tokens = record
                .iter()
                .flat_map(str::split_whitespace)
                .map(str::to_string)
                .collect::<Vec<_>>();
            if !tokens.is_empty() {
                lines.push((line, tokens));
            }
        }
        if lines.len() < 4 {
            return Err(CalibrationError::Parse {
                line: lines.len() + 1,
                msg: format!("expected 4 lines, found {}", lines.len()),
            });
        }

        let (in_line, in_model) = &lines[0];
        let in_model = parse_numbers(*in_line, in_model)?;
        let in_size = parse_size(&lines[1])?;
        let out_size = parse_size(&lines[3])?;

        let (input, distortion, normalized) = match in_model.len() {
            5 => (
                Intrinsics::from_normalized(&in_model, in_size.0, in_size.1),
                DistortionModel::Fov { omega: in_model[4] },
                true,
            ),
            8 => (
                Intrinsics::new(in_model[0], in_model[1], in_model[2], in_model[3]),
                DistortionModel::RadTan {
                    k1: in_model[4],
                    k2: in_model[5],
                    p1: in_model[6],
                    p2: in_model[7],
                },
                false,
            ),
            n => {
                return Err(CalibrationError::Parse {
                    line: *in_line,
                    msg: format!("expected 5 or 8 camera parameters, found {}", n),
                })
            }
        };

        let (mode_line, mode) = &lines[2];
        let output = match mode.first().map(String::as_str) {
            Some("none") => {
                if normalized {
                    Intrinsics::from_normalized(&in_model, out_size.0, out_size.1)
                } else {
                    input.rescaled(in_size, out_size)
                }
            }
            Some("crop") | Some("full") => {
                return Err(CalibrationError::UnsupportedOutputMode(mode[0].clone()))
            }
            _ => {
                let values = parse_numbers(*mode_line, mode)?;
                if values.len() < 4 {
                    return Err(CalibrationError::Parse {
                        line: *mode_line,
                        msg: format!("expected output intrinsics, found {} values", values.len()),
                    });
                }
                Intrinsics::from_normalized(&values, out_size.0, out_size.1)
            }
        };

        Self::new(input, distortion, in_size, output, out_size)
    }

    pub fn fx(&self) -> f64 {
        self.output.fx
    }

    pub fn fy(&self) -> f64 {
        self.output.fy
    }

    pub fn cx(&self) -> f64 {
        self.output.cx
    }

    pub fn cy(&self) -> f64 {
        self.output.cy
    }

    pub fn output(&self) -> &Intrinsics {
        &self.output
    }

    pub fn input(&self) -> &Intrinsics {
        &self.input
    }

    pub fn distortion(&self) -> &DistortionModel {
        &self.distortion
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.out_width, self.out_height)
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.in_width, self.in_height)
    }

    /// Intrinsic matrix K of the rectified output camera.
    pub fn k(&self) -> na::Matrix3<f64> {
        self.output.matrix()
    }

    /// True when rectification leaves images untouched.
    pub fn is_passthrough(&self) -> bool {
        self.distortion.is_identity()
            && self.input == self.output
            && self.input_size() == self.output_size()
    }
}

fn parse_numbers(line: usize, tokens: &[String]) -> Result<Vec<f64>, CalibrationError> {
    tokens
        .iter()
        .map(|t| {
            t.parse::<f64>().map_err(|e| CalibrationError::Parse {
                line,
                msg: format!("'{}': {}", t, e),
            })
        })
        .collect()
}

fn parse_size((line, tokens): &(usize, Vec<String>)) -> Result<(u32, u32), CalibrationError> {
    if tokens.len() != 2 {
        return Err(CalibrationError::Parse {
            line: *line,
            msg: format!("expected 'width height', found {} values", tokens.len()),
        });
    }
    let parse = |t: &String| {
        t.parse::<u32>().map_err(|e| CalibrationError::Parse {
            line: *line,
            msg: format!("'{}': {}", t, e),
        })
    };
    Ok((parse(&tokens[0])?, parse(&tokens[1])?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fov_calibration() {
        let text = "0.5 0.75 0.5 0.5 0\n640 480\nnone\n320 240\n";
        let calib = CalibrationModel::from_reader(text.as_bytes()).unwrap();

        assert_eq!(calib.input_size(), (640, 480));
        assert_eq!(calib.output_size(), (320, 240));
        assert!((calib.fx() - 160.0).abs() < 1e-9);
        assert!((calib.fy() - 180.0).abs() < 1e-9);
        assert!((calib.cx() - 159.5).abs() < 1e-9);
        assert!((calib.cy() - 119.5).abs() < 1e-9);
        assert!(calib.distortion().is_identity());
        assert!(!calib.is_passthrough());
    }

    #[test]
    fn parse_radtan_calibration_with_extra_spaces() {
        let text = "458.654  457.296 367.215 248.375 -0.28340811 0.07395907 0.00019359 1.76187114e-05\n\
                    752 480\n\
                    none\n\
                    752 480\n";
        let calib = CalibrationModel::from_reader(text.as_bytes()).unwrap();

        assert_eq!(calib.k()[(0, 0)], 458.654);
        assert_eq!(calib.k()[(1, 2)], 248.375);
        assert_eq!(calib.k()[(2, 2)], 1.0);
        assert!(!calib.distortion().is_identity());
    }

    #[test]
    fn explicit_output_intrinsics() {
        let text = "0.5 0.5 0.5 0.5 0.9\n640 480\n0.25 0.25 0.5 0.5 0\n64 48\n";
        let calib = CalibrationModel::from_reader(text.as_bytes()).unwrap();
        assert!((calib.fx() - 16.0).abs() < 1e-9);
        assert!((calib.fy() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_focal_length() {
        let text = "0 0.5 0.5 0.5 0\n640 480\nnone\n640 480\n";
        let err = CalibrationModel::from_reader(text.as_bytes()).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidIntrinsics { .. }));
    }

    #[test]
    fn rejects_crop_mode() {
        let text = "0.5 0.5 0.5 0.5 0.9\n640 480\ncrop\n640 480\n";
        let err = CalibrationModel::from_reader(text.as_bytes()).unwrap_err();
        assert!(matches!(err, CalibrationError::UnsupportedOutputMode(_)));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn pixel_count_does_not_wrap() {
        assert_eq!(pixel_count(64, 48), 3072);
        assert_eq!(pixel_count(70_000, 70_000), 4_900_000_000);
    }

    #[test]
    fn fov_distortion_shrinks_radius() {
        let model = DistortionModel::Fov { omega: 0.9 };
        let (xd, yd) = model.distort(0.6, 0.8);
        assert!((xd * xd + yd * yd).sqrt() < 1.0);
        assert_eq!(model.distort(0.0, 0.0), (0.0, 0.0));
    }
}
