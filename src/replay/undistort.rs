use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into_with, Interpolation};
use log::info;

use super::camera::{pixel_count, CalibrationModel};
use super::error::{BoxError, CalibrationError};

/// Rectifies raw input images into the fixed output geometry.
pub trait Undistorter {
    fn undistort(&self, raw: &GrayImage) -> Result<GrayImage, BoxError>;

    fn calibration(&self) -> &CalibrationModel;
}

/// Picks the rectification backend for a calibration.
pub fn for_calibration(calib: &CalibrationModel) -> Result<Box<dyn Undistorter>, CalibrationError> {
    #[cfg(feature = "opencv")]
    {
        if let super::camera::DistortionModel::RadTan { .. } = calib.distortion() {
            info!("using opencv undistorter");
            return Ok(Box::new(opencv_backend::OpenCvUndistorter::new(calib.clone())?));
        }
    }
    info!(
        "undistorter: input {}x{} -> output {}x{}{}",
        calib.input_size().0,
        calib.input_size().1,
        calib.output_size().0,
        calib.output_size().1,
        if calib.is_passthrough() { " (pass-through)" } else { "" },
    );
    Ok(Box::new(RemapUndistorter::new(calib.clone())))
}

/// Lookup-table undistorter: every output pixel stores the input position it
/// samples from, evaluated with bilinear interpolation.
pub struct RemapUndistorter {
    calib: CalibrationModel,
    remap: Vec<(f32, f32)>,
}

impl RemapUndistorter {
    pub fn new(calib: CalibrationModel) -> Self {
        let remap = if calib.is_passthrough() {
            Vec::new()
        } else {
            build_remap(&calib)
        };
        Self { calib, remap }
    }
}

fn build_remap(calib: &CalibrationModel) -> Vec<(f32, f32)> {
    let (w, h) = calib.output_size();
    let out = calib.output();
    let input = calib.input();
    let distortion = calib.distortion();

    let mut remap = Vec::with_capacity(pixel_count(w, h));
    for v in 0..h {
        for u in 0..w {
            let x = (u as f64 - out.cx) / out.fx;
            let y = (v as f64 - out.cy) / out.fy;
            let (xd, yd) = distortion.distort(x, y);
            remap.push((
                (input.fx * xd + input.cx) as f32,
                (input.fy * yd + input.cy) as f32,
            ));
        }
    }
    remap
}

impl Undistorter for RemapUndistorter {
    fn undistort(&self, raw: &GrayImage) -> Result<GrayImage, BoxError> {
        if raw.dimensions() != self.calib.input_size() {
            return Err(format!(
                "expected {}x{} input, got {}x{}",
                self.calib.input_size().0,
                self.calib.input_size().1,
                raw.width(),
                raw.height()
            )
            .into());
        }
        if self.remap.is_empty() {
            return Ok(raw.clone());
        }

        let (w, h) = self.calib.output_size();
        let mut out = GrayImage::new(w, h);
        let remap = &self.remap;
        let width = w as usize;
        warp_into_with(
            raw,
            |x, y| remap[y as usize * width + x as usize],
            Interpolation::Bilinear,
            Luma([0u8]),
            &mut out,
        );
        Ok(out)
    }

    fn calibration(&self) -> &CalibrationModel {
        &self.calib
    }
}

#[cfg(feature = "opencv")]
mod opencv_backend {
    use image::GrayImage;
    use opencv::{calib3d, core, imgproc, prelude::*};

    use super::super::camera::{CalibrationModel, DistortionModel, Intrinsics};
    use super::super::error::{BoxError, CalibrationError};
    use super::Undistorter;

    pub struct OpenCvUndistorter {
        calib: CalibrationModel,
        map1: core::Mat,
        map2: core::Mat,
    }

    fn k_to_mat(k: &Intrinsics) -> Result<core::Mat, opencv::Error> {
        let mut mat = core::Mat::new_rows_cols_with_default(3, 3, core::CV_64F, core::Scalar::all(0.0))?;
        *mat.at_2d_mut::<f64>(0, 0)? = k.fx;
        *mat.at_2d_mut::<f64>(0, 2)? = k.cx;
        *mat.at_2d_mut::<f64>(1, 1)? = k.fy;
        *mat.at_2d_mut::<f64>(1, 2)? = k.cy;
        *mat.at_2d_mut::<f64>(2, 2)? = 1.0;
        Ok(mat)
    }

    impl OpenCvUndistorter {
        pub fn new(calib: CalibrationModel) -> Result<Self, CalibrationError> {
            let (k1, k2, p1, p2) = match *calib.distortion() {
                DistortionModel::RadTan { k1, k2, p1, p2 } => (k1, k2, p1, p2),
                DistortionModel::Fov { .. } => return Err(CalibrationError::UnsupportedModel("fov")),
            };
            let camera_matrix = k_to_mat(calib.input())?;
            let new_camera_matrix = k_to_mat(calib.output())?;
            let mut dist = core::Mat::new_rows_cols_with_default(1, 4, core::CV_64F, core::Scalar::all(0.0))?;
            for (i, d) in [k1, k2, p1, p2].into_iter().enumerate() {
                *dist.at_2d_mut::<f64>(0, i as i32)? = d;
            }

            let (w, h) = calib.output_size();
            let mut map1 = core::Mat::default();
            let mut map2 = core::Mat::default();
            calib3d::init_undistort_rectify_map(
                &camera_matrix,
                &dist,
                &core::Mat::default(),
                &new_camera_matrix,
                core::Size::new(w as i32, h as i32),
                core::CV_32FC1,
                &mut map1,
                &mut map2,
            )?;

            Ok(Self { calib, map1, map2 })
        }
    }

    impl Undistorter for OpenCvUndistorter {
        fn undistort(&self, raw: &GrayImage) -> Result<GrayImage, BoxError> {
            let mut src = core::Mat::new_rows_cols_with_default(
                raw.height() as i32,
                raw.width() as i32,
                core::CV_8UC1,
                core::Scalar::all(0.0),
            )?;
            src.data_bytes_mut()?.copy_from_slice(raw.as_raw());

            let mut dst = core::Mat::default();
            imgproc::remap(
                &src,
                &mut dst,
                &self.map1,
                &self.map2,
                imgproc::INTER_LINEAR,
                core::BORDER_CONSTANT,
                core::Scalar::all(0.0),
            )?;

            let (w, h) = self.calib.output_size();
            GrayImage::from_raw(w, h, dst.data_bytes()?.to_vec())
                .ok_or_else(|| "opencv remap returned an unexpected buffer size".into())
        }

        fn calibration(&self) -> &CalibrationModel {
            &self.calib
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::camera::{DistortionModel, Intrinsics};

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 3 + y * 5) % 256) as u8]))
    }

    #[test]
    fn passthrough_keeps_pixels() {
        let calib = CalibrationModel::pinhole(50.0, 50.0, 31.5, 23.5, 64, 48).unwrap();
        let undistorter = RemapUndistorter::new(calib);
        let raw = gradient(64, 48);
        let out = undistorter.undistort(&raw).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn downscale_produces_output_size() {
        let k_in = Intrinsics::new(100.0, 100.0, 63.5, 47.5);
        let k_out = Intrinsics::new(50.0, 50.0, 31.5, 23.5);
        let calib = CalibrationModel::new(
            k_in,
            DistortionModel::Fov { omega: 0.0 },
            (128, 96),
            k_out,
            (64, 48),
        )
        .unwrap();
        let undistorter = RemapUndistorter::new(calib);
        let raw = GrayImage::from_pixel(128, 96, Luma([200u8]));
        let out = undistorter.undistort(&raw).unwrap();

        assert_eq!(out.dimensions(), (64, 48));
        // interior samples land inside the raw image
        assert!(out.get_pixel(32, 24)[0] >= 199);
    }

    #[test]
    fn rejects_wrong_input_size() {
        let calib = CalibrationModel::pinhole(50.0, 50.0, 31.5, 23.5, 64, 48).unwrap();
        let undistorter = RemapUndistorter::new(calib);
        assert!(undistorter.undistort(&gradient(32, 24)).is_err());
    }
}
