use std::ops::ControlFlow;
use std::path::Path;

use cv2::prelude::*;
use opencv as cv2;

use anyhow::{bail, Result};
use ndarray as nd;
use rerun::{RecordingStream, RecordingStreamBuilder};

use crate::image::{Bgr, ColorImage, Image};
use crate::pipeline::FrameSink;
use crate::trajectory::Trajectory;

/// How trajectory points are drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerStyle {
    pub radius: i32,
    pub color: Bgr,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        // yellow
        Self {
            radius: 3,
            color: [0, 255, 255],
        }
    }
}

impl MarkerStyle {
    fn scalar(&self) -> cv2::core::Scalar {
        let [b, g, r] = self.color;
        cv2::core::Scalar::new(b as f64, g as f64, r as f64, 0.)
    }
}

/// Paint every trajectory point as a filled disc. Points are truncated to
/// pixels; discs partly outside of the image are clipped.
pub fn draw_trajectory(
    image: &mut ColorImage,
    trajectory: &Trajectory,
    style: &MarkerStyle,
) -> Result<()> {
    if trajectory.is_empty() || image.data.is_empty() {
        return Ok(());
    }
    let mut mat = color_to_cv_8uc3(image)?;
    for point in trajectory {
        let (x, y) = point.pixel();
        cv2::imgproc::circle(
            &mut mat,
            cv2::core::Point { x, y },
            style.radius,
            style.scalar(),
            cv2::imgproc::FILLED,
            cv2::imgproc::LINE_8,
            0,
        )?;
    }
    image.data.copy_from_slice(mat.data_bytes()?);
    Ok(())
}

/// The whole trajectory on a black canvas.
pub fn trajectory_canvas(
    width: usize,
    height: usize,
    trajectory: &Trajectory,
    style: &MarkerStyle,
) -> Result<ColorImage> {
    let mut canvas = ColorImage::blank(width, height);
    draw_trajectory(&mut canvas, trajectory, style)?;
    Ok(canvas)
}

/// Single-channel intensity of a BGR frame, `COLOR_BGR2GRAY` weights
/// (Y = 0.299 R + 0.587 G + 0.114 B). Leaves `color` untouched.
pub fn bgr_to_intensity(color: &ColorImage) -> Result<Image> {
    if color.data.is_empty() {
        return Ok(Image::filled(color.width, color.height, 0));
    }
    let mat = color_to_cv_8uc3(color)?;
    let mut gray = cv2::core::Mat::default();
    cv2::imgproc::cvt_color(&mat, &mut gray, cv2::imgproc::COLOR_BGR2GRAY, 0)?;
    cv_8u_to_grayscale(&gray)
}

pub trait AsArray {
    fn try_as_array(&self) -> Result<nd::Array3<u8>>;
}

impl AsArray for ColorImage {
    /// Height x width x RGB
    fn try_as_array(&self) -> Result<nd::Array3<u8>> {
        let bgr = nd::ArrayView3::from_shape((self.height, self.width, 3), &self.data)?;
        let mut rgb = bgr.to_owned();
        rgb.invert_axis(nd::Axis(2));
        Ok(rgb.as_standard_layout().to_owned())
    }
}

pub fn grayscale_to_cv_8u(img: &Image) -> Result<cv2::core::Mat> {
    let mut mat = cv2::core::Mat::new_rows_cols_with_default(
        img.height as i32,
        img.width as i32,
        cv2::core::CV_8U,
        cv2::core::Scalar::all(0.),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(&img.data);
    Ok(mat)
}

pub fn color_to_cv_8uc3(image: &ColorImage) -> Result<cv2::core::Mat> {
    let mut mat = cv2::core::Mat::new_rows_cols_with_default(
        image.height as i32,
        image.width as i32,
        cv2::core::CV_8UC3,
        cv2::core::Scalar::all(0.),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(&image.data);
    Ok(mat)
}

pub fn cv_8uc3_to_color(mat: &cv2::core::Mat) -> Result<ColorImage> {
    let size = mat.size()?;
    let bytes = mat.data_bytes()?;
    let (width, height) = (size.width as usize, size.height as usize);
    if bytes.len() != width * height * 3 {
        bail!("expected a {width} x {height} BGR frame, got {} bytes", bytes.len());
    }
    ColorImage::from_raw(width, height, bytes.to_vec())
}

pub fn cv_8u_to_grayscale(mat: &cv2::core::Mat) -> Result<Image> {
    let size = mat.size()?;
    if size.width <= 0 || size.height <= 0 {
        bail!("empty image");
    }
    let bytes = mat.data_bytes()?;
    Image::from_raw(size.width as usize, size.height as usize, bytes.to_vec())
}

/// Logs annotated frames and the trajectory to a rerun recording file.
pub struct RerunRecorder {
    recorder: RecordingStream,
}

impl RerunRecorder {
    pub fn new(path: &Path) -> Result<Self> {
        let recorder = RecordingStreamBuilder::new("surfboard-tracker").save(path)?;
        Ok(Self { recorder })
    }
}

impl FrameSink for RerunRecorder {
    fn write(
        &mut self,
        index: usize,
        frame: &ColorImage,
        trajectory: &Trajectory,
    ) -> Result<ControlFlow<()>> {
        self.recorder.set_time_sequence("frame", index as i64);
        self.recorder
            .log("video/frame", &rerun::Image::try_from(frame.try_as_array()?)?)?;
        self.recorder.log(
            "video/frame/trajectory",
            &rerun::Points2D::new(trajectory.iter().map(|p| (p.x as f32, p.y as f32)))
                .with_radii([2.0_f32]),
        )?;
        Ok(ControlFlow::Continue(()))
    }

    fn finish(&mut self) -> Result<()> {
        self.recorder.flush_blocking();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::my_types::Position;

    #[test]
    fn test_canvas_markers() {
        let mut trajectory = Trajectory::new();
        trajectory.push(Position::new(5.9, 5.2));
        trajectory.push(Position::new(-40., 3.));
        let style = MarkerStyle::default();
        let canvas = trajectory_canvas(12, 10, &trajectory, &style).unwrap();
        assert_eq!((canvas.width, canvas.height), (12, 10));
        // truncated to (5, 5)
        assert_eq!(canvas.pixel(5, 5), style.color);
        assert_eq!(canvas.pixel(8, 5), style.color);
        assert_eq!(canvas.pixel(5, 2), style.color);
        assert_eq!(canvas.pixel(9, 5), [0, 0, 0]);
        assert_eq!(canvas.pixel(8, 8), [0, 0, 0]);
        // the point far to the left leaves no trace
        assert_eq!(canvas.pixel(0, 3), [0, 0, 0]);
        // only the marker color is ever painted
        assert!(canvas
            .data
            .chunks(3)
            .all(|p| p == style.color || p == [0, 0, 0]));
    }

    #[test]
    fn test_markers_clipped_at_the_border() {
        let mut trajectory = Trajectory::new();
        trajectory.push(Position::new(0., 0.));
        let style = MarkerStyle {
            radius: 1,
            color: [1, 2, 3],
        };
        let canvas = trajectory_canvas(5, 5, &trajectory, &style).unwrap();
        assert_eq!(canvas.pixel(0, 0), [1, 2, 3]);
        assert_eq!(canvas.pixel(1, 0), [1, 2, 3]);
        assert_eq!(canvas.pixel(0, 1), [1, 2, 3]);
        assert_eq!(canvas.pixel(3, 3), [0, 0, 0]);
    }

    #[test]
    fn test_empty_trajectory_leaves_frame_untouched() {
        let mut frame = ColorImage::blank(6, 4);
        frame.set_pixel(2, 2, [9, 9, 9]);
        let before = frame.clone();
        draw_trajectory(&mut frame, &Trajectory::new(), &MarkerStyle::default()).unwrap();
        assert_eq!(frame, before);
    }

    #[test]
    fn test_intensity_weights() {
        let color = ColorImage::from_raw(
            4,
            1,
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 200, 200, 200],
        )
        .unwrap();
        let gray = bgr_to_intensity(&color).unwrap();
        assert_eq!((gray.width, gray.height), (4, 1));
        assert_eq!(gray.data, vec![29, 150, 76, 200]);
    }

    #[test]
    fn test_intensity_leaves_color_frame_intact() {
        let mut color = ColorImage::blank(3, 2);
        color.set_pixel(1, 1, [10, 200, 40]);
        let before = color.clone();
        let gray = bgr_to_intensity(&color).unwrap();
        assert_eq!(color, before);
        assert_eq!(gray.value(0, 0), 0);
        assert!(gray.value(1, 1) > 0);
    }

    #[test]
    fn test_grayscale_bridge_keeps_layout() {
        let image = Image::from_raw(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let mat = grayscale_to_cv_8u(&image).unwrap();
        assert_eq!((mat.rows(), mat.cols()), (2, 3));
        assert_eq!(cv_8u_to_grayscale(&mat).unwrap(), image);
    }

    #[test]
    fn test_rgb_array() {
        let image = ColorImage::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let array = image.try_as_array().unwrap();
        assert_eq!(array.shape(), &[1, 2, 3]);
        assert_eq!(array[[0, 0, 0]], 3);
        assert_eq!(array[[0, 0, 2]], 1);
        assert_eq!(array[[0, 1, 0]], 6);
    }

    #[test]
    fn test_cv_round_trip_keeps_layout() {
        let mut image = ColorImage::blank(4, 3);
        image.set_pixel(3, 2, [10, 20, 30]);
        let mat = color_to_cv_8uc3(&image).unwrap();
        assert_eq!(mat.rows(), 3);
        assert_eq!(mat.cols(), 4);
        assert_eq!(cv_8uc3_to_color(&mat).unwrap(), image);
    }
}
