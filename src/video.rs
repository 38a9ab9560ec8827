//! OpenCV-backed frame source, video sink, live window and image files.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use cv2::prelude::*;
use opencv as cv2;

use anyhow::{bail, Context as AnyhowContext, Result};
use log::{debug, info};

use crate::image::{ColorImage, Image};
use crate::pipeline::{FrameSink, FrameSource, TrajectoryExport};
use crate::trajectory::Trajectory;
use crate::visualization::*;

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

/// Load the reference template as a grayscale image.
pub fn load_template(path: &Path) -> Result<Image> {
    let mat = cv2::imgcodecs::imread(path_str(path)?, cv2::imgcodecs::IMREAD_GRAYSCALE)?;
    if mat.rows() <= 0 || mat.cols() <= 0 {
        bail!("Couldn't load the template image {}", path.display());
    }
    let template = cv_8u_to_grayscale(&mat)
        .with_context(|| format!("Couldn't load the template image {}", path.display()))?;
    info!(
        "loaded {}x{} template from {}",
        template.width,
        template.height,
        path.display()
    );
    Ok(template)
}

pub struct VideoInput {
    capture: cv2::videoio::VideoCapture,
    mat: cv2::core::Mat,
    frame_size: (usize, usize),
    frame_count: Option<u64>,
}

impl VideoInput {
    pub fn new(path: &Path) -> Result<VideoInput> {
        let capture = cv2::videoio::VideoCapture::from_file(path_str(path)?, cv2::videoio::CAP_ANY)
            .with_context(|| format!("Couldn't open the video file {}", path.display()))?;
        if !capture.is_opened()? {
            bail!("Couldn't open the video file {}", path.display());
        }
        let width = capture.get(cv2::videoio::CAP_PROP_FRAME_WIDTH)?;
        let height = capture.get(cv2::videoio::CAP_PROP_FRAME_HEIGHT)?;
        let count = capture.get(cv2::videoio::CAP_PROP_FRAME_COUNT)?;
        info!("opened {} ({width}x{height}, {count} frames)", path.display());
        Ok(VideoInput {
            capture,
            mat: cv2::core::Mat::default(),
            frame_size: (width as usize, height as usize),
            frame_count: (count > 0.).then_some(count as u64),
        })
    }
}

impl FrameSource for VideoInput {
    fn read(&mut self) -> Result<Option<ColorImage>> {
        if !self.capture.read(&mut self.mat)? {
            return Ok(None);
        }
        cv_8uc3_to_color(&self.mat).map(Some)
    }

    fn frame_size(&self) -> (usize, usize) {
        self.frame_size
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }
}

/// MJPG video writer with a fixed frame rate and frame size.
pub struct VideoOutput {
    writer: cv2::videoio::VideoWriter,
    path: PathBuf,
}

impl VideoOutput {
    pub fn new(path: &Path, fps: f64, frame_size: (usize, usize)) -> Result<VideoOutput> {
        let fourcc = cv2::videoio::VideoWriter::fourcc('M', 'J', 'P', 'G')?;
        let size = cv2::core::Size::new(frame_size.0 as i32, frame_size.1 as i32);
        let writer = cv2::videoio::VideoWriter::new(path_str(path)?, fourcc, fps, size, true)
            .with_context(|| format!("Couldn't create the output video {}", path.display()))?;
        if !writer.is_opened()? {
            bail!("Couldn't create the output video {}", path.display());
        }
        Ok(VideoOutput {
            writer,
            path: path.to_path_buf(),
        })
    }
}

impl FrameSink for VideoOutput {
    fn write(
        &mut self,
        _index: usize,
        frame: &ColorImage,
        _trajectory: &Trajectory,
    ) -> Result<ControlFlow<()>> {
        self.writer.write(&color_to_cv_8uc3(frame)?)?;
        Ok(ControlFlow::Continue(()))
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release()?;
        info!("wrote {}", self.path.display());
        Ok(())
    }
}

/// On-screen window. Pressing `q` stops the run.
pub struct LiveDisplay {
    title: String,
    delay_ms: i32,
}

impl LiveDisplay {
    pub fn new(title: &str, delay_ms: i32) -> Self {
        Self {
            title: title.to_string(),
            delay_ms,
        }
    }
}

impl FrameSink for LiveDisplay {
    fn write(
        &mut self,
        _index: usize,
        frame: &ColorImage,
        _trajectory: &Trajectory,
    ) -> Result<ControlFlow<()>> {
        cv2::highgui::imshow(&self.title, &color_to_cv_8uc3(frame)?)?;
        let key = cv2::highgui::wait_key(self.delay_ms)?;
        if key >= 0 && (key & 0xFF) as u8 == b'q' {
            debug!("quit key pressed");
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }

    fn finish(&mut self) -> Result<()> {
        cv2::highgui::destroy_all_windows()?;
        Ok(())
    }
}

/// Writes the trajectory canvas as an image file, format from the extension.
pub struct ImageExport {
    path: PathBuf,
}

impl ImageExport {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl TrajectoryExport for ImageExport {
    fn export(&mut self, canvas: &ColorImage, trajectory: &Trajectory) -> Result<()> {
        if canvas.width == 0 || canvas.height == 0 {
            bail!(
                "cannot write {}: the video reported no frame size",
                self.path.display()
            );
        }
        let written = cv2::imgcodecs::imwrite(
            path_str(&self.path)?,
            &color_to_cv_8uc3(canvas)?,
            &cv2::core::Vector::new(),
        )?;
        if !written {
            bail!("Couldn't write {}", self.path.display());
        }
        info!(
            "wrote {} trajectory points to {}",
            trajectory.len(),
            self.path.display()
        );
        Ok(())
    }
}
