use opencv as cv2;

use anyhow::Result;
use log::warn;

use crate::image::Image;
use crate::my_types::Position;
use crate::visualization::grayscale_to_cv_8u;

/// Best window found for a template.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemplateMatch {
    /// Top-left corner of the best window.
    pub location: Position,
    /// Normalized score in [-1, 1], 1 being a perfect match.
    pub confidence: f64,
}

/// Appearance matching of a template against a frame.
pub trait MatchPrimitive {
    /// Scan every window of `image` the size of `template` and return the best
    /// one. None when no window fits, i.e. the template is empty or larger than
    /// the image.
    fn find(&mut self, image: &Image, template: &Image) -> Option<TemplateMatch>;
}

/// Zero-mean normalized cross-correlation (`TM_CCOEFF_NORMED`). Invariant to
/// affine intensity changes of the window; a window or template without any
/// variance scores 0.
#[derive(Default)]
pub struct NormalizedCrossCorrelation {
    /// Score map, (w - tw + 1) x (h - th + 1), reused between frames.
    scores: cv2::core::Mat,
}

impl NormalizedCrossCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    fn best_window(&mut self, image: &Image, template: &Image) -> Result<TemplateMatch> {
        let image_mat = grayscale_to_cv_8u(image)?;
        let template_mat = grayscale_to_cv_8u(template)?;
        cv2::imgproc::match_template(
            &image_mat,
            &template_mat,
            &mut self.scores,
            cv2::imgproc::TM_CCOEFF_NORMED,
            &cv2::core::Mat::default(),
        )?;

        let mut max_value = 0.;
        let mut max_location = cv2::core::Point::default();
        cv2::core::min_max_loc(
            &self.scores,
            None,
            Some(&mut max_value),
            None,
            Some(&mut max_location),
            &cv2::core::Mat::default(),
        )?;
        Ok(TemplateMatch {
            location: Position::new(max_location.x as f64, max_location.y as f64),
            confidence: num_traits::clamp(max_value, -1., 1.),
        })
    }
}

/// A template with a single intensity has no direction to correlate with.
fn is_flat(template: &Image) -> bool {
    template.data.iter().all(|&v| v == template.data[0])
}

impl MatchPrimitive for NormalizedCrossCorrelation {
    fn find(&mut self, image: &Image, template: &Image) -> Option<TemplateMatch> {
        if template.is_empty() || template.width > image.width || template.height > image.height {
            return None;
        }
        // every window ties at 0, the first one wins
        if is_flat(template) {
            return Some(TemplateMatch {
                location: Position::new(0., 0.),
                confidence: 0.,
            });
        }

        match self.best_window(image, template) {
            Ok(found) => Some(found),
            Err(err) => {
                warn!("template matching failed: {err:#}");
                None
            }
        }
    }
}
