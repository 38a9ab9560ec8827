use log::warn;
use nalgebra as na;

use crate::frame::Frame;
use crate::image::*;
use crate::my_types::*;
use crate::pyramid::{image_at_level, Pyramid};

type Range = [[i16; 2]; 2];

/// Parameters handed unchanged to every flow call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowConfig {
    /// Integration window, width x height, in pixels. Odd sizes center the
    /// window on the point.
    pub window: [usize; 2],
    /// Index of the coarsest pyramid level; 0 uses the full-size frame only.
    pub max_level: usize,
    /// Upper bound on refinement steps per level.
    pub max_iterations: usize,
    /// A level stops refining once a step is shorter than this, in pixels.
    pub epsilon: f64,
    /// Points whose window has a smaller minimum eigenvalue of the spatial
    /// gradient matrix, divided by the window area, are reported as lost.
    pub min_eigenvalue: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window: [15, 15],
            max_level: 2,
            max_iterations: 10,
            epsilon: 0.03,
            min_eigenvalue: 1e-4,
        }
    }
}

impl FlowConfig {
    fn radius(&self) -> [usize; 2] {
        [
            self.window[0].saturating_sub(1) / 2,
            self.window[1].saturating_sub(1) / 2,
        ]
    }
}

/// Outcome for one query point. When `found` is false `point` is the query
/// point unchanged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowResult {
    pub point: Position,
    pub found: bool,
}

impl FlowResult {
    pub fn found(point: Position) -> Self {
        Self { point, found: true }
    }

    pub fn lost(point: Position) -> Self {
        Self {
            point,
            found: false,
        }
    }
}

/// Sparse motion estimation between two time-adjacent frames.
pub trait FlowPrimitive {
    /// Returns one result per entry of `points`, in the same order.
    fn track(
        &mut self,
        previous: &Frame,
        current: &Frame,
        points: &[Position],
        config: &FlowConfig,
    ) -> Vec<FlowResult>;
}

/// Pyramidal Lucas-Kanade feature tracker.
pub struct PyramidalLucasKanade {
    pyramid0: Pyramid,
    pyramid1: Pyramid,
    ix: Matrixd,
    iy: Matrixd,
    it: Matrixd,
    grid: Matrixd,
}

impl Default for PyramidalLucasKanade {
    fn default() -> Self {
        Self::new()
    }
}

impl PyramidalLucasKanade {
    pub fn new() -> Self {
        Self {
            pyramid0: Pyramid::empty(),
            pyramid1: Pyramid::empty(),
            ix: na::dmatrix!(),
            iy: na::dmatrix!(),
            it: na::dmatrix!(),
            grid: na::dmatrix!(),
        }
    }

    /// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    fn process_point(
        &mut self,
        image0: &Image,
        image1: &Image,
        point: Vector2d,
        config: &FlowConfig,
    ) -> Option<Vector2d> {
        let term2 = config.epsilon.powi(2);
        let r = config.radius();

        // guess carried from coarser levels, no prior motion at the top
        let mut g = Vector2d::zeros();
        let mut d = Vector2d::zeros();
        for level in (0..config.max_level + 1).rev() {
            let level0 = image_at_level(image0, &self.pyramid0, level);
            let level1 = image_at_level(image1, &self.pyramid1, level);
            let u = point / u32::pow(2, level as u32) as f64;
            let range = integration_range(level0, u, r, 1)?;
            scharr(
                level0,
                u,
                range,
                &mut self.ix,
                &mut self.iy,
                &mut self.grid,
            );
            let gradient = spatial_gradient(&self.ix, &self.iy);
            let area = (self.ix.nrows() * self.ix.ncols()) as f64;
            if min_eigenvalue(&gradient) / area < config.min_eigenvalue {
                return None;
            }
            let mut nu = Vector2d::zeros();
            for _ in 0..config.max_iterations {
                // leaving a coarse level only stops its refinement
                match image_difference(range, &self.grid, &mut self.it, level1, u + g + nu) {
                    Some(()) => {}
                    None if level > 0 => break,
                    None => return None,
                }
                let eta = flow_vector(&gradient, &self.ix, &self.iy, &self.it)?;
                nu += eta;
                if eta.norm_squared() < term2 {
                    break;
                }
            }

            d = nu;
            if level > 0 {
                g = 2. * (g + d)
            }
        }

        Some(point + g + d)
    }
}

impl FlowPrimitive for PyramidalLucasKanade {
    fn track(
        &mut self,
        previous: &Frame,
        current: &Frame,
        points: &[Position],
        config: &FlowConfig,
    ) -> Vec<FlowResult> {
        let all_lost = || -> Vec<FlowResult> { points.iter().copied().map(FlowResult::lost).collect() };

        if previous.width() != current.width() || previous.height() != current.height() {
            warn!(
                "frame {} is {}x{} but frame {} is {}x{}",
                previous.index(),
                previous.width(),
                previous.height(),
                current.index(),
                current.width(),
                current.height()
            );
            return all_lost();
        }
        let pyramids = self
            .pyramid0
            .compute(previous.image(), config.max_level)
            .and_then(|_| self.pyramid1.compute(current.image(), config.max_level));
        if let Err(err) = pyramids {
            warn!("cannot build pyramid for frame {}: {err}", current.index());
            return all_lost();
        }

        points
            .iter()
            .map(|&point| {
                match self.process_point(
                    previous.image(),
                    current.image(),
                    point.to_vector(),
                    config,
                ) {
                    Some(p) => FlowResult::found(p.into()),
                    None => FlowResult::lost(point),
                }
            })
            .collect()
    }
}

/// Smaller eigenvalue of a symmetric 2x2 matrix.
fn min_eigenvalue(m: &Matrix2d) -> f64 {
    let a = m[(0, 0)];
    let b = m[(0, 1)];
    let d = m[(1, 1)];
    ((a + d) - ((a - d).powi(2) + 4. * b * b).sqrt()) / 2.
}

fn flow_vector(gradient: &Matrix2d, ix: &Matrixd, iy: &Matrixd, it: &Matrixd) -> Option<Vector2d> {
    let mut b = Vector2d::zeros();

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            b[0] += it[(y, x)] * ix[(y, x)];
            b[1] += it[(y, x)] * iy[(y, x)];
        }
    }

    gradient.try_inverse().map(|inv_g| inv_g * b)
}

/// Fill `it` with the difference between the window of the first image (held
/// in `i0` with a one pixel border) and the same window of `level` moved to
/// `center`. Samples past the border of `level` are clamped. Returns None when
/// `center` itself leaves the image.
fn image_difference(
    range: Range,
    i0: &Matrixd,
    it: &mut Matrixd,
    level: &Image,
    center: Vector2d,
) -> Option<()> {
    if !contains(level, center) {
        return None;
    }
    fill_grid(level, range, center, it);
    *it *= -1.;
    let (rows, cols) = (it.nrows(), it.ncols());
    *it += i0.view((1, 1), (rows, cols));
    Some(())
}

fn contains(level: &Image, point: Vector2d) -> bool {
    point.x >= 0.
        && point.y >= 0.
        && point.x <= level.width as f64 - 1.
        && point.y <= level.height as f64 - 1.
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    assert_eq!(ix.nrows(), iy.nrows());
    assert_eq!(ix.ncols(), iy.ncols());

    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// ref https://theailearner.com/tag/scharr-operator/
fn scharr(
    level: &Image,
    center: Vector2d,
    range: Range,
    out_x: &mut Matrixd,
    out_y: &mut Matrixd,
    grid: &mut Matrixd,
) {
    let grange = [
        [range[0][0] - 1, range[0][1] + 1],
        [range[1][0] - 1, range[1][1] + 1],
    ];
    fill_grid(level, grange, center, grid);

    *out_x = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    *out_y = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    for y in 1..(grid.nrows() - 1) {
        for x in 1..(grid.ncols() - 1) {
            out_x[(y - 1, x - 1)] =
                (10. * grid[(y, x + 1)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y - 1, x + 1)]
                    - 10. * grid[(y, x - 1)]
                    - 3. * grid[(y + 1, x - 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
            out_y[(y - 1, x - 1)] =
                (10. * grid[(y + 1, x)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y + 1, x - 1)]
                    - 10. * grid[(y - 1, x)]
                    - 3. * grid[(y - 1, x + 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
        }
    }
}

fn fill_grid(level: &Image, range: Range, center: Vector2d, grid: &mut Matrixd) {
    *grid = na::DMatrix::zeros(
        (range[1][1] - range[1][0] + 1) as usize,
        (range[0][1] - range[0][0] + 1) as usize,
    );

    for (y_ind, y) in (range[1][0]..=range[1][1]).enumerate() {
        for (x_ind, x) in (range[0][0]..=range[0][1]).enumerate() {
            grid[(y_ind, x_ind)] = bilinear(level, center + Vector2d::new(x as f64, y as f64));
        }
    }
}

/// Returns closed range of integer steps that can be taken without going outside
/// the image borders. Returns None if the center point is outside the level
/// boundaries.
fn integration_range(level: &Image, center: Vector2d, r: [usize; 2], padding: i16) -> Option<Range> {
    let mut range = [[0, 0], [0, 0]];
    for i in 0..2 {
        let s = if i == 0 { level.width } else { level.height };
        if s == 0 || !(center[i] >= 0. && center[i] <= (s - 1) as f64) {
            return None;
        }
        let r = r[i] as i16;
        let n = center[i] as i16;
        let fract = if center[i].fract() > 0. { 1 } else { 0 };
        range[i] = [
            i16::max(-r, -n + padding),
            i16::min(r, s as i16 - n - padding - 1 - fract),
        ];
        if range[i][0] > range[i][1] {
            return None;
        }
    }
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smooth, non-repeating within a window, so every window has gradients in
    /// both directions.
    fn pattern(width: usize, height: usize, shift: Vector2d) -> Image {
        let mut image = Image::filled(width, height, 0);
        for y in 0..height {
            for x in 0..width {
                let fx = x as f64 - shift.x;
                let fy = y as f64 - shift.y;
                let v = 128. + 50. * (0.21 * fx + 0.05 * fy).sin() + 50. * (0.17 * fy - 0.07 * fx).cos();
                image.set_value(x, y, v.round() as u8);
            }
        }
        image
    }

    #[test]
    fn test_flow() {
        let shift = Vector2d::new(3., -2.);
        let frame0 = Frame::new(0, pattern(96, 96, Vector2d::zeros()));
        let frame1 = Frame::new(1, pattern(96, 96, shift));

        let mut flow = PyramidalLucasKanade::new();
        let query = Position::new(48., 48.);
        let results = flow.track(&frame0, &frame1, &[query], &FlowConfig::default());
        assert_eq!(results.len(), 1);
        assert!(results[0].found);
        let err = results[0].point.to_vector() - (query.to_vector() + shift);
        assert!(err.norm() < 0.3, "optical flow err {}", err.norm());
    }

    #[test]
    fn test_point_outside_frame_is_lost() {
        let frame0 = Frame::new(0, pattern(96, 96, Vector2d::zeros()));
        let frame1 = Frame::new(1, pattern(96, 96, Vector2d::new(1., 1.)));
        let mut flow = PyramidalLucasKanade::new();
        let outside = Position::new(-5., 300.);
        let inside = Position::new(48., 48.);
        let results = flow.track(&frame0, &frame1, &[outside, inside], &FlowConfig::default());
        assert_eq!(results[0], FlowResult::lost(outside));
        assert!(results[1].found);
    }

    #[test]
    fn test_flat_window_is_lost() {
        let frame0 = Frame::new(0, Image::filled(64, 64, 90));
        let frame1 = Frame::new(1, Image::filled(64, 64, 90));
        let mut flow = PyramidalLucasKanade::new();
        let query = Position::new(30., 30.);
        let results = flow.track(&frame0, &frame1, &[query], &FlowConfig::default());
        assert_eq!(results, vec![FlowResult::lost(query)]);
    }

    #[test]
    fn test_size_mismatch_is_lost() {
        let frame0 = Frame::new(0, pattern(64, 64, Vector2d::zeros()));
        let frame1 = Frame::new(1, pattern(32, 64, Vector2d::zeros()));
        let mut flow = PyramidalLucasKanade::new();
        let query = Position::new(10., 10.);
        let results = flow.track(&frame0, &frame1, &[query], &FlowConfig::default());
        assert_eq!(results, vec![FlowResult::lost(query)]);
    }

    #[test]
    fn test_min_eigenvalue() {
        assert_eq!(min_eigenvalue(&Matrix2d::new(4., 0., 0., 9.)), 4.);
        assert!(min_eigenvalue(&Matrix2d::new(1., 1., 1., 1.)).abs() < 1e-12);
    }

    #[test]
    fn test_scharr() {
        let mut image = Image {
            data: vec![
                0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
            width: 5,
            height: 5,
        };

        let mut out_x = na::dmatrix!();
        let mut out_y = na::dmatrix!();
        let mut grid = na::dmatrix!();

        let center = Vector2d::new(2.0, 2.0);
        let range = integration_range(&image, center, [1, 1], 1).unwrap();
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::zeros(3, 3));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        let answer_x = na::dmatrix!(
            2.5, 0., -2.5;
            2.5, 0., -2.5;
            2.5, 0., -2.5;
        );
        assert_eq!(out_x, answer_x);
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));
    }

    #[test]
    fn test_integration_range() {
        // Coordinate (0, 0) is the center of the top-left pixel, so (9, 9) is
        // the center of the bottom-right pixel of a 10x10 image.
        let image = Image::filled(10, 10, 0);
        assert_eq!(integration_range(&image, Vector2d::new(4.5, 4.5), [3, 3], 0).unwrap(), [[-3, 3], [-3, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(1.5, 2.5), [3, 3], 0).unwrap(), [[-1, 3], [-2, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(0.9, 1.9), [3, 3], 1).unwrap(), [[1, 3], [0, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(8.5, 2.0), [3, 3], 0).unwrap(), [[-3, 0], [-2, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(4.0, 4.0), [2, 1], 0).unwrap(), [[-2, 2], [-1, 1]]);
        assert_eq!(integration_range(&image, Vector2d::new(9.5, 2.0), [3, 3], 0), None);
        assert_eq!(integration_range(&image, Vector2d::new(f64::NAN, 2.0), [3, 3], 0), None);
    }
}
