use anyhow::{bail, Result};

use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create an image filled with a single value
    pub fn filled(width: usize, height: usize, value: u8) -> Image {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Image> {
        if data.len() != width * height {
            bail!(
                "grayscale buffer has {} bytes, expected {width} x {height}",
                data.len()
            );
        }
        Ok(Image {
            data,
            width,
            height,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Copy `patch` so that its top-left corner lands on (x, y). Pixels falling
    /// outside of the image are dropped.
    pub fn set_sub_image(&mut self, x: i32, y: i32, patch: &Image) {
        for py in 0..patch.height {
            for px in 0..patch.width {
                let tx = x + px as i32;
                let ty = y + py as i32;
                if tx < 0 || ty < 0 || tx >= self.width as i32 || ty >= self.height as i32 {
                    continue;
                }
                self.set_value(tx as usize, ty as usize, patch.value(px, py));
            }
        }
    }

    /// Cut a `width` x `height` window whose top-left corner is (x, y).
    pub fn sub_image(&self, x: usize, y: usize, width: usize, height: usize) -> Option<Image> {
        if x + width > self.width || y + height > self.height {
            return None;
        }
        let mut data = Vec::with_capacity(width * height);
        for row in y..y + height {
            let start = row * self.width + x;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Some(Image {
            data,
            width,
            height,
        })
    }
}

/// Sample the image at a sub-pixel location. The caller keeps the point inside
/// the image; the right and bottom neighbours are clamped to the border.
pub fn bilinear(image: &Image, point: Vector2d) -> f64 {
    let x0 = point.x.floor();
    let y0 = point.y.floor();
    let ax = point.x - x0;
    let ay = point.y - y0;

    let max_x = image.width as i64 - 1;
    let max_y = image.height as i64 - 1;
    let xi = num_traits::clamp(x0 as i64, 0, max_x) as usize;
    let yi = num_traits::clamp(y0 as i64, 0, max_y) as usize;
    let xi1 = num_traits::clamp(x0 as i64 + 1, 0, max_x) as usize;
    let yi1 = num_traits::clamp(y0 as i64 + 1, 0, max_y) as usize;

    let v00 = image.value(xi, yi) as f64;
    let v10 = image.value(xi1, yi) as f64;
    let v01 = image.value(xi, yi1) as f64;
    let v11 = image.value(xi1, yi1) as f64;

    (1. - ay) * ((1. - ax) * v00 + ax * v10) + ay * ((1. - ax) * v01 + ax * v11)
}

/// Row-major interleaved BGR image, the pixel layout frames are decoded into
/// and annotated frames are written from.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorImage {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

pub type Bgr = [u8; 3];

impl ColorImage {
    /// A black canvas
    pub fn blank(width: usize, height: usize) -> ColorImage {
        ColorImage {
            data: vec![0; width * height * 3],
            width,
            height,
        }
    }

    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<ColorImage> {
        if data.len() != width * height * 3 {
            bail!(
                "BGR buffer has {} bytes, expected {width} x {height} x 3",
                data.len()
            );
        }
        Ok(ColorImage {
            data,
            width,
            height,
        })
    }

    pub fn pixel(&self, x: usize, y: usize) -> Bgr {
        let i = 3 * (y * self.width + x);
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, value: Bgr) {
        let i = 3 * (y * self.width + x);
        self.data[i..i + 3].copy_from_slice(&value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear() {
        let image = Image::from_raw(2, 2, vec![0, 100, 100, 200]).unwrap();
        assert_eq!(bilinear(&image, Vector2d::new(0., 0.)), 0.);
        assert_eq!(bilinear(&image, Vector2d::new(1., 1.)), 200.);
        assert!((bilinear(&image, Vector2d::new(0.5, 0.5)) - 100.).abs() < 1e-9);
        assert!((bilinear(&image, Vector2d::new(0.5, 0.)) - 50.).abs() < 1e-9);
    }

    #[test]
    fn test_sub_image() {
        let mut image = Image::filled(6, 5, 0);
        let patch = Image::from_raw(2, 2, vec![1, 2, 3, 4]).unwrap();
        image.set_sub_image(3, 2, &patch);
        assert_eq!(image.sub_image(3, 2, 2, 2), Some(patch));
        assert_eq!(image.sub_image(5, 4, 2, 2), None);
    }
}
