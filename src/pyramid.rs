use anyhow::{bail, Result};

use crate::image::Image;

/// Successively halved copies of a frame. `levels[0]` is half the size of the
/// parent, `levels[1]` a quarter and so on.
#[derive(Debug)]
pub struct Pyramid {
    pub levels: Vec<Image>,
}

impl Pyramid {
    pub fn empty() -> Self {
        Self { levels: vec![] }
    }

    pub fn new(frame: &Image, level_count: usize) -> Result<Self> {
        let mut pyramid = Self::empty();
        pyramid.compute(frame, level_count)?;
        Ok(pyramid)
    }

    pub fn compute(&mut self, frame: &Image, level_count: usize) -> Result<()> {
        self.levels.truncate(level_count);
        while self.levels.len() < level_count {
            self.levels.push(Image::empty())
        }
        if level_count == 0 {
            return Ok(());
        }
        downscale(frame, &mut self.levels[0])?;
        for i in 0..(level_count - 1) {
            let rest = &mut self.levels[i..];
            if let Some((parent, rest)) = rest.split_first_mut() {
                downscale(parent, &mut rest[0])?;
            }
        }
        Ok(())
    }
}

/// Image at `level`, where level 0 is the frame itself.
pub fn image_at_level<'a>(frame: &'a Image, pyramid: &'a Pyramid, level: usize) -> &'a Image {
    if level == 0 {
        frame
    } else {
        &pyramid.levels[level - 1]
    }
}

/// Gaussian-weighted 2x downscale of the parent into child. Odd dimensions are
/// rounded up and border pixels are replicated.
fn downscale(parent: &Image, child: &mut Image) -> Result<()> {
    let w = parent.width as i32;
    let h = parent.height as i32;
    if w == 0 || h == 0 {
        bail!("cannot downscale image with shape {w} x {h}");
    }

    let w_half = (w + 1) / 2;
    let h_half = (h + 1) / 2;
    child.data.clear();
    child.width = w_half as usize;
    child.height = h_half as usize;

    let v = |x: i32, y: i32| -> u16 {
        let x = num_traits::clamp(x, 0, w - 1);
        let y = num_traits::clamp(y, 0, h - 1);
        parent.value(x as usize, y as usize) as u16
    };

    for y in 0..h_half {
        let y2 = 2 * y;
        for x in 0..w_half {
            let x2 = 2 * x;
            let value = (4 * v(x2, y2)
                + 2 * (v(x2 + 1, y2) + v(x2 - 1, y2) + v(x2, y2 + 1) + v(x2, y2 - 1))
                + (v(x2 + 1, y2 + 1) + v(x2 - 1, y2 - 1) + v(x2 - 1, y2 + 1) + v(x2 + 1, y2 - 1)))
                / 16;
            child.data.push(value as u8);
        }
    }
    Ok(())
}
