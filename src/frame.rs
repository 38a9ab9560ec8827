use crate::image::Image;

/// An immutable grayscale frame and its position in the video.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    index: usize,
    image: Image,
}

impl Frame {
    pub fn new(index: usize, image: Image) -> Frame {
        Frame { index, image }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn width(&self) -> usize {
        self.image.width
    }

    pub fn height(&self) -> usize {
        self.image.height
    }
}
