use nalgebra as na;
use serde::{Deserialize, Serialize};

pub type Vector2d = na::Vector2<f64>;
pub type Matrix2d = na::Matrix2<f64>;
pub type Matrixd = na::DMatrix<f64>;

/// A point in frame pixel space. Not clamped to the frame: tracking may
/// drift outside of it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_vector(self) -> Vector2d {
        Vector2d::new(self.x, self.y)
    }

    /// Integer pixel the position falls in, truncating toward zero.
    pub fn pixel(self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

impl From<Vector2d> for Position {
    fn from(v: Vector2d) -> Self {
        Self::new(v.x, v.y)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}
