use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as AnyhowContext, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::image::ColorImage;
use crate::my_types::Position;
use crate::pipeline::TrajectoryExport;

/// Accepted positions of the tracked object, oldest first. Append-only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    points: Vec<Position>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: Position) {
        self.points.push(position);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Position] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.points.iter()
    }

    /// Write the trajectory as JSON, `{"points": [{"x": .., "y": ..}, ..]}`.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create trajectory file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("Failed to write trajectory to {}", path.display()))?;
        writer.flush()?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a Position;
    type IntoIter = std::slice::Iter<'a, Position>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Writes the trajectory as JSON at the end of a run.
pub struct JsonExport {
    path: PathBuf,
}

impl JsonExport {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl TrajectoryExport for JsonExport {
    fn export(&mut self, _canvas: &ColorImage, trajectory: &Trajectory) -> Result<()> {
        trajectory.save_json(&self.path)?;
        info!(
            "wrote {} trajectory points to {}",
            trajectory.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order() {
        let mut trajectory = Trajectory::new();
        assert!(trajectory.is_empty());

        trajectory.push(Position::new(100., 50.));
        trajectory.push(Position::new(102., 51.));
        trajectory.push(Position::new(101.5, 49.));
        assert_eq!(trajectory.len(), 3);
        let xs: Vec<f64> = trajectory.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![100., 102., 101.5]);
    }

    #[test]
    fn test_json_layout() {
        let mut trajectory = Trajectory::new();
        trajectory.push(Position::new(1., 2.5));
        let value = serde_json::to_value(&trajectory).unwrap();
        assert_eq!(value, serde_json::json!({ "points": [{ "x": 1.0, "y": 2.5 }] }));
    }

    #[test]
    fn test_save_json() {
        let mut trajectory = Trajectory::new();
        trajectory.push(Position::new(-3., 700.));
        let path = std::env::temp_dir().join(format!(
            "surfboard-trajectory-{}.json",
            std::process::id()
        ));
        trajectory.save_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let loaded: Trajectory = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, trajectory);
    }

    #[test]
    fn test_json_export_ignores_canvas() {
        let path = std::env::temp_dir().join(format!(
            "surfboard-export-{}.json",
            std::process::id()
        ));
        let mut trajectory = Trajectory::new();
        trajectory.push(Position::new(100., 50.));
        JsonExport::new(&path)
            .export(&ColorImage::blank(0, 0), &trajectory)
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(serde_json::from_str::<Trajectory>(&text).unwrap(), trajectory);
    }
}
