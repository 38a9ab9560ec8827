use std::path::PathBuf;

use tracing_core::LevelFilter;

use crate::optical_flow::FlowConfig;
use crate::tracker::{TrackerConfig, ACCEPTANCE_THRESHOLD};
use crate::visualization::MarkerStyle;

#[derive(Debug, clap::Parser)]
pub struct Config {
    /// Match confidence a detection must exceed
    #[clap(long, default_value_t = ACCEPTANCE_THRESHOLD)]
    pub threshold: f64,

    /// Frame rate of the output video
    #[clap(long, default_value = "10")]
    pub fps: f64,

    /// Radius of the trajectory markers, in pixels
    #[clap(long, default_value = "3")]
    pub marker_radius: i32,

    /// Annotated output video
    #[clap(long, default_value = "output.avi")]
    pub output: PathBuf,

    /// Final trajectory image
    #[clap(long, default_value = "final_trajectory.png")]
    pub trajectory_image: PathBuf,

    /// Also write the trajectory as JSON
    #[clap(long)]
    pub trajectory_json: Option<PathBuf>,

    /// Show the annotated frames in a window, `q` stops. Off by default so
    /// the tracker also runs headless
    #[clap(long)]
    pub display: bool,

    /// Save a rerun recording of the run
    #[clap(long)]
    pub recording: Option<PathBuf>,

    /// Lucas-Kanade window size, in pixels
    #[clap(long, default_value = "15")]
    pub window: usize,

    /// Coarsest pyramid level used by the flow
    #[clap(long, default_value = "2")]
    pub levels: usize,

    /// Flow iterations per pyramid level
    #[clap(long, default_value = "10")]
    pub iterations: usize,

    /// Flow convergence threshold, in pixels
    #[clap(long, default_value = "0.03")]
    pub epsilon: f64,

    #[clap(long, default_value = "info")]
    pub log_level: LevelFilter,
}

impl Config {
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            acceptance_threshold: self.threshold,
            flow: FlowConfig {
                window: [self.window, self.window],
                max_level: self.levels,
                max_iterations: self.iterations,
                epsilon: self.epsilon,
                ..FlowConfig::default()
            },
        }
    }

    pub fn marker_style(&self) -> MarkerStyle {
        MarkerStyle {
            radius: self.marker_radius,
            ..MarkerStyle::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["surfboard-tracker"]).unwrap();
        assert_eq!(config.tracker_config(), TrackerConfig::default());
        assert_eq!(config.marker_style(), MarkerStyle::default());
        assert_eq!(config.fps, 10.);
        assert_eq!(config.output, PathBuf::from("output.avi"));
        assert_eq!(config.trajectory_image, PathBuf::from("final_trajectory.png"));
        assert_eq!(config.trajectory_json, None);
        assert!(!config.display);
        assert_eq!(config.log_level, LevelFilter::INFO);
    }

    #[test]
    fn test_overrides() {
        let config = Config::try_parse_from([
            "surfboard-tracker",
            "--threshold",
            "0.9",
            "--window",
            "21",
            "--levels",
            "3",
            "--log-level",
            "debug",
            "--display",
        ])
        .unwrap();
        let tracker = config.tracker_config();
        assert_eq!(tracker.acceptance_threshold, 0.9);
        assert_eq!(tracker.flow.window, [21, 21]);
        assert_eq!(tracker.flow.max_level, 3);
        assert_eq!(config.log_level, LevelFilter::DEBUG);
        assert!(config.display);
    }
}
