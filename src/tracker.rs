use std::fmt;

use log::{debug, info};

use crate::frame::Frame;
use crate::image::Image;
use crate::my_types::Position;
use crate::optical_flow::{FlowConfig, FlowPrimitive, PyramidalLucasKanade};
use crate::template_matching::{MatchPrimitive, NormalizedCrossCorrelation};
use crate::trajectory::Trajectory;

/// Minimum match confidence, exclusive, for an initial detection to be trusted.
pub const ACCEPTANCE_THRESHOLD: f64 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerConfig {
    pub acceptance_threshold: f64,
    pub flow: FlowConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: ACCEPTANCE_THRESHOLD,
            flow: FlowConfig::default(),
        }
    }
}

/// Detect-then-track mode. Once `Tracking`, never `Searching` again: the
/// tracked position is not re-validated against the template.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum TrackerState {
    /// No reliable position yet.
    #[default]
    Searching,
    /// `previous` is the frame `position` was last estimated against.
    Tracking { position: Position, previous: Frame },
}

/// What happened to one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameEvent {
    /// Still searching. `confidence` is None when no window of the frame fits
    /// the template.
    NotDetected {
        frame: usize,
        confidence: Option<f64>,
    },
    Acquired {
        frame: usize,
        position: Position,
        confidence: f64,
    },
    Tracked {
        frame: usize,
        position: Position,
    },
    /// The flow lost the point; `carried` is queried again on the next frame.
    Lost {
        frame: usize,
        carried: Position,
    },
}

impl FrameEvent {
    /// Position to append to the trajectory for this frame, if any.
    pub fn recorded(&self) -> Option<Position> {
        match *self {
            FrameEvent::Acquired { position, .. } | FrameEvent::Tracked { position, .. } => {
                Some(position)
            }
            FrameEvent::NotDetected { .. } | FrameEvent::Lost { .. } => None,
        }
    }
}

impl fmt::Display for FrameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameEvent::NotDetected {
                frame,
                confidence: Some(confidence),
            } => write!(f, "No initial detection at frame {frame} (confidence {confidence:.3})"),
            FrameEvent::NotDetected {
                frame,
                confidence: None,
            } => write!(f, "No initial detection at frame {frame} (template does not fit)"),
            FrameEvent::Acquired {
                frame,
                position,
                confidence,
            } => write!(
                f,
                "Initial detection at frame {frame}: {position} (confidence {confidence:.3})"
            ),
            FrameEvent::Tracked { frame, position } => {
                write!(f, "Frame {frame}: surfboard position: {position}")
            }
            FrameEvent::Lost { frame, carried } => {
                write!(f, "Frame {frame}: point lost, keeping {carried}")
            }
        }
    }
}

impl TrackerState {
    pub fn is_tracking(&self) -> bool {
        matches!(self, TrackerState::Tracking { .. })
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            TrackerState::Searching => None,
            TrackerState::Tracking { position, .. } => Some(*position),
        }
    }

    /// Consume one frame and return the next state. The current frame always
    /// ends up as the previous frame of a `Tracking` result.
    pub fn step<M, F>(
        self,
        frame: Frame,
        template: &Image,
        matcher: &mut M,
        flow: &mut F,
        config: &TrackerConfig,
    ) -> (TrackerState, FrameEvent)
    where
        M: MatchPrimitive + ?Sized,
        F: FlowPrimitive + ?Sized,
    {
        match self {
            TrackerState::Searching => detect(frame, template, matcher, config),
            TrackerState::Tracking { position, previous } => {
                track(position, previous, frame, flow, config)
            }
        }
    }
}

fn detect<M: MatchPrimitive + ?Sized>(
    frame: Frame,
    template: &Image,
    matcher: &mut M,
    config: &TrackerConfig,
) -> (TrackerState, FrameEvent) {
    let index = frame.index();
    match matcher.find(frame.image(), template) {
        Some(found) if found.confidence > config.acceptance_threshold => (
            TrackerState::Tracking {
                position: found.location,
                previous: frame,
            },
            FrameEvent::Acquired {
                frame: index,
                position: found.location,
                confidence: found.confidence,
            },
        ),
        found => (
            TrackerState::Searching,
            FrameEvent::NotDetected {
                frame: index,
                confidence: found.map(|m| m.confidence),
            },
        ),
    }
}

fn track<F: FlowPrimitive + ?Sized>(
    position: Position,
    previous: Frame,
    current: Frame,
    flow: &mut F,
    config: &TrackerConfig,
) -> (TrackerState, FrameEvent) {
    let index = current.index();
    let result = flow
        .track(&previous, &current, &[position], &config.flow)
        .into_iter()
        .next();
    // `previous` is dropped here, only two frames are alive at any time
    match result {
        Some(result) if result.found => (
            TrackerState::Tracking {
                position: result.point,
                previous: current,
            },
            FrameEvent::Tracked {
                frame: index,
                position: result.point,
            },
        ),
        _ => (
            TrackerState::Tracking {
                position,
                previous: current,
            },
            FrameEvent::Lost {
                frame: index,
                carried: position,
            },
        ),
    }
}

/// Owns the detect-then-track state and the trajectory it accumulates.
pub struct Tracker<M = NormalizedCrossCorrelation, F = PyramidalLucasKanade> {
    matcher: M,
    flow: F,
    template: Image,
    config: TrackerConfig,
    state: TrackerState,
    trajectory: Trajectory,
    acquired_at: Option<usize>,
}

impl Tracker {
    /// Tracker using the built-in matching and flow primitives.
    pub fn with_default_primitives(template: Image, config: TrackerConfig) -> Self {
        Tracker::new(
            template,
            config,
            NormalizedCrossCorrelation::new(),
            PyramidalLucasKanade::new(),
        )
    }
}

impl<M: MatchPrimitive, F: FlowPrimitive> Tracker<M, F> {
    pub fn new(template: Image, config: TrackerConfig, matcher: M, flow: F) -> Self {
        Self {
            matcher,
            flow,
            template,
            config,
            state: TrackerState::Searching,
            trajectory: Trajectory::new(),
            acquired_at: None,
        }
    }

    /// Run one transition for `frame` and record the accepted position.
    pub fn process(&mut self, frame: Frame) -> FrameEvent {
        let state = std::mem::take(&mut self.state);
        let (state, event) = state.step(
            frame,
            &self.template,
            &mut self.matcher,
            &mut self.flow,
            &self.config,
        );
        self.state = state;

        if let Some(position) = event.recorded() {
            self.trajectory.push(position);
        }
        match event {
            FrameEvent::Acquired { frame, .. } => {
                self.acquired_at = Some(frame);
                info!("{event}");
            }
            FrameEvent::Lost { .. } => debug!("{event}"),
            _ => info!("{event}"),
        }
        event
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Index of the frame the object was first detected in.
    pub fn acquired_at(&self) -> Option<usize> {
        self.acquired_at
    }

    pub fn into_trajectory(self) -> Trajectory {
        self.trajectory
    }
}
