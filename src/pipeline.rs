//! Per-frame driver: pulls frames, runs the tracker, annotates and emits the
//! frames, and exports the trajectory once the run ends.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use log::{info, warn};
use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::frame::Frame;
use crate::image::ColorImage;
use crate::optical_flow::FlowPrimitive;
use crate::template_matching::MatchPrimitive;
use crate::tracker::Tracker;
use crate::trajectory::Trajectory;
use crate::visualization::{bgr_to_intensity, draw_trajectory, trajectory_canvas, MarkerStyle};

/// Sequential supply of decoded BGR frames.
pub trait FrameSource {
    /// `Ok(None)` at the end of the stream, `Err` when a frame cannot be
    /// decoded.
    fn read(&mut self) -> Result<Option<ColorImage>>;

    /// Width and height of the frames, known before the first read.
    fn frame_size(&self) -> (usize, usize);

    /// Number of frames, when the container reports it.
    fn frame_count(&self) -> Option<u64> {
        None
    }
}

/// Receives every annotated frame. Returning `Break` asks the loop to stop
/// after this frame.
pub trait FrameSink {
    fn write(
        &mut self,
        index: usize,
        frame: &ColorImage,
        trajectory: &Trajectory,
    ) -> Result<ControlFlow<()>>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Persists the final trajectory. `canvas` is the trajectory drawn on a blank
/// image the size of the video.
pub trait TrajectoryExport {
    fn export(&mut self, canvas: &ColorImage, trajectory: &Trajectory) -> Result<()>;
}

/// External interrupt, polled once per frame.
pub trait StopSignal {
    fn stop_requested(&self) -> bool;
}

impl StopSignal for AtomicBool {
    fn stop_requested(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The source ran out of frames.
    Exhausted,
    /// A frame could not be decoded; treated like the end of the stream.
    DecodeError,
    /// Ctrl-C or a sink asked to stop.
    Interrupted,
    /// Annotating or writing a frame failed. The trajectory is still exported
    /// before the run returns the error.
    OutputError,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub frames: usize,
    pub acquired_at: Option<usize>,
    pub trajectory: Trajectory,
    pub stop: StopReason,
    pub frame_size: (usize, usize),
}

pub struct DetectTrackLoop<'a, M, F> {
    tracker: Tracker<M, F>,
    sinks: Vec<&'a mut dyn FrameSink>,
    exports: Vec<&'a mut dyn TrajectoryExport>,
    style: MarkerStyle,
}

impl<'a, M: MatchPrimitive, F: FlowPrimitive> DetectTrackLoop<'a, M, F> {
    pub fn new(tracker: Tracker<M, F>, style: MarkerStyle) -> Self {
        Self {
            tracker,
            sinks: vec![],
            exports: vec![],
            style,
        }
    }

    pub fn with_sink(mut self, sink: &'a mut dyn FrameSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_export(mut self, export: &'a mut dyn TrajectoryExport) -> Self {
        self.exports.push(export);
        self
    }

    /// Process frames until the source is exhausted or a stop is requested,
    /// then export the trajectory. Both endings are normal. A failing sink or
    /// export is an error, returned once every export has had its turn.
    pub fn run<S: FrameSource + ?Sized>(
        mut self,
        source: &mut S,
        stop: &dyn StopSignal,
    ) -> Result<RunSummary> {
        let frame_size = source.frame_size();
        let mut frame_count = 0;
        let mut failure = None;

        let reason = loop {
            if stop.stop_requested() {
                info!("stop requested after {frame_count} frames");
                break StopReason::Interrupted;
            }
            let color = match source.read() {
                Ok(Some(color)) => color,
                Ok(None) => break StopReason::Exhausted,
                Err(err) => {
                    warn!("cannot decode frame {frame_count}, ending the run: {err:#}");
                    break StopReason::DecodeError;
                }
            };

            let flow = self.process_frame(frame_count, color);
            Span::current().pb_inc(1);
            frame_count += 1;

            match flow {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    info!("stop requested by an output after {frame_count} frames");
                    break StopReason::Interrupted;
                }
                Err(err) => {
                    warn!("cannot output frame {}, ending the run: {err:#}", frame_count - 1);
                    failure = Some(err);
                    break StopReason::OutputError;
                }
            }
        };

        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.finish() {
                failure.get_or_insert(err);
            }
        }

        let trajectory = self.tracker.trajectory();
        let canvas = trajectory_canvas(frame_size.0, frame_size.1, trajectory, &self.style)?;
        for export in self.exports.iter_mut() {
            if let Err(err) = export.export(&canvas, trajectory) {
                failure.get_or_insert(err);
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let summary = RunSummary {
            frames: frame_count,
            acquired_at: self.tracker.acquired_at(),
            trajectory: self.tracker.into_trajectory(),
            stop: reason,
            frame_size,
        };
        info!(
            "processed {} frames ({:?}), {} trajectory points",
            summary.frames,
            summary.stop,
            summary.trajectory.len()
        );
        Ok(summary)
    }

    /// Track, annotate and emit one frame. `Break` when a sink asked to stop.
    fn process_frame(&mut self, index: usize, color: ColorImage) -> Result<ControlFlow<()>> {
        let frame = Frame::new(index, bgr_to_intensity(&color)?);
        self.tracker.process(frame);

        let mut annotated = color;
        draw_trajectory(&mut annotated, self.tracker.trajectory(), &self.style)?;

        let mut flow = ControlFlow::Continue(());
        for sink in self.sinks.iter_mut() {
            if sink.write(index, &annotated, self.tracker.trajectory())?.is_break() {
                flow = ControlFlow::Break(());
            }
        }
        Ok(flow)
    }
}
