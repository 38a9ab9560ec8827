use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressStyle;
use tracing::{info, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use surfboard_tracker::config::*;
use surfboard_tracker::pipeline::{DetectTrackLoop, FrameSource};
use surfboard_tracker::tracker::Tracker;
use surfboard_tracker::trajectory::JsonExport;
use surfboard_tracker::video::*;
use surfboard_tracker::visualization::RerunRecorder;

/// Track a surfboard through a video: find it once with a template, then
/// follow it with optical flow.
#[derive(Parser)]
#[clap(name = "surfboard-tracker")]
pub struct Args {
    /// Video to track the surfboard in
    pub video_file: PathBuf,
    /// Grayscale image of the surfboard
    pub template_file: PathBuf,
    #[clap(flatten)]
    pub config: Config,
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    let config = args.config;

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(config.log_level)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .init();

    // open the inputs, nothing is processed if either fails
    let mut source = VideoInput::new(&args.video_file)?;
    let template = load_template(&args.template_file)?;

    let stop = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let stop = stop.clone();
        move || {
            info!("received Ctrl-C, finishing the run");
            stop.store(true, Ordering::SeqCst);
        }
    })?;

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    if let Some(count) = source.frame_count() {
        header_span.pb_set_length(count);
    }
    let header_span_enter = header_span.enter();

    let mut output = VideoOutput::new(&config.output, config.fps, source.frame_size())?;
    let mut display = config
        .display
        .then(|| LiveDisplay::new("Surfboard Tracking", 25));
    let mut recorder = config
        .recording
        .as_deref()
        .map(RerunRecorder::new)
        .transpose()?;
    let mut image_export = ImageExport::new(&config.trajectory_image);
    let mut json_export = config.trajectory_json.as_deref().map(JsonExport::new);

    let tracker = Tracker::with_default_primitives(template, config.tracker_config());
    let mut pipeline = DetectTrackLoop::new(tracker, config.marker_style())
        .with_sink(&mut output)
        .with_export(&mut image_export);
    if let Some(display) = display.as_mut() {
        pipeline = pipeline.with_sink(display);
    }
    if let Some(recorder) = recorder.as_mut() {
        pipeline = pipeline.with_sink(recorder);
    }
    if let Some(json_export) = json_export.as_mut() {
        pipeline = pipeline.with_export(json_export);
    }

    let summary = pipeline.run(&mut source, &*stop)?;

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    match summary.acquired_at {
        Some(frame) => info!(
            "surfboard acquired at frame {frame}, {} positions over {} frames",
            summary.trajectory.len(),
            summary.frames
        ),
        None => info!("surfboard never detected in {} frames", summary.frames),
    }

    Ok(())
}
