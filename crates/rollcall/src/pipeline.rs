//! One camera frame in, one annotated frame out, plus the loop driving it.

use crate::attendance::Attendance;
use crate::display::{Control, Display, DisplayError};
use crate::ledger::LedgerError;
use crate::overlay::Overlay;
use image::RgbImage;
use rollcall_core::{DistanceMatcher, EngineError, FaceEngine, Gallery, Matcher, DEFAULT_MATCH_TOLERANCE};
use rollcall_hw::{CameraError, FlashNotifier, FlashTrigger, Frame, FrameSource};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DOWNSCALE: u32 = 4;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("face engine: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Display(#[from] DisplayError),
}

impl PipelineError {
    /// Errors that end the run. Everything else drops the current frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Ledger(_) | PipelineError::Display(_))
    }
}

/// What happened to one frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub sequence: u64,
    pub faces: usize,
    /// Names matched in this frame, in detection order.
    pub recognized: Vec<String>,
    /// Subset of `recognized` written to the ledger for the first time.
    pub recorded: Vec<String>,
    /// Time from decode to the end of annotation.
    pub latency: Duration,
}

pub struct Processed {
    /// Full-resolution mirrored frame with labels drawn.
    pub image: RgbImage,
    pub report: FrameReport,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub dropped: u64,
    pub recorded: usize,
}

pub struct Pipeline<S: FrameSource, E: FaceEngine, F: FlashTrigger> {
    source: S,
    engine: E,
    gallery: Gallery,
    matcher: DistanceMatcher,
    tolerance: f32,
    downscale: u32,
    attendance: Attendance,
    flash: FlashNotifier<F>,
    overlay: Overlay,
}

impl<S: FrameSource, E: FaceEngine, F: FlashTrigger> Pipeline<S, E, F> {
    pub fn new(
        source: S,
        engine: E,
        gallery: Gallery,
        attendance: Attendance,
        flash: FlashNotifier<F>,
        overlay: Overlay,
    ) -> Self {
        Self {
            source,
            engine,
            gallery,
            matcher: DistanceMatcher,
            tolerance: DEFAULT_MATCH_TOLERANCE,
            downscale: DEFAULT_DOWNSCALE,
            attendance,
            flash,
            overlay,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Detection runs on frames shrunk by `factor`; boxes are scaled back up.
    pub fn with_downscale(mut self, factor: u32) -> Self {
        self.downscale = factor.max(1);
        self
    }

    /// Fetch the next frame and process it.
    pub fn process_frame(&mut self) -> Result<Processed, PipelineError> {
        let frame = self.source.next_frame()?;
        self.annotate(frame)
    }

    /// Recognize every face in `frame`, record newcomers and draw their labels.
    pub fn annotate(&mut self, mut frame: Frame) -> Result<Processed, PipelineError> {
        frame.mirror();
        let small = frame.downscaled(self.downscale);

        let mut report = FrameReport { sequence: frame.sequence, ..FrameReport::default() };
        let faces = self.engine.locate(&small)?;
        report.faces = faces.len();
        if faces.is_empty() {
            report.latency = frame.timestamp.elapsed();
            return Ok(Processed { image: frame.image, report });
        }

        let embeddings = self.engine.encode(&small, &faces)?;
        let scale = self.downscale as f32;

        for (face, embedding) in faces.iter().zip(&embeddings) {
            let result = self.matcher.compare(embedding, self.gallery.identities(), self.tolerance);
            let Some(identity) = result.index.and_then(|i| self.gallery.identities().get(i)) else {
                tracing::trace!(distance = result.distance, "face not recognized");
                continue;
            };
            let name = identity.attendance_name();
            tracing::debug!(name = %name, distance = result.distance, "face recognized");

            self.overlay.draw(&mut frame.image, &face.scaled(scale), &name);

            if self.attendance.record_if_new(&name)? {
                self.flash.notify();
                report.recorded.push(name.clone());
            }
            report.recognized.push(name);
        }

        report.latency = frame.timestamp.elapsed();
        Ok(Processed { image: frame.image, report })
    }

    pub fn attendance(&self) -> &Attendance {
        &self.attendance
    }

    #[cfg(test)]
    pub fn flash(&self) -> &FlashNotifier<F> {
        &self.flash
    }
}

/// Run until the display asks to quit or a fatal error occurs.
///
/// Camera, decode and inference failures drop the frame; the window is
/// still pumped and the loop pauses for `retry_delay` before fetching again.
pub fn run<S, E, F>(
    pipeline: &mut Pipeline<S, E, F>,
    display: &mut dyn Display,
    retry_delay: Duration,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource,
    E: FaceEngine,
    F: FlashTrigger,
{
    let mut summary = RunSummary::default();

    loop {
        let control = match pipeline.process_frame() {
            Ok(Processed { image, report }) => {
                summary.frames += 1;
                summary.recorded += report.recorded.len();
                tracing::debug!(
                    sequence = report.sequence,
                    faces = report.faces,
                    recognized = ?report.recognized,
                    recorded = ?report.recorded,
                    latency_ms = report.latency.as_millis() as u64,
                    "frame processed"
                );
                display.show(&image)?
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                summary.dropped += 1;
                match &e {
                    PipelineError::Camera(c) if c.is_decode() => {
                        tracing::warn!(error = %e, "failed to decode image")
                    }
                    PipelineError::Camera(_) => tracing::warn!(error = %e, "error fetching image"),
                    _ => tracing::warn!(error = %e, "frame dropped"),
                }
                let control = display.poll();
                if control == Control::Continue && !retry_delay.is_zero() {
                    std::thread::sleep(retry_delay);
                }
                control
            }
        };

        if control == Control::Quit {
            tracing::info!(
                frames = summary.frames,
                dropped = summary.dropped,
                recorded = summary.recorded,
                "quit requested"
            );
            return Ok(summary);
        }
    }
}
