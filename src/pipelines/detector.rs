// SPDX-License-Identifier: GPL-3.0-only

//! Goal detection loop
//!
//! Each iteration runs the highlighter and searches the highlight for blobs
//! within the goal thresholds. In pipelined mode the blob search of frame N
//! runs inside the first sensor hold-up of frame N+1, so a detection is
//! reported one iteration late but the wait is no longer idle time.

use super::highlighter::{Highlighter, HighlighterParams, Rig};
use crate::backends::camera::{BackendError, LoopAction};
use crate::config::Config;
use crate::constants::blobs::ANNOTATION_COLOR;
use crate::constants::timing::FPS_LOG_INTERVAL;
use crate::errors::{AppError, AppResult};
use crate::imaging::ops::draw_rectangle;
use crate::imaging::{Blob, BlobOptions, LabThreshold, find_blobs};
use crate::timing::{Clock, FpsClock};
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Blobs found in one highlight
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// Iteration that captured the highlight
    pub sequence: u64,
    /// Wall-clock time of the detection (RFC 3339)
    pub timestamp: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Largest first
    pub blobs: Vec<Blob>,
}

impl Detection {
    /// The blob with the most pixels
    pub fn best(&self) -> Option<&Blob> {
        self.blobs.first()
    }
}

/// Counters of a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    /// Frames with at least one blob
    pub frames_with_goals: u64,
    pub errors: u64,
    pub average_fps: f64,
}

/// Draw every blob's bounding box onto a copy of the highlight
pub fn annotate(image: &RgbImage, blobs: &[Blob]) -> RgbImage {
    let mut out = image.clone();
    for blob in blobs {
        draw_rectangle(&mut out, blob.rect, Rgb(ANNOTATION_COLOR));
    }
    out
}

/// Highlight waiting for its blob search (pipelined mode)
struct Pending {
    sequence: u64,
    fps: f64,
    image: RgbImage,
}

/// Runs the highlighter and blob search in a loop
pub struct GoalDetector {
    rig: Rig,
    highlighter: Highlighter,
    thresholds: Vec<LabThreshold>,
    blob_options: BlobOptions,
    pipelined: bool,
    fps: FpsClock,
    sequence: u64,
    pending: Option<Pending>,
    /// Detection finished during an iteration that then failed
    completed: Option<(Detection, RgbImage)>,
    summary: RunSummary,
    frame_limit: Option<u64>,
    max_consecutive_errors: u32,
    consecutive_errors: u32,
    failure: Option<AppError>,
}

impl GoalDetector {
    pub fn new(rig: Rig, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let (_, height) = rig.source.resolution();
        let params = HighlighterParams::from(&config.highlighter);
        info!(
            source = rig.source.name(),
            led = rig.led.name(),
            mode = %params.mode,
            settle_us = params.timings.settle.as_micros() as u64,
            recover_us = params.timings.recover.as_micros() as u64,
            pipelined = config.detector.pipelined,
            "Goal detector ready"
        );

        Self {
            rig,
            highlighter: Highlighter::new(params),
            thresholds: config.blobs.goal_thresholds.clone(),
            blob_options: config.blobs.options(height),
            pipelined: config.detector.pipelined,
            fps: FpsClock::new(clock),
            sequence: 0,
            pending: None,
            completed: None,
            summary: RunSummary::default(),
            frame_limit: None,
            max_consecutive_errors: config.detector.max_consecutive_errors.max(1),
            consecutive_errors: 0,
            failure: None,
        }
    }

    /// Stop after this many reported detections
    pub fn set_frame_limit(&mut self, limit: Option<u64>) {
        self.frame_limit = limit;
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    fn detect(
        thresholds: &[LabThreshold],
        options: &BlobOptions,
        sequence: u64,
        fps: f64,
        image: RgbImage,
    ) -> (Detection, RgbImage) {
        let blobs = find_blobs(&image, thresholds, options);
        let detection = Detection {
            sequence,
            timestamp: chrono::Local::now().to_rfc3339(),
            fps,
            width: image.width(),
            height: image.height(),
            blobs,
        };
        (detection, image)
    }

    /// Run one highlight and return the detection it completes.
    ///
    /// Pipelined detectors return the previous frame's detection, so the
    /// first call returns `None`.
    pub fn step(&mut self) -> AppResult<Option<(Detection, RgbImage)>> {
        self.fps.tick();
        self.sequence += 1;
        let sequence = self.sequence;
        let fps = self.fps.fps();

        let thresholds = &self.thresholds;
        let options = &self.blob_options;

        if !self.pipelined {
            let highlight = self.highlighter.highlight(&mut self.rig)?;
            return Ok(Some(Self::detect(thresholds, options, sequence, fps, highlight.image)));
        }

        let mut pending = self.pending.take();
        let mut finished = None;
        let result = self.highlighter.highlight_with(&mut self.rig, || {
            finished = pending
                .take()
                .map(|p| Self::detect(thresholds, options, p.sequence, p.fps, p.image));
        });
        match result {
            Ok(highlight) => {
                self.pending = Some(Pending {
                    sequence,
                    fps,
                    image: highlight.image,
                });
                Ok(finished)
            }
            Err(e) => {
                // Keep the previous highlight whether or not its search ran
                self.pending = pending;
                self.completed = finished;
                Err(e)
            }
        }
    }

    /// Detection still owed in pipelined mode.
    ///
    /// Returns a detection finished by a failed iteration first, then the
    /// blob search of the last highlight. Call until it returns `None`.
    pub fn flush(&mut self) -> Option<(Detection, RgbImage)> {
        if let Some(completed) = self.completed.take() {
            return Some(completed);
        }
        self.pending
            .take()
            .map(|p| Self::detect(&self.thresholds, &self.blob_options, p.sequence, p.fps, p.image))
    }

    fn report(&mut self, detection: &Detection, image: &RgbImage, sink: &mut impl FnMut(&Detection, &RgbImage)) {
        self.summary.frames += 1;
        if !detection.blobs.is_empty() {
            self.summary.frames_with_goals += 1;
        }
        self.summary.average_fps = self.fps.average_fps();

        if let Some(best) = detection.best() {
            debug!(
                sequence = detection.sequence,
                blobs = detection.blobs.len(),
                x = best.cx,
                y = best.cy,
                pixels = best.pixels,
                density = %format!("{:.2}", best.density()),
                "Goal detected"
            );
        }
        if detection.sequence % FPS_LOG_INTERVAL == 0 {
            info!(
                sequence = detection.sequence,
                fps = %format!("{:.1}", self.fps.average_fps()),
                "Detection rate"
            );
        }

        sink(detection, image);
    }

    fn limit_reached(&self) -> bool {
        self.frame_limit
            .is_some_and(|limit| self.summary.frames >= limit)
    }

    /// Report a detection that finished before its iteration failed
    fn report_completed(&mut self, sink: &mut impl FnMut(&Detection, &RgbImage)) {
        if self.limit_reached() {
            return;
        }
        if let Some((detection, image)) = self.completed.take() {
            self.report(&detection, &image, sink);
        }
    }

    /// One loop iteration with the error policy applied.
    ///
    /// Capture errors are logged and skipped until too many happen in a row;
    /// the end of a file sequence stops the loop quietly.
    pub fn iterate(&mut self, sink: &mut impl FnMut(&Detection, &RgbImage)) -> LoopAction {
        if self.limit_reached() {
            return LoopAction::Stop;
        }

        match self.step() {
            Ok(Some((detection, image))) => {
                self.consecutive_errors = 0;
                self.report(&detection, &image, sink);
            }
            Ok(None) => {
                self.consecutive_errors = 0;
            }
            Err(AppError::Camera(BackendError::EndOfStream)) => {
                self.report_completed(sink);
                info!(frames = self.summary.frames, "Frame source exhausted");
                return LoopAction::Stop;
            }
            Err(e) => {
                self.report_completed(sink);
                self.summary.errors += 1;
                self.consecutive_errors += 1;
                warn!(
                    error = %e,
                    consecutive = self.consecutive_errors,
                    "Detection iteration failed"
                );
                if self.consecutive_errors >= self.max_consecutive_errors {
                    self.failure = Some(e);
                    return LoopAction::Stop;
                }
            }
        }

        if self.limit_reached() {
            LoopAction::Stop
        } else {
            LoopAction::Continue
        }
    }

    /// Report any pending detection and switch the LED off
    pub fn finish(&mut self, sink: &mut impl FnMut(&Detection, &RgbImage)) {
        while !self.limit_reached() {
            match self.flush() {
                Some((detection, image)) => self.report(&detection, &image, sink),
                None => break,
            }
        }
        self.led_off();
    }

    /// Finish the run and return its summary, or the error that ended it
    pub fn conclude(&mut self, sink: &mut impl FnMut(&Detection, &RgbImage)) -> AppResult<RunSummary> {
        self.finish(sink);

        info!(
            frames = self.summary.frames,
            with_goals = self.summary.frames_with_goals,
            errors = self.summary.errors,
            "Detection run finished"
        );
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(self.summary.clone()),
        }
    }

    /// Loop until `stop` is set, the frame limit is reached or the source
    /// runs out
    pub fn run(
        &mut self,
        stop: &AtomicBool,
        max_frames: Option<u64>,
        mut sink: impl FnMut(&Detection, &RgbImage),
    ) -> AppResult<RunSummary> {
        self.set_frame_limit(max_frames);
        while !stop.load(Ordering::SeqCst) {
            if self.iterate(&mut sink) == LoopAction::Stop {
                break;
            }
        }
        self.conclude(&mut sink)
    }

    fn led_off(&mut self) {
        if let Err(e) = self.rig.led.set(false) {
            warn!(led = self.rig.led.name(), error = %e, "Failed to switch LED off");
        }
    }
}

impl Drop for GoalDetector {
    fn drop(&mut self) {
        if self.rig.led.is_on() {
            debug!("GoalDetector dropped, switching LED off");
            self.led_off();
        }
    }
}
