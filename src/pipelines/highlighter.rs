// SPDX-License-Identifier: GPL-3.0-only

//! Frame-differencing highlighters
//!
//! A highlighter drives the LED and the camera through one capture sequence
//! and returns an image in which only surfaces returning the IR flash stand
//! out. Every snapshot waits out the sensor refresh after the preceding LED
//! change or snapshot so that no row of the rolling shutter straddles a
//! toggle.
//!
//! | mode          | sequence                                                      |
//! |---------------|---------------------------------------------------------------|
//! | two-frame     | lit, LED off, unlit, LED on (LED stays on between calls)      |
//! | two-step      | LED off, unlit, LED on, lit                                   |
//! | motion-masked | LED off, unlit, unlit, motion map, LED on, lit                |
//! | super-slow    | motion-masked with longer waits                               |
//!
//! The highlight is always `lit - unlit`, saturating at zero, optionally
//! lens corrected, blurred and negated.

use crate::backends::camera::FrameSource;
use crate::config::HighlighterSettings;
use crate::constants::{HighlighterMode, ModeTimings};
use crate::errors::AppResult;
use crate::flash::Illuminator;
use crate::imaging::GrayThreshold;
use crate::imaging::ops::{self, binary, count_set, dilate, erode, invert_mask, to_grayscale};
use crate::timing::{Clock, RefreshGate};
use image::{GrayImage, RgbImage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// The hardware a highlighter drives
pub struct Rig {
    pub source: Box<dyn FrameSource>,
    pub led: Box<dyn Illuminator>,
    pub gate: RefreshGate,
}

impl Rig {
    pub fn new(source: Box<dyn FrameSource>, led: Box<dyn Illuminator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            led,
            gate: RefreshGate::new(clock),
        }
    }

    /// Switch the LED and return the time of the change
    pub fn switch(&mut self, on: bool) -> AppResult<Instant> {
        self.led.set(on)?;
        Ok(self.gate.now())
    }

    /// Take a snapshot and return it with the time it completed
    pub fn snapshot(&mut self) -> AppResult<(RgbImage, Instant)> {
        let frame = self.source.snapshot()?;
        Ok((frame, self.gate.now()))
    }
}

/// Tunables resolved from [`HighlighterSettings`]
#[derive(Debug, Clone, PartialEq)]
pub struct HighlighterParams {
    pub mode: HighlighterMode,
    pub timings: ModeTimings,
    /// Barrel correction `(strength, zoom)`
    pub lens: Option<(f32, f32)>,
    pub mean_size: Option<u32>,
    pub negate: bool,
    pub motion_threshold: u8,
    pub morph_size: u32,
}

impl From<&HighlighterSettings> for HighlighterParams {
    fn from(settings: &HighlighterSettings) -> Self {
        Self {
            mode: settings.mode,
            timings: settings.timings(),
            lens: settings
                .effective_lens_strength()
                .map(|strength| (strength, settings.lens_zoom)),
            mean_size: settings.effective_mean_size(),
            negate: settings.negate,
            motion_threshold: settings.motion_threshold,
            morph_size: settings.morph_size,
        }
    }
}

/// Output of one capture sequence
#[derive(Debug, Clone)]
pub struct Highlight {
    pub image: RgbImage,
    /// Pixels excluded as motion (255), for masked modes
    pub motion_mask: Option<GrayImage>,
}

/// Lens correction, blur and negation, in that order
fn post_process(mut img: RgbImage, params: &HighlighterParams) -> AppResult<RgbImage> {
    if let Some((strength, zoom)) = params.lens {
        img = ops::lens_corr(&img, strength, zoom)?;
    }
    if let Some(size) = params.mean_size {
        img = ops::mean(&img, size);
    }
    if params.negate {
        ops::negate(&mut img);
    }
    Ok(img)
}

/// `lit - unlit` followed by the post-processing steps
pub fn compose_difference(lit: &RgbImage, unlit: &RgbImage, params: &HighlighterParams) -> AppResult<RgbImage> {
    let mut img = lit.clone();
    ops::sub(&mut img, unlit, false, None)?;
    post_process(img, params)
}

/// Binary map of pixels that changed between two unlit frames.
///
/// Grayscale difference, thresholded, then eroded, dilated and eroded again
/// to drop isolated noise while keeping moving regions.
pub fn motion_mask(first: &RgbImage, second: &RgbImage, params: &HighlighterParams) -> AppResult<GrayImage> {
    let mut gray = to_grayscale(second);
    ops::difference(&mut gray, &to_grayscale(first))?;

    let map = binary(&gray, &[GrayThreshold::new(params.motion_threshold, 255)], false);
    let size = params.morph_size;
    Ok(erode(&dilate(&erode(&map, size, None), size, None), size, None))
}

/// `lit - unlit` where nothing moved, black where the motion map is set.
///
/// The mask is the inverse of OpenMV's masked `sub`, which subtracts only
/// where the map is set: here moving pixels can never read as a goal.
pub fn masked_highlight(
    lit: &RgbImage,
    unlit: &RgbImage,
    motion: &GrayImage,
    params: &HighlighterParams,
) -> AppResult<RgbImage> {
    let still = invert_mask(motion);
    let mut img = lit.clone();
    ops::sub(&mut img, unlit, false, Some(&still))?;
    for (pixel, m) in img.pixels_mut().zip(motion.iter()) {
        if *m != 0 {
            pixel.0 = [0, 0, 0];
        }
    }
    post_process(img, params)
}

/// Runs the capture sequence of one [`HighlighterMode`]
pub struct Highlighter {
    params: HighlighterParams,
    /// Last LED change (two-frame) or last lit snapshot (two-step)
    last_event: Option<Instant>,
}

impl Highlighter {
    pub fn new(params: HighlighterParams) -> Self {
        Self {
            params,
            last_event: None,
        }
    }

    pub fn params(&self) -> &HighlighterParams {
        &self.params
    }

    /// Run one sequence with nothing to do during the waits
    pub fn highlight(&mut self, rig: &mut Rig) -> AppResult<Highlight> {
        self.highlight_with(rig, || {})
    }

    /// Run one sequence; `idle` is executed inside the first hold-up
    pub fn highlight_with<F: FnOnce()>(&mut self, rig: &mut Rig, idle: F) -> AppResult<Highlight> {
        let highlight = match self.params.mode {
            HighlighterMode::TwoFrame => self.two_frame(rig, idle),
            HighlighterMode::TwoStep => self.two_step(rig, idle),
            HighlighterMode::MotionMasked | HighlighterMode::SuperSlow => self.motion_masked(rig, idle),
        };
        if highlight.is_err() {
            // The LED state is unknown after a failure; start the next sequence clean
            self.last_event = None;
        }
        highlight
    }

    fn two_frame<F: FnOnce()>(&mut self, rig: &mut Rig, idle: F) -> AppResult<Highlight> {
        let wait = self.params.timings.settle;

        let lit_since = match self.last_event {
            Some(at) if rig.led.is_on() => at,
            _ => rig.switch(true)?,
        };
        rig.gate.hold_up_while(lit_since, wait, idle);
        let (lit, _) = rig.snapshot()?;

        let off_at = rig.switch(false)?;
        rig.gate.hold_up(off_at, wait);
        let (unlit, _) = rig.snapshot()?;

        self.last_event = Some(rig.switch(true)?);
        trace!("Two-frame sequence captured");

        Ok(Highlight {
            image: compose_difference(&lit, &unlit, &self.params)?,
            motion_mask: None,
        })
    }

    fn two_step<F: FnOnce()>(&mut self, rig: &mut Rig, idle: F) -> AppResult<Highlight> {
        let ModeTimings { settle, recover } = self.params.timings;

        match self.last_event {
            Some(last_lit) => {
                rig.gate.hold_up_while(last_lit, recover, idle);
            }
            None => idle(),
        }

        let off_at = rig.switch(false)?;
        rig.gate.hold_up(off_at, settle);
        let (unlit, unlit_at) = rig.snapshot()?;
        rig.gate.hold_up(unlit_at, recover);

        let on_at = rig.switch(true)?;
        rig.gate.hold_up(on_at, settle);
        let (lit, lit_at) = rig.snapshot()?;
        self.last_event = Some(lit_at);
        trace!("Two-step sequence captured");

        Ok(Highlight {
            image: compose_difference(&lit, &unlit, &self.params)?,
            motion_mask: None,
        })
    }

    fn motion_masked<F: FnOnce()>(&mut self, rig: &mut Rig, idle: F) -> AppResult<Highlight> {
        let ModeTimings { settle, recover } = self.params.timings;

        let off_at = rig.switch(false)?;
        rig.gate.hold_up_while(off_at, settle, idle);
        let (first, first_at) = rig.snapshot()?;
        rig.gate.hold_up(first_at, recover);
        let (unlit, _) = rig.snapshot()?;

        let motion = motion_mask(&first, &unlit, &self.params)?;

        let on_at = rig.switch(true)?;
        rig.gate.hold_up(on_at, settle);
        let (lit, _) = rig.snapshot()?;
        self.last_event = Some(on_at);

        let moving = count_set(&motion);
        if moving > 0 {
            debug!(pixels = moving, "Motion suppressed in highlight");
        }

        Ok(Highlight {
            image: masked_highlight(&lit, &unlit, &motion, &self.params)?,
            motion_mask: Some(motion),
        })
    }
}
