// SPDX-License-Identifier: GPL-3.0-only

//! Goal detection pipeline
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Rig          │ ──▶ │  Highlighter      │ ──▶ │  find_blobs  │ ──▶ Detection
//! │ camera + LED │     │  - LED sequence   │     │  LAB goals   │
//! │              │     │  - lit − unlit    │     │  merge       │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`highlighter`]: LED/snapshot sequences and frame differencing
//! - [`detector`]: the detection loop, FPS tracking and annotation

pub mod detector;
pub mod highlighter;

pub use detector::{Detection, GoalDetector, RunSummary, annotate};
pub use highlighter::{Highlight, Highlighter, HighlighterParams, Rig};
