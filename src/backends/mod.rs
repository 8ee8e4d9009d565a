// SPDX-License-Identifier: GPL-3.0-only

//! Hardware access
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Pipeline Layer                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  Camera (V4L2)   │  │  Image files    │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! │  ┌──────────────────────────────────────┐   │
//! │  │  Synthetic camera + LED (simulated)  │   │
//! │  └──────────────────────────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The IR LED itself lives in [`crate::flash`].

pub mod camera;
