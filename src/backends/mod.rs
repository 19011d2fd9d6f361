// SPDX-License-Identifier: MPL-2.0

//! Capture backends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Sandboxed package (hooked)          │
//! └────────────────────┬────────────────────────┘
//!                      │ acquire
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │     Camera       │  │ Virtual Camera  │  │
//! │  │ factory, handles │◄─│ sources, frames │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Capture handle trait, factory and pacing loops
//! - [`virtual_camera`]: Camera sources, decoding and the frame provider

pub mod camera;
pub mod virtual_camera;
