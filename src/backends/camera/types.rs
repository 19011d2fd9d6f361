// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for capture handles and frame delivery

use crate::constants::capture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A single decoded frame
///
/// Pixel data is always tightly packed RGBA. The buffer is shared, so
/// cloning a frame is cheap and consumers never observe later mutation.
#[derive(Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA pixels, `stride * height` bytes
    pub data: Arc<[u8]>,
    /// Bytes per row
    pub stride: u32,
    /// When the frame was decoded or received
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Wrap raw RGBA pixels; returns `None` if the buffer size does not match
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
            stride: width * 4,
            captured_at: Instant::now(),
        })
    }

    /// Frame filled with one colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data: Vec<u8> = std::iter::repeat_n(rgba, width as usize * height as usize)
            .flatten()
            .collect();
        Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
            stride: width * 4,
            captured_at: Instant::now(),
        }
    }

    /// RGBA value at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.stride + x * 4) as usize;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Copy into an `image` buffer, e.g. for saving a snapshot
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.to_vec())
    }

    /// Whether two frames share the same pixel buffer
    pub fn same_buffer(&self, other: &CameraFrame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Destination for frames; the core never looks at what is behind it
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: &CameraFrame);
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque output surface supplied by the caller when starting preview
///
/// Identity is by id: clones refer to the same target.
#[derive(Clone)]
pub struct OutputTarget {
    id: u64,
    sink: Arc<dyn FrameSink>,
}

impl OutputTarget {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            sink,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn present(&self, frame: &CameraFrame) {
        self.sink.present(frame);
    }
}

impl PartialEq for OutputTarget {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OutputTarget {}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTarget").field("id", &self.id).finish()
    }
}

/// Callback receiving every delivered preview frame
pub type PreviewCallback = Arc<dyn Fn(&CameraFrame) + Send + Sync>;

/// Advisory capture parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureParameters {
    pub preview_width: u32,
    pub preview_height: u32,
    pub frame_rate: u32,
}

impl Default for CaptureParameters {
    fn default() -> Self {
        Self {
            preview_width: capture::NOMINAL_WIDTH,
            preview_height: capture::NOMINAL_HEIGHT,
            frame_rate: capture::DEFAULT_FRAME_RATE,
        }
    }
}

/// Lifecycle of a capture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    Closed,
    Opened,
    PreviewRunning,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Closed => write!(f, "closed"),
            CaptureState::Opened => write!(f, "opened"),
            CaptureState::PreviewRunning => write!(f, "preview running"),
        }
    }
}

/// Generation of the capture API a sandboxed package called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureApi {
    /// Open-by-index API with preview callbacks
    Legacy,
    /// Session-based API opened by device id string
    SecondGeneration,
}
