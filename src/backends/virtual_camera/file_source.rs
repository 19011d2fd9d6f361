// SPDX-License-Identifier: GPL-3.0-only

//! Decoding camera sources into frames
//!
//! The core treats decoding as a collaborator behind [`FrameDecoder`]. The
//! default [`MediaDecoder`] handles stills, animated GIFs and directories of
//! images with the `image` crate. With the `gstreamer` feature it also
//! decodes video files, network URIs and the host camera.
//!
//! ```text
//!   StaticImage ──► image::open ──► resize ──────────► PreparedSource::Still
//!   LocalVideo  ──► GIF frames / image dir / video ──► PreparedSource::Sequence
//!   Network     ──► uridecodebin ! appsink ──────────► PreparedSource::Live
//!   RealDevice  ──► autovideosrc ! appsink ──────────► PreparedSource::Live
//! ```

use super::source::{CameraSource, SourceKind};
use crate::backends::camera::types::CameraFrame;
use crate::constants::{capture, file_formats};
use crate::errors::{Result, VcError};
use image::AnimationDecoder;
use image::imageops::FilterType;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of frames pushed asynchronously, such as a camera or a stream
pub trait LiveCapture: Send {
    /// Next frame, waiting at most `timeout`; `None` when nothing arrived
    fn next_frame(&mut self, timeout: Duration) -> Option<CameraFrame>;
}

/// A source decoded and ready to hand to the frame provider
pub enum PreparedSource {
    /// A single image held unconditionally
    Still(CameraFrame),
    /// A finite, looped sequence played at `rate` frames per second
    Sequence { frames: Vec<CameraFrame>, rate: u32 },
    /// Frames relayed as they arrive; `None` when no capture could be opened
    Live(Option<Box<dyn LiveCapture>>),
}

impl std::fmt::Debug for PreparedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreparedSource::Still(frame) => f.debug_tuple("Still").field(frame).finish(),
            PreparedSource::Sequence { frames, rate } => f
                .debug_struct("Sequence")
                .field("frames", &frames.len())
                .field("rate", rate)
                .finish(),
            PreparedSource::Live(capture) => f
                .debug_tuple("Live")
                .field(&capture.as_ref().map(|_| "capture"))
                .finish(),
        }
    }
}

/// Turns a validated [`CameraSource`] into frames
pub trait FrameDecoder: Send + Sync {
    fn prepare(&self, source: &CameraSource) -> Result<PreparedSource>;

    /// Open the host camera for relaying, if one is available
    fn open_live(&self) -> Option<Box<dyn LiveCapture>>;
}

/// Default decoder
#[derive(Debug, Clone)]
pub struct MediaDecoder {
    width: u32,
    height: u32,
    rate: u32,
}

impl Default for MediaDecoder {
    fn default() -> Self {
        Self::new(
            capture::NOMINAL_WIDTH,
            capture::NOMINAL_HEIGHT,
            capture::DEFAULT_FRAME_RATE,
        )
    }
}

impl MediaDecoder {
    /// Decoder scaling every frame to `width`x`height`
    pub fn new(width: u32, height: u32, rate: u32) -> Self {
        Self {
            width,
            height,
            rate: rate.max(1),
        }
    }

    fn prepare_local_video(&self, path: &Path) -> Result<PreparedSource> {
        if path.is_dir() {
            let frames = load_image_sequence(path, self.width, self.height)?;
            return Ok(PreparedSource::Sequence {
                frames,
                rate: self.rate,
            });
        }

        let extension = extension_of(path);
        if file_formats::is_animation_extension(&extension) {
            let (frames, rate) = load_animation(path, self.width, self.height)?;
            Ok(PreparedSource::Sequence {
                frames,
                rate: rate.unwrap_or(self.rate),
            })
        } else if file_formats::is_image_extension(&extension) {
            let frame = load_image_as_frame(path, self.width, self.height)?;
            Ok(PreparedSource::Sequence {
                frames: vec![frame],
                rate: self.rate,
            })
        } else if file_formats::is_video_extension(&extension) {
            self.decode_video(path)
        } else {
            Err(VcError::SourceInvalid(format!(
                "Unsupported file format: {}",
                extension
            )))
        }
    }

    #[cfg(feature = "gstreamer")]
    fn decode_video(&self, path: &Path) -> Result<PreparedSource> {
        let frames = gst_pipeline::decode_video_frames(path, self.width, self.height, self.rate)?;
        Ok(PreparedSource::Sequence {
            frames,
            rate: self.rate,
        })
    }

    #[cfg(not(feature = "gstreamer"))]
    fn decode_video(&self, path: &Path) -> Result<PreparedSource> {
        Err(VcError::SourceInvalid(format!(
            "{}: video decoding requires the gstreamer feature",
            path.display()
        )))
    }

    #[cfg(feature = "gstreamer")]
    fn open_stream(&self, url: &str) -> Result<PreparedSource> {
        let capture = gst_pipeline::GstLiveCapture::open_uri(url, self.width, self.height)?;
        Ok(PreparedSource::Live(Some(Box::new(capture))))
    }

    #[cfg(not(feature = "gstreamer"))]
    fn open_stream(&self, url: &str) -> Result<PreparedSource> {
        Err(VcError::SourceInvalid(format!(
            "{}: network streams require the gstreamer feature",
            url
        )))
    }
}

impl FrameDecoder for MediaDecoder {
    fn prepare(&self, source: &CameraSource) -> Result<PreparedSource> {
        debug!(kind = %source.kind, locator = %source.locator, "Preparing camera source");
        match source.kind {
            SourceKind::RealDevice => Ok(PreparedSource::Live(self.open_live())),
            SourceKind::StaticImage => {
                let frame = load_image_as_frame(Path::new(&source.locator), self.width, self.height)?;
                Ok(PreparedSource::Still(frame))
            }
            SourceKind::LocalVideo => self.prepare_local_video(Path::new(&source.locator)),
            SourceKind::NetworkStream => self.open_stream(&source.locator),
        }
    }

    #[cfg(feature = "gstreamer")]
    fn open_live(&self) -> Option<Box<dyn LiveCapture>> {
        match gst_pipeline::GstLiveCapture::open_device(self.width, self.height) {
            Ok(capture) => Some(Box::new(capture)),
            Err(e) => {
                warn!(error = %e, "Host camera unavailable");
                None
            }
        }
    }

    #[cfg(not(feature = "gstreamer"))]
    fn open_live(&self) -> Option<Box<dyn LiveCapture>> {
        debug!("Built without gstreamer, no host camera relay");
        None
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn decode_error(path: &Path, e: impl std::fmt::Display) -> VcError {
    VcError::SourceInvalid(format!("Failed to decode '{}': {}", path.display(), e))
}

/// Load an image file scaled to `width`x`height`
pub fn load_image_as_frame(path: &Path, width: u32, height: u32) -> Result<CameraFrame> {
    info!(path = %path.display(), "Loading image file");

    let img = image::open(path).map_err(|e| decode_error(path, e))?;
    let rgba = img.resize_exact(width, height, FilterType::Triangle).to_rgba8();

    CameraFrame::from_rgba(rgba.width(), rgba.height(), rgba.into_raw())
        .ok_or_else(|| decode_error(path, "unexpected buffer size"))
}

/// Load all frames of an animated GIF
///
/// Returns the frames and, when the first frame carries a usable delay,
/// the rate it implies.
pub fn load_animation(path: &Path, width: u32, height: u32) -> Result<(Vec<CameraFrame>, Option<u32>)> {
    info!(path = %path.display(), "Loading animation");

    let file = File::open(path).map_err(|e| decode_error(path, e))?;
    let decoder = image::codecs::gif::GifDecoder::new(BufReader::new(file))
        .map_err(|e| decode_error(path, e))?;

    let mut frames = Vec::new();
    let mut rate = None;
    for (index, frame) in decoder.into_frames().enumerate() {
        if index >= capture::MAX_SEQUENCE_FRAMES {
            warn!(path = %path.display(), "Animation truncated");
            break;
        }
        let frame = frame.map_err(|e| decode_error(path, e))?;
        if rate.is_none() {
            let (numer, denom) = frame.delay().numer_denom_ms();
            if numer > 0 {
                rate = Some(((1000 * denom) / numer).clamp(1, 60));
            }
        }
        let scaled = image::imageops::resize(frame.buffer(), width, height, FilterType::Triangle);
        if let Some(frame) = CameraFrame::from_rgba(width, height, scaled.into_raw()) {
            frames.push(frame);
        }
    }

    if frames.is_empty() {
        return Err(decode_error(path, "animation has no frames"));
    }
    info!(frames = frames.len(), ?rate, "Animation loaded");
    Ok((frames, rate))
}

/// Load every image in a directory, ordered by file name
pub fn load_image_sequence(dir: &Path, width: u32, height: u32) -> Result<Vec<CameraFrame>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| decode_error(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && file_formats::is_image_extension(&extension_of(p)))
        .collect();
    paths.sort();
    paths.truncate(capture::MAX_SEQUENCE_FRAMES);

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        match load_image_as_frame(path, width, height) {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping undecodable image"),
        }
    }

    if frames.is_empty() {
        return Err(VcError::SourceInvalid(format!(
            "{} contains no decodable images",
            dir.display()
        )));
    }
    Ok(frames)
}

#[cfg(feature = "gstreamer")]
mod gst_pipeline {
    use super::*;
    use gstreamer::prelude::*;

    fn gst_error(context: &str, e: impl std::fmt::Display) -> VcError {
        VcError::SourceInvalid(format!("{}: {}", context, e))
    }

    /// Build a pipeline ending in an appsink named `sink`
    fn build(description: &str) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
        gstreamer::init().map_err(|e| gst_error("GStreamer init failed", e))?;

        let pipeline = gstreamer::parse::launch(description)
            .map_err(|e| gst_error("Failed to create pipeline", e))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| VcError::SourceInvalid("Failed to downcast to Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| VcError::SourceInvalid("Failed to find appsink".into()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| VcError::SourceInvalid("Failed to downcast to AppSink".into()))?;

        Ok((pipeline, appsink))
    }

    fn caps(width: u32, height: u32) -> String {
        format!(
            "videoconvert ! videoscale ! video/x-raw,format=RGBA,width={},height={}",
            width, height
        )
    }

    fn sample_to_frame(sample: &gstreamer::Sample, width: u32, height: u32) -> Option<CameraFrame> {
        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;
        CameraFrame::from_rgba(width, height, map.as_slice().to_vec())
    }

    /// Decode a whole video into memory at `rate` frames per second
    pub fn decode_video_frames(
        path: &Path,
        width: u32,
        height: u32,
        rate: u32,
    ) -> Result<Vec<CameraFrame>> {
        info!(path = %path.display(), "Decoding video into sequence");

        let description = format!(
            "filesrc location=\"{}\" ! decodebin ! videorate ! {},framerate={}/1 ! \
             appsink name=sink sync=false",
            path.to_string_lossy(),
            caps(width, height),
            rate
        );
        let (pipeline, appsink) = build(&description)?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| gst_error("Failed to start pipeline", format!("{:?}", e)))?;

        let mut frames = Vec::new();
        while frames.len() < capture::MAX_SEQUENCE_FRAMES {
            let Some(sample) = appsink.try_pull_sample(gstreamer::ClockTime::from_seconds(
                capture::DECODE_TIMEOUT_SECS,
            )) else {
                break;
            };
            if let Some(frame) = sample_to_frame(&sample, width, height) {
                frames.push(frame);
            }
        }
        let _ = pipeline.set_state(gstreamer::State::Null);

        if frames.is_empty() {
            return Err(decode_error(path, "no video frames decoded"));
        }
        info!(frames = frames.len(), "Video decoded");
        Ok(frames)
    }

    /// Frames pulled from a running pipeline
    pub struct GstLiveCapture {
        pipeline: gstreamer::Pipeline,
        appsink: gstreamer_app::AppSink,
        width: u32,
        height: u32,
    }

    impl GstLiveCapture {
        fn start(description: &str, width: u32, height: u32) -> Result<Self> {
            let (pipeline, appsink) = build(description)?;
            pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|e| gst_error("Failed to start pipeline", format!("{:?}", e)))?;
            Ok(Self {
                pipeline,
                appsink,
                width,
                height,
            })
        }

        pub fn open_uri(url: &str, width: u32, height: u32) -> Result<Self> {
            info!(url, "Opening network stream");
            let description = format!(
                "uridecodebin uri=\"{}\" ! {} ! appsink name=sink max-buffers=1 drop=true sync=true",
                url,
                caps(width, height)
            );
            Self::start(&description, width, height)
        }

        pub fn open_device(width: u32, height: u32) -> Result<Self> {
            info!("Opening host camera");
            let description = format!(
                "autovideosrc ! {} ! appsink name=sink max-buffers=1 drop=true sync=false",
                caps(width, height)
            );
            Self::start(&description, width, height)
        }
    }

    impl LiveCapture for GstLiveCapture {
        fn next_frame(&mut self, timeout: Duration) -> Option<CameraFrame> {
            let sample = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64))?;
            sample_to_frame(&sample, self.width, self.height)
        }
    }

    impl Drop for GstLiveCapture {
        fn drop(&mut self) {
            let _ = self.pipeline.set_state(gstreamer::State::Null);
        }
    }
}
