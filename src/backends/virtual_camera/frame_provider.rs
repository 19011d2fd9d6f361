// SPDX-License-Identifier: GPL-3.0-only

//! Current-frame store with sequence pacing and live relay
//!
//! Three stores may be populated at once: a static frame, a sequence with a
//! cursor, and the last live frame. [`FrameProvider::current_frame`] reads
//! them in that order of precedence, and [`FrameProvider::state`] is derived
//! from the same rule.
//!
//! ```text
//!              set_static_frame            start_sequence            push_live_frame
//!   Idle ────────────────────► StaticFrame  SequencePlayback ◄──────  LiveRelay
//!    ▲   clear_static_frame        │              │  stop_playback        │
//!    └─────────────────────────────┴──────────────┴───────────────────────┘
//! ```
//!
//! Sessions ([`FrameProvider::start`] / [`FrameProvider::stop`]) load a
//! prepared source against an output target. Session transitions and
//! [`FrameProvider::deliver_current`] share one gate, so once a stop or a
//! swap returns, no frame of the previous session can be delivered.

use super::file_source::{LiveCapture, PreparedSource};
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction};
use crate::backends::camera::types::{CameraFrame, OutputTarget};
use crate::constants::capture;
use crate::errors::{Result, VcError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Observable provider state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderState {
    Idle,
    StaticFrame,
    SequencePlayback,
    LiveRelay,
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub starts: u64,
    pub stops: u64,
}

#[derive(Debug)]
struct SequenceState {
    frames: Vec<CameraFrame>,
    index: usize,
    rate: u32,
}

#[derive(Debug, Default)]
struct FrameStore {
    static_frame: Option<CameraFrame>,
    sequence: Option<SequenceState>,
    live_frame: Option<CameraFrame>,
}

impl FrameStore {
    fn current(&self) -> Option<CameraFrame> {
        if let Some(frame) = &self.static_frame {
            return Some(frame.clone());
        }
        if let Some(seq) = &self.sequence {
            return seq.frames.get(seq.index).cloned();
        }
        self.live_frame.clone()
    }

    fn state(&self) -> ProviderState {
        if self.static_frame.is_some() {
            ProviderState::StaticFrame
        } else if self.sequence.is_some() {
            ProviderState::SequencePlayback
        } else if self.live_frame.is_some() {
            ProviderState::LiveRelay
        } else {
            ProviderState::Idle
        }
    }
}

/// What a session put into the stores, so stop clears only that
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loaded {
    Still,
    Sequence,
    Live,
}

struct Session {
    target: Option<OutputTarget>,
    loaded: Loaded,
    relay: Option<CaptureLoopController>,
}

/// Produces the current frame for whichever source is active
pub struct FrameProvider {
    store: Arc<Mutex<FrameStore>>,
    pacer: Mutex<Option<CaptureLoopController>>,
    /// Delivery gate; held across session transitions and deliveries
    session: Mutex<Option<Session>>,
    stats: Mutex<ProviderStats>,
    frame_rate: u32,
}

impl Default for FrameProvider {
    fn default() -> Self {
        Self::new(capture::DEFAULT_FRAME_RATE)
    }
}

impl FrameProvider {
    /// Provider whose consumers deliver at `frame_rate`
    pub fn new(frame_rate: u32) -> Self {
        Self {
            store: Arc::new(Mutex::new(FrameStore::default())),
            pacer: Mutex::new(None),
            session: Mutex::new(None),
            stats: Mutex::new(ProviderStats::default()),
            frame_rate: frame_rate.clamp(1, capture::MAX_FRAME_RATE),
        }
    }

    /// Delivery rate for consumers pushing frames
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn state(&self) -> ProviderState {
        self.store.lock().unwrap().state()
    }

    /// Frame to show now, by precedence static > sequence > live
    pub fn current_frame(&self) -> Option<CameraFrame> {
        self.store.lock().unwrap().current()
    }

    /// Hold `frame` until explicitly cleared
    pub fn set_static_frame(&self, frame: CameraFrame) {
        debug!(width = frame.width, height = frame.height, "Static frame set");
        self.store.lock().unwrap().static_frame = Some(frame);
    }

    pub fn clear_static_frame(&self) {
        debug!("Static frame cleared");
        self.store.lock().unwrap().static_frame = None;
    }

    /// Store the most recent frame from a live source
    pub fn push_live_frame(&self, frame: CameraFrame) {
        self.store.lock().unwrap().live_frame = Some(frame);
    }

    pub fn clear_live_frame(&self) {
        self.store.lock().unwrap().live_frame = None;
    }

    /// Play `frames` in a loop, advancing `rate` times per second
    ///
    /// Rates above [`capture::MAX_FRAME_RATE`] advance at that rate.
    ///
    /// Replaces any running sequence. The cursor starts at index 0.
    pub fn start_sequence(&self, frames: Vec<CameraFrame>, rate: u32) -> Result<()> {
        check_sequence(&frames, rate)?;
        self.stop_playback();

        info!(frames = frames.len(), rate, "Starting sequence playback");
        self.store.lock().unwrap().sequence = Some(SequenceState {
            frames,
            index: 0,
            rate,
        });

        let store = Arc::clone(&self.store);
        let mut first_tick = true;
        let pacer = CaptureLoopController::start_paced(
            "sequence-pacer",
            capture::frame_interval(rate),
            move || {
                // The first tick fires immediately; index 0 must be shown for a full period
                if std::mem::take(&mut first_tick) {
                    return LoopAction::Continue;
                }
                let mut store = store.lock().unwrap();
                match store.sequence.as_mut() {
                    Some(seq) => {
                        seq.index = (seq.index + 1) % seq.frames.len();
                        LoopAction::Continue
                    }
                    None => LoopAction::Stop,
                }
            },
        );
        *self.pacer.lock().unwrap() = Some(pacer);
        Ok(())
    }

    /// Cancel pacing and drop sequence state; a static frame survives
    pub fn stop_playback(&self) {
        let pacer = self.pacer.lock().unwrap().take();
        if let Some(mut pacer) = pacer {
            pacer.stop();
        }
        if self.store.lock().unwrap().sequence.take().is_some() {
            debug!("Sequence playback stopped");
        }
    }

    /// Cursor position and rate of the running sequence
    pub fn sequence_position(&self) -> Option<(usize, u32)> {
        self.store
            .lock()
            .unwrap()
            .sequence
            .as_ref()
            .map(|s| (s.index, s.rate))
    }

    /// Load `source` as a new session pushing to `target`
    ///
    /// A running session is stopped first.
    pub fn start(&self, source: PreparedSource, target: Option<OutputTarget>) -> Result<()> {
        check_prepared(&source)?;
        let mut session = self.session.lock().unwrap();
        self.stop_locked(&mut session);
        self.start_locked(&mut session, source, target)
    }

    /// Stop the running session, then start `source` with the same target
    ///
    /// The source is checked before anything is stopped, so a bad source
    /// leaves the running session untouched.
    pub fn swap(&self, source: PreparedSource) -> Result<()> {
        check_prepared(&source)?;
        let mut session = self.session.lock().unwrap();
        let target = session.as_ref().and_then(|s| s.target.clone());
        self.stop_locked(&mut session);
        self.start_locked(&mut session, source, target)
    }

    /// Stop the running session and clear what it loaded
    pub fn stop(&self) {
        let mut session = self.session.lock().unwrap();
        self.stop_locked(&mut session);
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Target of the running session
    pub fn output_target(&self) -> Option<OutputTarget> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| s.target.clone())
    }

    pub fn stats(&self) -> ProviderStats {
        *self.stats.lock().unwrap()
    }

    /// Run `deliver` on the current frame while holding the delivery gate
    ///
    /// Returns whether a frame was delivered. `deliver` must not call back
    /// into session transitions of this provider.
    pub fn deliver_current<F>(&self, deliver: F) -> bool
    where
        F: FnOnce(&CameraFrame),
    {
        let session = self.session.lock().unwrap();
        if session.is_none() {
            return false;
        }
        match self.current_frame() {
            Some(frame) => {
                deliver(&frame);
                true
            }
            None => false,
        }
    }

    fn start_locked(
        &self,
        session: &mut Option<Session>,
        source: PreparedSource,
        target: Option<OutputTarget>,
    ) -> Result<()> {
        let (loaded, relay) = match source {
            PreparedSource::Still(frame) => {
                self.set_static_frame(frame);
                (Loaded::Still, None)
            }
            PreparedSource::Sequence { frames, rate } => {
                self.start_sequence(frames, rate)?;
                (Loaded::Sequence, None)
            }
            PreparedSource::Live(capture) => (Loaded::Live, capture.map(|c| self.start_relay(c))),
        };

        info!(target_id = ?target.as_ref().map(|t| t.id()), ?loaded, "Frame provider started");
        *session = Some(Session {
            target,
            loaded,
            relay,
        });
        self.stats.lock().unwrap().starts += 1;
        Ok(())
    }

    fn stop_locked(&self, session: &mut Option<Session>) {
        let Some(mut running) = session.take() else {
            return;
        };

        if let Some(mut relay) = running.relay.take() {
            relay.stop();
        }
        match running.loaded {
            Loaded::Still => self.clear_static_frame(),
            Loaded::Sequence => self.stop_playback(),
            Loaded::Live => self.clear_live_frame(),
        }

        self.stats.lock().unwrap().stops += 1;
        info!(loaded = ?running.loaded, "Frame provider stopped");
    }

    fn start_relay(&self, mut capture: Box<dyn LiveCapture>) -> CaptureLoopController {
        let store = Arc::clone(&self.store);
        CaptureLoopController::start("live-relay", move || {
            if let Some(frame) = capture.next_frame(capture::LIVE_PULL_TIMEOUT) {
                store.lock().unwrap().live_frame = Some(frame);
            }
            LoopAction::Continue
        })
    }
}

impl Drop for FrameProvider {
    fn drop(&mut self) {
        self.stop();
        self.stop_playback();
    }
}

fn check_sequence(frames: &[CameraFrame], rate: u32) -> Result<()> {
    if frames.is_empty() {
        return Err(VcError::SourceInvalid("sequence has no frames".into()));
    }
    if rate == 0 {
        return Err(VcError::SourceInvalid("sequence rate must be positive".into()));
    }
    Ok(())
}

fn check_prepared(source: &PreparedSource) -> Result<()> {
    match source {
        PreparedSource::Sequence { frames, rate } => check_sequence(frames, *rate),
        _ => Ok(()),
    }
}
