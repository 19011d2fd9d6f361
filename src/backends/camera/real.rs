// SPDX-License-Identifier: GPL-3.0-only

//! Capture handle relaying the host camera

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::{CaptureParameters, CaptureState, OutputTarget, PreviewCallback};
use super::CaptureHandle;
use crate::backends::virtual_camera::FrameDecoder;
use crate::constants::capture;
use crate::errors::{Result, VcError};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Pass-through handle for packages that are not virtualized
///
/// Frames come from [`FrameDecoder::open_live`]. When no host camera is
/// available the handle still opens and runs, it just never delivers.
pub struct RealCaptureHandle {
    decoder: Arc<dyn FrameDecoder>,
    device_id: Option<String>,
    state: CaptureState,
    target: Option<OutputTarget>,
    callback: Arc<Mutex<Option<PreviewCallback>>>,
    parameters: CaptureParameters,
    relay: Option<CaptureLoopController>,
}

impl RealCaptureHandle {
    pub fn new(decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            decoder,
            device_id: None,
            state: CaptureState::Closed,
            target: None,
            callback: Arc::new(Mutex::new(None)),
            parameters: CaptureParameters::default(),
            relay: None,
        }
    }
}

impl CaptureHandle for RealCaptureHandle {
    fn open(&mut self, device_id: &str) -> Result<()> {
        if self.state != CaptureState::Closed {
            return Err(VcError::CaptureState {
                state: "open",
                operation: "open",
            });
        }
        self.device_id = Some(device_id.to_string());
        self.state = CaptureState::Opened;
        Ok(())
    }

    fn set_target(&mut self, target: OutputTarget) {
        self.target = Some(target);
    }

    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    fn start_preview(&mut self) -> Result<()> {
        match self.state {
            CaptureState::PreviewRunning => return Ok(()),
            CaptureState::Closed => {
                return Err(VcError::CaptureState {
                    state: "closed",
                    operation: "start preview",
                });
            }
            CaptureState::Opened => {}
        }

        match self.decoder.open_live() {
            Some(mut live) => {
                let callback = Arc::clone(&self.callback);
                let target = self.target.clone();
                self.relay = Some(CaptureLoopController::start("real-relay", move || {
                    if let Some(frame) = live.next_frame(capture::LIVE_PULL_TIMEOUT) {
                        if let Some(callback) = callback.lock().unwrap().as_ref() {
                            callback(&frame);
                        }
                        if let Some(target) = &target {
                            target.present(&frame);
                        }
                    }
                    LoopAction::Continue
                }));
                info!(device_id = ?self.device_id, "Real capture preview started");
            }
            None => warn!(device_id = ?self.device_id, "No host camera, preview will stay dark"),
        }

        self.state = CaptureState::PreviewRunning;
        Ok(())
    }

    fn stop_preview(&mut self) {
        if self.state != CaptureState::PreviewRunning {
            return;
        }
        if let Some(mut relay) = self.relay.take() {
            relay.stop();
        }
        self.state = CaptureState::Opened;
        debug!(device_id = ?self.device_id, "Real capture preview stopped");
    }

    fn parameters(&self) -> CaptureParameters {
        self.parameters
    }

    fn set_parameters(&mut self, parameters: CaptureParameters) {
        self.parameters = parameters;
    }

    fn release(&mut self) {
        self.stop_preview();
        self.device_id = None;
        self.state = CaptureState::Closed;
    }

    fn state(&self) -> CaptureState {
        self.state
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn is_synthetic(&self) -> bool {
        false
    }
}

impl Drop for RealCaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}
