// SPDX-License-Identifier: GPL-3.0-only

//! Capture handle fed from the active virtual camera source

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::{
    CaptureApi, CaptureParameters, CaptureState, OutputTarget, PreviewCallback,
};
use super::{CaptureHandle, OpenHandles};
use crate::backends::virtual_camera::CameraSourceManager;
use crate::constants::capture;
use crate::errors::{Result, VcError};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Synthetic handle returned to virtualized packages
///
/// Preview frames come from the shared [`crate::backends::virtual_camera::FrameProvider`]
/// and are pushed on a `preview-push` loop, independent of the caller.
pub struct SyntheticCaptureHandle {
    package: String,
    api: CaptureApi,
    device_id: Option<String>,
    state: CaptureState,
    target: Option<OutputTarget>,
    /// Shared with the push loop so callbacks can change while running
    callback: Arc<Mutex<Option<PreviewCallback>>>,
    sources: Arc<CameraSourceManager>,
    open_handles: OpenHandles,
    pusher: Option<CaptureLoopController>,
}

impl SyntheticCaptureHandle {
    pub fn new(
        package: &str,
        api: CaptureApi,
        sources: Arc<CameraSourceManager>,
        open_handles: OpenHandles,
    ) -> Self {
        Self {
            package: package.to_string(),
            api,
            device_id: None,
            state: CaptureState::Closed,
            target: None,
            callback: Arc::new(Mutex::new(None)),
            sources,
            open_handles,
            pusher: None,
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn api(&self) -> CaptureApi {
        self.api
    }
}

impl CaptureHandle for SyntheticCaptureHandle {
    fn open(&mut self, device_id: &str) -> Result<()> {
        if self.state != CaptureState::Closed {
            return Err(VcError::CaptureState {
                state: "open",
                operation: "open",
            });
        }
        if !self.open_handles.claim(device_id, &self.package) {
            return Err(VcError::CaptureState {
                state: "held by another handle",
                operation: "open",
            });
        }

        self.device_id = Some(device_id.to_string());
        self.state = CaptureState::Opened;
        debug!(package = %self.package, device_id, "Synthetic capture opened");
        Ok(())
    }

    fn set_target(&mut self, target: OutputTarget) {
        if self.state == CaptureState::PreviewRunning {
            debug!(package = %self.package, "Target change applies from the next preview start");
        }
        self.target = Some(target);
    }

    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    fn start_preview(&mut self) -> Result<()> {
        match self.state {
            CaptureState::PreviewRunning => {
                debug!(package = %self.package, "Preview already running");
                return Ok(());
            }
            CaptureState::Closed => {
                return Err(VcError::CaptureState {
                    state: "closed",
                    operation: "start preview",
                });
            }
            CaptureState::Opened => {}
        }

        self.sources.start_playback(self.target.clone())?;

        let provider = self.sources.provider();
        let callback = Arc::clone(&self.callback);
        let target = self.target.clone();
        let period = capture::frame_interval(provider.frame_rate());

        self.pusher = Some(CaptureLoopController::start_paced(
            "preview-push",
            period,
            move || {
                provider.deliver_current(|frame| {
                    if let Some(callback) = callback.lock().unwrap().as_ref() {
                        callback(frame);
                    }
                    if let Some(target) = &target {
                        target.present(frame);
                    }
                });
                LoopAction::Continue
            },
        ));

        self.state = CaptureState::PreviewRunning;
        info!(package = %self.package, device_id = ?self.device_id, "Synthetic preview started");
        Ok(())
    }

    fn stop_preview(&mut self) {
        if self.state != CaptureState::PreviewRunning {
            return;
        }
        // Join the pusher first so nothing is delivered after we return
        if let Some(mut pusher) = self.pusher.take() {
            pusher.stop();
        }
        self.sources.stop_playback();
        self.state = CaptureState::Opened;
        info!(package = %self.package, "Synthetic preview stopped");
    }

    fn parameters(&self) -> CaptureParameters {
        CaptureParameters::default()
    }

    fn set_parameters(&mut self, parameters: CaptureParameters) {
        debug!(package = %self.package, ?parameters, "Ignoring parameters on synthetic capture");
    }

    fn release(&mut self) {
        self.stop_preview();
        if let Some(device_id) = self.device_id.take() {
            self.open_handles.release(&device_id);
            debug!(package = %self.package, device_id, "Synthetic capture released");
        }
        self.state = CaptureState::Closed;
    }

    fn state(&self) -> CaptureState {
        self.state
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn is_synthetic(&self) -> bool {
        true
    }
}

impl Drop for SyntheticCaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}
