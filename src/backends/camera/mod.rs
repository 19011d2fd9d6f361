// SPDX-License-Identifier: MPL-2.0

//! Capture handles handed to sandboxed packages
//!
//! When a sandboxed package opens a camera, [`CaptureFactory`] decides
//! whether it gets a synthetic handle fed from the active virtual source or
//! a handle relaying the host camera.
//!
//! # Architecture
//!
//! ```text
//!   acquire(package, api, device_id)
//!            │
//!            ▼
//! ┌─────────────────────┐  disabled / not capable / no hook / open failed
//! │   CaptureFactory    │ ─────────────────────────────────────────────┐
//! └──────────┬──────────┘                                              │
//!            │ synthetic                                               ▼
//!            ▼                                              ┌─────────────────────┐
//! ┌─────────────────────┐   start_playback   ┌─────────┐    │  RealCaptureHandle  │
//! │SyntheticCaptureHandle│ ────────────────► │ Source  │    │ (host camera relay) │
//! │  preview-push loop  │ ◄─ deliver_current │ Manager │    └─────────────────────┘
//! └──────────┬──────────┘                    └─────────┘
//!            ▼
//!   preview callback + output target
//! ```
//!
//! Synthetic handles are tracked in [`OpenHandles`] by device id until
//! released.

pub mod frame_loop;
mod real;
mod synthetic;
pub mod types;

pub use real::RealCaptureHandle;
pub use synthetic::SyntheticCaptureHandle;
pub use types::*;

use crate::backends::virtual_camera::{CameraSourceManager, FrameDecoder};
use crate::errors::Result;
use crate::sandbox::hooks::{HookEngine, HookPoint};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Camera handle as seen by a sandboxed package
///
/// Lifecycle: `Closed → Opened → PreviewRunning → Closed`.
pub trait CaptureHandle: Send {
    /// Open the handle for `device_id`
    ///
    /// # Returns
    /// * `Ok(())` - Handle is `Opened`
    /// * `Err(VcError::CaptureState)` - Handle is not closed or the device is taken
    fn open(&mut self, device_id: &str) -> Result<()>;

    /// Surface preview frames are rendered into
    fn set_target(&mut self, target: OutputTarget);

    /// Replace (or clear with `None`) the per-frame callback
    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>);

    /// Start delivering frames; a no-op while already running
    fn start_preview(&mut self) -> Result<()>;

    /// Stop delivering frames; no frame is delivered once this returns
    fn stop_preview(&mut self);

    fn parameters(&self) -> CaptureParameters;

    /// Advisory; implementations may ignore what they cannot honour
    fn set_parameters(&mut self, parameters: CaptureParameters);

    /// Stop preview if running and close the handle
    fn release(&mut self);

    fn state(&self) -> CaptureState;

    /// Device id the handle was opened with
    fn device_id(&self) -> Option<&str>;

    /// Whether frames come from the virtual source
    fn is_synthetic(&self) -> bool;
}

/// Table of device ids held by synthetic handles
#[derive(Debug, Clone, Default)]
pub struct OpenHandles {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl OpenHandles {
    /// Record `device_id` as held by `package`; `false` if already held
    pub fn claim(&self, device_id: &str, package: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(device_id) {
            return false;
        }
        inner.insert(device_id.to_string(), package.to_string());
        true
    }

    pub fn release(&self, device_id: &str) -> bool {
        self.inner.lock().unwrap().remove(device_id).is_some()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(device_id)
    }

    /// Package holding `device_id`
    pub fn owner(&self, device_id: &str) -> Option<String> {
        self.inner.lock().unwrap().get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decides between synthetic and real handles
pub struct CaptureFactory {
    hooks: Arc<HookEngine>,
    sources: Arc<CameraSourceManager>,
    decoder: Arc<dyn FrameDecoder>,
    open_handles: OpenHandles,
    enabled: AtomicBool,
}

impl CaptureFactory {
    pub fn new(
        hooks: Arc<HookEngine>,
        sources: Arc<CameraSourceManager>,
        decoder: Arc<dyn FrameDecoder>,
        enabled: bool,
    ) -> Self {
        Self {
            hooks,
            sources,
            decoder,
            open_handles: OpenHandles::default(),
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Globally enable or disable virtualization
    pub fn set_enabled(&self, enabled: bool) {
        info!(enabled, "Capture virtualization toggled");
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> &OpenHandles {
        &self.open_handles
    }

    /// Hand `package` an opened capture handle for `device_id`
    ///
    /// Never fails: every reason not to virtualize falls back to a real
    /// handle.
    pub fn acquire(&self, package: &str, api: CaptureApi, device_id: &str) -> Box<dyn CaptureHandle> {
        if let Some(reason) = self.fallback_reason(package, api) {
            debug!(package, ?api, reason, "Handing out real capture handle");
            return self.real_handle(device_id);
        }

        let mut handle = SyntheticCaptureHandle::new(
            package,
            api,
            Arc::clone(&self.sources),
            self.open_handles.clone(),
        );
        match handle.open(device_id) {
            Ok(()) => {
                info!(package, ?api, device_id, "Handing out synthetic capture handle");
                Box::new(handle)
            }
            Err(e) => {
                warn!(package, device_id, error = %e, "Synthetic handle failed to open, falling back");
                self.real_handle(device_id)
            }
        }
    }

    fn fallback_reason(&self, package: &str, api: CaptureApi) -> Option<&'static str> {
        if !self.is_enabled() {
            return Some("virtualization disabled");
        }
        if !self.hooks.is_camera_capable(package) {
            return Some("package not camera capable");
        }
        if !self.hooks.is_hooked(package, required_hook(api)) {
            return Some("capture hook not registered");
        }
        None
    }

    fn real_handle(&self, device_id: &str) -> Box<dyn CaptureHandle> {
        let mut handle = RealCaptureHandle::new(Arc::clone(&self.decoder));
        if let Err(e) = handle.open(device_id) {
            warn!(device_id, error = %e, "Real capture handle failed to open");
        }
        Box::new(handle)
    }
}

/// Hook a package needs for `api` to be virtualized
pub fn required_hook(api: CaptureApi) -> HookPoint {
    match api {
        CaptureApi::Legacy => HookPoint::CaptureOpen,
        CaptureApi::SecondGeneration => HookPoint::SecondGenerationCaptureOpen,
    }
}
