// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera sources feeding synthetic capture handles
//!
//! [`CameraSourceManager`] owns the active [`CameraSource`] and is the only
//! writer of the [`FrameProvider`] session. Capture handles start and stop
//! playback through it; switching sources is validate-then-swap.
//!
//! Playback is shared. The first consumer starts the provider session, later
//! ones join it, and the session stops when the last consumer leaves.
//!
//! # Architecture
//!
//! ```text
//!   set_source(source)
//!        │ validate (exists / readable / non-empty URL)
//!        ▼
//! ┌──────────────────┐   prepare    ┌──────────────────┐
//! │ CameraSource     │ ───────────► │ FrameDecoder     │
//! │ Manager          │              │ (image/GStreamer)│
//! └──────────────────┘              └──────────────────┘
//!        │ swap (one stop, one start, same target)
//!        ▼
//! ┌──────────────────┐  deliver_current  ┌──────────────────┐
//! │ FrameProvider    │ ────────────────► │ Synthetic handle │ ──► callback / target
//! └──────────────────┘                   └──────────────────┘
//! ```

mod file_source;
mod frame_provider;
mod source;

pub use file_source::{
    FrameDecoder, LiveCapture, MediaDecoder, PreparedSource, load_animation,
    load_image_as_frame, load_image_sequence,
};
pub use frame_provider::{FrameProvider, ProviderState, ProviderStats};
pub use source::{CameraSource, SourceKind};

use crate::backends::camera::types::OutputTarget;
use crate::constants::settings_keys;
use crate::errors::Result;
use crate::settings::SettingsStore;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

struct Playback {
    source: CameraSource,
    /// Consumers currently sharing the provider session
    consumers: usize,
}

/// Owner of the active camera source
pub struct CameraSourceManager {
    /// The lock also serializes source and playback transitions
    playback: Mutex<Playback>,
    settings: Arc<dyn SettingsStore>,
    provider: Arc<FrameProvider>,
    decoder: Arc<dyn FrameDecoder>,
}

impl CameraSourceManager {
    /// Create the manager, restoring the last persisted source
    ///
    /// A persisted source that no longer validates falls back to the real
    /// device.
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        provider: Arc<FrameProvider>,
        decoder: Arc<dyn FrameDecoder>,
    ) -> Self {
        let restored = restore_source(settings.as_ref());
        info!(kind = %restored.kind, locator = %restored.locator, "Camera source restored");
        Self {
            playback: Mutex::new(Playback {
                source: restored,
                consumers: 0,
            }),
            settings,
            provider,
            decoder,
        }
    }

    pub fn provider(&self) -> Arc<FrameProvider> {
        Arc::clone(&self.provider)
    }

    pub fn active_source(&self) -> CameraSource {
        self.playback.lock().unwrap().source.clone()
    }

    /// Validate `source` and make it active
    ///
    /// On any failure the previous source stays active and playback is not
    /// touched. While playback is running the new source is decoded first,
    /// then the provider is stopped once and started once against the same
    /// output target.
    pub fn set_source(&self, source: CameraSource) -> Result<()> {
        let validated = source.validate().inspect_err(|e| {
            warn!(kind = %source.kind, locator = %source.locator, error = %e, "Rejected camera source");
        })?;

        let mut playback = self.playback.lock().unwrap();
        if self.provider.is_running() {
            let prepared = self.decoder.prepare(&validated).inspect_err(|e| {
                warn!(kind = %validated.kind, error = %e, "Camera source failed to decode");
            })?;
            self.provider.swap(prepared)?;
            debug!("Playback switched to new source");
        }

        info!(kind = %validated.kind, locator = %validated.locator, "Camera source changed");
        self.persist(&validated);
        playback.source = validated;
        Ok(())
    }

    /// Join playback of the active source
    ///
    /// The first consumer starts the provider session pushing to `target`.
    /// While a session is running, further consumers share it and `target`
    /// is left as it was.
    pub fn start_playback(&self, target: Option<OutputTarget>) -> Result<()> {
        let mut playback = self.playback.lock().unwrap();
        if playback.consumers > 0 && self.provider.is_running() {
            playback.consumers += 1;
            debug!(consumers = playback.consumers, "Joined running playback");
            return Ok(());
        }

        let prepared = self.decoder.prepare(&playback.source)?;
        self.provider.start(prepared, target)?;
        playback.consumers += 1;
        Ok(())
    }

    /// Leave playback; the session stops when the last consumer leaves
    pub fn stop_playback(&self) {
        let mut playback = self.playback.lock().unwrap();
        match playback.consumers {
            0 => debug!("Stop requested with no playback consumers"),
            1 => {
                playback.consumers = 0;
                self.provider.stop();
            }
            _ => {
                playback.consumers -= 1;
                debug!(consumers = playback.consumers, "Left shared playback");
            }
        }
    }

    /// Number of consumers sharing the provider session
    pub fn playback_consumers(&self) -> usize {
        self.playback.lock().unwrap().consumers
    }

    pub fn is_playing(&self) -> bool {
        self.provider.is_running()
    }

    fn persist(&self, source: &CameraSource) {
        let result = self
            .settings
            .put_int(settings_keys::CURRENT_SOURCE, source.kind.as_index())
            .and_then(|_| match locator_key(source.kind) {
                Some(key) => self.settings.put_string(key, &source.locator),
                None => Ok(()),
            });
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist camera source");
        }
    }
}

fn locator_key(kind: SourceKind) -> Option<&'static str> {
    match kind {
        SourceKind::RealDevice => None,
        SourceKind::LocalVideo => Some(settings_keys::LOCAL_VIDEO_PATH),
        SourceKind::NetworkStream => Some(settings_keys::NETWORK_VIDEO_URL),
        SourceKind::StaticImage => Some(settings_keys::LOCAL_PICTURE_PATH),
    }
}

fn restore_source(settings: &dyn SettingsStore) -> CameraSource {
    let index = settings.get_int(settings_keys::CURRENT_SOURCE, 0);
    let Some(kind) = SourceKind::from_index(index) else {
        warn!(index, "Unknown persisted camera source, using real device");
        return CameraSource::real_device();
    };

    let locator = locator_key(kind)
        .map(|key| settings.get_string(key, ""))
        .unwrap_or_default();

    match CameraSource::new(kind, locator).validate() {
        Ok(source) => source,
        Err(e) => {
            warn!(kind = %kind, error = %e, "Persisted camera source invalid, using real device");
            CameraSource::real_device()
        }
    }
}
