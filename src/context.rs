// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide component graph
//!
//! Every long-lived component is built once here and shared as an `Arc`.
//!
//! ```text
//!  Config ──► SettingsStore ──┬─► CameraSourceManager ──► FrameProvider
//!                             │            ▲
//!  VirtualAppRegistry ──► HookEngine ──────┴─► CaptureFactory
//!          │                  │
//!          └──────────────────┴─► AppLaunchPipeline ──► ProcessHost
//! ```

use crate::backends::camera::CaptureFactory;
use crate::backends::virtual_camera::{
    CameraSourceManager, FrameDecoder, FrameProvider, MediaDecoder,
};
use crate::config::Config;
use crate::constants::layout;
use crate::errors::Result;
use crate::events::EventSubscriber;
use crate::sandbox::{
    AppLaunchPipeline, AppManager, HookEngine, LaunchJournal, LaunchSettings,
    ManifestMetadataExtractor, MetadataExtractor, NativeProcessHost, ProcessHost,
    VirtualAppRegistry,
};
use crate::settings::{JsonSettingsStore, SettingsStore};
use std::sync::Arc;
use tracing::info;

/// Shared components of one vcamera instance
pub struct AppContext {
    pub config: Config,
    pub settings: Arc<dyn SettingsStore>,
    pub registry: Arc<VirtualAppRegistry>,
    pub hooks: Arc<HookEngine>,
    pub sources: Arc<CameraSourceManager>,
    pub captures: Arc<CaptureFactory>,
    pub pipeline: Arc<AppLaunchPipeline>,
}

impl AppContext {
    /// Build the graph with the default collaborators
    ///
    /// Settings live in `<data_root>/settings.json`, launches run as host
    /// processes and sources decode through [`MediaDecoder`].
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_root)?;
        let settings: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::open(
            config.data_root.join(layout::SETTINGS_FILE),
        ));
        let decoder: Arc<dyn FrameDecoder> = Arc::new(MediaDecoder::new(
            config.nominal_width,
            config.nominal_height,
            config.frame_rate,
        ));
        Self::with_collaborators(config, settings, decoder, Arc::new(NativeProcessHost::new()))
    }

    /// Build the graph around caller-supplied collaborators
    pub fn with_collaborators(
        config: Config,
        settings: Arc<dyn SettingsStore>,
        decoder: Arc<dyn FrameDecoder>,
        host: Arc<dyn ProcessHost>,
    ) -> Result<Self> {
        let registry = Arc::new(VirtualAppRegistry::open(&config.data_root)?);
        let hooks = Arc::new(HookEngine::new(
            Arc::clone(&registry),
            config.camera_allow_list.iter().cloned(),
        ));

        let provider = Arc::new(FrameProvider::new(config.frame_rate));
        let sources = Arc::new(CameraSourceManager::new(
            Arc::clone(&settings),
            provider,
            Arc::clone(&decoder),
        ));
        let captures = Arc::new(CaptureFactory::new(
            Arc::clone(&hooks),
            Arc::clone(&sources),
            decoder,
            config.virtualization_enabled,
        ));

        let journal = LaunchJournal::new(
            config
                .data_root
                .join(layout::LOG_DIR)
                .join(layout::LAUNCH_ERRORS_FILE),
        );
        let pipeline = Arc::new(
            AppLaunchPipeline::new(
                Arc::clone(&registry),
                Arc::clone(&hooks),
                host,
                Arc::clone(&settings),
                LaunchSettings::from_config(&config),
            )
            .with_journal(journal),
        );

        info!(root = %config.data_root.display(), "vcamera context ready");
        Ok(Self {
            config,
            settings,
            registry,
            hooks,
            sources,
            captures,
            pipeline,
        })
    }

    /// Manager reading package metadata from sidecar manifests
    pub fn app_manager(&self) -> Result<(AppManager, EventSubscriber)> {
        self.app_manager_with(Arc::new(ManifestMetadataExtractor))
    }

    pub fn app_manager_with(
        &self,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<(AppManager, EventSubscriber)> {
        AppManager::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.hooks),
            Arc::clone(&self.pipeline),
            extractor,
        )
    }
}
