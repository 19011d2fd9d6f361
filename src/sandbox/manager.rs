// SPDX-License-Identifier: GPL-3.0-only

//! Asynchronous front door to the sandbox
//!
//! Install, uninstall and launch requests are queued on one
//! [`SequentialWorker`], so they never overlap, and report back through the
//! event queues. Read-only queries go straight to the registry.

use super::hooks::HookEngine;
use super::launcher::{AppLaunchPipeline, LaunchAttempt};
use super::metadata::MetadataExtractor;
use super::registry::{VirtualAppRecord, VirtualAppRegistry};
use super::worker::SequentialWorker;
use crate::errors::Result;
use crate::events::{EventPublisher, EventSubscriber, InstallResult, LaunchResult, event_queues};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Pending result of a launch queued with [`AppManager::launch_with_ticket`]
#[derive(Debug)]
pub struct LaunchTicket {
    rx: oneshot::Receiver<LaunchAttempt>,
}

impl LaunchTicket {
    /// Block until the launch finishes
    ///
    /// `None` when the worker went away before running the job. Must not be
    /// called from inside an async runtime.
    pub fn wait(self) -> Option<LaunchAttempt> {
        self.rx.blocking_recv().ok()
    }

    pub async fn recv(self) -> Option<LaunchAttempt> {
        self.rx.await.ok()
    }
}

/// Queues sandbox operations and publishes their outcome
pub struct AppManager {
    registry: Arc<VirtualAppRegistry>,
    hooks: Arc<HookEngine>,
    pipeline: Arc<AppLaunchPipeline>,
    extractor: Arc<dyn MetadataExtractor>,
    events: EventPublisher,
    worker: SequentialWorker,
}

impl AppManager {
    /// Build the manager and the subscriber side of its event queues
    pub fn new(
        registry: Arc<VirtualAppRegistry>,
        hooks: Arc<HookEngine>,
        pipeline: Arc<AppLaunchPipeline>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<(Self, EventSubscriber)> {
        let (events, subscriber) = event_queues();
        let worker = SequentialWorker::spawn("vcamera-apps")?;
        Ok((
            Self {
                registry,
                hooks,
                pipeline,
                extractor,
                events,
                worker,
            },
            subscriber,
        ))
    }

    pub fn pipeline(&self) -> &Arc<AppLaunchPipeline> {
        &self.pipeline
    }

    /// Queue an install of the package binary at `binary`
    pub fn install(&self, binary: impl Into<PathBuf>, user_id: u32) {
        let binary = binary.into();
        let registry = Arc::clone(&self.registry);
        let extractor = Arc::clone(&self.extractor);
        let events = self.events.clone();

        self.submit("install", move || {
            let result = extractor
                .extract(&binary)
                .and_then(|metadata| registry.install(&binary, &metadata, user_id));

            match result {
                Ok(record) => {
                    events.install_result(InstallResult {
                        package: Some(record.package_name.clone()),
                        success: true,
                        message: format!("Installed {} ({})", record.display_name, record.package_name),
                    });
                    events.app_list_changed();
                }
                Err(e) => {
                    warn!(binary = %binary.display(), error = %e, "Install failed");
                    events.install_result(InstallResult {
                        package: None,
                        success: false,
                        message: e.to_string(),
                    });
                }
            }
        });
    }

    /// Queue removal of `package` and its hooks
    pub fn uninstall(&self, package: &str) {
        let package = package.to_string();
        let registry = Arc::clone(&self.registry);
        let hooks = Arc::clone(&self.hooks);
        let events = self.events.clone();

        self.submit("uninstall", move || {
            let was_installed = registry.contains(&package);
            let success = registry.uninstall(&package);
            hooks.unregister_interception(&package);

            let message = match (success, was_installed) {
                (true, true) => format!("Uninstalled {}", package),
                (true, false) => format!("{} already uninstalled", package),
                (false, _) => format!("{} is not installed", package),
            };
            events.install_result(InstallResult {
                package: Some(package),
                success,
                message,
            });
            if was_installed {
                events.app_list_changed();
            }
        });
    }

    /// Queue a launch; the outcome arrives as a `LaunchResult` event
    pub fn launch(&self, package: &str, user_id: u32) {
        let package = package.to_string();
        let pipeline = Arc::clone(&self.pipeline);
        let events = self.events.clone();

        self.submit("launch", move || {
            let attempt = pipeline.launch(&package, user_id);
            events.launch_result(launch_result(&attempt));
        });
    }

    /// Queue a launch and get a ticket for its full [`LaunchAttempt`]
    ///
    /// The `LaunchResult` event is published as well.
    pub fn launch_with_ticket(&self, package: &str, user_id: u32) -> LaunchTicket {
        let (tx, rx) = oneshot::channel();
        let package = package.to_string();
        let pipeline = Arc::clone(&self.pipeline);
        let events = self.events.clone();

        self.submit("launch", move || {
            let attempt = pipeline.launch(&package, user_id);
            events.launch_result(launch_result(&attempt));
            let _ = tx.send(attempt);
        });
        LaunchTicket { rx }
    }

    pub fn installed_apps(&self) -> Vec<VirtualAppRecord> {
        self.registry.list()
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.registry.contains(package)
    }

    /// Wait for every queued job, then stop the worker
    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }

    fn submit<F>(&self, operation: &str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.worker.submit(job) {
            info!(operation, "Queued sandbox job");
        } else {
            warn!(operation, "Sandbox worker stopped, job dropped");
        }
    }
}

fn launch_result(attempt: &LaunchAttempt) -> LaunchResult {
    let message = match &attempt.error {
        None => format!("Launched {}", attempt.package_name),
        Some(e) => e.to_string(),
    };
    LaunchResult {
        package: attempt.package_name.clone(),
        user_id: attempt.user_id,
        success: attempt.is_success(),
        message,
    }
}
