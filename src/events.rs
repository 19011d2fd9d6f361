// SPDX-License-Identifier: GPL-3.0-only

//! Event queues towards the presentation layer
//!
//! Each event category has its own single-consumer FIFO queue. Producers
//! (the sequential worker) enqueue through a cloneable [`EventPublisher`];
//! the owning execution context drains the matching [`EventReceiver`] in
//! order. There is no ordering guarantee across categories.
//!
//! ```text
//!   SequentialWorker ──► EventPublisher ──┬─► AppListChanged queue ──► UI
//!                                         ├─► InstallResult queue  ──► UI
//!                                         └─► LaunchResult queue   ──► UI
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// The installed application list changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppListChanged;

/// Outcome of an install or uninstall request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    pub package: Option<String>,
    pub success: bool,
    pub message: String,
}

/// Outcome of a launch request, after retries are exhausted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    pub package: String,
    pub user_id: u32,
    pub success: bool,
    pub message: String,
}

/// Producer side of all three queues
#[derive(Debug, Clone)]
pub struct EventPublisher {
    app_list: UnboundedSender<AppListChanged>,
    install: UnboundedSender<InstallResult>,
    launch: UnboundedSender<LaunchResult>,
}

/// Consumer side, owned by exactly one execution context
#[derive(Debug)]
pub struct EventSubscriber {
    pub app_list_changed: EventReceiver<AppListChanged>,
    pub install_results: EventReceiver<InstallResult>,
    pub launch_results: EventReceiver<LaunchResult>,
}

/// Create connected publisher and subscriber halves
pub fn event_queues() -> (EventPublisher, EventSubscriber) {
    let (app_list, app_list_rx) = mpsc::unbounded_channel();
    let (install, install_rx) = mpsc::unbounded_channel();
    let (launch, launch_rx) = mpsc::unbounded_channel();

    (
        EventPublisher {
            app_list,
            install,
            launch,
        },
        EventSubscriber {
            app_list_changed: EventReceiver { rx: app_list_rx },
            install_results: EventReceiver { rx: install_rx },
            launch_results: EventReceiver { rx: launch_rx },
        },
    )
}

impl EventPublisher {
    // A dropped subscriber means nobody is listening; events are discarded.

    pub fn app_list_changed(&self) {
        if self.app_list.send(AppListChanged).is_err() {
            debug!("AppListChanged dropped, no subscriber");
        }
    }

    pub fn install_result(&self, event: InstallResult) {
        if self.install.send(event).is_err() {
            debug!("InstallResult dropped, no subscriber");
        }
    }

    pub fn launch_result(&self, event: LaunchResult) {
        if self.launch.send(event).is_err() {
            debug!("LaunchResult dropped, no subscriber");
        }
    }
}

/// FIFO receiver for one event category
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> EventReceiver<T> {
    /// Next event if one is queued
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// All queued events, oldest first
    pub fn drain(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Block the current thread until an event arrives
    ///
    /// Returns `None` once every publisher is gone. Must not be called from
    /// inside an async runtime.
    pub fn next_blocking(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }

    /// Wait asynchronously for the next event
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
