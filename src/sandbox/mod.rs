// SPDX-License-Identifier: GPL-3.0-only

//! Sandboxed application lifecycle
//!
//! ```text
//! AppManager ──► SequentialWorker ──┬─► VirtualAppRegistry (install / uninstall)
//!                                   └─► AppLaunchPipeline ──► HookEngine
//!                                              │
//!                                              └──► ProcessHost
//! ```

pub mod hooks;
pub mod launcher;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod worker;

pub use hooks::{HookEngine, HookPoint};
pub use launcher::{
    AppLaunchPipeline, FixId, LaunchAttempt, LaunchJournal, LaunchOutcome, LaunchSettings,
    LaunchState, LaunchStats, NativeProcessHost, ProcessHost, ProcessStatus,
};
pub use manager::{AppManager, LaunchTicket};
pub use metadata::{EntryPoint, ManifestMetadataExtractor, MetadataExtractor, PackageMetadata};
pub use registry::{VirtualAppRecord, VirtualAppRegistry};
pub use worker::SequentialWorker;
