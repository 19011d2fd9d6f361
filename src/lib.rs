// SPDX-License-Identifier: MPL-2.0

//! vcamera - sandboxed application host with camera virtualization
//!
//! Installs third-party application packages into a private sandbox,
//! launches them through a fix-and-retry pipeline, and hands camera-capable
//! packages synthetic capture handles fed from a user-chosen source: a
//! still image, a looped clip or image sequence, a network stream, or the
//! real host camera.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`sandbox`]: Registry, hook table, launch pipeline and the async manager
//! - [`backends`]: Capture handles and virtual camera sources
//! - [`context`]: Wiring of the shared component graph
//! - [`config`]: User configuration handling
//! - [`settings`]: Persistent key/value settings
//! - [`events`]: Event queues towards the presentation layer
//!
//! # Example
//!
//! ```ignore
//! let context = vcamera::AppContext::new(vcamera::Config::load())?;
//! let (manager, mut events) = context.app_manager()?;
//! manager.install("/tmp/demo.apk", 0);
//! let result = events.install_results.next_blocking();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod events;
pub mod sandbox;
pub mod settings;

// Re-export commonly used types
pub use config::Config;
pub use context::AppContext;
pub use errors::{Result, VcError};
pub use events::{AppListChanged, EventSubscriber, InstallResult, LaunchResult};
pub use sandbox::{AppManager, LaunchAttempt, LaunchStats};
