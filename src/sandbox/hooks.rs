// SPDX-License-Identifier: GPL-3.0-only

//! Interception capability table
//!
//! The engine does not intercept anything itself. It records which package
//! has which [`HookPoint`] active; the launch pipeline fills it before a
//! launch and the capture factory consults it when a sandboxed package asks
//! for a capture handle.

use super::registry::VirtualAppRegistry;
use crate::errors::{Result, VcError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// API surfaces that can be substituted for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookPoint {
    /// Opening a capture device through the legacy API
    CaptureOpen,
    /// Frame callbacks registered on a legacy capture handle
    CapturePreviewCallback,
    /// Opening a capture device through the session-based API
    SecondGenerationCaptureOpen,
    /// Acquiring the surface a capture session renders into
    SurfaceAcquisition,
}

impl HookPoint {
    pub const ALL: [HookPoint; 4] = [
        HookPoint::CaptureOpen,
        HookPoint::CapturePreviewCallback,
        HookPoint::SecondGenerationCaptureOpen,
        HookPoint::SurfaceAcquisition,
    ];

    /// Every hook point, as registered for camera-capable packages
    pub fn all() -> BTreeSet<HookPoint> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPoint::CaptureOpen => "capture-open",
            HookPoint::CapturePreviewCallback => "capture-preview-callback",
            HookPoint::SecondGenerationCaptureOpen => "second-generation-capture-open",
            HookPoint::SurfaceAcquisition => "surface-acquisition",
        };
        f.write_str(name)
    }
}

/// Authoritative table of active interceptions per package
pub struct HookEngine {
    table: RwLock<HashMap<String, BTreeSet<HookPoint>>>,
    allow_list: HashSet<String>,
    registry: Arc<VirtualAppRegistry>,
}

impl HookEngine {
    pub fn new(registry: Arc<VirtualAppRegistry>, allow_list: impl IntoIterator<Item = String>) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            allow_list: allow_list.into_iter().collect(),
            registry,
        }
    }

    /// Register `points` for `package`, merging with what is already there
    ///
    /// Logs and returns `false` when the registration is rejected.
    pub fn register_interception(&self, package: &str, points: &BTreeSet<HookPoint>) -> bool {
        match self.try_register_interception(package, points) {
            Ok(()) => true,
            Err(e) => {
                warn!(package, error = %e, "Hook registration rejected");
                false
            }
        }
    }

    pub fn try_register_interception(&self, package: &str, points: &BTreeSet<HookPoint>) -> Result<()> {
        if package.trim().is_empty() {
            return Err(VcError::HookRegistrationFailed {
                package: package.to_string(),
                reason: "empty package name".into(),
            });
        }
        if points.is_empty() {
            return Err(VcError::HookRegistrationFailed {
                package: package.to_string(),
                reason: "no hook points given".into(),
            });
        }

        let mut table = self.table.write().unwrap();
        let entry = table.entry(package.to_string()).or_default();
        let before = entry.len();
        entry.extend(points.iter().copied());

        if entry.len() > before {
            info!(package, hooks = ?entry, "Interception registered");
        } else {
            debug!(package, "Interception already registered");
        }
        Ok(())
    }

    /// Drop every hook of `package`; `false` when none were registered
    pub fn unregister_interception(&self, package: &str) -> bool {
        let removed = self.table.write().unwrap().remove(package).is_some();
        if removed {
            info!(package, "Interception unregistered");
        }
        removed
    }

    /// Whether `package` is allow-listed or declares a camera permission
    pub fn is_camera_capable(&self, package: &str) -> bool {
        if self.allow_list.contains(package) {
            return true;
        }
        self.registry
            .get(package)
            .map(|record| record.declares_camera_permission())
            .unwrap_or(false)
    }

    pub fn hooks_for(&self, package: &str) -> BTreeSet<HookPoint> {
        self.table
            .read()
            .unwrap()
            .get(package)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_hooked(&self, package: &str, point: HookPoint) -> bool {
        self.table
            .read()
            .unwrap()
            .get(package)
            .is_some_and(|points| points.contains(&point))
    }

    /// Packages with at least one active hook, sorted
    pub fn registered_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.table.read().unwrap().keys().cloned().collect();
        packages.sort();
        packages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::metadata::PackageMetadata;

    fn engine(dir: &std::path::Path) -> (Arc<VirtualAppRegistry>, HookEngine) {
        let registry = Arc::new(VirtualAppRegistry::open(dir.join("root")).unwrap());
        let engine = HookEngine::new(Arc::clone(&registry), vec!["com.whatsapp".to_string()]);
        (registry, engine)
    }

    #[test]
    fn test_register_merges_points() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());

        let first: BTreeSet<_> = [HookPoint::CaptureOpen].into();
        let second: BTreeSet<_> = [HookPoint::CaptureOpen, HookPoint::SurfaceAcquisition].into();
        assert!(engine.register_interception("com.demo.app", &first));
        assert!(engine.register_interception("com.demo.app", &second));

        assert_eq!(
            engine.hooks_for("com.demo.app"),
            [HookPoint::CaptureOpen, HookPoint::SurfaceAcquisition].into()
        );
        assert!(!engine.is_hooked("com.demo.app", HookPoint::CapturePreviewCallback));
    }

    #[test]
    fn test_rejects_empty_registration() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());

        assert!(!engine.register_interception("", &HookPoint::all()));
        let err = engine
            .try_register_interception("com.demo.app", &BTreeSet::new())
            .unwrap_err();
        assert!(matches!(err, VcError::HookRegistrationFailed { .. }));
        assert!(engine.registered_packages().is_empty());
    }

    #[test]
    fn test_unregister_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());

        engine.register_interception("com.demo.app", &HookPoint::all());
        assert!(engine.unregister_interception("com.demo.app"));
        assert!(!engine.unregister_interception("com.demo.app"));
    }

    #[test]
    fn test_camera_capability_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine(dir.path());
        let binary = dir.path().join("app.apk");
        std::fs::write(&binary, b"apk").unwrap();

        registry
            .install(
                &binary,
                &PackageMetadata::new("com.cam.app", "Cam", 1).with_permissions(&["android.permission.CAMERA"]),
                0,
            )
            .unwrap();
        registry
            .install(&binary, &PackageMetadata::new("com.plain.app", "Plain", 1), 0)
            .unwrap();

        assert!(engine.is_camera_capable("com.whatsapp"));
        assert!(engine.is_camera_capable("com.cam.app"));
        assert!(!engine.is_camera_capable("com.plain.app"));
        assert!(!engine.is_camera_capable("never.installed"));
    }
}
