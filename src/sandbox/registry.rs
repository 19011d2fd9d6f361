// SPDX-License-Identifier: GPL-3.0-only

//! Durable catalogue of sandboxed applications
//!
//! On-disk layout below the sandbox root:
//!
//! ```text
//! <root>/
//! ├── apps/
//! │   ├── <package>/
//! │   │   ├── base.apk        copied package binary
//! │   │   └── record.json     serialized VirtualAppRecord
//! │   ├── .staging-<uuid>/    install in flight
//! │   └── .trash-<uuid>/      removal in flight
//! ├── data/user/<uid>/<package>/
//! └── uninstalled.json        packages whose uninstall already happened
//! ```
//!
//! An install is assembled in a staging directory and published with a
//! single rename, so readers never see a record without its binary and data
//! directory. Leftover staging and trash directories from an interrupted
//! run are removed when the catalogue is opened.

use super::metadata::{EntryPoint, PackageMetadata};
use crate::constants::{capture, layout};
use crate::errors::{Result, VcError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// One installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualAppRecord {
    pub package_name: String,
    pub display_name: String,
    pub binary_path: PathBuf,
    pub data_directory: PathBuf,
    pub version_code: i64,
    pub owner_user_id: u32,
    pub icon_ref: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub entry_point: Option<EntryPoint>,
    pub installed_at: DateTime<Utc>,
}

impl VirtualAppRecord {
    /// Directory holding the binary and the record
    pub fn app_directory(&self) -> Option<&Path> {
        self.binary_path.parent()
    }

    pub fn declares_camera_permission(&self) -> bool {
        self.permissions
            .iter()
            .any(|p| capture::CAMERA_PERMISSIONS.contains(&p.as_str()))
    }
}

#[derive(Debug, Default)]
struct Catalogue {
    /// Insertion order
    records: Vec<VirtualAppRecord>,
    /// Packages whose uninstall already happened or was already refused once
    tombstones: BTreeSet<String>,
}

/// Removes a directory on drop unless committed
struct ScratchDir {
    path: PathBuf,
    committed: bool,
}

impl ScratchDir {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to clean up scratch directory");
            }
        }
    }
}

/// Registry of installed packages
pub struct VirtualAppRegistry {
    root: PathBuf,
    catalogue: RwLock<Catalogue>,
}

impl VirtualAppRegistry {
    /// Open (or create) the catalogue under `root`
    ///
    /// Corrupt or partially written entries are skipped and logged.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(layout::APPS_DIR))?;
        std::fs::create_dir_all(root.join(layout::DATA_DIR))?;

        let records = load_catalogue(&root)?;
        let tombstones = load_tombstones(&root);
        info!(root = %root.display(), apps = records.len(), "Opened app registry");

        Ok(Self {
            root,
            catalogue: RwLock::new(Catalogue {
                records,
                tombstones,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn apps_dir(&self) -> PathBuf {
        self.root.join(layout::APPS_DIR)
    }

    /// Data directory a package gets for `user_id`
    pub fn data_directory_for(&self, user_id: u32, package: &str) -> PathBuf {
        self.root
            .join(layout::DATA_DIR)
            .join(layout::USER_DIR)
            .join(user_id.to_string())
            .join(package)
    }

    /// Install `binary` as `metadata.package_name` for `user_id`
    ///
    /// Reinstalling replaces binary and record and keeps the data
    /// directory.
    pub fn install(
        &self,
        binary: &Path,
        metadata: &PackageMetadata,
        user_id: u32,
    ) -> Result<VirtualAppRecord> {
        check_binary(binary)?;
        metadata.validate()?;

        let package = metadata.package_name.as_str();
        let mut catalogue = self.catalogue.write().unwrap();
        let previous = catalogue
            .records
            .iter()
            .position(|r| r.package_name == package);

        let mut staging = ScratchDir::new(
            self.apps_dir()
                .join(format!("{}{}", layout::STAGING_PREFIX, uuid::Uuid::new_v4())),
        );
        std::fs::create_dir_all(&staging.path)?;
        std::fs::copy(binary, staging.path.join(layout::BINARY_FILE)).map_err(|e| {
            VcError::ApkUnreadable {
                path: binary.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let data_directory = self.data_directory_for(user_id, package);
        let data_existed = data_directory.exists();
        std::fs::create_dir_all(&data_directory)?;
        let mut data_guard = ScratchDir::new(data_directory.clone());
        data_guard.committed = data_existed;

        // A reinstall keeps its place in the catalogue order
        let installed_at = previous
            .map(|index| catalogue.records[index].installed_at)
            .unwrap_or_else(Utc::now);

        let app_dir = self.apps_dir().join(package);
        let record = VirtualAppRecord {
            package_name: package.to_string(),
            display_name: metadata.display_name.clone(),
            binary_path: app_dir.join(layout::BINARY_FILE),
            data_directory,
            version_code: metadata.version_code,
            owner_user_id: user_id,
            icon_ref: metadata.icon_ref.clone(),
            permissions: metadata.permissions.clone(),
            entry_point: metadata.entry_point.clone(),
            installed_at,
        };
        std::fs::write(
            staging.path.join(layout::RECORD_FILE),
            serde_json::to_vec_pretty(&record)?,
        )?;

        // Move a previous install aside so the rename below cannot collide
        let trash = if app_dir.exists() {
            let trash = self
                .apps_dir()
                .join(format!("{}{}", layout::TRASH_PREFIX, uuid::Uuid::new_v4()));
            std::fs::rename(&app_dir, &trash)?;
            Some(ScratchDir::new(trash))
        } else {
            None
        };

        if let Err(e) = std::fs::rename(&staging.path, &app_dir) {
            if let Some(trash) = trash.as_ref() {
                if let Err(restore) = std::fs::rename(&trash.path, &app_dir) {
                    warn!(package, error = %restore, "Failed to restore previous install");
                }
            }
            return Err(e.into());
        }
        staging.committed = true;
        data_guard.committed = true;
        drop(trash);

        match previous {
            Some(index) => {
                let old = std::mem::replace(&mut catalogue.records[index], record.clone());
                if old.data_directory != record.data_directory {
                    remove_tree(&old.data_directory);
                }
                info!(package, version = record.version_code, "Reinstalled app");
            }
            None => {
                catalogue.records.push(record.clone());
                info!(package, version = record.version_code, user_id, "Installed app");
            }
        }
        if catalogue.tombstones.remove(package) {
            self.save_tombstones(&catalogue.tombstones);
        }
        Ok(record)
    }

    /// Remove `package` and its data directory
    ///
    /// Returns `false` only the first time a never-installed package is
    /// uninstalled; repeats are treated as already done. The outcome is
    /// kept in `uninstalled.json`, so repeats stay `true` across restarts.
    pub fn uninstall(&self, package: &str) -> bool {
        let mut catalogue = self.catalogue.write().unwrap();

        let Some(index) = catalogue
            .records
            .iter()
            .position(|r| r.package_name == package)
        else {
            if catalogue.tombstones.contains(package) {
                debug!(package, "Uninstall repeated, nothing to do");
                return true;
            }
            warn!(package, "Uninstall requested for a package that was never installed");
            catalogue.tombstones.insert(package.to_string());
            self.save_tombstones(&catalogue.tombstones);
            return false;
        };

        let record = catalogue.records.remove(index);
        let app_dir = self.apps_dir().join(package);
        let trash = self
            .apps_dir()
            .join(format!("{}{}", layout::TRASH_PREFIX, uuid::Uuid::new_v4()));
        match std::fs::rename(&app_dir, &trash) {
            Ok(()) => remove_tree(&trash),
            Err(e) => {
                warn!(package, error = %e, "Could not move app directory aside, removing in place");
                remove_tree(&app_dir);
            }
        }
        remove_tree(&record.data_directory);

        if catalogue.tombstones.insert(package.to_string()) {
            self.save_tombstones(&catalogue.tombstones);
        }
        info!(package, "Uninstalled app");
        true
    }

    pub fn get(&self, package: &str) -> Option<VirtualAppRecord> {
        self.catalogue
            .read()
            .unwrap()
            .records
            .iter()
            .find(|r| r.package_name == package)
            .cloned()
    }

    pub fn contains(&self, package: &str) -> bool {
        self.get(package).is_some()
    }

    /// All records in insertion order
    pub fn list(&self) -> Vec<VirtualAppRecord> {
        self.catalogue.read().unwrap().records.clone()
    }

    fn save_tombstones(&self, tombstones: &BTreeSet<String>) {
        let path = self.root.join(layout::TOMBSTONES_FILE);
        let tmp = path.with_extension("json.tmp");
        let result = serde_json::to_vec_pretty(tombstones)
            .map_err(std::io::Error::from)
            .and_then(|bytes| std::fs::write(&tmp, bytes))
            .and_then(|_| std::fs::rename(&tmp, &path));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to save uninstall tombstones");
        }
    }
}

fn load_tombstones(root: &Path) -> BTreeSet<String> {
    let path = root.join(layout::TOMBSTONES_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeSet::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Uninstall tombstones unreadable");
            return BTreeSet::new();
        }
    };
    serde_json::from_str(&contents).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Uninstall tombstones malformed, starting empty");
        BTreeSet::new()
    })
}

fn check_binary(binary: &Path) -> Result<()> {
    let unreadable = |reason: String| VcError::ApkUnreadable {
        path: binary.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(binary).map_err(|e| unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(unreadable("not a regular file".into()));
    }
    File::open(binary).map_err(|e| unreadable(e.to_string()))?;
    Ok(())
}

fn remove_tree(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "Removed directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove directory"),
    }
}

fn load_catalogue(root: &Path) -> Result<Vec<VirtualAppRecord>> {
    let apps_dir = root.join(layout::APPS_DIR);
    let mut records = Vec::new();

    for entry in std::fs::read_dir(&apps_dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Unreadable catalogue entry");
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if name.starts_with(layout::STAGING_PREFIX) || name.starts_with(layout::TRASH_PREFIX) {
            warn!(path = %path.display(), "Removing leftover from interrupted operation");
            remove_tree(&path);
            continue;
        }
        if !path.is_dir() {
            continue;
        }

        match load_record(root, &path, &name) {
            Ok(record) => records.push(record),
            Err(reason) => warn!(path = %path.display(), %reason, "Skipping corrupt catalogue entry"),
        }
    }

    records.sort_by_key(|r| r.installed_at);
    Ok(records)
}

fn load_record(root: &Path, app_dir: &Path, dir_name: &str) -> std::result::Result<VirtualAppRecord, String> {
    let contents = std::fs::read_to_string(app_dir.join(layout::RECORD_FILE))
        .map_err(|e| format!("record unreadable: {}", e))?;
    let mut record: VirtualAppRecord =
        serde_json::from_str(&contents).map_err(|e| format!("record malformed: {}", e))?;

    if record.package_name != dir_name {
        return Err(format!(
            "record names {} but lives in {}",
            record.package_name, dir_name
        ));
    }

    // Paths are derived from the layout so a moved root still loads
    record.binary_path = app_dir.join(layout::BINARY_FILE);
    record.data_directory = root
        .join(layout::DATA_DIR)
        .join(layout::USER_DIR)
        .join(record.owner_user_id.to_string())
        .join(&record.package_name);

    if !record.binary_path.is_file() {
        return Err("binary missing".into());
    }
    if !record.data_directory.is_dir() {
        return Err("data directory missing".into());
    }
    Ok(record)
}
