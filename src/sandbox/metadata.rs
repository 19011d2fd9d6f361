// SPDX-License-Identifier: GPL-3.0-only

//! Package metadata and its extraction collaborator

use crate::errors::{Result, VcError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Program started when a package is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Executable, absolute or relative to the package's app directory
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// What the registry needs to know about a package binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package_name: String,
    pub display_name: String,
    #[serde(default)]
    pub version_code: i64,
    /// Opaque handle owned by the extractor
    #[serde(default)]
    pub icon_ref: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub entry_point: Option<EntryPoint>,
}

impl PackageMetadata {
    pub fn new(package_name: impl Into<String>, display_name: impl Into<String>, version_code: i64) -> Self {
        Self {
            package_name: package_name.into(),
            display_name: display_name.into(),
            version_code,
            icon_ref: None,
            permissions: Vec::new(),
            entry_point: None,
        }
    }

    pub fn with_entry_point(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.entry_point = Some(EntryPoint {
            program: program.into(),
            args,
        });
        self
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Reject names that cannot safely become a directory name
    pub fn validate(&self) -> Result<()> {
        validate_package_name(&self.package_name)
    }
}

/// Package names are dotted identifiers: `[A-Za-z0-9_]` segments joined by `.`
pub fn validate_package_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(())
    } else {
        Err(VcError::MetadataExtractionFailed(format!(
            "invalid package name {:?}",
            name
        )))
    }
}

/// Reads metadata from a package binary
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, binary: &Path) -> Result<PackageMetadata>;
}

/// Extractor reading a JSON manifest stored next to the binary
///
/// For `app.apk` the manifest is `app.apk.json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestMetadataExtractor;

impl ManifestMetadataExtractor {
    pub fn manifest_path(binary: &Path) -> PathBuf {
        let mut name = binary.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }
}

impl MetadataExtractor for ManifestMetadataExtractor {
    fn extract(&self, binary: &Path) -> Result<PackageMetadata> {
        let manifest = Self::manifest_path(binary);
        debug!(manifest = %manifest.display(), "Reading package manifest");

        let contents = std::fs::read_to_string(&manifest).map_err(|e| {
            VcError::MetadataExtractionFailed(format!("{}: {}", manifest.display(), e))
        })?;
        let metadata: PackageMetadata = serde_json::from_str(&contents).map_err(|e| {
            VcError::MetadataExtractionFailed(format!("{}: {}", manifest.display(), e))
        })?;
        metadata.validate()?;
        Ok(metadata)
    }
}
