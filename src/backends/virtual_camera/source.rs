// SPDX-License-Identifier: GPL-3.0-only

//! Camera source descriptions and their validation

use crate::errors::{Result, VcError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Origin of virtual frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceKind {
    /// Relay of the host's real camera
    #[default]
    RealDevice,
    /// Video or animation on the local filesystem, looped
    LocalVideo,
    /// Remote stream decoded by the collaborator codec
    NetworkStream,
    /// One still image
    StaticImage,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::RealDevice,
        SourceKind::LocalVideo,
        SourceKind::NetworkStream,
        SourceKind::StaticImage,
    ];

    /// Index used when persisting the active source
    pub fn as_index(self) -> i64 {
        match self {
            SourceKind::RealDevice => 0,
            SourceKind::LocalVideo => 1,
            SourceKind::NetworkStream => 2,
            SourceKind::StaticImage => 3,
        }
    }

    pub fn from_index(index: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_index() == index)
    }

    /// Whether the locator names a local file
    pub fn is_local(self) -> bool {
        matches!(self, SourceKind::LocalVideo | SourceKind::StaticImage)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::RealDevice => write!(f, "real device"),
            SourceKind::LocalVideo => write!(f, "local video"),
            SourceKind::NetworkStream => write!(f, "network stream"),
            SourceKind::StaticImage => write!(f, "static image"),
        }
    }
}

/// A configured frame origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSource {
    pub kind: SourceKind,
    /// Filesystem path or URL; empty for the real device
    pub locator: String,
    /// Set only by [`CameraSource::validate`]
    pub validated: bool,
}

impl Default for CameraSource {
    fn default() -> Self {
        Self::real_device()
    }
}

impl CameraSource {
    pub fn new(kind: SourceKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
            validated: false,
        }
    }

    /// The real device needs no locator and is always valid
    pub fn real_device() -> Self {
        Self {
            kind: SourceKind::RealDevice,
            locator: String::new(),
            validated: true,
        }
    }

    pub fn local_video(path: impl AsRef<Path>) -> Self {
        Self::new(
            SourceKind::LocalVideo,
            path.as_ref().to_string_lossy().into_owned(),
        )
    }

    pub fn network_stream(url: impl Into<String>) -> Self {
        Self::new(SourceKind::NetworkStream, url)
    }

    pub fn static_image(path: impl AsRef<Path>) -> Self {
        Self::new(
            SourceKind::StaticImage,
            path.as_ref().to_string_lossy().into_owned(),
        )
    }

    /// Check the locator and return a copy marked as validated
    ///
    /// Local sources must exist and be readable (a directory is accepted
    /// for `LocalVideo` as an image sequence). Network sources only need a
    /// non-empty locator; reachability is the codec's concern.
    pub fn validate(&self) -> Result<CameraSource> {
        match self.kind {
            SourceKind::RealDevice => {}
            SourceKind::NetworkStream => {
                if self.locator.trim().is_empty() {
                    return Err(VcError::SourceInvalid("network locator is empty".into()));
                }
            }
            SourceKind::LocalVideo | SourceKind::StaticImage => {
                check_readable(self.kind, &self.locator)?;
            }
        }

        Ok(CameraSource {
            kind: self.kind,
            locator: self.locator.clone(),
            validated: true,
        })
    }
}

fn check_readable(kind: SourceKind, locator: &str) -> Result<()> {
    if locator.trim().is_empty() {
        return Err(VcError::SourceInvalid(format!("{} path is empty", kind)));
    }

    let path = Path::new(locator);
    let metadata = std::fs::metadata(path)
        .map_err(|e| VcError::SourceInvalid(format!("{}: {}", path.display(), e)))?;

    if metadata.is_dir() {
        if kind != SourceKind::LocalVideo {
            return Err(VcError::SourceInvalid(format!(
                "{} is a directory",
                path.display()
            )));
        }
        std::fs::read_dir(path)
            .map_err(|e| VcError::SourceInvalid(format!("{}: {}", path.display(), e)))?;
    } else {
        File::open(path)
            .map_err(|e| VcError::SourceInvalid(format!("{}: {}", path.display(), e)))?;
    }
    Ok(())
}
