// SPDX-License-Identifier: GPL-3.0-only

//! Append-only log of failed launches

use chrono::Local;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes one line per failed launch to `<root>/logs/launch_errors.log`
#[derive(Debug, Clone)]
pub struct LaunchJournal {
    path: PathBuf,
}

impl LaunchJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_failure(&self, package: &str, user_id: u32, error: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{} - Launch failed for app: {}, userId: {}, error: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            package,
            user_id,
            error
        )
    }
}
