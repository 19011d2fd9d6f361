// SPDX-License-Identifier: GPL-3.0-only

//! Starting and observing sandboxed processes

use crate::constants::launch;
use crate::sandbox::registry::VirtualAppRecord;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Liveness of a started process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Started but not yet confirmed alive
    Starting,
    Running,
    /// Gone, with its exit code when known
    Exited(Option<i32>),
}

/// Resolved program to run for a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Process management seam of the launch pipeline
pub trait ProcessHost: Send + Sync {
    /// Find what to run for `record`; `None` means nothing is launchable
    fn resolve_entry_point(&self, record: &VirtualAppRecord) -> Option<LaunchCommand>;

    /// Start `command` inside the record's data directory, returning its pid
    fn start(&self, record: &VirtualAppRecord, command: &LaunchCommand) -> io::Result<u32>;

    fn status(&self, package: &str, pid: u32) -> ProcessStatus;

    /// Pids of live instances of `package`
    fn running_instances(&self, package: &str) -> Vec<u32>;

    fn terminate(&self, package: &str, pid: u32) -> io::Result<()>;
}

/// Runs entry points as host child processes
///
/// The data directory is the working directory, `HOME` points at it and
/// `TMPDIR` at its `tmp` subdirectory.
#[derive(Debug, Default)]
pub struct NativeProcessHost {
    children: Mutex<HashMap<String, Vec<Child>>>,
}

impl NativeProcessHost {
    pub fn new() -> Self {
        Self::default()
    }
}

fn resolve_program(app_dir: Option<&Path>, program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        app_dir?.join(path)
    };
    candidate.is_file().then_some(candidate)
}

impl ProcessHost for NativeProcessHost {
    fn resolve_entry_point(&self, record: &VirtualAppRecord) -> Option<LaunchCommand> {
        let entry = record.entry_point.as_ref()?;
        let program = resolve_program(record.app_directory(), &entry.program)?;
        Some(LaunchCommand {
            program,
            args: entry.args.clone(),
        })
    }

    fn start(&self, record: &VirtualAppRecord, command: &LaunchCommand) -> io::Result<u32> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&record.data_directory)
            .env("HOME", &record.data_directory)
            .env("TMPDIR", record.data_directory.join("tmp"))
            .env("VCAMERA_PACKAGE", &record.package_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let pid = child.id();
        info!(package = %record.package_name, pid, program = %command.program.display(), "Process started");
        self.children
            .lock()
            .unwrap()
            .entry(record.package_name.clone())
            .or_default()
            .push(child);
        Ok(pid)
    }

    fn status(&self, package: &str, pid: u32) -> ProcessStatus {
        let mut children = self.children.lock().unwrap();
        let Some(child) = children
            .get_mut(package)
            .and_then(|list| list.iter_mut().find(|c| c.id() == pid))
        else {
            return ProcessStatus::Exited(None);
        };

        match child.try_wait() {
            Ok(None) => ProcessStatus::Running,
            Ok(Some(status)) => ProcessStatus::Exited(status.code()),
            Err(e) => {
                warn!(package, pid, error = %e, "Could not query process status");
                ProcessStatus::Exited(None)
            }
        }
    }

    fn running_instances(&self, package: &str) -> Vec<u32> {
        let mut children = self.children.lock().unwrap();
        let Some(list) = children.get_mut(package) else {
            return Vec::new();
        };
        // Reap finished children while we are here
        list.retain_mut(|c| matches!(c.try_wait(), Ok(None)));
        list.iter().map(|c| c.id()).collect()
    }

    fn terminate(&self, package: &str, pid: u32) -> io::Result<()> {
        let mut children = self.children.lock().unwrap();
        let Some(list) = children.get_mut(package) else {
            return Ok(());
        };
        let Some(index) = list.iter().position(|c| c.id() == pid) else {
            return Ok(());
        };
        let mut child = list.remove(index);

        // SAFETY: pid belongs to a child we spawned and have not yet reaped
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!(package, pid, error = %io::Error::last_os_error(), "SIGTERM not delivered");
        }

        let deadline = Instant::now() + launch::TERMINATE_GRACE;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                info!(package, pid, "Process terminated");
                return Ok(());
            }
            std::thread::sleep(launch::VERIFICATION_POLL_INTERVAL / 4);
        }

        warn!(package, pid, "Process ignored SIGTERM, killing");
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}
