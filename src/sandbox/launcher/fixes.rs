// SPDX-License-Identifier: GPL-3.0-only

//! Compatibility fixes applied around a launch
//!
//! Pre-launch fixes run once per launch before the package is prepared.
//! Post-launch fixes run only after a failed verification, right before the
//! single retry. Every fix reports whether it actually changed something;
//! only those are recorded on the [`super::LaunchAttempt`].

use super::process::ProcessHost;
use crate::constants::{launch, layout};
use crate::sandbox::registry::VirtualAppRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Identifier of a launch fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixId {
    PermissionRepair,
    StaleProcessTermination,
    RuntimeEnvironment,
    LoadOrderReset,
    LaunchContextRefresh,
    PlatformVersionAdjustments,
    ResourceLeakCleanup,
    IntentConflictResolution,
    SecurityRestrictionRelaxation,
    LibraryConflictResolution,
}

impl FixId {
    pub const PRE_LAUNCH: [FixId; 6] = [
        FixId::PermissionRepair,
        FixId::StaleProcessTermination,
        FixId::RuntimeEnvironment,
        FixId::LoadOrderReset,
        FixId::LaunchContextRefresh,
        FixId::PlatformVersionAdjustments,
    ];

    pub const POST_LAUNCH: [FixId; 4] = [
        FixId::ResourceLeakCleanup,
        FixId::IntentConflictResolution,
        FixId::SecurityRestrictionRelaxation,
        FixId::LibraryConflictResolution,
    ];

    pub fn is_post_launch(self) -> bool {
        Self::POST_LAUNCH.contains(&self)
    }
}

impl fmt::Display for FixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a fix may look at
pub struct FixContext<'a> {
    pub record: &'a VirtualAppRecord,
    pub user_id: u32,
    pub host: &'a dyn ProcessHost,
    pub platform_level: u32,
    /// 1 for the first pass, 2 for the retry
    pub attempt: u32,
}

/// A single compatibility fix
pub trait LaunchFix: Send + Sync {
    fn id(&self) -> FixId;

    /// Apply the fix, returning `true` when something was changed
    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool>;
}

/// Pre-launch fixes in execution order
pub fn pre_launch_fixes() -> Vec<Box<dyn LaunchFix>> {
    vec![
        Box::new(PermissionRepair),
        Box::new(StaleProcessTermination),
        Box::new(RuntimeEnvironment),
        Box::new(LoadOrderReset),
        Box::new(LaunchContextRefresh),
        Box::new(PlatformVersionAdjustments),
    ]
}

/// Post-launch fixes in execution order
pub fn post_launch_fixes() -> Vec<Box<dyn LaunchFix>> {
    vec![
        Box::new(ResourceLeakCleanup),
        Box::new(IntentConflictResolution),
        Box::new(SecurityRestrictionRelaxation),
        Box::new(LibraryConflictResolution),
    ]
}

/// Environment handed to the package on launch
#[derive(Debug, Serialize)]
struct LaunchContext<'a> {
    package: &'a str,
    display_name: &'a str,
    version_code: i64,
    user_id: u32,
    home: &'a Path,
    tmpdir: String,
    platform_level: u32,
    attempt: u32,
}

impl<'a> LaunchContext<'a> {
    fn for_fix(ctx: &FixContext<'a>) -> Self {
        let data = ctx.record.data_directory.as_path();
        Self {
            package: &ctx.record.package_name,
            display_name: &ctx.record.display_name,
            version_code: ctx.record.version_code,
            user_id: ctx.user_id,
            home: data,
            tmpdir: data.join("tmp").display().to_string(),
            platform_level: ctx.platform_level,
            attempt: ctx.attempt,
        }
    }
}

/// Write `contents` to `path` unless it already holds exactly that
fn write_if_changed(path: &Path, contents: &str) -> io::Result<bool> {
    match std::fs::read_to_string(path) {
        Ok(existing) if existing == contents => Ok(false),
        _ => {
            std::fs::write(path, contents)?;
            Ok(true)
        }
    }
}

/// Empty `dir` without removing it; `true` when anything was deleted
fn clear_directory(dir: &Path) -> io::Result<bool> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let mut removed = false;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed = true;
    }
    Ok(removed)
}

fn terminate_instances(ctx: &FixContext<'_>) -> io::Result<bool> {
    let package = &ctx.record.package_name;
    let pids = ctx.host.running_instances(package);
    for pid in &pids {
        ctx.host.terminate(package, *pid)?;
    }
    Ok(!pids.is_empty())
}

/// Ensure `mode` bits are set on `path`
#[cfg(unix)]
fn ensure_mode(path: &Path, mode: u32) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.mode() & mode == mode {
        return Ok(false);
    }
    perms.set_mode(perms.mode() | mode);
    std::fs::set_permissions(path, perms)?;
    Ok(true)
}

#[cfg(not(unix))]
fn ensure_mode(path: &Path, _mode: u32) -> io::Result<bool> {
    let mut perms = std::fs::metadata(path)?.permissions();
    if !perms.readonly() {
        return Ok(false);
    }
    perms.set_readonly(false);
    std::fs::set_permissions(path, perms)?;
    Ok(true)
}

/// Owner access on everything inside the data directory
pub struct PermissionRepair;

impl LaunchFix for PermissionRepair {
    fn id(&self) -> FixId {
        FixId::PermissionRepair
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        let data = &ctx.record.data_directory;
        if !data.exists() {
            return Ok(false);
        }

        let mut repaired = false;
        for entry in WalkDir::new(data).into_iter().filter_map(|e| e.ok()) {
            let mode = if entry.file_type().is_dir() { 0o700 } else { 0o600 };
            if ensure_mode(entry.path(), mode)? {
                debug!(path = %entry.path().display(), "Repaired permissions");
                repaired = true;
            }
        }
        Ok(repaired)
    }
}

/// Kill instances left over from an earlier launch
pub struct StaleProcessTermination;

impl LaunchFix for StaleProcessTermination {
    fn id(&self) -> FixId {
        FixId::StaleProcessTermination
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        terminate_instances(ctx)
    }
}

/// Create the runtime directories the package expects
pub struct RuntimeEnvironment;

impl LaunchFix for RuntimeEnvironment {
    fn id(&self) -> FixId {
        FixId::RuntimeEnvironment
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        let mut created = false;
        for name in layout::RUNTIME_DIRS {
            let dir = ctx.record.data_directory.join(name);
            if !dir.is_dir() {
                std::fs::create_dir_all(&dir)?;
                created = true;
            }
        }
        Ok(created)
    }
}

/// Remove stale lock files that block library loading
pub struct LoadOrderReset;

impl LaunchFix for LoadOrderReset {
    fn id(&self) -> FixId {
        FixId::LoadOrderReset
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        let data = &ctx.record.data_directory;
        if !data.exists() {
            return Ok(false);
        }

        let locks: Vec<_> = WalkDir::new(data)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "lock"))
            .map(|e| e.into_path())
            .collect();

        for lock in &locks {
            debug!(path = %lock.display(), "Removing stale lock");
            std::fs::remove_file(lock)?;
        }
        Ok(!locks.is_empty())
    }
}

/// Bring `launch_context.json` in line with the record
pub struct LaunchContextRefresh;

impl LaunchFix for LaunchContextRefresh {
    fn id(&self) -> FixId {
        FixId::LaunchContextRefresh
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        std::fs::create_dir_all(&ctx.record.data_directory)?;
        let contents = serde_json::to_string_pretty(&LaunchContext::for_fix(ctx))?;
        write_if_changed(
            &ctx.record.data_directory.join(layout::LAUNCH_CONTEXT_FILE),
            &contents,
        )
    }
}

/// Layout changes required by newer host platform levels
pub struct PlatformVersionAdjustments;

impl LaunchFix for PlatformVersionAdjustments {
    fn id(&self) -> FixId {
        FixId::PlatformVersionAdjustments
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        let data = &ctx.record.data_directory;
        let mut changed = false;

        if ctx.platform_level >= launch::SCOPED_STORAGE_LEVEL {
            let shared = data.join("files").join("shared");
            if !shared.is_dir() {
                std::fs::create_dir_all(&shared)?;
                changed = true;
            }
        }

        if ctx.platform_level >= launch::COMPAT_MANIFEST_LEVEL {
            std::fs::create_dir_all(data)?;
            let compat = serde_json::json!({
                "platform_level": ctx.platform_level,
                "explicit_exports": true,
            });
            let contents = serde_json::to_string_pretty(&compat)?;
            changed |= write_if_changed(&data.join("compat.json"), &contents)?;
        }

        Ok(changed)
    }
}

/// Kill whatever the failed pass left behind and empty `tmp`
pub struct ResourceLeakCleanup;

impl LaunchFix for ResourceLeakCleanup {
    fn id(&self) -> FixId {
        FixId::ResourceLeakCleanup
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        let killed = terminate_instances(ctx)?;
        let cleared = clear_directory(&ctx.record.data_directory.join("tmp"))?;
        Ok(killed || cleared)
    }
}

/// Re-issue the launch context for the retry pass
pub struct IntentConflictResolution;

impl LaunchFix for IntentConflictResolution {
    fn id(&self) -> FixId {
        FixId::IntentConflictResolution
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        std::fs::create_dir_all(&ctx.record.data_directory)?;
        let contents = serde_json::to_string_pretty(&LaunchContext::for_fix(ctx))?;
        write_if_changed(
            &ctx.record.data_directory.join(layout::LAUNCH_CONTEXT_FILE),
            &contents,
        )
    }
}

/// Make the binary and a bundled entry program accessible to their owner
pub struct SecurityRestrictionRelaxation;

impl LaunchFix for SecurityRestrictionRelaxation {
    fn id(&self) -> FixId {
        FixId::SecurityRestrictionRelaxation
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        let mut changed = false;
        if ctx.record.binary_path.is_file() {
            changed |= ensure_mode(&ctx.record.binary_path, 0o600)?;
        }

        let bundled = ctx
            .record
            .entry_point
            .as_ref()
            .filter(|entry| Path::new(&entry.program).is_relative())
            .zip(ctx.record.app_directory())
            .map(|(entry, dir)| dir.join(&entry.program));
        if let Some(program) = bundled.filter(|p| p.is_file()) {
            changed |= ensure_mode(&program, 0o700)?;
        }
        Ok(changed)
    }
}

/// Drop cached code so the retry loads fresh libraries
pub struct LibraryConflictResolution;

impl LaunchFix for LibraryConflictResolution {
    fn id(&self) -> FixId {
        FixId::LibraryConflictResolution
    }

    fn apply(&self, ctx: &FixContext<'_>) -> io::Result<bool> {
        clear_directory(&ctx.record.data_directory.join("cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::launcher::process::{LaunchCommand, ProcessStatus};
    use chrono::Utc;
    use std::path::PathBuf;

    struct NoProcesses;

    impl ProcessHost for NoProcesses {
        fn resolve_entry_point(&self, _: &VirtualAppRecord) -> Option<LaunchCommand> {
            None
        }
        fn start(&self, _: &VirtualAppRecord, _: &LaunchCommand) -> io::Result<u32> {
            Err(io::Error::other("not supported"))
        }
        fn status(&self, _: &str, _: u32) -> ProcessStatus {
            ProcessStatus::Exited(None)
        }
        fn running_instances(&self, _: &str) -> Vec<u32> {
            Vec::new()
        }
        fn terminate(&self, _: &str, _: u32) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(data: PathBuf) -> VirtualAppRecord {
        VirtualAppRecord {
            package_name: "com.demo.app".into(),
            display_name: "Demo".into(),
            binary_path: data.join("missing.apk"),
            data_directory: data,
            version_code: 1,
            owner_user_id: 0,
            icon_ref: None,
            permissions: Vec::new(),
            entry_point: None,
            installed_at: Utc::now(),
        }
    }

    fn context<'a>(record: &'a VirtualAppRecord, attempt: u32) -> FixContext<'a> {
        FixContext {
            record,
            user_id: 0,
            host: &NoProcesses,
            platform_level: launch::DEFAULT_PLATFORM_LEVEL,
            attempt,
        }
    }

    #[test]
    fn test_fix_groups() {
        let pre: Vec<_> = pre_launch_fixes().iter().map(|f| f.id()).collect();
        let post: Vec<_> = post_launch_fixes().iter().map(|f| f.id()).collect();
        assert_eq!(pre, FixId::PRE_LAUNCH);
        assert_eq!(post, FixId::POST_LAUNCH);
        assert!(post.iter().all(|id| id.is_post_launch()));
        assert!(!pre.iter().any(|id| id.is_post_launch()));
    }

    #[test]
    fn test_pre_launch_fixes_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let record = record(dir.path().join("data"));
        let ctx = context(&record, 1);

        let first: Vec<_> = pre_launch_fixes()
            .iter()
            .filter(|f| f.apply(&ctx).unwrap())
            .map(|f| f.id())
            .collect();
        assert!(first.contains(&FixId::RuntimeEnvironment));
        assert!(first.contains(&FixId::LaunchContextRefresh));
        assert!(first.contains(&FixId::PlatformVersionAdjustments));

        let second: Vec<_> = pre_launch_fixes()
            .iter()
            .filter(|f| f.apply(&ctx).unwrap())
            .map(|f| f.id())
            .collect();
        assert!(second.is_empty(), "second pass changed {:?}", second);
    }

    #[test]
    fn test_lock_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let record = record(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path().join("files")).unwrap();
        std::fs::write(dir.path().join("files/db.lock"), b"").unwrap();
        std::fs::write(dir.path().join("files/db"), b"keep").unwrap();

        assert!(LoadOrderReset.apply(&context(&record, 1)).unwrap());
        assert!(!dir.path().join("files/db.lock").exists());
        assert!(dir.path().join("files/db").exists());
        assert!(!LoadOrderReset.apply(&context(&record, 1)).unwrap());
    }

    #[test]
    fn test_retry_context_differs_from_first_pass() {
        let dir = tempfile::tempdir().unwrap();
        let record = record(dir.path().to_path_buf());

        assert!(LaunchContextRefresh.apply(&context(&record, 1)).unwrap());
        assert!(IntentConflictResolution.apply(&context(&record, 2)).unwrap());

        let written = std::fs::read_to_string(dir.path().join(layout::LAUNCH_CONTEXT_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["package"], "com.demo.app");
    }

    #[test]
    fn test_platform_gating() {
        let dir = tempfile::tempdir().unwrap();
        let record = record(dir.path().to_path_buf());
        let mut ctx = context(&record, 1);
        ctx.platform_level = 28;

        assert!(!PlatformVersionAdjustments.apply(&ctx).unwrap());
        assert!(!dir.path().join("files/shared").exists());
        assert!(!dir.path().join("compat.json").exists());
    }

    #[test]
    fn test_cleanup_clears_tmp_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let record = record(dir.path().to_path_buf());
        for name in ["tmp", "cache"] {
            std::fs::create_dir_all(dir.path().join(name).join("nested")).unwrap();
            std::fs::write(dir.path().join(name).join("leftover"), b"x").unwrap();
        }

        assert!(ResourceLeakCleanup.apply(&context(&record, 2)).unwrap());
        assert!(LibraryConflictResolution.apply(&context(&record, 2)).unwrap());
        for name in ["tmp", "cache"] {
            let dir = dir.path().join(name);
            assert!(dir.is_dir());
            assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_repair() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let record = record(dir.path().to_path_buf());
        let file = dir.path().join("settings.db");
        std::fs::write(&file, b"x").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o400)).unwrap();

        assert!(PermissionRepair.apply(&context(&record, 1)).unwrap());
        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o600, 0o600);
        assert!(!PermissionRepair.apply(&context(&record, 1)).unwrap());
    }
}
