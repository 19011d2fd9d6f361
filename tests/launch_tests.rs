// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the launch pipeline

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vcamera::VcError;
use vcamera::sandbox::launcher::LaunchCommand;
use vcamera::sandbox::{
    AppLaunchPipeline, FixId, HookEngine, HookPoint, LaunchJournal, LaunchSettings, LaunchState,
    PackageMetadata, ProcessHost, ProcessStatus, VirtualAppRecord, VirtualAppRegistry,
};
use vcamera::settings::{MemorySettingsStore, SettingsStore};

/// Process host whose n-th started process reports the n-th scripted status
struct ScriptedHost {
    script: Vec<ProcessStatus>,
    resolvable: bool,
    starts: AtomicU32,
    started: Mutex<Vec<String>>,
}

impl ScriptedHost {
    fn new(script: Vec<ProcessStatus>) -> Self {
        Self {
            script,
            resolvable: true,
            starts: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    fn without_entry_point() -> Self {
        Self {
            resolvable: false,
            ..Self::new(Vec::new())
        }
    }

    fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

impl ProcessHost for ScriptedHost {
    fn resolve_entry_point(&self, _record: &VirtualAppRecord) -> Option<LaunchCommand> {
        self.resolvable.then(|| LaunchCommand {
            program: PathBuf::from("/opt/demo/bin/demo"),
            args: Vec::new(),
        })
    }

    fn start(&self, record: &VirtualAppRecord, _command: &LaunchCommand) -> io::Result<u32> {
        self.started.lock().unwrap().push(record.package_name.clone());
        Ok(self.starts.fetch_add(1, Ordering::SeqCst))
    }

    fn status(&self, _package: &str, pid: u32) -> ProcessStatus {
        self.script
            .get(pid as usize)
            .copied()
            .unwrap_or(ProcessStatus::Exited(None))
    }

    fn running_instances(&self, _package: &str) -> Vec<u32> {
        Vec::new()
    }

    fn terminate(&self, _package: &str, _pid: u32) -> io::Result<()> {
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    registry: Arc<VirtualAppRegistry>,
    hooks: Arc<HookEngine>,
    settings: Arc<dyn SettingsStore>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let registry = Arc::new(VirtualAppRegistry::open(&root).unwrap());
    let hooks = Arc::new(HookEngine::new(Arc::clone(&registry), Vec::new()));
    Fixture {
        root,
        registry,
        hooks,
        settings: Arc::new(MemorySettingsStore::new()),
        _dir: dir,
    }
}

fn fast_settings() -> LaunchSettings {
    LaunchSettings {
        settle_delay: Duration::from_millis(5),
        verification_timeout: Duration::from_millis(40),
        poll_interval: Duration::from_millis(5),
        ..LaunchSettings::default()
    }
}

impl Fixture {
    fn install(&self, package: &str, permissions: &[&str]) -> VirtualAppRecord {
        let binary = self.root.parent().unwrap().join(format!("{}.apk", package));
        std::fs::write(&binary, b"binary").unwrap();
        self.registry
            .install(
                &binary,
                &PackageMetadata::new(package, "Demo", 1).with_permissions(permissions),
                0,
            )
            .unwrap()
    }

    fn pipeline(&self, host: Arc<ScriptedHost>, settings: LaunchSettings) -> AppLaunchPipeline {
        AppLaunchPipeline::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.hooks),
            host,
            Arc::clone(&self.settings),
            settings,
        )
        .with_journal(LaunchJournal::new(self.journal_path()))
    }

    fn journal_path(&self) -> PathBuf {
        self.root.join("logs").join("launch_errors.log")
    }
}

fn journal_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[test]
fn test_not_installed_only_moves_counters() {
    let fx = fixture();
    let host = Arc::new(ScriptedHost::new(vec![ProcessStatus::Running]));
    let pipeline = fx.pipeline(Arc::clone(&host), fast_settings());

    let attempt = pipeline.launch("com.missing.app", 0);

    assert!(!attempt.is_success());
    assert!(matches!(attempt.error, Some(VcError::NotInstalled(_))));
    assert_eq!(attempt.states, [LaunchState::Idle, LaunchState::Failed]);
    assert!(attempt.applied_fixes.is_empty());
    assert_eq!(host.starts(), 0);

    let stats = pipeline.launch_stats();
    assert_eq!((stats.total, stats.successful, stats.failed), (1, 0, 1));
    assert!(!fx.journal_path().exists());
    assert!(!fx.root.join("data/user/0/com.missing.app").exists());
}

#[test]
fn test_camera_app_launch_registers_hooks() {
    let fx = fixture();
    fx.install("com.demo.app", &["camera"]);
    let host = Arc::new(ScriptedHost::new(vec![ProcessStatus::Running]));
    let pipeline = fx.pipeline(Arc::clone(&host), fast_settings());

    let attempt = pipeline.launch("com.demo.app", 0);

    assert!(attempt.is_success(), "{:?}", attempt.error);
    assert_eq!(
        attempt.states,
        [
            LaunchState::Idle,
            LaunchState::PreLaunchFixesApplied,
            LaunchState::Prepared,
            LaunchState::Launched,
            LaunchState::Verifying,
            LaunchState::Verified,
        ]
    );
    assert!(!attempt.retried);
    assert_eq!(attempt.pid, Some(0));
    assert_eq!(fx.hooks.hooks_for("com.demo.app"), HookPoint::all());
    assert!(attempt.applied_fixes.iter().all(|f| !f.is_post_launch()));
    assert!(attempt.applied_fixes.contains(&FixId::RuntimeEnvironment));

    let stats = pipeline.launch_stats();
    assert_eq!((stats.total, stats.successful, stats.failed), (1, 1, 0));
}

#[test]
fn test_demo_scenario() {
    let fx = fixture();
    let binary = fx.root.parent().unwrap().join("demo.apk");
    std::fs::write(&binary, vec![0u8; 2048]).unwrap();
    fx.registry
        .install(&binary, &PackageMetadata::new("com.demo.app", "Demo", 3), 0)
        .unwrap();

    // Default timings: 1000 ms settle, 10 000 ms verification bound
    let pipeline = fx.pipeline(
        Arc::new(ScriptedHost::new(vec![ProcessStatus::Running])),
        LaunchSettings::default(),
    );
    let started = Instant::now();
    let attempt = pipeline.launch("com.demo.app", 0);
    let elapsed = started.elapsed();

    assert!(attempt.is_success(), "{:?}", attempt.error);
    assert_eq!(
        attempt.states,
        [
            LaunchState::Idle,
            LaunchState::PreLaunchFixesApplied,
            LaunchState::Prepared,
            LaunchState::Launched,
            LaunchState::Verifying,
            LaunchState::Verified,
        ]
    );
    assert!(elapsed <= Duration::from_millis(10_000), "took {:?}", elapsed);
    assert_eq!(fx.registry.get("com.demo.app").unwrap().version_code, 3);

    let stats = pipeline.launch_stats();
    assert_eq!((stats.total, stats.successful, stats.failed), (1, 1, 0));
}

#[test]
fn test_plain_app_gets_no_hooks() {
    let fx = fixture();
    fx.install("com.plain.app", &[]);
    let pipeline = fx.pipeline(
        Arc::new(ScriptedHost::new(vec![ProcessStatus::Running])),
        fast_settings(),
    );

    assert!(pipeline.launch("com.plain.app", 0).is_success());
    assert!(fx.hooks.hooks_for("com.plain.app").is_empty());
}

#[test]
fn test_disabled_virtualization_skips_hooks() {
    let fx = fixture();
    fx.install("com.demo.app", &["camera"]);
    let settings = LaunchSettings {
        virtualization_enabled: false,
        ..fast_settings()
    };
    let pipeline = fx.pipeline(Arc::new(ScriptedHost::new(vec![ProcessStatus::Running])), settings);

    assert!(pipeline.launch("com.demo.app", 0).is_success());
    assert!(fx.hooks.registered_packages().is_empty());
}

#[test]
fn test_retry_succeeds_after_failed_verification() {
    let fx = fixture();
    fx.install("com.demo.app", &["camera"]);
    let host = Arc::new(ScriptedHost::new(vec![
        ProcessStatus::Exited(Some(1)),
        ProcessStatus::Running,
    ]));
    let pipeline = fx.pipeline(Arc::clone(&host), fast_settings());

    let attempt = pipeline.launch("com.demo.app", 0);

    assert!(attempt.is_success(), "{:?}", attempt.error);
    assert!(attempt.retried);
    assert_eq!(host.starts(), 2);
    assert_eq!(
        attempt.states,
        [
            LaunchState::Idle,
            LaunchState::PreLaunchFixesApplied,
            LaunchState::Prepared,
            LaunchState::Launched,
            LaunchState::Verifying,
            LaunchState::Failed,
            LaunchState::PostLaunchFixesApplied,
            LaunchState::Prepared,
            LaunchState::Launched,
            LaunchState::Verifying,
            LaunchState::Verified,
        ]
    );

    assert!(attempt.applied_fixes.iter().any(|f| !f.is_post_launch()));
    assert!(attempt.applied_fixes.contains(&FixId::IntentConflictResolution));
    for fix in &attempt.applied_fixes {
        let count = attempt.applied_fixes.iter().filter(|f| *f == fix).count();
        assert_eq!(count, 1, "{} recorded {} times", fix, count);
    }

    let stats = pipeline.launch_stats();
    assert_eq!((stats.total, stats.successful, stats.failed), (1, 1, 0));
}

#[test]
fn test_second_failure_is_terminal() {
    let fx = fixture();
    fx.install("com.demo.app", &[]);
    let host = Arc::new(ScriptedHost::new(vec![
        ProcessStatus::Exited(Some(1)),
        ProcessStatus::Exited(Some(2)),
        ProcessStatus::Running,
    ]));
    let pipeline = fx.pipeline(Arc::clone(&host), fast_settings());

    let attempt = pipeline.launch("com.demo.app", 0);

    assert!(!attempt.is_success());
    assert!(matches!(
        attempt.error,
        Some(VcError::LaunchVerificationFailed { .. })
    ));
    assert_eq!(host.starts(), 2, "exactly one retry");
    assert_eq!(attempt.state(), LaunchState::Failed);

    let stats = pipeline.launch_stats();
    assert_eq!((stats.total, stats.successful, stats.failed), (1, 0, 1));
    assert_eq!(journal_lines(&fx.journal_path()), 1);
}

#[test]
fn test_timeout_is_retried_once() {
    let fx = fixture();
    fx.install("com.demo.app", &[]);
    let host = Arc::new(ScriptedHost::new(vec![
        ProcessStatus::Starting,
        ProcessStatus::Starting,
    ]));
    let pipeline = fx.pipeline(Arc::clone(&host), fast_settings());

    let attempt = pipeline.launch("com.demo.app", 0);

    assert!(matches!(
        attempt.error,
        Some(VcError::LaunchVerificationFailed { .. })
    ));
    assert!(attempt.retried);
    assert_eq!(host.starts(), 2);
}

#[test]
fn test_missing_entry_point_is_not_retried() {
    let fx = fixture();
    fx.install("com.demo.app", &[]);
    let host = Arc::new(ScriptedHost::without_entry_point());
    let pipeline = fx.pipeline(Arc::clone(&host), fast_settings());

    let attempt = pipeline.launch("com.demo.app", 0);

    assert!(matches!(
        attempt.error,
        Some(VcError::LaunchEntryPointNotFound(_))
    ));
    assert!(!attempt.retried);
    assert_eq!(host.starts(), 0);
    assert!(!attempt.states.contains(&LaunchState::PostLaunchFixesApplied));
    assert!(attempt.applied_fixes.iter().all(|f| !f.is_post_launch()));

    let stats = pipeline.launch_stats();
    assert_eq!((stats.total, stats.successful, stats.failed), (1, 0, 1));
    assert_eq!(journal_lines(&fx.journal_path()), 1);
}

#[test]
fn test_counters_persist_and_reset() {
    let fx = fixture();
    fx.install("com.demo.app", &[]);
    {
        let pipeline = fx.pipeline(
            Arc::new(ScriptedHost::new(vec![ProcessStatus::Running])),
            fast_settings(),
        );
        pipeline.launch("com.demo.app", 0);
        pipeline.launch("com.missing.app", 0);
    }

    let pipeline = fx.pipeline(Arc::new(ScriptedHost::new(Vec::new())), fast_settings());
    let stats = pipeline.launch_stats();
    assert_eq!((stats.total, stats.successful, stats.failed), (2, 1, 1));
    assert!((stats.success_rate() - 0.5).abs() < 1e-9);

    pipeline.reset_launch_stats();
    assert_eq!(pipeline.launch_stats().total, 0);
    assert_eq!(fx.settings.get_int("launch_stats_total", -1), 0);
}

#[test]
fn test_launch_context_written_for_package() {
    let fx = fixture();
    let record = fx.install("com.demo.app", &[]);
    let pipeline = fx.pipeline(
        Arc::new(ScriptedHost::new(vec![ProcessStatus::Running])),
        fast_settings(),
    );

    assert!(pipeline.launch("com.demo.app", 7).is_success());

    let context = std::fs::read_to_string(record.data_directory.join("launch_context.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&context).unwrap();
    assert_eq!(value["package"], "com.demo.app");
    assert_eq!(value["user_id"], 7);
    for dir in ["files", "cache", "tmp"] {
        assert!(record.data_directory.join(dir).is_dir());
    }
}
