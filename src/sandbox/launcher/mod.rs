// SPDX-License-Identifier: GPL-3.0-only

//! Launch pipeline for sandboxed packages
//!
//! A launch walks a fixed state machine and retries exactly once when the
//! started process does not verify:
//!
//! ```text
//! Idle ─► PreLaunchFixesApplied ─► Prepared ─► Launched ─► Verifying ─┬─► Verified
//!                                     ▲                               │
//!                                     │                               ▼
//!                          PostLaunchFixesApplied ◄───────────────  Failed
//!                              (one retry only)
//! ```
//!
//! A missing entry point fails the launch without a retry. Every external
//! `launch` call moves the persisted counters exactly once.

mod fixes;
mod journal;
mod process;

pub use fixes::{
    FixContext, FixId, LaunchFix, post_launch_fixes, pre_launch_fixes,
};
pub use journal::LaunchJournal;
pub use process::{LaunchCommand, NativeProcessHost, ProcessHost, ProcessStatus};

use super::hooks::{HookEngine, HookPoint};
use super::registry::{VirtualAppRecord, VirtualAppRegistry};
use crate::config::Config;
use crate::constants::{launch, settings_keys};
use crate::errors::{Result, VcError};
use crate::settings::SettingsStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Step of the launch state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    PreLaunchFixesApplied,
    Prepared,
    Launched,
    Verifying,
    Verified,
    Failed,
    PostLaunchFixesApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Success,
    Failed,
}

/// Record of one external launch request
#[derive(Debug)]
pub struct LaunchAttempt {
    pub package_name: String,
    pub user_id: u32,
    /// Fixes that changed something, each listed once
    pub applied_fixes: Vec<FixId>,
    /// Every state entered, in order
    pub states: Vec<LaunchState>,
    pub outcome: LaunchOutcome,
    pub timestamp: DateTime<Utc>,
    /// Terminal error for a failed launch
    pub error: Option<VcError>,
    /// Whether the retry pass ran
    pub retried: bool,
    /// Pid of the verified process
    pub pid: Option<u32>,
}

impl LaunchAttempt {
    fn new(package_name: &str, user_id: u32) -> Self {
        Self {
            package_name: package_name.to_string(),
            user_id,
            applied_fixes: Vec::new(),
            states: vec![LaunchState::Idle],
            outcome: LaunchOutcome::Failed,
            timestamp: Utc::now(),
            error: None,
            retried: false,
            pid: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == LaunchOutcome::Success
    }

    /// Last state entered
    pub fn state(&self) -> LaunchState {
        self.states.last().copied().unwrap_or(LaunchState::Idle)
    }

    fn enter(&mut self, state: LaunchState) {
        debug!(package = %self.package_name, ?state, "Launch state");
        self.states.push(state);
    }
}

/// Persisted launch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

impl LaunchStats {
    /// Ratio of successful launches in `0.0..=1.0`, 0.0 before the first launch
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    fn load(settings: &dyn SettingsStore) -> Self {
        let read = |key| settings.get_int(key, 0).max(0) as u64;
        Self {
            total: read(settings_keys::TOTAL_LAUNCHES),
            successful: read(settings_keys::SUCCESSFUL_LAUNCHES),
            failed: read(settings_keys::FAILED_LAUNCHES),
        }
    }

    fn save(&self, settings: &dyn SettingsStore) -> Result<()> {
        settings.put_int(settings_keys::TOTAL_LAUNCHES, self.total as i64)?;
        settings.put_int(settings_keys::SUCCESSFUL_LAUNCHES, self.successful as i64)?;
        settings.put_int(settings_keys::FAILED_LAUNCHES, self.failed as i64)
    }
}

/// Timing and gating knobs of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub settle_delay: Duration,
    pub verification_timeout: Duration,
    pub poll_interval: Duration,
    pub platform_level: u32,
    pub virtualization_enabled: bool,
    pub verbose: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            settle_delay: launch::SETTLE_DELAY,
            verification_timeout: launch::VERIFICATION_TIMEOUT,
            poll_interval: launch::VERIFICATION_POLL_INTERVAL,
            platform_level: launch::DEFAULT_PLATFORM_LEVEL,
            virtualization_enabled: true,
            verbose: false,
        }
    }
}

impl LaunchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            verification_timeout: config.verification_timeout(),
            poll_interval: launch::VERIFICATION_POLL_INTERVAL,
            platform_level: config.host_platform_level,
            virtualization_enabled: config.virtualization_enabled,
            verbose: config.verbose_launch_logging,
        }
    }
}

/// Prepares, starts and verifies sandboxed packages
pub struct AppLaunchPipeline {
    registry: Arc<VirtualAppRegistry>,
    hooks: Arc<HookEngine>,
    host: Arc<dyn ProcessHost>,
    settings: Arc<dyn SettingsStore>,
    launch_settings: LaunchSettings,
    pre_fixes: Vec<Box<dyn LaunchFix>>,
    post_fixes: Vec<Box<dyn LaunchFix>>,
    journal: Option<LaunchJournal>,
    stats: Mutex<LaunchStats>,
    verbose: AtomicBool,
}

impl AppLaunchPipeline {
    pub fn new(
        registry: Arc<VirtualAppRegistry>,
        hooks: Arc<HookEngine>,
        host: Arc<dyn ProcessHost>,
        settings: Arc<dyn SettingsStore>,
        launch_settings: LaunchSettings,
    ) -> Self {
        let stats = LaunchStats::load(settings.as_ref());
        let verbose = AtomicBool::new(launch_settings.verbose);
        Self {
            registry,
            hooks,
            host,
            settings,
            launch_settings,
            pre_fixes: pre_launch_fixes(),
            post_fixes: post_launch_fixes(),
            journal: None,
            stats: Mutex::new(stats),
            verbose,
        }
    }

    /// Append failures of installed packages to `journal`
    pub fn with_journal(mut self, journal: LaunchJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn launch_stats(&self) -> LaunchStats {
        *self.stats.lock().unwrap()
    }

    pub fn reset_launch_stats(&self) {
        let mut stats = self.stats.lock().unwrap();
        *stats = LaunchStats::default();
        if let Err(e) = stats.save(self.settings.as_ref()) {
            warn!(error = %e, "Failed to persist launch stats");
        }
        info!("Launch stats reset");
    }

    /// Launch `package` for `user_id`
    ///
    /// Blocks through settle and verification; run it off any latency
    /// sensitive thread.
    pub fn launch(&self, package: &str, user_id: u32) -> LaunchAttempt {
        info!(package, user_id, "Launching");
        let mut attempt = LaunchAttempt::new(package, user_id);

        let result = match self.registry.get(package) {
            Some(record) => self.run(&record, &mut attempt),
            None => Err(VcError::NotInstalled(package.to_string())),
        };

        match result {
            Ok(()) => {
                attempt.outcome = LaunchOutcome::Success;
                info!(package, pid = ?attempt.pid, retried = attempt.retried, "Launch verified");
            }
            Err(e) => {
                if attempt.state() != LaunchState::Failed {
                    attempt.enter(LaunchState::Failed);
                }
                warn!(package, user_id, error = %e, "Launch failed");
                if !matches!(e, VcError::NotInstalled(_)) {
                    self.journal_failure(package, user_id, &e);
                }
                attempt.error = Some(e);
            }
        }

        self.record_outcome(attempt.outcome);
        attempt
    }

    fn run(&self, record: &VirtualAppRecord, attempt: &mut LaunchAttempt) -> Result<()> {
        let mut ctx = FixContext {
            record,
            user_id: attempt.user_id,
            host: self.host.as_ref(),
            platform_level: self.launch_settings.platform_level,
            attempt: 1,
        };

        self.apply_fixes(&self.pre_fixes, &ctx, attempt);
        attempt.enter(LaunchState::PreLaunchFixesApplied);

        let mut pass = 0;
        loop {
            self.prepare(record)?;
            attempt.enter(LaunchState::Prepared);

            let command = self
                .host
                .resolve_entry_point(record)
                .ok_or_else(|| VcError::LaunchEntryPointNotFound(record.package_name.clone()))?;

            let error = match self.start_and_verify(record, &command, attempt) {
                Ok(pid) => {
                    attempt.pid = Some(pid);
                    attempt.enter(LaunchState::Verified);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            attempt.enter(LaunchState::Failed);

            if pass >= launch::MAX_RETRIES {
                return Err(match error {
                    VcError::LaunchVerificationTimeout { package, .. } => {
                        VcError::LaunchVerificationFailed {
                            reason: "process did not come up before the timeout".into(),
                            package,
                        }
                    }
                    other => other,
                });
            }

            pass += 1;
            warn!(package = %record.package_name, error = %error, "Verification failed, retrying");
            attempt.retried = true;
            ctx.attempt = pass + 1;
            self.apply_fixes(&self.post_fixes, &ctx, attempt);
            attempt.enter(LaunchState::PostLaunchFixesApplied);
        }
    }

    fn prepare(&self, record: &VirtualAppRecord) -> Result<()> {
        std::fs::create_dir_all(&record.data_directory)?;

        let package = &record.package_name;
        if self.launch_settings.virtualization_enabled && self.hooks.is_camera_capable(package) {
            self.hooks
                .try_register_interception(package, &HookPoint::all())?;
        }
        Ok(())
    }

    fn start_and_verify(
        &self,
        record: &VirtualAppRecord,
        command: &LaunchCommand,
        attempt: &mut LaunchAttempt,
    ) -> Result<u32> {
        let package = &record.package_name;
        let pid = self.host.start(record, command).map_err(|e| {
            VcError::LaunchVerificationFailed {
                package: package.clone(),
                reason: format!("failed to start {}: {}", command.program.display(), e),
            }
        })?;
        attempt.enter(LaunchState::Launched);

        attempt.enter(LaunchState::Verifying);
        self.verify(package, pid)?;
        Ok(pid)
    }

    fn verify(&self, package: &str, pid: u32) -> Result<()> {
        std::thread::sleep(self.launch_settings.settle_delay);

        let timeout = self.launch_settings.verification_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self.host.status(package, pid) {
                ProcessStatus::Running => return Ok(()),
                ProcessStatus::Exited(code) => {
                    return Err(VcError::LaunchVerificationFailed {
                        package: package.to_string(),
                        reason: match code {
                            Some(code) => format!("process exited with status {}", code),
                            None => "process exited".into(),
                        },
                    });
                }
                ProcessStatus::Starting => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(VcError::LaunchVerificationTimeout {
                    package: package.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(self.launch_settings.poll_interval.min(deadline - now));
        }
    }

    fn apply_fixes(&self, fixes: &[Box<dyn LaunchFix>], ctx: &FixContext<'_>, attempt: &mut LaunchAttempt) {
        let verbose = self.verbose.load(Ordering::Relaxed);
        for fix in fixes {
            let id = fix.id();
            match fix.apply(ctx) {
                Ok(true) => {
                    if verbose {
                        info!(package = %ctx.record.package_name, fix = %id, "Launch fix applied");
                    } else {
                        debug!(package = %ctx.record.package_name, fix = %id, "Launch fix applied");
                    }
                    if !attempt.applied_fixes.contains(&id) {
                        attempt.applied_fixes.push(id);
                    }
                }
                Ok(false) => debug!(fix = %id, "Launch fix not needed"),
                Err(e) => {
                    warn!(package = %ctx.record.package_name, fix = %id, error = %e, "Launch fix failed, skipping")
                }
            }
        }
    }

    fn journal_failure(&self, package: &str, user_id: u32, error: &VcError) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.record_failure(package, user_id, &error.to_string()) {
            warn!(path = %journal.path().display(), error = %e, "Failed to write launch journal");
        }
    }

    fn record_outcome(&self, outcome: LaunchOutcome) {
        let mut stats = self.stats.lock().unwrap();
        stats.total += 1;
        match outcome {
            LaunchOutcome::Success => stats.successful += 1,
            LaunchOutcome::Failed => stats.failed += 1,
        }
        if let Err(e) = stats.save(self.settings.as_ref()) {
            warn!(error = %e, "Failed to persist launch stats");
        }
    }
}
