// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for sandbox and camera source operations
//!
//! This module provides command-line functionality for:
//! - Installing, listing, uninstalling and launching packages
//! - Inspecting launch counters and interception
//! - Choosing the virtual camera source and previewing it

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vcamera::backends::camera::{
    CameraFrame, CaptureApi, CaptureHandle, PreviewCallback, SyntheticCaptureHandle,
};
use vcamera::backends::virtual_camera::{CameraSource, SourceKind};
use vcamera::sandbox::HookPoint;
use vcamera::{AppContext, Config};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Install a package binary and wait for the outcome
pub fn install(config: Config, binary: PathBuf, user: u32) -> CliResult {
    let context = AppContext::new(config)?;
    let (manager, mut events) = context.app_manager()?;

    manager.install(binary, user);
    let result = events
        .install_results
        .next_blocking()
        .ok_or("Install worker stopped")?;

    if !result.success {
        return Err(result.message.into());
    }
    println!("{}", result.message);
    Ok(())
}

pub fn uninstall(config: Config, package: &str) -> CliResult {
    let context = AppContext::new(config)?;
    let (manager, mut events) = context.app_manager()?;

    manager.uninstall(package);
    let result = events
        .install_results
        .next_blocking()
        .ok_or("Uninstall worker stopped")?;

    if !result.success {
        return Err(result.message.into());
    }
    println!("{}", result.message);
    Ok(())
}

/// List installed packages
pub fn list(config: Config) -> CliResult {
    let context = AppContext::new(config)?;
    let records = context.registry.list();

    if records.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    println!("Installed packages:");
    println!();
    for record in &records {
        println!("  {} ({})", record.display_name, record.package_name);
        println!(
            "      Version: {}  User: {}  Installed: {}",
            record.version_code,
            record.owner_user_id,
            record.installed_at.format("%Y-%m-%d %H:%M")
        );
        println!("      Data: {}", record.data_directory.display());
    }
    println!();
    Ok(())
}

/// Launch a package and report the attempt
pub fn launch(config: Config, package: &str, user: u32) -> CliResult {
    let context = AppContext::new(config)?;
    let (manager, _events) = context.app_manager()?;

    println!("Launching {}...", package);
    let attempt = manager
        .launch_with_ticket(package, user)
        .wait()
        .ok_or("Launch worker stopped")?;

    if !attempt.applied_fixes.is_empty() {
        let fixes: Vec<String> = attempt.applied_fixes.iter().map(|f| f.to_string()).collect();
        println!("Fixes applied: {}", fixes.join(", "));
    }
    if attempt.retried {
        println!("First attempt failed, retried once");
    }

    match attempt.error {
        None => {
            match attempt.pid {
                Some(pid) => println!("Launched {} (pid {})", package, pid),
                None => println!("Launched {}", package),
            }
            Ok(())
        }
        Some(e) => Err(e.into()),
    }
}

/// Print (and optionally reset) launch counters
pub fn stats(config: Config, reset: bool) -> CliResult {
    let context = AppContext::new(config)?;
    if reset {
        context.pipeline.reset_launch_stats();
        println!("Launch stats reset.");
        return Ok(());
    }

    let stats = context.pipeline.launch_stats();
    println!("Launches:   {}", stats.total);
    println!("Successful: {}", stats.successful);
    println!("Failed:     {}", stats.failed);
    println!("Success:    {:.1}%", stats.success_rate() * 100.0);
    Ok(())
}

pub fn show_source(config: Config) -> CliResult {
    let context = AppContext::new(config)?;
    let source = context.sources.active_source();
    if source.locator.is_empty() {
        println!("Source: {}", source.kind);
    } else {
        println!("Source: {} ({})", source.kind, source.locator);
    }
    Ok(())
}

pub fn set_source(config: Config, kind: SourceKind, locator: String) -> CliResult {
    let context = AppContext::new(config)?;
    context.sources.set_source(CameraSource::new(kind, locator))?;

    let source = context.sources.active_source();
    println!("Source set to {}", source.kind);
    Ok(())
}

/// Run a synthetic preview of the active source until the duration ends or Ctrl+C
pub fn preview(config: Config, duration: u64, output: Option<PathBuf>) -> CliResult {
    let context = AppContext::new(config)?;
    let source = context.sources.active_source();
    println!("Previewing {} for {}s (Ctrl+C to stop)...", source.kind, duration);

    let mut handle = SyntheticCaptureHandle::new(
        "vcamera.preview",
        CaptureApi::Legacy,
        Arc::clone(&context.sources),
        context.captures.open_handles().clone(),
    );
    handle.open("preview")?;

    let last_frame: Arc<Mutex<Option<CameraFrame>>> = Arc::new(Mutex::new(None));
    let frames = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let callback: PreviewCallback = {
        let last_frame = Arc::clone(&last_frame);
        let frames = Arc::clone(&frames);
        Arc::new(move |frame: &CameraFrame| {
            frames.fetch_add(1, Ordering::Relaxed);
            *last_frame.lock().unwrap() = Some(frame.clone());
        })
    };
    handle.set_preview_callback(Some(callback));

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    handle.start_preview()?;
    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);
    while start.elapsed() < target_duration && !stop_flag.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    handle.release();

    let delivered = frames.load(Ordering::Relaxed);
    let elapsed = start.elapsed().as_secs_f64().max(0.001);
    println!("Delivered {} frames ({:.1} fps)", delivered, delivered as f64 / elapsed);

    if let Some(path) = output {
        let frame = last_frame.lock().unwrap().take().ok_or("No frame was delivered")?;
        let image = frame.to_image().ok_or("Delivered frame has an invalid size")?;
        image.save(&path)?;
        println!("Saved last frame to {}", path.display());
    }
    Ok(())
}

/// Show camera capability of installed packages
pub fn hooks(config: Config) -> CliResult {
    let context = AppContext::new(config)?;
    let records = context.registry.list();
    let enabled = context.captures.is_enabled();

    println!(
        "Camera virtualization: {}",
        if enabled { "enabled" } else { "disabled" }
    );
    if records.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    let all: Vec<String> = HookPoint::ALL.iter().map(|p| p.to_string()).collect();
    for record in &records {
        let capable = context.hooks.is_camera_capable(&record.package_name);
        let on_launch = if capable && enabled {
            all.join(", ")
        } else {
            "none".to_string()
        };
        println!("  {}", record.package_name);
        println!("      Camera capable: {}  Hooks on launch: {}", capable, on_launch);
    }
    Ok(())
}
