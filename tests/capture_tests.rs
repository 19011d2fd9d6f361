// SPDX-License-Identifier: MPL-2.0

//! Integration tests for capture handle virtualization

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vcamera::backends::camera::{
    CameraFrame, CaptureApi, CaptureHandle, CaptureParameters, CaptureState, FrameSink,
    OutputTarget, PreviewCallback, SyntheticCaptureHandle,
};
use vcamera::backends::virtual_camera::{CameraSource, MediaDecoder};
use vcamera::sandbox::launcher::LaunchCommand;
use vcamera::sandbox::{HookPoint, PackageMetadata, ProcessHost, ProcessStatus, VirtualAppRecord};
use vcamera::settings::MemorySettingsStore;
use vcamera::{AppContext, Config, VcError};

struct IdleHost;

impl ProcessHost for IdleHost {
    fn resolve_entry_point(&self, _: &VirtualAppRecord) -> Option<LaunchCommand> {
        None
    }
    fn start(&self, _: &VirtualAppRecord, _: &LaunchCommand) -> io::Result<u32> {
        Err(io::Error::other("not used"))
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

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<[u8; 4]>>,
}

impl RecordingSink {
    fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn since(&self, index: usize) -> Vec<[u8; 4]> {
        self.frames.lock().unwrap()[index..].to_vec()
    }
}

impl FrameSink for RecordingSink {
    fn present(&self, frame: &CameraFrame) {
        if let Some(pixel) = frame.pixel(0, 0) {
            self.frames.lock().unwrap().push(pixel);
        }
    }
}

const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const CAMERA_APP: &str = "com.demo.camera";

struct Fixture {
    dir: tempfile::TempDir,
    context: AppContext,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_root(dir.path().join("root"));
    config.camera_allow_list = vec!["com.allowed.app".into()];

    let context = AppContext::with_collaborators(
        config,
        Arc::new(MemorySettingsStore::new()),
        Arc::new(MediaDecoder::new(4, 4, 30)),
        Arc::new(IdleHost),
    )
    .unwrap();

    let binary = dir.path().join("camera.apk");
    std::fs::write(&binary, b"apk").unwrap();
    context
        .registry
        .install(
            &binary,
            &PackageMetadata::new(CAMERA_APP, "Camera Demo", 1).with_permissions(&["camera"]),
            0,
        )
        .unwrap();
    context
        .registry
        .install(&binary, &PackageMetadata::new("com.plain.app", "Plain", 1), 0)
        .unwrap();

    Fixture { dir, context }
}

impl Fixture {
    fn png(&self, name: &str, rgba: [u8; 4]) -> PathBuf {
        let path = self.dir.path().join(name);
        image::RgbaImage::from_pixel(8, 8, image::Rgba(rgba))
            .save(&path)
            .unwrap();
        path
    }

    fn use_image(&self, path: &Path) {
        self.context
            .sources
            .set_source(CameraSource::static_image(path))
            .unwrap();
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_factory_falls_back_to_real_handles() {
    let fx = fixture();
    let captures = &fx.context.captures;

    // Capable but not hooked yet
    let handle = captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    assert!(!handle.is_synthetic());
    drop(handle);

    fx.context
        .hooks
        .register_interception("com.plain.app", &HookPoint::all());
    let handle = captures.acquire("com.plain.app", CaptureApi::Legacy, "0");
    assert!(!handle.is_synthetic(), "plain app is not camera capable");
    drop(handle);

    // Only the legacy open hook is registered
    fx.context
        .hooks
        .register_interception(CAMERA_APP, &[HookPoint::CaptureOpen].into());
    let handle = captures.acquire(CAMERA_APP, CaptureApi::SecondGeneration, "0");
    assert!(!handle.is_synthetic());
    drop(handle);

    let handle = captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    assert!(handle.is_synthetic());
    assert_eq!(handle.state(), CaptureState::Opened);
    drop(handle);

    captures.set_enabled(false);
    let handle = captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    assert!(!handle.is_synthetic());
    assert_eq!(handle.state(), CaptureState::Opened);
}

#[test]
fn test_allow_listed_package_is_virtualized() {
    let fx = fixture();
    fx.context
        .hooks
        .register_interception("com.allowed.app", &HookPoint::all());

    let handle = fx
        .context
        .captures
        .acquire("com.allowed.app", CaptureApi::SecondGeneration, "1");
    assert!(handle.is_synthetic());
}

#[test]
fn test_device_held_by_synthetic_handle_falls_back() {
    let fx = fixture();
    fx.context.hooks.register_interception(CAMERA_APP, &HookPoint::all());
    let captures = &fx.context.captures;

    let first = captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    let second = captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    assert!(first.is_synthetic());
    assert!(!second.is_synthetic());
    assert_eq!(captures.open_handles().owner("0").as_deref(), Some(CAMERA_APP));

    let other = captures.acquire(CAMERA_APP, CaptureApi::Legacy, "1");
    assert!(other.is_synthetic());
    assert_eq!(captures.open_handles().len(), 2);
}

#[test]
fn test_preview_lifecycle() {
    let fx = fixture();
    fx.use_image(&fx.png("red.png", RED));
    fx.context.hooks.register_interception(CAMERA_APP, &HookPoint::all());

    let sink = Arc::new(RecordingSink::default());
    let callbacks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&callbacks);
    let callback: PreviewCallback = Arc::new(move |_frame: &CameraFrame| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut handle = fx.context.captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    assert!(handle.is_synthetic());
    handle.set_target(OutputTarget::new(Arc::clone(&sink) as Arc<dyn FrameSink>));
    handle.set_preview_callback(Some(callback));

    handle.start_preview().unwrap();
    assert_eq!(handle.state(), CaptureState::PreviewRunning);
    assert!(wait_until(Duration::from_secs(3), || callbacks.load(Ordering::SeqCst) >= 3));
    assert!(sink.since(0).iter().all(|p| *p == RED));

    // Already running: no second session
    handle.start_preview().unwrap();
    assert_eq!(fx.context.sources.provider().stats().starts, 1);

    handle.stop_preview();
    assert_eq!(handle.state(), CaptureState::Opened);
    assert!(!fx.context.sources.is_playing());
    let delivered = callbacks.load(Ordering::SeqCst);
    let presented = sink.len();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(callbacks.load(Ordering::SeqCst), delivered);
    assert_eq!(sink.len(), presented);

    handle.release();
    assert_eq!(handle.state(), CaptureState::Closed);
    assert!(fx.context.captures.open_handles().is_empty());
}

#[test]
fn test_switching_source_during_preview() {
    let fx = fixture();
    fx.use_image(&fx.png("red.png", RED));
    let blue = fx.png("blue.png", BLUE);
    fx.context.hooks.register_interception(CAMERA_APP, &HookPoint::all());

    let sink = Arc::new(RecordingSink::default());
    let target = OutputTarget::new(Arc::clone(&sink) as Arc<dyn FrameSink>);
    let mut handle = fx.context.captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    handle.set_target(target.clone());
    handle.start_preview().unwrap();
    assert!(wait_until(Duration::from_secs(3), || sink.len() >= 2));

    let provider = fx.context.sources.provider();
    let before = provider.stats();
    fx.use_image(&blue);
    let switched_at = sink.len();

    let after = provider.stats();
    assert_eq!(after.stops - before.stops, 1);
    assert_eq!(after.starts - before.starts, 1);
    assert_eq!(provider.output_target(), Some(target));

    assert!(wait_until(Duration::from_secs(3), || sink.len() >= switched_at + 3));
    let after_switch = sink.since(switched_at);
    assert!(
        after_switch.iter().all(|p| *p == BLUE),
        "old source frame delivered after the switch: {:?}",
        after_switch
    );
    handle.release();
}

#[test]
fn test_concurrent_previews_share_playback() {
    let fx = fixture();
    fx.use_image(&fx.png("red.png", RED));
    let blue = fx.png("blue.png", BLUE);
    fx.context.hooks.register_interception(CAMERA_APP, &HookPoint::all());

    let first_sink = Arc::new(RecordingSink::default());
    let second_sink = Arc::new(RecordingSink::default());
    let mut first = fx.context.captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    let mut second = fx.context.captures.acquire(CAMERA_APP, CaptureApi::Legacy, "1");
    assert!(first.is_synthetic() && second.is_synthetic());
    first.set_target(OutputTarget::new(Arc::clone(&first_sink) as Arc<dyn FrameSink>));
    second.set_target(OutputTarget::new(Arc::clone(&second_sink) as Arc<dyn FrameSink>));

    first.start_preview().unwrap();
    second.start_preview().unwrap();
    assert_eq!(fx.context.sources.provider().stats().starts, 1);
    assert!(wait_until(Duration::from_secs(3), || second_sink.len() >= 2));

    // The first handle keeps receiving frames after the second one stops
    second.stop_preview();
    assert!(fx.context.sources.is_playing());
    let stopped_at = first_sink.len();
    assert!(wait_until(Duration::from_secs(3), || first_sink.len() >= stopped_at + 3));

    // And still follows source switches
    fx.use_image(&blue);
    let switched_at = first_sink.len();
    assert!(wait_until(Duration::from_secs(3), || first_sink.len() >= switched_at + 3));
    assert!(first_sink.since(switched_at).iter().all(|p| *p == BLUE));

    first.stop_preview();
    assert!(!fx.context.sources.is_playing());
    assert_eq!(fx.context.sources.playback_consumers(), 0);
}

#[test]
fn test_closed_handle_cannot_preview() {
    let fx = fixture();
    let mut handle = SyntheticCaptureHandle::new(
        CAMERA_APP,
        CaptureApi::Legacy,
        Arc::clone(&fx.context.sources),
        fx.context.captures.open_handles().clone(),
    );

    let err = handle.start_preview().unwrap_err();
    assert!(matches!(err, VcError::CaptureState { .. }));
    assert!(!fx.context.sources.is_playing());
}

#[test]
fn test_parameters_are_advisory() {
    let fx = fixture();
    fx.context.hooks.register_interception(CAMERA_APP, &HookPoint::all());
    let mut handle = fx.context.captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");

    handle.set_parameters(CaptureParameters {
        preview_width: 640,
        preview_height: 480,
        frame_rate: 15,
    });

    let parameters = handle.parameters();
    assert_eq!((parameters.preview_width, parameters.preview_height), (1280, 720));
    assert_eq!(parameters.frame_rate, 30);
}

#[test]
fn test_dropping_handle_releases_device() {
    let fx = fixture();
    fx.use_image(&fx.png("red.png", RED));
    fx.context.hooks.register_interception(CAMERA_APP, &HookPoint::all());

    let mut handle = fx.context.captures.acquire(CAMERA_APP, CaptureApi::Legacy, "0");
    handle.start_preview().unwrap();
    drop(handle);

    assert!(fx.context.captures.open_handles().is_empty());
    assert!(!fx.context.sources.is_playing());
}

#[cfg(not(feature = "gstreamer"))]
#[test]
fn test_real_handle_without_camera_delivers_nothing() {
    let fx = fixture();
    let callbacks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&callbacks);

    let mut handle = fx.context.captures.acquire("com.plain.app", CaptureApi::Legacy, "0");
    assert!(!handle.is_synthetic());
    handle.set_preview_callback(Some(Arc::new(move |_: &CameraFrame| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    handle.start_preview().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    handle.release();

    assert_eq!(callbacks.load(Ordering::SeqCst), 0);
}
