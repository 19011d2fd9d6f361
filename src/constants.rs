// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Launch pipeline timing and limits
pub mod launch {
    use super::Duration;

    /// Wait between starting a process and the first liveness check
    pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);

    /// Upper bound on the verification wait
    pub const VERIFICATION_TIMEOUT: Duration = Duration::from_millis(10_000);

    /// Interval between liveness polls while verifying
    pub const VERIFICATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Number of retries after a failed verification
    pub const MAX_RETRIES: u32 = 1;

    /// Grace period for a terminated process before it is force-killed
    pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);

    /// Platform level from which scoped shared storage is laid out
    pub const SCOPED_STORAGE_LEVEL: u32 = 29;

    /// Platform level from which the compatibility manifest is written
    pub const COMPAT_MANIFEST_LEVEL: u32 = 31;

    /// Default host platform level when the config does not say
    pub const DEFAULT_PLATFORM_LEVEL: u32 = 33;
}

/// Capture virtualization defaults
pub mod capture {
    use super::Duration;

    /// Frame rate of synthetic preview delivery
    pub const DEFAULT_FRAME_RATE: u32 = 30;

    /// Capability reported by synthetic capture handles
    pub const NOMINAL_WIDTH: u32 = 1280;
    pub const NOMINAL_HEIGHT: u32 = 720;

    /// Upper bound on frames decoded into memory for sequence playback
    pub const MAX_SEQUENCE_FRAMES: usize = 300;

    /// Pull timeout for live relay frames
    pub const LIVE_PULL_TIMEOUT: Duration = Duration::from_millis(200);

    /// GStreamer pipeline timeout for frame extraction
    pub const DECODE_TIMEOUT_SECS: u64 = 5;

    /// Permissions that mark a package as a camera user
    pub const CAMERA_PERMISSIONS: &[&str] = &["camera", "android.permission.CAMERA"];

    /// Packages known to open the camera
    pub const DEFAULT_ALLOW_LIST: &[&str] = &[
        "com.whatsapp",
        "com.facebook.orca",
        "org.telegram.messenger",
        "com.facebook.katana",
        "com.google.android.talk",
        "com.zhiliaoapp.musically",
        "com.instagram.android",
        "com.snapchat.android",
        "com.skype.raider",
        "com.viber.voip",
        "com.imo.android.imoim",
        "kik.android",
        "jp.naver.line.android",
        "com.google.android.apps.tachyon",
    ];

    /// Highest pacing rate; faster configured rates are clamped to it
    pub const MAX_FRAME_RATE: u32 = 120;

    /// Convert a frame rate into the pacing period
    pub fn frame_interval(rate: u32) -> Duration {
        Duration::from_secs(1) / rate.clamp(1, MAX_FRAME_RATE)
    }
}

/// Keys used with the settings store
pub mod settings_keys {
    pub const CURRENT_SOURCE: &str = "current_source";
    pub const LOCAL_VIDEO_PATH: &str = "local_video_path";
    pub const NETWORK_VIDEO_URL: &str = "network_video_url";
    pub const LOCAL_PICTURE_PATH: &str = "local_picture_path";

    pub const TOTAL_LAUNCHES: &str = "launch_stats_total";
    pub const SUCCESSFUL_LAUNCHES: &str = "launch_stats_successful";
    pub const FAILED_LAUNCHES: &str = "launch_stats_failed";
}

/// On-disk layout below the data root
pub mod layout {
    /// Installed package directories
    pub const APPS_DIR: &str = "apps";

    /// Per-user data directories (`data/user/<uid>/<package>`)
    pub const DATA_DIR: &str = "data";
    pub const USER_DIR: &str = "user";

    /// Copied package binary inside an app directory
    pub const BINARY_FILE: &str = "base.apk";

    /// Catalogue record inside an app directory
    pub const RECORD_FILE: &str = "record.json";

    /// Packages already uninstalled or refused once, below the data root
    pub const TOMBSTONES_FILE: &str = "uninstalled.json";

    /// Prefix of in-flight install directories
    pub const STAGING_PREFIX: &str = ".staging-";

    /// Prefix of directories awaiting removal
    pub const TRASH_PREFIX: &str = ".trash-";

    /// Runtime subdirectories ensured inside every data directory
    pub const RUNTIME_DIRS: &[&str] = &["files", "cache", "tmp"];

    /// Launch context written before each launch
    pub const LAUNCH_CONTEXT_FILE: &str = "launch_context.json";

    /// Settings file inside the data root
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Launch failure journal, relative to the data root
    pub const LOG_DIR: &str = "logs";
    pub const LAUNCH_ERRORS_FILE: &str = "launch_errors.log";
}

/// Supported file formats for camera sources
pub mod file_formats {
    /// Supported image file extensions
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

    /// Animated formats decoded without GStreamer
    pub const ANIMATION_EXTENSIONS: &[&str] = &["gif"];

    /// Supported video file extensions
    pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov"];

    /// Check if a file extension is a supported image format
    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }

    /// Check if a file extension is an animated image
    pub fn is_animation_extension(ext: &str) -> bool {
        ANIMATION_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }

    /// Check if a file extension is a supported video format
    pub fn is_video_extension(ext: &str) -> bool {
        VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }
}

pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Directory name used under the platform config and data dirs
    pub const APP_DIR_NAME: &str = "vcamera";
}
