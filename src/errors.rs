// SPDX-License-Identifier: MPL-2.0

//! Error types for the sandbox and capture virtualization layers
//!
//! Registry and camera source errors are returned to the immediate caller.
//! Launch errors travel inside [`crate::sandbox::LaunchAttempt`] and the
//! `LaunchResult` event once the retry policy is exhausted. Nothing here
//! terminates the process.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`VcError`]
pub type Result<T> = std::result::Result<T, VcError>;

/// Crate-wide error taxonomy
#[derive(Debug, Error)]
pub enum VcError {
    /// Package is not present in the registry
    #[error("Package not installed: {0}")]
    NotInstalled(String),

    /// Package binary is missing, not a regular file, or cannot be read
    #[error("Package binary unreadable: {path}: {reason}")]
    ApkUnreadable { path: PathBuf, reason: String },

    /// Metadata collaborator could not produce usable package metadata
    #[error("Metadata extraction failed: {0}")]
    MetadataExtractionFailed(String),

    /// Interception table rejected a registration
    #[error("Hook registration failed for {package}: {reason}")]
    HookRegistrationFailed { package: String, reason: String },

    /// Camera source failed validation or decoding
    #[error("Invalid camera source: {0}")]
    SourceInvalid(String),

    /// Capture handle operation called in the wrong lifecycle state
    #[error("Capture handle is {state}, cannot {operation}")]
    CaptureState {
        state: &'static str,
        operation: &'static str,
    },

    /// No runnable entry point could be resolved (fatal, never retried)
    #[error("No launchable entry point for {0}")]
    LaunchEntryPointNotFound(String),

    /// Process did not come up before the verification timeout
    #[error("Launch verification timed out for {package} after {timeout_ms} ms")]
    LaunchVerificationTimeout { package: String, timeout_ms: u64 },

    /// Process exited or never started during verification; terminal once
    /// the retry is spent
    #[error("Launch verification failed for {package}: {reason}")]
    LaunchVerificationFailed { package: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VcError {
    /// Whether the launch pipeline may spend its single retry on this error
    ///
    /// Only verification errors qualify. After the retry the pipeline always
    /// ends with [`VcError::LaunchVerificationFailed`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VcError::LaunchVerificationTimeout { .. } | VcError::LaunchVerificationFailed { .. }
        )
    }

    /// Short machine-friendly name of the variant, used in logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            VcError::NotInstalled(_) => "NotInstalled",
            VcError::ApkUnreadable { .. } => "ApkUnreadable",
            VcError::MetadataExtractionFailed(_) => "MetadataExtractionFailed",
            VcError::HookRegistrationFailed { .. } => "HookRegistrationFailed",
            VcError::SourceInvalid(_) => "SourceInvalid",
            VcError::CaptureState { .. } => "CaptureState",
            VcError::LaunchEntryPointNotFound(_) => "LaunchEntryPointNotFound",
            VcError::LaunchVerificationTimeout { .. } => "LaunchVerificationTimeout",
            VcError::LaunchVerificationFailed { .. } => "LaunchVerificationFailed",
            VcError::Io(_) => "Io",
            VcError::Serialization(_) => "Serialization",
        }
    }
}
