//! Error kinds surfaced to the user.
//!
//! Every failure the dispatcher reports carries one of these kinds somewhere in
//! its `anyhow` chain. The kind decides the process exit code; context layers
//! added with `.context(...)` only change the printed message.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::module::{ModuleKey, ModuleName, Version, VersionSpec};

/// One side of a version conflict: who asked, what they asked for, and what
/// that request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub requester: String,
    pub spec: VersionSpec,
    pub resolved: Version,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requires {} (resolves to {})",
            self.requester, self.spec, self.resolved
        )
    }
}

#[derive(Debug, Error)]
pub enum ModError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error(
        "No workspace found at {} or any of its parents. Run `modman init` first.",
        .root.display()
    )]
    WorkspaceNotInitialized { root: PathBuf },

    #[error(
        "{} is already inside the workspace rooted at {}",
        .path.display(),
        .root.display()
    )]
    AlreadyInitialized { path: PathBuf, root: PathBuf },

    #[error("Module {name} {spec} not found{}", majors_hint(.available_majors))]
    NotFound {
        name: ModuleName,
        spec: VersionSpec,
        available_majors: Vec<u32>,
    },

    #[error("Version conflict on {name}: {first}, but {second}")]
    VersionConflict {
        name: ModuleName,
        first: Requirement,
        second: Requirement,
    },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Failed to fetch {url} after {attempts} attempt(s): {message}")]
    Network {
        url: String,
        attempts: usize,
        message: String,
    },

    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: ModuleKey,
        expected: String,
        actual: String,
    },

    #[error("Failed to {operation} {}: {message}", .path.display())]
    Io {
        operation: String,
        path: PathBuf,
        message: String,
    },

    #[error("Self-update failed: {message}")]
    SelfUpdate { message: String },

    #[error("Workspace index {} is corrupted: {message}", .path.display())]
    IndexCorrupted { path: PathBuf, message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

fn majors_hint(majors: &[u32]) -> String {
    if majors.is_empty() {
        return String::new();
    }
    let listed: Vec<String> = majors.iter().map(|m| m.to_string()).collect();
    format!(" (available major versions: {})", listed.join(", "))
}

impl ModError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ModError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Wraps an underlying failure as an `Io` kind, keeping its full chain in the message.
    pub fn io(operation: &str, path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        ModError::Io {
            operation: operation.to_string(),
            path: path.into(),
            message: format!("{:#}", err),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            ModError::InvalidArgument { .. } => 2,
            ModError::WorkspaceNotInitialized { .. } => 3,
            ModError::AlreadyInitialized { .. } => 4,
            ModError::NotFound { .. } => 5,
            ModError::VersionConflict { .. } => 6,
            ModError::CycleDetected { .. } => 7,
            ModError::Network { .. } => 8,
            ModError::ChecksumMismatch { .. } => 9,
            ModError::Io { .. } => 10,
            ModError::SelfUpdate { .. } => 11,
            ModError::IndexCorrupted { .. } => 12,
            ModError::Cancelled => 130,
        }
    }
}

/// Finds the first `ModError` in an error chain.
pub fn kind_of(err: &anyhow::Error) -> Option<&ModError> {
    err.chain().find_map(|e| e.downcast_ref::<ModError>())
}

/// Exit code for a failed command; errors without a kind exit with 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    kind_of(err).map(ModError::exit_code).unwrap_or(1)
}

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(kind_of(err), Some(ModError::Cancelled))
}
