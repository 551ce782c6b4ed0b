//! Error types for docstitch.
//!
//! Each pipeline stage has its own error type so callers can tell a broken
//! build from a mount collision from a rejected push. [`StageFailure`] wraps
//! any of them with the stage that produced it. Configuration and plain I/O
//! problems outside the stages use [`DocstitchError`].
//! The CLI wraps all of these with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::{Stage, duration_label};

/// Top-level error type for configuration and filesystem work outside a stage.
#[derive(Debug, thiserror::Error)]
pub enum DocstitchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocstitchError>;

impl DocstitchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// One source's external build did not produce usable output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("source `{name}` build exited with {}", exit_label(.exit_code))]
    Failed {
        name: String,
        exit_code: Option<i32>,
        /// Last lines of the captured stderr.
        stderr_tail: String,
    },

    #[error("source `{name}` build timed out after {}", ms_label(.after_ms))]
    TimedOut { name: String, after_ms: u64 },

    #[error("source `{name}` build could not be started: {message}")]
    Spawn { name: String, message: String },

    #[error("source `{name}` reported success but its output {path:?} does not exist")]
    OutputMissing { name: String, path: PathBuf },
}

impl BuildError {
    /// Name of the source this error belongs to.
    pub fn source_name(&self) -> &str {
        match self {
            Self::Failed { name, .. }
            | Self::TimedOut { name, .. }
            | Self::Spawn { name, .. }
            | Self::OutputMissing { name, .. } => name,
        }
    }
}

fn ms_label(ms: &u64) -> String {
    duration_label(*ms)
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (killed by signal)".to_string(),
    }
}

/// How two mount destinations collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Both sources resolve to the same destination.
    Duplicate,
    /// One destination is an ancestor of the other.
    Nested,
}

impl std::fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate => f.write_str("identical destinations"),
            Self::Nested => f.write_str("nested destinations"),
        }
    }
}

/// The mount plan could not be computed. Always raised before any file I/O.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    #[error("required sources failed to build: {}", .names.join(", "))]
    SourcesFailed { names: Vec<String> },

    #[error("no source is marked primary")]
    NoPrimary,

    #[error("more than one primary source: {}", .names.join(", "))]
    MultiplePrimaries { names: Vec<String> },

    #[error("primary source `{name}` has no successful build output")]
    PrimaryUnavailable { name: String },

    #[error("source `{name}`: invalid mount path {mount:?}: {reason}")]
    InvalidMount {
        name: String,
        mount: String,
        reason: String,
    },

    #[error("source `{name}` mounts at the site root but only the primary source may")]
    RootNotPrimary { name: String },

    #[error("primary source `{name}`: invalid entry point {entry:?}")]
    InvalidEntry { name: String, entry: String },

    #[error("collision {first}/{second}: {kind} ({first_mount} vs {second_mount})")]
    Collision {
        first: String,
        second: String,
        first_mount: String,
        second_mount: String,
        kind: CollisionKind,
    },
}

/// Copying outputs into the site tree failed. The staged tree is discarded.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("site root {path:?} already exists and is not empty")]
    RootNotEmpty { path: PathBuf },

    #[error("mount `{name}`: cannot read {path:?}: {source}")]
    SourceUnreadable {
        name: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("mount `{name}`: cannot write {path:?}: {source}")]
    DestinationUnwritable {
        name: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("mount `{name}`: destination parent {path:?} does not exist")]
    MissingDestination { name: String, path: PathBuf },

    #[error("mount `{name}`: destination {path:?} is already occupied")]
    Shadowed { name: String, path: PathBuf },

    #[error("mount `{name}` is empty after copying {path:?}")]
    EmptyMount { name: String, path: PathBuf },

    #[error("primary output already contains `{file}` at the site root")]
    IndexConflict { file: String },

    #[error("cannot finalize site at {path:?}: {source}")]
    Finalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl AssemblyError {
    /// Name of the mount involved, if the error is mount-specific.
    pub fn mount_name(&self) -> Option<&str> {
        match self {
            Self::SourceUnreadable { name, .. }
            | Self::DestinationUnwritable { name, .. }
            | Self::MissingDestination { name, .. }
            | Self::Shadowed { name, .. }
            | Self::EmptyMount { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Publishing the assembled tree failed.
///
/// The target keeps its previous state, except after [`PublishError::Timeout`]
/// and [`PublishError::Cancelled`], where the outcome is unknown.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("authentication to {remote} failed: {detail}")]
    Auth { remote: String, detail: String },

    #[error("push to {remote} was rejected: {detail}")]
    Rejected { remote: String, detail: String },

    #[error("transport failure talking to {remote}: {detail}")]
    Transport { remote: String, detail: String },

    #[error(
        "publish timed out after {}; re-check {target} before assuming it is unchanged",
        ms_label(.after_ms)
    )]
    Timeout { target: String, after_ms: u64 },

    #[error("publish cancelled; re-check {target} before assuming it is unchanged")]
    Cancelled { target: String },

    #[error("credential variable {var} is not set")]
    MissingCredential { var: String },

    #[error("cannot prepare snapshot: {detail}")]
    Snapshot { detail: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Swapping the new tree in failed and the previous tree could not be put
    /// back; it is still at `backup`.
    #[error("could not replace {path:?} ({swap}); restoring it from {backup:?} also failed: {source}")]
    RestoreFailed {
        path: PathBuf,
        backup: PathBuf,
        swap: std::io::Error,
        source: std::io::Error,
    },
}

/// Any error a stage can end in.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{}", join_build_errors(.0))]
    Build(Vec<BuildError>),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("cancelled")]
    Cancelled,
}

fn join_build_errors(errors: &[BuildError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A stage error tagged with the stage it came from.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    pub error: StageError,
}

impl StageFailure {
    pub fn new(stage: Stage, error: impl Into<StageError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}
