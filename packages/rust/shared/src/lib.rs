//! Shared types, error model, and configuration for docstitch.
//!
//! This crate is the foundation depended on by all other docstitch crates.
//! It provides:
//! - [`DocstitchError`] and the per-stage error types
//! - Domain types ([`DocSource`], [`BuildResult`], [`MountPath`], [`SiteTree`])
//! - Configuration ([`SiteConfig`], [`PipelineSettings`], config loading)
//! - [`fsutil`]: tree copy and digest helpers
//! - [`process`]: process-group cleanup for build and git subprocesses

pub mod config;
pub mod error;
pub mod fsutil;
pub mod process;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    CONFIG_FILE_NAME, ConfigOverrides, PipelineConfig, PipelineSettings, PublishConfig,
    PublishKind, STARTER_CONFIG, SiteConfig, SourceConfig, config_base_dir, init_config,
    load_config_from, resolve_path,
};
pub use error::{
    AssemblyError, BuildError, CollisionKind, DocstitchError, PlanningError, PublishError,
    Result, StageError, StageFailure,
};
pub use types::{
    BuildCommand, BuildResult, BuildStatus, DestinationPolicy, DocSource, FailurePolicy,
    MountPath, MountSummary, PublishResult, SiteTree, Stage, duration_label, tail_lines,
};
