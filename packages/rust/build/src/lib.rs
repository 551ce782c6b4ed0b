//! Source build adapters and the concurrent build runner.
//!
//! This crate provides:
//! - [`SourceBuildAdapter`]: the pluggable wrapper around one external build
//! - [`AdapterRegistry`]: picks the adapter for a [`DocSource`](docstitch_shared::DocSource)
//! - [`BuildRunner`]: runs every source with bounded concurrency

pub mod adapters;
pub mod runner;

pub use adapters::{AdapterRegistry, BuildEnv, CommandAdapter, PrebuiltAdapter, SourceBuildAdapter};
pub use runner::{BuildOptions, BuildProgress, BuildRunner, SilentBuildProgress};
