//! Core pipeline orchestration and domain logic for docstitch.
//!
//! This crate ties together source builds, mount planning, site assembly, and
//! publishing into one run (see [`pipeline::Pipeline`]).

pub mod assembler;
pub mod pipeline;
pub mod planner;

pub use assembler::{AssembleOptions, assemble, redirect_document};
pub use pipeline::{
    BuildSummary, Pipeline, PipelineReport, PipelineState, ProgressReporter, SilentProgress,
    StateMachine,
};
pub use planner::{MountPlan, PlannedMount, plan, validate_layout};
