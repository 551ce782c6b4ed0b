//! End-to-end pipeline: build sources → plan mounts → assemble site → publish.
//!
//! ```text
//! Pending → BuildingSources → Planning → Assembling → Publishing → Published
//!                  │              │           │  └──→ Assembled (no publisher)
//!                  └──────────────┴───────────┴────────────→ Failed(stage, reason)
//! ```
//!
//! `Published`, `Assembled`, and `Failed` are terminal.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use docstitch_build::{AdapterRegistry, BuildOptions, BuildProgress, BuildRunner};
use docstitch_publish::Publisher;
use docstitch_shared::{
    BuildError, BuildResult, BuildStatus, DocSource, DocstitchError, FailurePolicy,
    PipelineSettings, PublishError, PublishResult, SiteTree, Stage, StageError, StageFailure,
};

use crate::assembler::{self, AssembleOptions};
use crate::planner::{self, MountPlan};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Pipeline lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    BuildingSources,
    Planning,
    Assembling,
    Publishing,
    /// The site was published.
    Published,
    /// The site was assembled and publishing was skipped.
    Assembled,
    Failed { stage: Stage, reason: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Assembled | Self::Failed { .. })
    }

    /// The stage this state runs, if it is a working state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::BuildingSources => Some(Stage::BuildingSources),
            Self::Planning => Some(Stage::Planning),
            Self::Assembling => Some(Stage::Assembling),
            Self::Publishing => Some(Stage::Publishing),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BuildingSources => "building_sources",
            Self::Planning => "planning",
            Self::Assembling => "assembling",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Assembled => "assembled",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Pending, BuildingSources)
            | (BuildingSources, Planning)
            | (Planning, Assembling)
            | (Assembling, Publishing | Assembled)
            | (Publishing, Published) => true,
            (current, Failed { stage, .. }) => current.stage() == Some(*stage),
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { stage, reason } => write!(f, "failed({stage}): {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Tracks the current state and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: PipelineState::Pending,
            history: vec![PipelineState::Pending],
        }
    }
}

impl StateMachine {
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `next`. Terminal states never change.
    pub fn advance(&mut self, next: PipelineState) -> Result<(), DocstitchError> {
        if !self.state.can_transition_to(&next) {
            return Err(DocstitchError::validation(format!(
                "illegal pipeline transition {} -> {}",
                self.state, next
            )));
        }
        info!(from = %self.state.name(), to = %next.name(), "pipeline state");
        self.state = next.clone();
        self.history.push(next);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for pipeline operations.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a stage.
    fn stage(&self, stage: Stage);
    /// Called when a source build is queued.
    fn source_started(&self, name: &str);
    /// Called when a source build finishes, successfully or not.
    fn source_finished(&self, result: &BuildResult, done: usize, total: usize);
    /// Called once the pipeline reaches a terminal state.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn source_started(&self, _name: &str) {}
    fn source_finished(&self, _result: &BuildResult, _done: usize, _total: usize) {}
    fn done(&self, _report: &PipelineReport) {}
}

/// Adapts a `ProgressReporter` to the build runner's progress interface.
struct PipelineBuildProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl BuildProgress for PipelineBuildProgress<'_> {
    fn build_started(&self, source: &str) {
        self.inner.source_started(source);
    }

    fn build_finished(&self, result: &BuildResult, done: usize, total: usize) {
        self.inner.source_finished(result, done, total);
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One source's build outcome, as reported.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub source: String,
    pub adapter: String,
    #[serde(flatten)]
    pub status: BuildStatus,
    pub duration_ms: u64,
}

impl From<&BuildResult> for BuildSummary {
    fn from(result: &BuildResult) -> Self {
        Self {
            source: result.source.name.clone(),
            adapter: result.adapter.clone(),
            status: result.status.clone(),
            duration_ms: result.duration_ms,
        }
    }
}

/// Everything a run produced, up to the state it ended in.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub state: PipelineState,
    pub history: Vec<PipelineState>,
    pub builds: Vec<BuildSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<MountPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteTree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishResult>,
    pub elapsed_ms: u64,
    /// The typed error behind a `Failed` state.
    #[serde(skip)]
    pub failure: Option<StageFailure>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && matches!(self.state, PipelineState::Published | PipelineState::Assembled)
    }

    /// Split off the failure, if any.
    pub fn into_result(mut self) -> Result<Self, (Self, StageFailure)> {
        match self.failure.take() {
            Some(failure) => Err((self, failure)),
            None => Ok(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Orchestrates one run over a fixed set of sources.
pub struct Pipeline {
    sources: Vec<DocSource>,
    settings: PipelineSettings,
    runner: BuildRunner,
    publisher: Option<Box<dyn Publisher>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    pub fn new(sources: Vec<DocSource>, settings: PipelineSettings) -> Self {
        let runner = BuildRunner::new(BuildOptions::from(&settings));
        Self {
            sources,
            settings,
            runner,
            publisher: None,
            cancel: None,
        }
    }

    /// Use a custom adapter registry for builds.
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.runner = BuildRunner::with_registry(registry, BuildOptions::from(&self.settings));
        self
    }

    /// Publish with `publisher`. Without one, the run ends in `Assembled`.
    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Stop when the receiver observes `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run the pipeline to a terminal state.
    #[instrument(skip_all, fields(sources = self.sources.len(), policy = ?self.settings.policy))]
    pub async fn run(&self, progress: &dyn ProgressReporter) -> PipelineReport {
        let mut run = Run::new();
        let result = self.drive(&mut run, progress).await;

        if let Err(failure) = result {
            if let Some(site) = run.site.take() {
                assembler::discard(&site);
            }
            let mount = match &failure.error {
                StageError::Assembly(e) => e.mount_name(),
                _ => None,
            };
            error!(stage = %failure.stage, mount = ?mount, error = %failure, "pipeline failed");
            let failed = PipelineState::Failed {
                stage: failure.stage,
                reason: failure.error.to_string(),
            };
            if let Err(e) = run.machine.advance(failed) {
                warn!(error = %e, "could not record failure");
            }
            run.failure = Some(failure);
        }

        let report = run.into_report();
        info!(
            run_id = %report.run_id,
            state = %report.state,
            elapsed_ms = report.elapsed_ms,
            "pipeline finished"
        );
        progress.done(&report);
        report
    }

    async fn drive(&self, run: &mut Run, progress: &dyn ProgressReporter) -> Result<(), StageFailure> {
        let mut cancel = self.cancel.clone();

        // --- Building sources ---
        self.enter(run, PipelineState::BuildingSources, progress);
        let build_progress = PipelineBuildProgress { inner: progress };
        let results = tokio::select! {
            results = self.runner.build_all(&self.sources, &build_progress) => results,
            _ = cancelled(&mut cancel) => {
                return Err(StageFailure::new(Stage::BuildingSources, StageError::Cancelled));
            }
        };
        run.builds = results.iter().map(BuildSummary::from).collect();

        let errors: Vec<BuildError> = results.iter().filter_map(BuildResult::error).collect();
        if !errors.is_empty() {
            match self.settings.policy {
                FailurePolicy::Required => {
                    return Err(StageFailure::new(Stage::BuildingSources, StageError::Build(errors)));
                }
                FailurePolicy::BestEffort => {
                    for e in &errors {
                        warn!(source = %e.source_name(), error = %e, "source failed, continuing");
                    }
                }
            }
        }
        check_cancel(&cancel, Stage::BuildingSources)?;

        // --- Planning ---
        self.enter(run, PipelineState::Planning, progress);
        let plan = planner::plan(&results, self.settings.policy)
            .map_err(|e| StageFailure::new(Stage::Planning, e))?;
        run.plan = Some(plan.clone());
        check_cancel(&cancel, Stage::Planning)?;

        // --- Assembling ---
        self.enter(run, PipelineState::Assembling, progress);
        let options = AssembleOptions {
            destinations: self.settings.destinations,
            index_file: self.settings.index_file.clone(),
        };
        let site = assembler::assemble(&plan, &self.settings.site_root, &options)
            .map_err(|e| StageFailure::new(Stage::Assembling, e))?;
        run.site = Some(site.clone());
        check_cancel(&cancel, Stage::Assembling)?;

        // --- Publishing ---
        let Some(publisher) = &self.publisher else {
            info!(root = %site.root.display(), "publishing skipped");
            self.enter(run, PipelineState::Assembled, progress);
            return Ok(());
        };

        self.enter(run, PipelineState::Publishing, progress);
        let published = tokio::select! {
            published = publisher.publish(&site) => published,
            _ = cancelled(&mut cancel) => Err(PublishError::Cancelled { target: publisher.target() }),
        };
        let published = published.map_err(|e| StageFailure::new(Stage::Publishing, e))?;
        run.publish = Some(published);
        self.enter(run, PipelineState::Published, progress);
        Ok(())
    }

    fn enter(&self, run: &mut Run, next: PipelineState, progress: &dyn ProgressReporter) {
        if let Some(stage) = next.stage() {
            progress.stage(stage);
        }
        if let Err(e) = run.machine.advance(next) {
            warn!(error = %e, "unexpected pipeline transition");
        }
    }
}

/// Mutable state of one run.
struct Run {
    id: uuid::Uuid,
    started: Instant,
    machine: StateMachine,
    builds: Vec<BuildSummary>,
    plan: Option<MountPlan>,
    site: Option<SiteTree>,
    publish: Option<PublishResult>,
    failure: Option<StageFailure>,
}

impl Run {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            started: Instant::now(),
            machine: StateMachine::default(),
            builds: Vec::new(),
            plan: None,
            site: None,
            publish: None,
            failure: None,
        }
    }

    fn into_report(self) -> PipelineReport {
        PipelineReport {
            run_id: self.id.to_string(),
            state: self.machine.state().clone(),
            history: self.machine.history().to_vec(),
            builds: self.builds,
            plan: self.plan,
            site: self.site,
            publish: self.publish,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            failure: self.failure,
        }
    }
}

/// Resolves once cancellation is requested; never resolves without a receiver.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            if rx.wait_for(|c| *c).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

fn check_cancel(cancel: &Option<watch::Receiver<bool>>, stage: Stage) -> Result<(), StageFailure> {
    match cancel {
        Some(rx) if *rx.borrow() => Err(StageFailure::new(stage, StageError::Cancelled)),
        _ => Ok(()),
    }
}
