//! Source build adapter trait and built-in adapters.
//!
//! An adapter wraps one kind of external documentation build and reports what
//! it produced as a [`BuildResult`]. Failures are data, never panics or errors,
//! so the planner decides whether a failure is fatal.

mod command;
mod prebuilt;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use docstitch_shared::{BuildResult, BuildStatus, DocSource};

pub use command::CommandAdapter;
pub use prebuilt::PrebuiltAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Environment handed to every build.
#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
    /// Pipeline-provided variables, applied before source overrides.
    pub vars: BTreeMap<String, String>,
    /// Variables removed from the child environment.
    pub scrub: Vec<String>,
    /// Kill the build after this long.
    pub timeout: Option<Duration>,
}

/// Pluggable wrapper around one kind of external documentation build.
///
/// Adapters are tried in registration order; the first whose `detect` returns
/// `true` runs the source.
#[async_trait]
pub trait SourceBuildAdapter: Send + Sync {
    /// Whether this adapter should handle the source.
    fn detect(&self, source: &DocSource) -> bool;

    /// Run the build. Side effects stay inside the source's own directories.
    async fn run(&self, source: &DocSource, env: &BuildEnv) -> BuildResult;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SourceBuildAdapter>>,
}

impl AdapterRegistry {
    /// Create a registry with the built-in adapters.
    pub fn new() -> Self {
        Self {
            adapters: vec![Box::new(CommandAdapter), Box::new(PrebuiltAdapter)],
        }
    }

    /// Register an adapter ahead of the built-ins.
    pub fn with_adapter(mut self, adapter: Box<dyn SourceBuildAdapter>) -> Self {
        self.adapters.insert(0, adapter);
        self
    }

    /// Find the adapter for a source.
    pub fn detect(&self, source: &DocSource) -> Option<&dyn SourceBuildAdapter> {
        self.adapters
            .iter()
            .find(|a| a.detect(source))
            .map(|a| a.as_ref())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by adapters
// ---------------------------------------------------------------------------

/// Check that the declared output directory exists after a successful build.
pub(crate) fn verify_output(source: &DocSource) -> Result<PathBuf, BuildStatus> {
    let path = source.output_path();
    if path.is_dir() {
        Ok(path)
    } else {
        Err(BuildStatus::OutputMissing { path })
    }
}

/// Assemble a [`BuildResult`]. `output` is dropped unless the status is a success.
pub(crate) fn finish(
    source: &DocSource,
    adapter: &str,
    status: BuildStatus,
    output: Option<PathBuf>,
    stdout: String,
    stderr: String,
    started: Instant,
) -> BuildResult {
    let output = match status {
        BuildStatus::Succeeded => output,
        _ => None,
    };
    BuildResult {
        source: source.clone(),
        adapter: adapter.to_string(),
        status,
        output,
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
