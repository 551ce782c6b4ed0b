//! Adapter for sources whose output is produced outside the pipeline.

use std::time::Instant;

use async_trait::async_trait;
use docstitch_shared::{BuildCommand, BuildResult, BuildStatus, DocSource};
use tracing::debug;

use super::{BuildEnv, SourceBuildAdapter, finish, verify_output};

/// Runs nothing; only checks that the declared output directory exists.
pub struct PrebuiltAdapter;

#[async_trait]
impl SourceBuildAdapter for PrebuiltAdapter {
    fn detect(&self, source: &DocSource) -> bool {
        source.command == BuildCommand::Prebuilt
    }

    async fn run(&self, source: &DocSource, _env: &BuildEnv) -> BuildResult {
        let start = Instant::now();
        let (status, path) = match verify_output(source) {
            Ok(path) => (BuildStatus::Succeeded, Some(path)),
            Err(status) => (status, None),
        };
        debug!(source = %source.name, ?status, "checked prebuilt output");
        finish(source, self.name(), status, path, String::new(), String::new(), start)
    }

    fn name(&self) -> &str {
        "prebuilt"
    }
}
