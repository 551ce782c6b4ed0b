//! Concurrent execution of all configured source builds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use docstitch_shared::{BuildResult, BuildStatus, DocSource, PipelineSettings};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::adapters::{AdapterRegistry, BuildEnv, finish};

/// Options controlling a build round.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Maximum number of builds running at once.
    pub concurrency: usize,
    pub env: BuildEnv,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            env: BuildEnv::default(),
        }
    }
}

impl From<&PipelineSettings> for BuildOptions {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            env: BuildEnv {
                vars: settings.env.clone(),
                scrub: settings.scrub_env.clone(),
                timeout: settings.build_timeout,
            },
        }
    }
}

impl BuildOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.env.timeout = Some(timeout);
        self
    }
}

/// Callbacks for per-source build progress.
pub trait BuildProgress: Send + Sync {
    fn build_started(&self, source: &str);
    fn build_finished(&self, result: &BuildResult, done: usize, total: usize);
}

/// Runs every source through its adapter.
pub struct BuildRunner {
    registry: Arc<AdapterRegistry>,
    options: BuildOptions,
}

impl BuildRunner {
    pub fn new(options: BuildOptions) -> Self {
        Self::with_registry(AdapterRegistry::new(), options)
    }

    pub fn with_registry(registry: AdapterRegistry, options: BuildOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            options,
        }
    }

    /// Build all sources, at most `concurrency` at a time.
    ///
    /// Returns exactly one result per source, in input order. Dropping the
    /// returned future aborts outstanding builds and kills their processes.
    #[instrument(skip_all, fields(sources = sources.len(), concurrency = self.options.concurrency))]
    pub async fn build_all(
        &self,
        sources: &[DocSource],
        progress: &dyn BuildProgress,
    ) -> Vec<BuildResult> {
        let total = sources.len();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, source) in sources.iter().enumerate() {
            progress.build_started(&source.name);
            let registry = self.registry.clone();
            let env = self.options.env.clone();
            let sem = semaphore.clone();
            let source = source.clone();

            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let result = match registry.detect(&source) {
                    Some(adapter) => adapter.run(&source, &env).await,
                    None => finish(
                        &source,
                        "none",
                        BuildStatus::SpawnFailed {
                            message: "no adapter can build this source".into(),
                        },
                        None,
                        String::new(),
                        String::new(),
                        Instant::now(),
                    ),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<BuildResult>> = vec![None; total];
        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    done += 1;
                    progress.build_finished(&result, done, total);
                    slots[index] = Some(result);
                }
                Err(e) => warn!(error = %e, "build task aborted"),
            }
        }

        let results: Vec<BuildResult> = slots
            .into_iter()
            .zip(sources)
            .map(|(slot, source)| {
                slot.unwrap_or_else(|| {
                    finish(
                        source,
                        "none",
                        BuildStatus::SpawnFailed {
                            message: "build task panicked".into(),
                        },
                        None,
                        String::new(),
                        String::new(),
                        Instant::now(),
                    )
                })
            })
            .collect();

        let failed = results.iter().filter(|r| !r.succeeded()).count();
        info!(total, failed, "builds complete");
        results
    }
}

/// No-op build progress for headless use.
pub struct SilentBuildProgress;

impl BuildProgress for SilentBuildProgress {
    fn build_started(&self, _source: &str) {}
    fn build_finished(&self, _result: &BuildResult, _done: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::adapters::test_support::*;

    #[derive(Default)]
    struct Recorder {
        finished: Mutex<Vec<String>>,
    }

    impl BuildProgress for Recorder {
        fn build_started(&self, _source: &str) {}
        fn build_finished(&self, result: &BuildResult, _done: usize, _total: usize) {
            self.finished.lock().unwrap().push(result.source.name.clone());
        }
    }

    #[tokio::test]
    async fn results_follow_input_order() {
        let tmp = temp_dir();
        let sources = vec![
            source("a", shell("sleep 0.3; mkdir -p out"), &tmp.join("a")),
            source("b", shell("exit 1"), &tmp.join("b")),
            source("c", shell("mkdir -p out"), &tmp.join("c")),
        ];
        for s in &sources {
            std::fs::create_dir_all(&s.working_dir).unwrap();
        }

        let recorder = Recorder::default();
        let runner = BuildRunner::new(BuildOptions::default());
        let results = runner.build_all(&sources, &recorder).await;

        let names: Vec<_> = results.iter().map(|r| r.source.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(results[0].succeeded());
        assert!(!results[1].succeeded());
        assert!(results[2].succeeded());

        // "a" sleeps, so it cannot finish first.
        let finished = recorder.finished.lock().unwrap();
        assert_eq!(finished.len(), 3);
        assert_ne!(finished[0], "a");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn concurrency_limit_serializes_builds() {
        let tmp = temp_dir();
        // Each build fails if another one's marker is present.
        let script = "if ls ../*.lock >/dev/null 2>&1; then exit 9; fi; \
                      touch ../$NAME.lock; sleep 0.2; rm ../$NAME.lock; mkdir -p out";
        let mut sources = Vec::new();
        for name in ["x", "y", "z"] {
            let dir = tmp.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            let mut s = source(name, shell(script), &dir);
            s.env.insert("NAME".into(), name.into());
            sources.push(s);
        }

        let runner = BuildRunner::new(BuildOptions {
            concurrency: 1,
            ..Default::default()
        });
        let results = runner.build_all(&sources, &SilentBuildProgress).await;
        assert!(results.iter().all(|r| r.succeeded()), "{results:?}");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn one_timeout_does_not_block_others() {
        let tmp = temp_dir();
        let sources = vec![
            source("slow", shell("sleep 10"), &tmp),
            source("fast", shell("mkdir -p out"), &tmp),
        ];

        let runner =
            BuildRunner::new(BuildOptions::default().with_timeout(Duration::from_millis(300)));
        let started = Instant::now();
        let results = runner.build_all(&sources, &SilentBuildProgress).await;

        assert!(matches!(results[0].status, BuildStatus::TimedOut { .. }));
        assert!(results[1].succeeded());
        assert!(started.elapsed() < Duration::from_secs(10));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_build_all_stops_nested_processes() {
        let tmp = temp_dir();
        let sources = vec![source(
            "nested",
            shell("sh -c 'sleep 1; mkdir -p out; echo late > out/late.html'; true"),
            &tmp,
        )];

        let runner = BuildRunner::new(BuildOptions::default());
        let cancelled = tokio::time::timeout(
            Duration::from_millis(200),
            runner.build_all(&sources, &SilentBuildProgress),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!tmp.join("out/late.html").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn options_from_settings() {
        let mut config = docstitch_shared::SiteConfig::default();
        config.pipeline.concurrency = 3;
        config.publish.token_env = Some("GITHUB_TOKEN".into());

        let settings = config.pipeline_settings(std::path::Path::new("/project"));
        let options = BuildOptions::from(&settings);
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.env.scrub, vec!["GITHUB_TOKEN".to_string()]);
        assert_eq!(options.env.timeout, Some(Duration::from_secs(1800)));
    }
}
