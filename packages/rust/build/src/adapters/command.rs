//! Adapter for builds driven by an external command.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use docstitch_shared::process::ProcessGroupGuard;
use docstitch_shared::{BuildCommand, BuildResult, BuildStatus, DocSource};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{BuildEnv, SourceBuildAdapter, finish, verify_output};

/// Runs a source's `command` (argv) or `shell` line as a subprocess.
pub struct CommandAdapter;

impl CommandAdapter {
    fn command_for(source: &DocSource) -> Option<Command> {
        match &source.command {
            BuildCommand::Argv(argv) => {
                let (exe, args) = argv.split_first()?;
                let mut cmd = Command::new(exe);
                cmd.args(args);
                Some(cmd)
            }
            BuildCommand::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                Some(cmd)
            }
            BuildCommand::Prebuilt => None,
        }
    }
}

#[async_trait]
impl SourceBuildAdapter for CommandAdapter {
    fn detect(&self, source: &DocSource) -> bool {
        matches!(
            source.command,
            BuildCommand::Argv(_) | BuildCommand::Shell(_)
        )
    }

    async fn run(&self, source: &DocSource, env: &BuildEnv) -> BuildResult {
        let start = Instant::now();

        let Some(mut cmd) = Self::command_for(source) else {
            return finish(
                source,
                self.name(),
                BuildStatus::SpawnFailed {
                    message: "empty build command".into(),
                },
                None,
                String::new(),
                String::new(),
                start,
            );
        };

        cmd.current_dir(&source.working_dir)
            .envs(&env.vars)
            .envs(&source.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        for var in &env.scrub {
            cmd.env_remove(var);
        }

        info!(
            source = %source.name,
            command = %source.command.describe(),
            working_dir = %source.working_dir.display(),
            "running build"
        );

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(source = %source.name, error = %e, "failed to spawn build");
                return finish(
                    source,
                    self.name(),
                    BuildStatus::SpawnFailed {
                        message: e.to_string(),
                    },
                    None,
                    String::new(),
                    String::new(),
                    start,
                );
            }
        };

        // Timeout or cancellation drops the child and this guard, killing
        // everything the build started.
        let _group = ProcessGroupGuard::new(child.id());
        let waited = match env.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    let after_ms = limit.as_millis() as u64;
                    warn!(source = %source.name, after_ms, "build timed out");
                    return finish(
                        source,
                        self.name(),
                        BuildStatus::TimedOut { after_ms },
                        None,
                        String::new(),
                        String::new(),
                        start,
                    );
                }
            },
            None => child.wait_with_output().await,
        };

        let output = match waited {
            Ok(output) => output,
            Err(e) => {
                return finish(
                    source,
                    self.name(),
                    BuildStatus::SpawnFailed {
                        message: format!("failed to wait for build: {e}"),
                    },
                    None,
                    String::new(),
                    String::new(),
                    start,
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            warn!(
                source = %source.name,
                exit_code = ?output.status.code(),
                "build failed"
            );
            return finish(
                source,
                self.name(),
                BuildStatus::Failed {
                    exit_code: output.status.code(),
                },
                None,
                stdout,
                stderr,
                start,
            );
        }

        let (status, path) = match verify_output(source) {
            Ok(path) => (BuildStatus::Succeeded, Some(path)),
            Err(status) => {
                warn!(source = %source.name, "build succeeded but declared output is missing");
                (status, None)
            }
        };

        debug!(source = %source.name, elapsed_ms = start.elapsed().as_millis(), "build finished");
        finish(source, self.name(), status, path, stdout, stderr, start)
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn successful_build_reports_output() {
        let tmp = temp_dir();
        let src = source("rust", shell("mkdir -p out && echo hi > out/index.html"), &tmp);

        let result = CommandAdapter.run(&src, &BuildEnv::default()).await;
        assert!(result.succeeded(), "status: {:?}", result.status);
        assert_eq!(result.output, Some(tmp.join("out")));
        assert_eq!(result.adapter, "command");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failing_build_captures_diagnostics() {
        let tmp = temp_dir();
        let src = source("python", shell("echo sphinx exploded >&2; exit 3"), &tmp);

        let result = CommandAdapter.run(&src, &BuildEnv::default()).await;
        assert_eq!(result.status, BuildStatus::Failed { exit_code: Some(3) });
        assert!(result.stderr.contains("sphinx exploded"));
        assert!(result.output.is_none());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn argv_build_runs_without_shell() {
        let tmp = temp_dir();
        std::fs::create_dir_all(tmp.join("out")).unwrap();
        let src = source("rust", BuildCommand::Argv(vec!["echo".into(), "hello".into()]), &tmp);

        let result = CommandAdapter.run(&src, &BuildEnv::default()).await;
        assert!(result.succeeded());
        assert!(result.stdout.contains("hello"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn missing_output_is_a_failure() {
        let tmp = temp_dir();
        let src = source("nodejs", shell("true"), &tmp);

        let result = CommandAdapter.run(&src, &BuildEnv::default()).await;
        assert_eq!(
            result.status,
            BuildStatus::OutputMissing {
                path: tmp.join("out")
            }
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn unknown_executable_is_spawn_failure() {
        let tmp = temp_dir();
        let src = source(
            "rust",
            BuildCommand::Argv(vec!["definitely-not-a-real-binary-ds".into()]),
            &tmp,
        );

        let result = CommandAdapter.run(&src, &BuildEnv::default()).await;
        assert!(matches!(result.status, BuildStatus::SpawnFailed { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn timeout_is_reported_as_failure() {
        let tmp = temp_dir();
        let src = source("slow", shell("sleep 5"), &tmp);
        let env = BuildEnv {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };

        let result = CommandAdapter.run(&src, &env).await;
        assert_eq!(result.status, BuildStatus::TimedOut { after_ms: 200 });
        assert!(result.duration_ms < 5000);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_nested_processes() {
        let tmp = temp_dir();
        let src = source(
            "nested",
            shell("sh -c 'sleep 1; mkdir -p out; echo late > out/late.html'; true"),
            &tmp,
        );
        let env = BuildEnv {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };

        let result = CommandAdapter.run(&src, &env).await;
        assert!(matches!(result.status, BuildStatus::TimedOut { .. }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!tmp.join("out/late.html").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn env_overrides_and_scrubbing() {
        let tmp = temp_dir();
        let mut src = source(
            "rust",
            shell("mkdir -p out && printf '%s|%s|%s' \"$GLOBAL\" \"$LOCAL\" \"${DS_TEST_TOKEN:-unset}\" > out/env.txt"),
            &tmp,
        );
        src.env.insert("LOCAL".into(), "from-source".into());

        let mut env = BuildEnv::default();
        env.vars.insert("GLOBAL".into(), "from-pipeline".into());
        env.vars.insert("LOCAL".into(), "from-pipeline".into());
        env.vars.insert("DS_TEST_TOKEN".into(), "secret".into());
        env.scrub.push("DS_TEST_TOKEN".into());

        let result = CommandAdapter.run(&src, &env).await;
        assert!(result.succeeded());
        let written = std::fs::read_to_string(tmp.join("out/env.txt")).unwrap();
        assert_eq!(written, "from-pipeline|from-source|unset");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
