//! Force-overwrite publishing to a git ref.
//!
//! Each publish builds one parentless commit of the whole site in a throwaway
//! git directory and force-pushes it to the target ref. History on that ref is
//! not preserved, and no other ref is touched. Git's ref update is atomic, so
//! the remote either keeps the old commit or moves to the new one. A push that
//! times out is checked with `ls-remote`; if the ref cannot be confirmed the
//! error says the target must be re-checked.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use docstitch_shared::process::ProcessGroupGuard;
use docstitch_shared::{PublishConfig, PublishError, PublishResult, SiteTree};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::target::PublishTarget;
use crate::Publisher;

/// Commit identity and limits for git publishing.
#[derive(Debug, Clone)]
pub struct GitOptions {
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    /// Limit for the push; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self::from(&PublishConfig::default())
    }
}

impl From<&PublishConfig> for GitOptions {
    fn from(config: &PublishConfig) -> Self {
        Self {
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
            message: config.message.clone(),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }
}

/// Publishes a site tree as a single orphan commit on a git ref.
pub struct GitPublisher {
    target: PublishTarget,
    options: GitOptions,
}

impl GitPublisher {
    pub fn new(target: PublishTarget, options: GitOptions) -> Self {
        Self { target, options }
    }

    /// A git invocation against the throwaway repository and the site work tree.
    fn git(&self, git_dir: &Path, work_tree: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("--git-dir")
            .arg(git_dir)
            .arg("--work-tree")
            .arg(work_tree)
            .current_dir(work_tree)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a local snapshot step; failures become [`PublishError::Snapshot`].
    async fn snapshot_step(&self, mut cmd: Command, step: &str) -> Result<String, PublishError> {
        let output = cmd.output().await.map_err(|e| PublishError::Snapshot {
            detail: format!("failed to run git {step}: {e}"),
        })?;
        if !output.status.success() {
            return Err(PublishError::Snapshot {
                detail: format!(
                    "git {step} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Create the orphan commit and return its id.
    async fn commit_snapshot(&self, git_dir: &Path, tree: &SiteTree) -> Result<String, PublishError> {
        let mut init = Command::new("git");
        init.args(["init", "--quiet", "--bare"])
            .arg(git_dir)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.snapshot_step(init, "init").await?;

        let mut add = self.git(git_dir, &tree.root);
        add.args(["add", "--all", "--force", "."]);
        self.snapshot_step(add, "add").await?;

        let message = format!(
            "{}\n\nsite digest: {}\nfiles: {}",
            self.options.message, tree.digest, tree.file_count
        );
        let mut commit = self.git(git_dir, &tree.root);
        commit
            .arg("-c")
            .arg(format!("user.name={}", self.options.author_name))
            .arg("-c")
            .arg(format!("user.email={}", self.options.author_email))
            .args(["-c", "commit.gpgsign=false"])
            .args(["commit", "--quiet", "--no-verify", "--allow-empty", "-m"])
            .arg(&message);
        self.snapshot_step(commit, "commit").await?;

        let mut rev = self.git(git_dir, &tree.root);
        rev.args(["rev-parse", "HEAD"]);
        self.snapshot_step(rev, "rev-parse").await
    }

    /// Run a git command that talks to the remote. `Ok(None)` means it hit
    /// `limit`; its whole process group is killed before this returns.
    async fn remote_step(
        &self,
        mut cmd: Command,
        limit: Option<Duration>,
        step: &str,
    ) -> Result<Option<Output>, PublishError> {
        cmd.envs(self.target.auth_env());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| PublishError::Transport {
            remote: self.target.describe(),
            detail: format!("failed to run git {step}: {e}"),
        })?;
        let _group = ProcessGroupGuard::new(child.id());

        let waited = match limit {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => return Ok(None),
            },
            None => child.wait_with_output().await,
        };
        waited.map(Some).map_err(|e| PublishError::Transport {
            remote: self.target.describe(),
            detail: format!("failed to wait for git {step}: {e}"),
        })
    }

    /// Force-push HEAD (`commit`) to the target ref.
    async fn push(&self, git_dir: &Path, work_tree: &Path, commit: &str) -> Result<(), PublishError> {
        let mut cmd = self.git(git_dir, work_tree);
        cmd.args(["push", "--force", "--quiet"])
            .arg(self.target.push_url())
            .arg(format!("HEAD:{}", self.target.ref_name()));

        let Some(output) = self.remote_step(cmd, self.options.timeout, "push").await? else {
            return self.confirm_after_timeout(git_dir, work_tree, commit).await;
        };
        if output.status.success() {
            return Ok(());
        }
        let stderr = self.target.redact(String::from_utf8_lossy(&output.stderr).trim());
        Err(classify_push_failure(self.target.describe(), stderr))
    }

    /// A timed-out push may still have landed. Look at the remote ref: if it
    /// already holds `commit` the publish went through; otherwise the outcome
    /// is unknown and the caller has to re-check the target.
    async fn confirm_after_timeout(
        &self,
        git_dir: &Path,
        work_tree: &Path,
        commit: &str,
    ) -> Result<(), PublishError> {
        let limit = self.options.timeout.unwrap_or(Duration::from_secs(30));
        let mut cmd = self.git(git_dir, work_tree);
        cmd.arg("ls-remote")
            .arg(self.target.push_url())
            .arg(self.target.ref_name());

        match self.remote_step(cmd, Some(limit), "ls-remote").await {
            Ok(Some(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let remote_head = stdout.split_whitespace().next().unwrap_or("");
                if remote_head == commit {
                    warn!(%commit, "push timed out after the remote ref was updated");
                    return Ok(());
                }
                warn!(remote_head, "push timed out; remote ref does not show the new commit");
            }
            _ => warn!("push timed out; remote ref could not be checked"),
        }
        Err(PublishError::Timeout {
            target: self.target.describe(),
            after_ms: limit.as_millis() as u64,
        })
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    fn target(&self) -> String {
        self.target.describe()
    }

    #[instrument(skip_all, fields(target = %self.target.describe(), digest = %tree.digest))]
    async fn publish(&self, tree: &SiteTree) -> Result<PublishResult, PublishError> {
        let git_dir = tempfile::Builder::new()
            .prefix("docstitch-publish-")
            .tempdir()
            .map_err(|e| PublishError::Snapshot {
                detail: format!("cannot create scratch git dir: {e}"),
            })?;
        let git_path = git_dir.path().join("repo.git");

        let commit = self.commit_snapshot(&git_path, tree).await?;
        debug!(%commit, files = tree.file_count, "snapshot committed");

        info!("pushing site");
        if let Err(e) = self.push(&git_path, &tree.root, &commit).await {
            warn!(error = %e, "push failed");
            return Err(e);
        }

        info!(%commit, "site published");
        Ok(PublishResult {
            target: self.target.describe(),
            commit: Some(commit),
            digest: tree.digest.clone(),
            file_count: tree.file_count,
            published_at: Utc::now(),
        })
    }
}

fn classify_push_failure(remote: String, detail: String) -> PublishError {
    let lower = detail.to_lowercase();
    let auth_markers = [
        "authentication failed",
        "could not read username",
        "permission denied",
        "returned error: 401",
        "returned error: 403",
        "invalid credentials",
        "terminal prompts disabled",
    ];
    if auth_markers.iter().any(|m| lower.contains(m)) {
        PublishError::Auth { remote, detail }
    } else if lower.contains("rejected") || lower.contains("declined") {
        PublishError::Rejected { remote, detail }
    } else {
        PublishError::Transport { remote, detail }
    }
}
