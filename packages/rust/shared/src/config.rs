//! Pipeline configuration for docstitch.
//!
//! The configuration lives in `docstitch.toml` next to the project being
//! documented. CLI flags override config file values, which override defaults.
//! Relative paths resolve against the config file's directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocstitchError, Result};
use crate::types::{BuildCommand, DestinationPolicy, DocSource, FailurePolicy};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "docstitch.toml";

// ---------------------------------------------------------------------------
// Config structs (matching docstitch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Global pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Environment passed to every build.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Publish target.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Documentation sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// `required` or `best-effort`.
    #[serde(default)]
    pub policy: FailurePolicy,

    /// Per-source build timeout in seconds (0 disables it).
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent builds.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Where the assembled site is written.
    #[serde(default = "default_site_root")]
    pub site_root: String,

    /// `create` or `require-existing`.
    #[serde(default)]
    pub destinations: DestinationPolicy,

    /// Name of the generated root redirect.
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::default(),
            timeout_secs: default_build_timeout(),
            concurrency: default_concurrency(),
            site_root: default_site_root(),
            destinations: DestinationPolicy::default(),
            index_file: default_index_file(),
        }
    }
}

fn default_build_timeout() -> u64 {
    1800
}
fn default_concurrency() -> u32 {
    4
}
fn default_site_root() -> String {
    "site".into()
}
fn default_index_file() -> String {
    "index.html".into()
}

/// Kind of publish target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishKind {
    #[default]
    Git,
    Directory,
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub kind: PublishKind,

    /// Git remote URL or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Branch that receives the site.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Name of the env var holding the push token (never store the token itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Push timeout in seconds (0 disables it).
    #[serde(default = "default_publish_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Commit message.
    #[serde(default = "default_message")]
    pub message: String,

    /// Target directory for the `directory` publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            kind: PublishKind::default(),
            remote: None,
            branch: default_branch(),
            token_env: None,
            timeout_secs: default_publish_timeout(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            message: default_message(),
            path: None,
        }
    }
}

fn default_branch() -> String {
    "gh-pages".into()
}
fn default_publish_timeout() -> u64 {
    300
}
fn default_author_name() -> String {
    "docstitch".into()
}
fn default_author_email() -> String {
    "docstitch@localhost".into()
}
fn default_message() -> String {
    "Publish documentation".into()
}

/// `[[sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source name.
    pub name: String,

    /// Build command as an argv array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Build command as a shell line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Working directory for the build.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Output directory the build produces, relative to `working_dir`.
    pub output: String,

    /// Where the output lands in the site tree.
    pub mount: String,

    #[serde(default)]
    pub primary: bool,

    /// Entry point relative to the output (used by the root redirect).
    #[serde(default = "default_entry")]
    pub entry: String,

    /// Source-specific environment overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_working_dir() -> String {
    ".".into()
}
fn default_entry() -> String {
    "index.html".into()
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// CLI flag overrides. `None` keeps the config file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub policy: Option<FailurePolicy>,
    pub timeout_secs: Option<u64>,
    pub concurrency: Option<u32>,
    pub site_root: Option<String>,
    pub branch: Option<String>,
}

/// Runtime pipeline settings with paths resolved.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub policy: FailurePolicy,
    /// Per-source build timeout.
    pub build_timeout: Option<Duration>,
    pub concurrency: usize,
    /// Absolute site root.
    pub site_root: PathBuf,
    pub destinations: DestinationPolicy,
    pub index_file: String,
    /// Environment for every build.
    pub env: BTreeMap<String, String>,
    /// Variables removed from build environments (publish credentials).
    pub scrub_env: Vec<String>,
}

impl SiteConfig {
    /// Apply CLI overrides on top of the file values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(policy) = overrides.policy {
            self.pipeline.policy = policy;
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.pipeline.timeout_secs = timeout;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.pipeline.concurrency = concurrency;
        }
        if let Some(root) = &overrides.site_root {
            self.pipeline.site_root = root.clone();
        }
        if let Some(branch) = &overrides.branch {
            self.publish.branch = branch.clone();
        }
    }

    /// Check the configuration for problems that don't need a build to detect.
    ///
    /// Mount layout (primary count, collisions) is checked by the planner.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(DocstitchError::config("no [[sources]] configured"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(DocstitchError::config("source with an empty name"));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(DocstitchError::config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            if source.command.is_some() && source.shell.is_some() {
                return Err(DocstitchError::config(format!(
                    "source '{}' sets both `command` and `shell`",
                    source.name
                )));
            }
            if matches!(&source.command, Some(argv) if argv.is_empty()) {
                return Err(DocstitchError::config(format!(
                    "source '{}' has an empty `command`",
                    source.name
                )));
            }
            if source.output.trim().is_empty() {
                return Err(DocstitchError::config(format!(
                    "source '{}' has an empty `output`",
                    source.name
                )));
            }
        }

        if self.pipeline.concurrency == 0 {
            return Err(DocstitchError::config("pipeline.concurrency must be at least 1"));
        }
        if self.pipeline.index_file.is_empty() || self.pipeline.index_file.contains('/') {
            return Err(DocstitchError::config(format!(
                "pipeline.index_file must be a plain file name, got '{}'",
                self.pipeline.index_file
            )));
        }

        match self.publish.kind {
            PublishKind::Git if self.publish.remote.is_none() => Err(DocstitchError::config(
                "publish.kind = \"git\" requires publish.remote",
            )),
            PublishKind::Directory if self.publish.path.is_none() => Err(DocstitchError::config(
                "publish.kind = \"directory\" requires publish.path",
            )),
            _ if self.publish.branch.trim().is_empty() => {
                Err(DocstitchError::config("publish.branch must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Resolve `[[sources]]` into immutable [`DocSource`]s.
    pub fn resolve_sources(&self, base_dir: &Path) -> Vec<DocSource> {
        self.sources
            .iter()
            .map(|s| {
                let command = match (&s.command, &s.shell) {
                    (Some(argv), _) => BuildCommand::Argv(argv.clone()),
                    (None, Some(line)) => BuildCommand::Shell(line.clone()),
                    (None, None) => BuildCommand::Prebuilt,
                };
                DocSource {
                    name: s.name.clone(),
                    command,
                    working_dir: resolve_path(base_dir, &s.working_dir),
                    output: PathBuf::from(&s.output),
                    mount: s.mount.clone(),
                    primary: s.primary,
                    entry: s.entry.clone(),
                    env: s.env.clone(),
                }
            })
            .collect()
    }

    /// Runtime pipeline settings with paths resolved against `base_dir`.
    pub fn pipeline_settings(&self, base_dir: &Path) -> PipelineSettings {
        PipelineSettings {
            policy: self.pipeline.policy,
            build_timeout: (self.pipeline.timeout_secs > 0)
                .then(|| Duration::from_secs(self.pipeline.timeout_secs)),
            concurrency: self.pipeline.concurrency.max(1) as usize,
            site_root: resolve_path(base_dir, &self.pipeline.site_root),
            destinations: self.pipeline.destinations,
            index_file: self.pipeline.index_file.clone(),
            env: self.env.clone(),
            scrub_env: self.publish.token_env.iter().cloned().collect(),
        }
    }
}

/// Join `raw` onto `base` unless it is already absolute.
pub fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the configuration from a specific file path.
pub fn load_config_from(path: &Path) -> Result<SiteConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocstitchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocstitchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Directory that relative paths in the config file resolve against.
pub fn config_base_dir(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = match parent {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().map_err(|e| DocstitchError::io(".", e))?,
    };
    std::path::absolute(&dir).map_err(|e| DocstitchError::io(&dir, e))
}

/// Starter configuration for `docstitch config init`: a systems-language API
/// reference at the root with two more doc trees mounted beneath it.
pub const STARTER_CONFIG: &str = r#"# docstitch configuration

[pipeline]
policy = "required"        # or "best-effort"
timeout_secs = 1800        # per-source build timeout, 0 = none
concurrency = 3
site_root = "site"
destinations = "create"    # or "require-existing"
index_file = "index.html"

[env]
RUSTDOCFLAGS = "--cfg docsrs"

[publish]
kind = "git"
remote = "https://github.com/OWNER/REPO.git"
branch = "gh-pages"
token_env = "GITHUB_TOKEN"

[[sources]]
name = "rust"
command = ["cargo", "doc", "--no-deps", "--workspace"]
output = "target/doc"
mount = "/"
primary = true
entry = "mycrate/index.html"

[[sources]]
name = "python"
shell = "make html"
working_dir = "py/docs"
output = "build/html"
mount = "/python"

[[sources]]
name = "nodejs"
command = ["npx", "typedoc"]
working_dir = "js"
output = "docs"
mount = "/nodejs"
"#;

/// Write the starter config to `path`. Refuses to overwrite an existing file.
pub fn init_config(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(DocstitchError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DocstitchError::io(parent, e))?;
    }
    std::fs::write(path, STARTER_CONFIG).map_err(|e| DocstitchError::io(path, e))?;
    tracing::info!(?path, "created starter config file");
    Ok(path.to_path_buf())
}
