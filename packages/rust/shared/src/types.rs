//! Core domain types shared by every pipeline stage.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What to do when some sources fail to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any single failure aborts the pipeline before publishing.
    #[default]
    Required,
    /// Publish whatever built successfully.
    BestEffort,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "required" => Ok(Self::Required),
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            other => Err(format!(
                "unknown policy '{other}': expected 'required' or 'best-effort'"
            )),
        }
    }
}

/// Whether a missing destination parent inside the site tree is created or rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationPolicy {
    #[default]
    Create,
    RequireExisting,
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BuildingSources,
    Planning,
    Assembling,
    Publishing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildingSources => "building_sources",
            Self::Planning => "planning",
            Self::Assembling => "assembling",
            Self::Publishing => "publishing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MountPath
// ---------------------------------------------------------------------------

/// A normalized location inside the site tree. `/` is the root.
///
/// Normalization drops empty and `.` segments along with leading and trailing
/// separators; `..` segments are rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MountPath {
    segments: Vec<String>,
}

impl MountPath {
    /// The site root.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Normalize a configured mount path. Returns the rejection reason on failure.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let mut segments = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => return Err("parent-traversal segments are not allowed".into()),
                s if s.contains('\0') => return Err("mount path contains a NUL byte".into()),
                s => segments.push(s.to_string()),
            }
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &MountPath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Path relative to the site root, without a leading slash (`""` for root).
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }

    /// Resolve this mount under a filesystem root.
    pub fn resolve(&self, root: &std::path::Path) -> PathBuf {
        self.segments.iter().fold(root.to_path_buf(), |p, s| p.join(s))
    }
}

impl std::fmt::Display for MountPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl Serialize for MountPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// DocSource
// ---------------------------------------------------------------------------

/// How a source's documentation gets built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildCommand {
    /// Executable plus arguments, run without a shell.
    Argv(Vec<String>),
    /// A command line run through `sh -c`.
    Shell(String),
    /// Nothing to run; the output directory is produced elsewhere.
    Prebuilt,
}

impl BuildCommand {
    /// Short human-readable rendering for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Argv(argv) => argv.join(" "),
            Self::Shell(line) => format!("sh -c {line:?}"),
            Self::Prebuilt => "(prebuilt)".to_string(),
        }
    }
}

/// One documentation origin, resolved from configuration. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocSource {
    /// Unique source name.
    pub name: String,
    /// External build command.
    pub command: BuildCommand,
    /// Directory the build runs in (absolute).
    pub working_dir: PathBuf,
    /// Declared output directory, relative to `working_dir` or absolute.
    pub output: PathBuf,
    /// Mount path as configured; normalized by the planner.
    pub mount: String,
    /// Whether the root index redirects to this source.
    pub primary: bool,
    /// Entry point relative to the source's output.
    pub entry: String,
    /// Source-specific environment overrides.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl DocSource {
    /// Absolute path where the build is expected to leave its output.
    pub fn output_path(&self) -> PathBuf {
        if self.output.is_absolute() {
            self.output.clone()
        } else {
            self.working_dir.join(&self.output)
        }
    }
}

// ---------------------------------------------------------------------------
// BuildResult
// ---------------------------------------------------------------------------

/// Outcome of one external build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded,
    Failed { exit_code: Option<i32> },
    TimedOut { after_ms: u64 },
    SpawnFailed { message: String },
    OutputMissing { path: PathBuf },
}

/// Result of running one source's build. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    /// The source that was built.
    pub source: DocSource,
    /// Adapter that ran the build.
    pub adapter: String,
    pub status: BuildStatus,
    /// Absolute output directory; only set on success.
    pub output: Option<PathBuf>,
    /// Captured stdout.
    #[serde(skip)]
    pub stdout: String,
    /// Captured stderr.
    #[serde(skip)]
    pub stderr: String,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, BuildStatus::Succeeded) && self.output.is_some()
    }

    /// The failure as a [`BuildError`], or `None` on success.
    pub fn error(&self) -> Option<BuildError> {
        let name = self.source.name.clone();
        match &self.status {
            BuildStatus::Succeeded if self.output.is_some() => None,
            BuildStatus::Succeeded => Some(BuildError::OutputMissing {
                name,
                path: self.source.output_path(),
            }),
            BuildStatus::Failed { exit_code } => Some(BuildError::Failed {
                name,
                exit_code: *exit_code,
                stderr_tail: tail_lines(&self.stderr, 20),
            }),
            BuildStatus::TimedOut { after_ms } => Some(BuildError::TimedOut {
                name,
                after_ms: *after_ms,
            }),
            BuildStatus::SpawnFailed { message } => Some(BuildError::Spawn {
                name,
                message: message.clone(),
            }),
            BuildStatus::OutputMissing { path } => Some(BuildError::OutputMissing {
                name,
                path: path.clone(),
            }),
        }
    }
}

/// Last `n` lines of captured output.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Human-readable form of a millisecond duration: `250ms`, `30s`, `1.5s`.
pub fn duration_label(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

// ---------------------------------------------------------------------------
// SiteTree
// ---------------------------------------------------------------------------

/// One mount as it landed in the site tree.
#[derive(Debug, Clone, Serialize)]
pub struct MountSummary {
    pub source: String,
    pub destination: MountPath,
    pub file_count: usize,
}

/// The assembled site directory, ready to publish.
#[derive(Debug, Clone, Serialize)]
pub struct SiteTree {
    /// Directory holding the finished tree.
    pub root: PathBuf,
    /// Primary source name.
    pub primary: String,
    /// Root index file name (e.g. `index.html`).
    pub index_file: String,
    /// Relative URL the root index redirects to.
    pub index_target: String,
    pub mounts: Vec<MountSummary>,
    /// Total regular files, including the root index.
    pub file_count: usize,
    /// SHA-256 over sorted (relative path, content) pairs.
    pub digest: String,
}

// ---------------------------------------------------------------------------
// PublishResult
// ---------------------------------------------------------------------------

/// What a successful publish produced.
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    /// Redacted description of the target (`<remote>#<ref>` or a directory).
    pub target: String,
    /// Commit id for git targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Site digest that was published.
    pub digest: String,
    pub file_count: usize,
    pub published_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_path_normalizes() {
        let m = MountPath::parse("/python/").unwrap();
        assert_eq!(m.to_string(), "/python");
        assert_eq!(m.relative(), "python");

        let m = MountPath::parse("./api//v1/.").unwrap();
        assert_eq!(m.to_string(), "/api/v1");

        assert!(MountPath::parse("/").unwrap().is_root());
        assert!(MountPath::parse("").unwrap().is_root());
    }

    #[test]
    fn mount_path_rejects_traversal() {
        let err = MountPath::parse("/docs/../etc").unwrap_err();
        assert!(err.contains("parent-traversal"));
    }

    #[test]
    fn ancestor_is_segment_based() {
        let b = MountPath::parse("/b").unwrap();
        let bc = MountPath::parse("/b/c").unwrap();
        let bee = MountPath::parse("/bee").unwrap();
        assert!(b.is_ancestor_of(&bc));
        assert!(!bc.is_ancestor_of(&b));
        assert!(!b.is_ancestor_of(&bee));
        assert!(!b.is_ancestor_of(&b));
        assert!(MountPath::root().is_ancestor_of(&b));
    }

    #[test]
    fn policy_from_str() {
        assert_eq!("best-effort".parse::<FailurePolicy>(), Ok(FailurePolicy::BestEffort));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn build_result_error_mapping() {
        let source = DocSource {
            name: "rust".into(),
            command: BuildCommand::Prebuilt,
            working_dir: PathBuf::from("/work"),
            output: PathBuf::from("target/doc"),
            mount: "/".into(),
            primary: true,
            entry: "index.html".into(),
            env: BTreeMap::new(),
        };
        let result = BuildResult {
            source,
            adapter: "command".into(),
            status: BuildStatus::TimedOut { after_ms: 5000 },
            output: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 5000,
        };
        assert!(!result.succeeded());
        assert_eq!(
            result.error(),
            Some(BuildError::TimedOut {
                name: "rust".into(),
                after_ms: 5000
            })
        );
    }

    #[test]
    fn durations_keep_sub_second_precision() {
        assert_eq!(duration_label(200), "200ms");
        assert_eq!(duration_label(30_000), "30s");
        assert_eq!(duration_label(1_500), "1.5s");
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail_lines("a", 5), "a");
    }
}
