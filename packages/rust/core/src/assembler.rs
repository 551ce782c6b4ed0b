//! Site assembler.
//!
//! Executes a [`MountPlan`]: copies every build output into place, writes the
//! root redirect, checks the result, and only then moves the finished tree to
//! the site root.
//!
//! ```text
//! <site_root>/
//! ├── index.html        (redirect to the primary's entry point)
//! ├── <primary output>  (when the primary mounts at `/`)
//! ├── b/                (mount "/b")
//! └── c/                (mount "/c")
//! ```
//!
//! Everything is built in a hidden sibling staging directory. Each mount is
//! copied into its own partial directory and renamed into place; any failure
//! removes the staging directory, so a half-built tree never appears at the
//! site root.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use docstitch_shared::fsutil::{self, CopyFailure};
use docstitch_shared::{AssemblyError, DestinationPolicy, MountSummary, SiteTree};

use crate::planner::{MountPlan, PlannedMount};

/// Options for [`assemble`].
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub destinations: DestinationPolicy,
    /// Name of the root redirect file.
    pub index_file: String,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            destinations: DestinationPolicy::Create,
            index_file: "index.html".into(),
        }
    }
}

/// Content of the root redirect document.
pub fn redirect_document(target: &str) -> String {
    format!("<meta http-equiv=refresh content=0;url={target}>")
}

/// Assemble the site tree described by `plan` at `root`.
///
/// `root` must not exist or be an empty directory.
#[instrument(skip_all, fields(root = %root.display(), mounts = plan.mounts.len()))]
pub fn assemble(
    plan: &MountPlan,
    root: &Path,
    options: &AssembleOptions,
) -> Result<SiteTree, AssemblyError> {
    if root.exists() && (!root.is_dir() || fsutil::is_non_empty_dir(root)) {
        return Err(AssemblyError::RootNotEmpty {
            path: root.to_path_buf(),
        });
    }

    let staging = staging_dir(root)?;
    info!(staging = %staging.display(), "assembling site");

    let built = build_tree(plan, &staging, options).and_then(|mounts| {
        let (digest, file_count) = fsutil::tree_digest(&staging).map_err(|e| {
            AssemblyError::Finalize {
                path: staging.clone(),
                source: e,
            }
        })?;
        finalize(&staging, root)?;
        Ok((mounts, digest, file_count))
    });

    let (mounts, digest, file_count) = match built {
        Ok(done) => done,
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), error = %cleanup, "failed to remove staging directory");
            }
            return Err(e);
        }
    };

    info!(file_count, digest = %digest, "site assembled");

    Ok(SiteTree {
        root: root.to_path_buf(),
        primary: plan.primary.clone(),
        index_file: options.index_file.clone(),
        index_target: plan.index_target.clone(),
        mounts,
        file_count,
        digest,
    })
}

/// Remove an assembled tree (used when a run is abandoned before publishing).
pub fn discard(tree: &SiteTree) {
    match std::fs::remove_dir_all(&tree.root) {
        Ok(()) => info!(root = %tree.root.display(), "discarded assembled site"),
        Err(e) => warn!(root = %tree.root.display(), error = %e, "failed to discard assembled site"),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn staging_dir(root: &Path) -> Result<PathBuf, AssemblyError> {
    let parent = root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| AssemblyError::Finalize {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "site".into());
    let staging = parent.join(format!(".{name}.staging-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir(&staging).map_err(|e| AssemblyError::Finalize {
        path: staging.clone(),
        source: e,
    })?;
    Ok(staging)
}

/// Copy every mount, write the index, and verify the post-condition.
fn build_tree(
    plan: &MountPlan,
    staging: &Path,
    options: &AssembleOptions,
) -> Result<Vec<MountSummary>, AssemblyError> {
    let mut summaries = Vec::with_capacity(plan.mounts.len());
    for mount in &plan.mounts {
        let file_count = copy_mount(mount, staging, options.destinations)?;
        debug!(source = %mount.source, mount = %mount.destination, file_count, "mount copied");
        summaries.push(MountSummary {
            source: mount.source.clone(),
            destination: mount.destination.clone(),
            file_count,
        });
    }

    write_index(staging, &options.index_file, &plan.index_target)?;

    for mount in &plan.mounts {
        let dest = mount.destination.resolve(staging);
        if !fsutil::is_non_empty_dir(&dest) {
            return Err(AssemblyError::EmptyMount {
                name: mount.source.clone(),
                path: mount.output.clone(),
            });
        }
    }

    Ok(summaries)
}

fn copy_mount(
    mount: &PlannedMount,
    staging: &Path,
    policy: DestinationPolicy,
) -> Result<usize, AssemblyError> {
    let map_copy = |e: CopyFailure| match e {
        CopyFailure::Read { path, source } => AssemblyError::SourceUnreadable {
            name: mount.source.clone(),
            path,
            source,
        },
        CopyFailure::Write { path, source } => AssemblyError::DestinationUnwritable {
            name: mount.source.clone(),
            path,
            source,
        },
    };

    // The root mount is the base layer; the whole staging dir is its rollback.
    if mount.destination.is_root() {
        let copied = fsutil::copy_tree(&mount.output, staging).map_err(map_copy)?;
        return non_empty(mount, copied);
    }

    let dest = mount.destination.resolve(staging);
    if dest.exists() {
        return Err(AssemblyError::Shadowed {
            name: mount.source.clone(),
            path: dest,
        });
    }

    let parent = dest.parent().unwrap_or(staging);
    match policy {
        DestinationPolicy::Create => {
            std::fs::create_dir_all(parent).map_err(|e| AssemblyError::DestinationUnwritable {
                name: mount.source.clone(),
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        DestinationPolicy::RequireExisting if !parent.is_dir() => {
            return Err(AssemblyError::MissingDestination {
                name: mount.source.clone(),
                path: parent.to_path_buf(),
            });
        }
        DestinationPolicy::RequireExisting => {}
    }

    let leaf = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = parent.join(format!(".{leaf}.partial"));

    let copied = match fsutil::copy_tree(&mount.output, &partial) {
        Ok(n) => n,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&partial);
            return Err(map_copy(e));
        }
    };
    if copied == 0 {
        let _ = std::fs::remove_dir_all(&partial);
        return non_empty(mount, copied);
    }
    std::fs::rename(&partial, &dest).map_err(|e| {
        let _ = std::fs::remove_dir_all(&partial);
        AssemblyError::DestinationUnwritable {
            name: mount.source.clone(),
            path: dest.clone(),
            source: e,
        }
    })?;
    Ok(copied)
}

fn non_empty(mount: &PlannedMount, copied: usize) -> Result<usize, AssemblyError> {
    if copied == 0 {
        Err(AssemblyError::EmptyMount {
            name: mount.source.clone(),
            path: mount.output.clone(),
        })
    } else {
        Ok(copied)
    }
}

/// Write the root redirect atomically (temp file, then rename).
fn write_index(staging: &Path, index_file: &str, target: &str) -> Result<(), AssemblyError> {
    let index = staging.join(index_file);
    if index.exists() {
        return Err(AssemblyError::IndexConflict {
            file: index_file.to_string(),
        });
    }
    let temp = staging.join(format!(".{index_file}.tmp"));
    let finalize_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| AssemblyError::Finalize { path, source }
    };
    std::fs::write(&temp, redirect_document(target)).map_err(finalize_err(&temp))?;
    std::fs::rename(&temp, &index).map_err(finalize_err(&index))?;
    debug!(file = %index_file, target = %target, "wrote root index");
    Ok(())
}

/// Move the finished staging tree to the site root.
fn finalize(staging: &Path, root: &Path) -> Result<(), AssemblyError> {
    if root.is_dir() {
        // Only an empty directory gets here.
        std::fs::remove_dir(root).map_err(|e| AssemblyError::Finalize {
            path: root.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::rename(staging, root).map_err(|e| AssemblyError::Finalize {
        path: root.to_path_buf(),
        source: e,
    })
}
