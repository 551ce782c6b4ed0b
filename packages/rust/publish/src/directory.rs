//! Overwrite a local directory with the site tree.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use docstitch_shared::fsutil::{CopyFailure, copy_tree};
use docstitch_shared::{PublishError, PublishResult, SiteTree};
use tracing::{error, info, instrument, warn};

use crate::Publisher;

/// Replaces the contents of a directory with the site.
///
/// The site is copied next to the target first, then swapped in with two
/// renames: the old tree moves to a backup, the new one takes its place. The
/// target path is briefly missing between the two. If the second rename
/// fails the backup is moved back, and if that fails too the error names the
/// backup path.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    path: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn sibling(&self, tag: &str) -> Result<PathBuf, PublishError> {
        let name = self
            .path
            .file_name()
            .ok_or_else(|| PublishError::Snapshot {
                detail: format!("publish path {:?} has no file name", self.path),
            })?
            .to_string_lossy();
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        Ok(parent.join(format!(".{name}.{tag}-{}", uuid::Uuid::now_v7())))
    }

    fn swap_in<R>(&self, staged: &Path, rename: R) -> Result<(), PublishError>
    where
        R: Fn(&Path, &Path) -> io::Result<()>,
    {
        let target_err = |source| PublishError::Io {
            path: self.path.clone(),
            source,
        };

        if !self.path.exists() {
            return rename(staged, &self.path).map_err(target_err);
        }

        let backup = self.sibling("old")?;
        rename(&self.path, &backup).map_err(target_err)?;
        if let Err(swap) = rename(staged, &self.path) {
            return match rename(&backup, &self.path) {
                Ok(()) => Err(target_err(swap)),
                Err(source) => {
                    error!(
                        path = %self.path.display(),
                        backup = %backup.display(),
                        "previous tree could not be restored"
                    );
                    Err(PublishError::RestoreFailed {
                        path: self.path.clone(),
                        backup,
                        swap,
                        source,
                    })
                }
            };
        }
        if let Err(e) = std::fs::remove_dir_all(&backup) {
            warn!(path = %backup.display(), error = %e, "failed to remove previous tree");
        }
        Ok(())
    }

    /// Copy `root` next to the target and swap it in. Blocking.
    fn replace_with<R>(&self, root: &Path, rename: R) -> Result<usize, PublishError>
    where
        R: Fn(&Path, &Path) -> io::Result<()>,
    {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PublishError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let staged = self.sibling("publish")?;
        let copied = copy_tree(root, &staged).map_err(|e| match e {
            CopyFailure::Read { path, source } | CopyFailure::Write { path, source } => {
                PublishError::Io { path, source }
            }
        });
        let result = copied.and_then(|files| self.swap_in(&staged, rename).map(|()| files));
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&staged);
        }
        result
    }
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    fn target(&self) -> String {
        self.path.display().to_string()
    }

    #[instrument(skip_all, fields(target = %self.path.display(), digest = %tree.digest))]
    async fn publish(&self, tree: &SiteTree) -> Result<PublishResult, PublishError> {
        let this = self.clone();
        let root = tree.root.clone();
        let files = tokio::task::spawn_blocking(move || {
            this.replace_with(&root, |from, to| std::fs::rename(from, to))
        })
        .await
        .map_err(|e| PublishError::Snapshot {
            detail: format!("directory publish task failed: {e}"),
        })??;

        info!(files, "site published to directory");
        Ok(PublishResult {
            target: self.target(),
            commit: None,
            digest: tree.digest.clone(),
            file_count: files,
            published_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn site(dir: &Path, files: &[(&str, &str)]) -> SiteTree {
        let root = dir.join(format!("site-{}", uuid::Uuid::now_v7()));
        for (rel, content) in files {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let (digest, file_count) = docstitch_shared::fsutil::tree_digest(&root).unwrap();
        SiteTree {
            root,
            primary: "a".into(),
            index_file: "index.html".into(),
            index_target: "index.html".into(),
            mounts: Vec::new(),
            file_count,
            digest,
        }
    }

    fn is_staged(from: &Path) -> bool {
        from.file_name()
            .is_some_and(|n| n.to_string_lossy().contains(".publish-"))
    }

    #[tokio::test]
    async fn publish_replaces_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("public");
        let publisher = DirectoryPublisher::new(&target);

        publisher
            .publish(&site(tmp.path(), &[("old.html", "old")]))
            .await
            .unwrap();
        let result = publisher
            .publish(&site(tmp.path(), &[("new/page.html", "new")]))
            .await
            .unwrap();

        assert!(!target.join("old.html").exists());
        assert_eq!(std::fs::read_to_string(target.join("new/page.html")).unwrap(), "new");
        assert_eq!(result.file_count, 1);
        assert!(result.commit.is_none());

        // No staging or backup directories are left behind.
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".public."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn failed_copy_keeps_previous_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("public");
        let publisher = DirectoryPublisher::new(&target);
        publisher
            .publish(&site(tmp.path(), &[("v1.html", "v1")]))
            .await
            .unwrap();

        let mut broken = site(tmp.path(), &[("v2.html", "v2")]);
        broken.root = tmp.path().join("vanished");
        assert!(publisher.publish(&broken).await.is_err());
        assert_eq!(std::fs::read_to_string(target.join("v1.html")).unwrap(), "v1");
    }

    #[test]
    fn failed_swap_restores_previous_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("public");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("v1.html"), "v1").unwrap();
        let tree = site(tmp.path(), &[("v2.html", "v2")]);

        let publisher = DirectoryPublisher::new(&target);
        let err = publisher
            .replace_with(&tree.root, |from, to| {
                if is_staged(from) {
                    Err(io::Error::other("no space left on device"))
                } else {
                    std::fs::rename(from, to)
                }
            })
            .unwrap_err();

        assert!(matches!(err, PublishError::Io { .. }), "{err:?}");
        assert_eq!(std::fs::read_to_string(target.join("v1.html")).unwrap(), "v1");
    }

    #[test]
    fn failed_restore_names_the_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("public");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("v1.html"), "v1").unwrap();
        let tree = site(tmp.path(), &[("v2.html", "v2")]);

        // Only the first rename (target -> backup) succeeds.
        let publisher = DirectoryPublisher::new(&target);
        let err = publisher
            .replace_with(&tree.root, |from, to| {
                if from == target.as_path() {
                    std::fs::rename(from, to)
                } else {
                    Err(io::Error::other("cross-device link"))
                }
            })
            .unwrap_err();

        let PublishError::RestoreFailed { path, backup, .. } = &err else {
            panic!("expected RestoreFailed, got {err:?}");
        };
        assert_eq!(path, &target);
        assert!(!target.exists());
        assert_eq!(std::fs::read_to_string(backup.join("v1.html")).unwrap(), "v1");
        assert!(err.to_string().contains(&backup.display().to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn publish_yields_while_copying() {
        let tmp = tempfile::tempdir().unwrap();
        let files: Vec<(String, String)> = (0..2000)
            .map(|i| (format!("d{}/page{i}.html", i % 20), "x".repeat(512)))
            .collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        let tree = site(tmp.path(), &refs);
        let publisher = DirectoryPublisher::new(tmp.path().join("public"));

        let publish = publisher.publish(&tree);
        tokio::pin!(publish);
        let timer_first = tokio::select! {
            biased;
            _ = &mut publish => false,
            _ = tokio::time::sleep(Duration::from_millis(1)) => true,
        };
        assert!(timer_first);

        let result = publish.await.unwrap();
        assert_eq!(result.file_count, 2000);
    }
}
