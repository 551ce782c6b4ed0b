//! Filesystem helpers shared by the assembler and the publishers.

use std::fs::File;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A recursive copy failed on one side or the other.
#[derive(Debug, thiserror::Error)]
pub enum CopyFailure {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Recursively copy the contents of `from` into `to`, creating `to` if needed.
///
/// Symlinks are followed. Returns the number of regular files copied.
pub fn copy_tree(from: &Path, to: &Path) -> Result<usize, CopyFailure> {
    std::fs::create_dir_all(to).map_err(|e| CopyFailure::Write {
        path: to.to_path_buf(),
        source: e,
    })?;

    let mut files = 0;
    for entry in WalkDir::new(from).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| CopyFailure::Read {
            path: e.path().unwrap_or(from).to_path_buf(),
            source: e.into(),
        })?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = to.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| CopyFailure::Write {
                path: target.clone(),
                source: e,
            })?;
        } else if entry.file_type().is_file() {
            let mut reader = File::open(entry.path()).map_err(|e| CopyFailure::Read {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
            let mut writer = File::create(&target).map_err(|e| CopyFailure::Write {
                path: target.clone(),
                source: e,
            })?;
            std::io::copy(&mut reader, &mut writer).map_err(|e| CopyFailure::Write {
                path: target.clone(),
                source: e,
            })?;
            files += 1;
        }
    }
    Ok(files)
}

/// SHA-256 over the sorted (relative path, content) pairs of every regular
/// file under `root`, plus the file count.
///
/// Paths use `/` separators, so the digest is stable across platforms.
pub fn tree_digest(root: &Path) -> std::io::Result<(String, usize)> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((rel, entry.path().to_path_buf()));
    }
    files.sort();

    let mut hasher = Sha256::new();
    for (rel, path) in &files {
        let content = std::fs::read(path)?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_be_bytes());
        hasher.update(&content);
    }
    Ok((format!("{:x}", hasher.finalize()), files.len()))
}

/// Whether `dir` exists and has at least one entry.
pub fn is_non_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ds-fsutil-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let tmp = temp_dir();
        let from = tmp.join("from");
        std::fs::create_dir_all(from.join("a/b")).unwrap();
        std::fs::write(from.join("top.html"), "top").unwrap();
        std::fs::write(from.join("a/b/deep.html"), "deep").unwrap();

        let to = tmp.join("to/nested");
        let copied = copy_tree(&from, &to).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(std::fs::read_to_string(to.join("a/b/deep.html")).unwrap(), "deep");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn copy_tree_missing_source_is_read_failure() {
        let tmp = temp_dir();
        let err = copy_tree(&tmp.join("absent"), &tmp.join("to")).unwrap_err();
        assert!(matches!(err, CopyFailure::Read { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn digest_depends_on_paths_and_content() {
        let tmp = temp_dir();
        let one = tmp.join("one");
        let two = tmp.join("two");
        for dir in [&one, &two] {
            std::fs::create_dir_all(dir.join("sub")).unwrap();
            std::fs::write(dir.join("sub/page.html"), "same").unwrap();
        }
        let (d1, n1) = tree_digest(&one).unwrap();
        let (d2, _) = tree_digest(&two).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(n1, 1);

        std::fs::write(two.join("sub/page.html"), "changed").unwrap();
        let (d3, _) = tree_digest(&two).unwrap();
        assert_ne!(d1, d3);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn empty_dir_detection() {
        let tmp = temp_dir();
        assert!(!is_non_empty_dir(&tmp));
        std::fs::write(tmp.join("x"), "").unwrap();
        assert!(is_non_empty_dir(&tmp));
        assert!(!is_non_empty_dir(&tmp.join("missing")));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
