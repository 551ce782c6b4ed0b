//! Publishers for an assembled documentation site.
//!
//! This crate provides:
//! - [`Publisher`]: overwrite a target with a [`SiteTree`] as one all-or-nothing step
//! - [`GitPublisher`]: single orphan commit, force-pushed to one ref
//! - [`DirectoryPublisher`]: staged copy swapped into a local directory
//! - [`PublishTarget`]: ref identity plus the push credential
//!
//! Publishers never retry. A failed publish leaves the target as it was; a
//! timed-out or cancelled one may not, and says so.

pub mod directory;
pub mod git;
pub mod target;

use async_trait::async_trait;
use docstitch_shared::{
    DocstitchError, PublishConfig, PublishError, PublishKind, PublishResult, SiteTree,
    resolve_path,
};

pub use directory::DirectoryPublisher;
pub use git::{GitOptions, GitPublisher};
pub use target::{Credential, PublishTarget, redact_url};

/// Overwrites a publish target with an assembled site.
///
/// The target (and its credential) belong to the publisher; earlier stages
/// only ever see [`Publisher::target`], which is redacted.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Redacted description of where the site goes.
    fn target(&self) -> String;

    /// Replace the target's contents with `tree`.
    async fn publish(&self, tree: &SiteTree) -> Result<PublishResult, PublishError>;
}

/// Create the publisher described by `[publish]`.
///
/// Relative directory paths and local remotes resolve against `base_dir`.
pub fn publisher_from_config(
    config: &PublishConfig,
    base_dir: &std::path::Path,
) -> Result<Box<dyn Publisher>, DocstitchError> {
    match config.kind {
        PublishKind::Git => {
            let mut target = PublishTarget::from_config(config)
                .map_err(|e| DocstitchError::config(e.to_string()))?;
            if !target.remote.contains("://") && !target.remote.contains('@') {
                target.remote = resolve_path(base_dir, &target.remote)
                    .to_string_lossy()
                    .into_owned();
            }
            Ok(Box::new(GitPublisher::new(target, GitOptions::from(config))))
        }
        PublishKind::Directory => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| DocstitchError::config("publish.path is required"))?;
            Ok(Box::new(DirectoryPublisher::new(resolve_path(base_dir, path))))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn git_publisher_from_config() {
        let config = PublishConfig {
            remote: Some("https://user:pw@github.com/o/r.git".into()),
            ..Default::default()
        };
        let publisher = publisher_from_config(&config, Path::new("/project")).unwrap();
        assert_eq!(
            publisher.target(),
            "https://***@github.com/o/r.git#refs/heads/gh-pages"
        );
    }

    #[test]
    fn local_remote_resolves_against_base() {
        let config = PublishConfig {
            remote: Some("remote.git".into()),
            branch: "pages".into(),
            ..Default::default()
        };
        let publisher = publisher_from_config(&config, Path::new("/project")).unwrap();
        assert_eq!(publisher.target(), "/project/remote.git#refs/heads/pages");
    }

    #[test]
    fn directory_publisher_from_config() {
        let config = PublishConfig {
            kind: PublishKind::Directory,
            path: Some("public".into()),
            ..Default::default()
        };
        let publisher = publisher_from_config(&config, Path::new("/project")).unwrap();
        assert_eq!(publisher.target(), "/project/public");
    }
}
