//! Aggregation planner: where each build output lands in the site tree.
//!
//! Planning is pure. It looks only at build results and their configured
//! mounts and either returns a [`MountPlan`] or a [`PlanningError`]; nothing
//! touches the filesystem.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use docstitch_shared::{
    BuildResult, CollisionKind, DocSource, FailurePolicy, MountPath, PlanningError,
};

/// One build output and its destination.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedMount {
    /// Source name.
    pub source: String,
    /// Absolute build output directory.
    pub output: PathBuf,
    pub destination: MountPath,
    pub primary: bool,
}

/// Collision-free mapping from successful builds to site destinations.
///
/// Mounts are ordered so that the root mount (if any) comes first and the
/// rest follow in destination order.
#[derive(Debug, Clone, Serialize)]
pub struct MountPlan {
    pub mounts: Vec<PlannedMount>,
    /// Name of the primary source.
    pub primary: String,
    /// Relative URL the root index redirects to.
    pub index_target: String,
    /// Sources left out because their build failed (best-effort only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl MountPlan {
    pub fn primary_mount(&self) -> Option<&PlannedMount> {
        self.mounts.iter().find(|m| m.primary)
    }
}

/// A source's validated layout, before any build has run.
struct Layout<'a> {
    source: &'a DocSource,
    destination: MountPath,
}

/// Compute the mount plan from build results.
///
/// Under [`FailurePolicy::Required`] any failed result is an error naming every
/// failed source. Under best-effort the failures are dropped, except that the
/// primary must have built.
#[instrument(skip_all, fields(results = results.len(), policy = ?policy))]
pub fn plan(results: &[BuildResult], policy: FailurePolicy) -> Result<MountPlan, PlanningError> {
    let failed: Vec<String> = results
        .iter()
        .filter(|r| !r.succeeded())
        .map(|r| r.source.name.clone())
        .collect();

    if policy == FailurePolicy::Required && !failed.is_empty() {
        return Err(PlanningError::SourcesFailed { names: failed });
    }

    let sources: Vec<&DocSource> = results.iter().map(|r| &r.source).collect();
    let primary = find_primary(&sources)?;
    if failed.iter().any(|name| name == &primary.name) {
        return Err(PlanningError::PrimaryUnavailable {
            name: primary.name.clone(),
        });
    }
    for name in &failed {
        warn!(source = %name, "skipping failed source");
    }

    let succeeded: Vec<&BuildResult> = results.iter().filter(|r| r.succeeded()).collect();
    let layout = check_layout(succeeded.iter().map(|r| &r.source))?;
    let index_target = index_target(primary, &layout)?;

    let mounts = layout
        .into_iter()
        .filter_map(|l| {
            let result = succeeded.iter().find(|r| r.source.name == l.source.name)?;
            Some(PlannedMount {
                source: l.source.name.clone(),
                output: result.output.clone()?,
                destination: l.destination,
                primary: l.source.primary,
            })
        })
        .collect::<Vec<_>>();

    for m in &mounts {
        debug!(source = %m.source, mount = %m.destination, "planned mount");
    }

    Ok(MountPlan {
        mounts,
        primary: primary.name.clone(),
        index_target,
        skipped: failed,
    })
}

/// Check a configuration's mount layout without building anything.
///
/// Runs the same primary, mount, and collision checks as [`plan`] with every
/// source assumed to succeed.
pub fn validate_layout(sources: &[DocSource]) -> Result<(), PlanningError> {
    let refs: Vec<&DocSource> = sources.iter().collect();
    let primary = find_primary(&refs)?;
    let layout = check_layout(sources.iter())?;
    index_target(primary, &layout)?;
    Ok(())
}

fn find_primary<'a>(sources: &[&'a DocSource]) -> Result<&'a DocSource, PlanningError> {
    let primaries: Vec<&DocSource> = sources.iter().copied().filter(|s| s.primary).collect();
    match primaries.as_slice() {
        [] => Err(PlanningError::NoPrimary),
        [one] => Ok(*one),
        many => Err(PlanningError::MultiplePrimaries {
            names: many.iter().map(|s| s.name.clone()).collect(),
        }),
    }
}

/// Normalize mounts, then sort and check every pair for collisions.
fn check_layout<'a>(
    sources: impl Iterator<Item = &'a DocSource>,
) -> Result<Vec<Layout<'a>>, PlanningError> {
    let mut layout = Vec::new();
    for source in sources {
        let destination =
            MountPath::parse(&source.mount).map_err(|reason| PlanningError::InvalidMount {
                name: source.name.clone(),
                mount: source.mount.clone(),
                reason,
            })?;
        if destination.is_root() && !source.primary {
            return Err(PlanningError::RootNotPrimary {
                name: source.name.clone(),
            });
        }
        layout.push(Layout {
            source,
            destination,
        });
    }

    // Stable sort keeps configuration order among equal destinations, so the
    // earlier-configured source is reported first.
    layout.sort_by(|a, b| a.destination.cmp(&b.destination));

    for (i, a) in layout.iter().enumerate() {
        for b in &layout[i + 1..] {
            let kind = if a.destination == b.destination {
                CollisionKind::Duplicate
            } else if !a.destination.is_root() && a.destination.is_ancestor_of(&b.destination) {
                CollisionKind::Nested
            } else {
                continue;
            };
            return Err(PlanningError::Collision {
                first: a.source.name.clone(),
                second: b.source.name.clone(),
                first_mount: a.destination.to_string(),
                second_mount: b.destination.to_string(),
                kind,
            });
        }
    }
    Ok(layout)
}

/// Redirect target: the primary's entry point, relative to the site root.
fn index_target(primary: &DocSource, layout: &[Layout<'_>]) -> Result<String, PlanningError> {
    let invalid = || PlanningError::InvalidEntry {
        name: primary.name.clone(),
        entry: primary.entry.clone(),
    };
    let entry = MountPath::parse(&primary.entry).map_err(|_| invalid())?;
    if entry.is_root() {
        return Err(invalid());
    }

    let mount = layout
        .iter()
        .find(|l| l.source.name == primary.name)
        .map(|l| l.destination.clone())
        .unwrap_or_else(MountPath::root);

    Ok(if mount.is_root() {
        entry.relative()
    } else {
        format!("{}/{}", mount.relative(), entry.relative())
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn abc() -> Vec<BuildResult> {
        vec![
            ok(doc_source("a", "/", true)),
            ok(doc_source("b", "/b", false)),
            ok(doc_source("c", "/c", false)),
        ]
    }

    #[test]
    fn plans_root_primary_and_subdirectories() {
        let plan = plan(&abc(), FailurePolicy::Required).unwrap();
        let dests: Vec<String> = plan.mounts.iter().map(|m| m.destination.to_string()).collect();
        assert_eq!(dests, ["/", "/b", "/c"]);
        assert_eq!(plan.primary, "a");
        assert_eq!(plan.index_target, "index.html");
        assert!(plan.primary_mount().unwrap().destination.is_root());
    }

    #[test]
    fn required_policy_names_all_failures() {
        let results = vec![
            ok(doc_source("a", "/", true)),
            failed(doc_source("b", "/b", false)),
            failed(doc_source("c", "/c", false)),
        ];
        let err = plan(&results, FailurePolicy::Required).unwrap_err();
        assert_eq!(
            err,
            PlanningError::SourcesFailed {
                names: vec!["b".into(), "c".into()]
            }
        );
    }

    #[test]
    fn best_effort_keeps_successful_subset() {
        let results = vec![
            ok(doc_source("a", "/", true)),
            failed(doc_source("b", "/b", false)),
            ok(doc_source("c", "/c", false)),
        ];
        let plan = plan(&results, FailurePolicy::BestEffort).unwrap();
        let names: Vec<&str> = plan.mounts.iter().map(|m| m.source.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(plan.skipped, ["b"]);
    }

    #[test]
    fn best_effort_still_needs_primary() {
        let results = vec![
            failed(doc_source("a", "/", true)),
            ok(doc_source("b", "/b", false)),
        ];
        let err = plan(&results, FailurePolicy::BestEffort).unwrap_err();
        assert_eq!(err, PlanningError::PrimaryUnavailable { name: "a".into() });
    }

    #[test]
    fn duplicate_mount_is_collision() {
        let results = vec![
            ok(doc_source("a", "/", true)),
            ok(doc_source("b", "/b", false)),
            ok(doc_source("c", "/b/", false)),
        ];
        let err = plan(&results, FailurePolicy::Required).unwrap_err();
        assert!(err.to_string().starts_with("collision b/c"), "{err}");
        assert!(matches!(
            err,
            PlanningError::Collision {
                kind: CollisionKind::Duplicate,
                ..
            }
        ));
    }

    #[test]
    fn nested_mount_is_collision() {
        let results = vec![
            ok(doc_source("a", "/", true)),
            ok(doc_source("api", "/api/v1", false)),
            ok(doc_source("docs", "/api", false)),
        ];
        let err = plan(&results, FailurePolicy::Required).unwrap_err();
        assert_eq!(
            err,
            PlanningError::Collision {
                first: "docs".into(),
                second: "api".into(),
                first_mount: "/api".into(),
                second_mount: "/api/v1".into(),
                kind: CollisionKind::Nested,
            }
        );
    }

    #[test]
    fn sibling_prefix_is_not_collision() {
        let results = vec![
            ok(doc_source("a", "/", true)),
            ok(doc_source("b", "/b", false)),
            ok(doc_source("bee", "/bee", false)),
        ];
        assert!(plan(&results, FailurePolicy::Required).is_ok());
    }

    #[test]
    fn primary_count_must_be_one() {
        let none = vec![ok(doc_source("a", "/a", false))];
        assert_eq!(plan(&none, FailurePolicy::Required).unwrap_err(), PlanningError::NoPrimary);

        let two = vec![
            ok(doc_source("a", "/a", true)),
            ok(doc_source("b", "/b", true)),
        ];
        assert!(matches!(
            plan(&two, FailurePolicy::Required).unwrap_err(),
            PlanningError::MultiplePrimaries { .. }
        ));
    }

    #[test]
    fn only_primary_may_mount_at_root() {
        let results = vec![
            ok(doc_source("a", "/a", true)),
            ok(doc_source("b", "/", false)),
        ];
        assert_eq!(
            plan(&results, FailurePolicy::Required).unwrap_err(),
            PlanningError::RootNotPrimary { name: "b".into() }
        );
    }

    #[test]
    fn traversal_mount_is_rejected() {
        let results = vec![
            ok(doc_source("a", "/", true)),
            ok(doc_source("b", "/../etc", false)),
        ];
        assert!(matches!(
            plan(&results, FailurePolicy::Required).unwrap_err(),
            PlanningError::InvalidMount { .. }
        ));
    }

    #[test]
    fn index_target_follows_non_root_primary() {
        let mut primary = doc_source("rust", "/api", true);
        primary.entry = "mycrate/index.html".into();
        let results = vec![ok(primary), ok(doc_source("py", "/python", false))];
        let plan = plan(&results, FailurePolicy::Required).unwrap();
        assert_eq!(plan.index_target, "api/mycrate/index.html");
        // Root index redirect is independent of mount order.
        assert_eq!(plan.mounts[0].source, "rust");
    }

    #[test]
    fn validate_layout_without_builds() {
        let sources = vec![
            doc_source("a", "/", true),
            doc_source("b", "/b", false),
            doc_source("c", "/b", false),
        ];
        assert!(validate_layout(&sources).is_err());
        assert!(validate_layout(&sources[..2]).is_ok());
    }
}
