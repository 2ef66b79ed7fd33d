//! Evidence reconciler: merges asynchronously-arriving evidence into
//! project records, parking uploads whose project does not exist yet.
//!
//! All operations take the per-id lock, so an attach and the merge step of a
//! concurrent project creation can never interleave: the merge happens
//! strictly before or strictly after any given attach.

use tracing::info;

use crate::model::{EvidenceCategory, EvidenceEntry, MediaCounts, Project};
use crate::registry::Registry;

/// Where an uploaded piece of evidence ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Appended to an existing project's bundle.
    Attached { counts: MediaCounts },
    /// Parked as orphaned, pending project creation.
    Parked { counts: MediaCounts },
}

/// Attach one evidence entry to `project_id`, or park it as orphaned if the
/// project does not exist yet. Never fails the surrounding request.
pub async fn attach(
    registry: &Registry,
    project_id: &str,
    category: EvidenceCategory,
    entry: EvidenceEntry,
) -> AttachOutcome {
    let _guard = registry.lock_id(project_id).await;

    let attached = registry
        .with_project_mut(project_id, |project| {
            project.evidence.push(category, entry.clone());
            project.updated_at = entry.uploaded_at;
            project.evidence.counts()
        })
        .await;

    match attached {
        Some(counts) => AttachOutcome::Attached { counts },
        None => {
            let counts = registry.append_orphan(project_id, category, entry).await;
            info!(project_id, "evidence parked as orphaned pending project creation");
            AttachOutcome::Parked { counts }
        }
    }
}

/// Commit a newly built project, merging any orphaned evidence for its id.
/// Returns the committed snapshot. The merge and the insert happen under the
/// per-id lock, so no concurrent attach is lost or double-counted, and the
/// orphan entry is gone by the time the lock is released.
pub async fn commit_with_orphans(registry: &Registry, mut project: Project) -> Project {
    let _guard = registry.lock_id(&project.id).await;

    // A resubmission cycle for an existing id keeps the evidence already
    // attached to it; entries are immutable once attached.
    if let Some(existing) = registry.get(&project.id).await {
        let mut carried = existing.evidence;
        carried.merge(std::mem::take(&mut project.evidence));
        project.evidence = carried;
    }

    if let Some(orphaned) = registry.take_orphan(&project.id).await {
        let counts = orphaned.counts();
        project.evidence.merge(orphaned);
        info!(
            project_id = %project.id,
            merged = counts.total(),
            "merged orphaned evidence into new project"
        );
    }

    registry.insert(project.clone()).await;
    project
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::initial_status;
    use crate::model::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn entry(name: &str) -> EvidenceEntry {
        EvidenceEntry {
            filename: name.to_string(),
            content_id: format!("Qm{name}"),
            gateway_url: String::new(),
            description: String::new(),
            size: 1024,
            uploaded_at: Utc::now(),
            location: None,
        }
    }

    fn project(id: &str) -> Project {
        let now = Utc::now();
        Project {
            id: id.to_string(),
            name: "P".to_string(),
            description: String::new(),
            ecosystem: EcosystemType::Seagrass,
            location: None,
            area_hectares: 10.0,
            field_measurements: FieldMeasurements::default(),
            verification_score: 50,
            score_breakdown: Default::default(),
            score_category: String::new(),
            status: initial_status(50),
            evidence: EvidenceBundle::default(),
            blockchain: Default::default(),
            third_party: Default::default(),
            admin_review: None,
            carbon_credits: 0.0,
            created_by: String::new(),
            extra: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upload_before_creation_is_parked_then_merged() {
        let registry = Registry::new();

        let outcome = attach(&registry, "P1", EvidenceCategory::Photos, entry("before")).await;
        assert!(matches!(outcome, AttachOutcome::Parked { .. }));
        assert!(registry.has_orphan("P1").await);

        let committed = commit_with_orphans(&registry, project("P1")).await;
        assert!(!committed.evidence.is_empty());
        assert_eq!(committed.evidence.photos.len(), 1);
        assert_eq!(committed.evidence.photos[0].filename, "before");
        assert!(!registry.has_orphan("P1").await);
        assert!(registry.contains("P1").await);
    }

    #[tokio::test]
    async fn counts_always_equal_sequence_lengths() {
        let registry = Registry::new();
        commit_with_orphans(&registry, project("P2")).await;

        for i in 0..3 {
            attach(
                &registry,
                "P2",
                EvidenceCategory::Photos,
                entry(&format!("p{i}")),
            )
            .await;
        }
        for i in 0..2 {
            attach(
                &registry,
                "P2",
                EvidenceCategory::Documents,
                entry(&format!("d{i}")),
            )
            .await;
        }

        let counts = registry.get("P2").await.unwrap().media_counts();
        assert_eq!(
            counts,
            MediaCounts {
                photos: 3,
                videos: 0,
                documents: 2
            }
        );
    }

    #[tokio::test]
    async fn resubmission_carries_existing_evidence() {
        let registry = Registry::new();
        commit_with_orphans(&registry, project("P3")).await;
        attach(&registry, "P3", EvidenceCategory::Videos, entry("v0")).await;

        let committed = commit_with_orphans(&registry, project("P3")).await;
        assert_eq!(committed.evidence.videos.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attaches_race_with_orphan_merge_without_loss() {
        const ORPHANED: usize = 5;
        const RACING: usize = 40;

        let registry = Arc::new(Registry::new());

        for i in 0..ORPHANED {
            attach(
                &registry,
                "P4",
                EvidenceCategory::Documents,
                entry(&format!("orphan{i}")),
            )
            .await;
        }

        let mut tasks = Vec::new();
        for i in 0..RACING {
            let reg = registry.clone();
            tasks.push(tokio::spawn(async move {
                attach(
                    &reg,
                    "P4",
                    EvidenceCategory::Photos,
                    entry(&format!("race{i}")),
                )
                .await;
            }));
        }
        let reg = registry.clone();
        let create = tokio::spawn(async move {
            commit_with_orphans(&reg, project("P4")).await;
        });

        for task in tasks {
            task.await.unwrap();
        }
        create.await.unwrap();

        // Late parked attaches (those that lost the race to a not-yet-created
        // project) would still be orphaned; with the per-id lock, any attach
        // after the merge sees the project and lands directly on it.
        assert!(!registry.has_orphan("P4").await);
        let counts = registry.get("P4").await.unwrap().media_counts();
        assert_eq!(counts.total(), ORPHANED + RACING);
    }
}
