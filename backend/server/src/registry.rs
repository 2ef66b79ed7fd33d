//! Shared in-process state: the project registry and the orphaned-evidence
//! registry, plus the per-id locking discipline.
//!
//! Every read-modify-write sequence against one project id must run under
//! that id's lock. External I/O must never be performed while holding it:
//! acquire, snapshot or mutate, release, then call out.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::{EvidenceBundle, EvidenceCategory, EvidenceEntry, MediaCounts, Project};

#[derive(Default)]
pub struct Registry {
    projects: RwLock<HashMap<String, Project>>,
    orphans: RwLock<HashMap<String, EvidenceBundle>>,
    // One mutation lock per project id. Entries are never removed; the table
    // is bounded by the number of ids ever seen.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutation lock for `id`. The guard serializes status
    /// transitions, evidence attaches and the orphan merge for that id.
    pub async fn lock_id(&self, id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.projects.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> Option<Project> {
        self.projects.read().await.get(id).cloned()
    }

    pub async fn insert(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project);
    }

    /// Mutate a project in place, returning the closure's result.
    /// Multi-step sequences must hold the per-id lock around this call.
    pub async fn with_project_mut<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Project) -> T,
    ) -> Option<T> {
        self.projects.write().await.get_mut(id).map(f)
    }

    /// Snapshot of every project, newest first.
    pub async fn list(&self) -> Vec<Project> {
        let mut all: Vec<Project> = self.projects.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub async fn len(&self) -> usize {
        self.projects.read().await.len()
    }

    // ── Orphaned evidence ────────────────────────────────

    pub async fn append_orphan(
        &self,
        id: &str,
        category: EvidenceCategory,
        entry: EvidenceEntry,
    ) -> MediaCounts {
        let mut orphans = self.orphans.write().await;
        let bundle = orphans.entry(id.to_string()).or_default();
        bundle.push(category, entry);
        bundle.counts()
    }

    /// Remove and return the orphan bundle for `id`, if any.
    pub async fn take_orphan(&self, id: &str) -> Option<EvidenceBundle> {
        self.orphans.write().await.remove(id)
    }

    pub async fn orphan_counts(&self, id: &str) -> MediaCounts {
        self.orphans
            .read()
            .await
            .get(id)
            .map(|b| b.counts())
            .unwrap_or_default()
    }

    pub async fn has_orphan(&self, id: &str) -> bool {
        self.orphans.read().await.contains_key(id)
    }
}
