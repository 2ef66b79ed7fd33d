//! Request orchestration: sequences scoring, triage, blockchain hand-off and
//! persistence on each submission/review/upload event.
//!
//! Per-id ordering: create → initial transition → registration → persist is
//! totally ordered for one project id. Mutations happen under the per-id
//! lock; external calls (blockchain, evidence store, database) run outside
//! it and are reconciled afterwards. Failures in optional subsystems are
//! downgraded to successful-but-degraded results.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::warn;

use crate::chain::ChainCoordinator;
use crate::db;
use crate::errors::{MrvError, Result};
use crate::evidence::{self, AttachOutcome};
use crate::ipfs::{EvidenceStore, UploadMetadata};
use crate::lifecycle::{self, ReviewOutcome};
use crate::model::{
    EvidenceCategory, EvidenceEntry, MediaCounts, Project, ProjectStatus, Submission,
};
use crate::registry::Registry;
use crate::scoring::{ScoreReport, ScoringEngine, ScoringInput};

/// Shared application state, one instance behind an `Arc` per process.
pub struct AppState {
    pub registry: Registry,
    pub chain: ChainCoordinator,
    pub store: EvidenceStore,
    pub engine: ScoringEngine,
    pub pool: SqlitePool,
}

fn generate_project_id() -> String {
    format!("BC_{:08X}", rand::random::<u32>())
}

fn scoring_input_from_submission(sub: &Submission, media: MediaCounts) -> ScoringInput {
    ScoringInput {
        has_name: sub
            .project_name
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty()),
        has_description: sub
            .description
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty()),
        ecosystem: sub.ecosystem_type,
        area_hectares: sub.effective_area(),
        location: sub.location,
        measurements: sub.field_measurements.clone().unwrap_or_default(),
        media,
    }
}

fn scoring_input_from_project(project: &Project) -> ScoringInput {
    ScoringInput {
        has_name: !project.name.trim().is_empty(),
        has_description: !project.description.trim().is_empty(),
        ecosystem: Some(project.ecosystem),
        area_hectares: project.area_hectares,
        location: project.location,
        measurements: project.field_measurements.clone(),
        media: project.media_counts(),
    }
}

/// Mirror a snapshot to the database. The registry stays authoritative, so
/// a failed write is logged and the request still succeeds.
async fn mirror(state: &AppState, project: &Project) {
    if let Err(e) = db::upsert_project(&state.pool, project).await {
        warn!(project_id = %project.id, "failed to mirror project to database: {e}");
    }
}

/// Resolve a project, hydrating the registry from the database if needed.
async fn ensure_loaded(state: &AppState, id: &str) -> Result<Project> {
    if let Some(project) = state.registry.get(id).await {
        return Ok(project);
    }
    match db::get_project(&state.pool, id).await? {
        Some(project) => {
            let _guard = state.registry.lock_id(id).await;
            if !state.registry.contains(id).await {
                state.registry.insert(project.clone()).await;
            }
            Ok(state.registry.get(id).await.unwrap_or(project))
        }
        None => Err(MrvError::NotFound(id.to_string())),
    }
}

// ─────────────────────────────────────────────────────────
// Creation
// ─────────────────────────────────────────────────────────

pub struct CreateResult {
    pub project: Project,
    pub report: ScoreReport,
    /// Informational registration failure, never fatal.
    pub registration_error: Option<String>,
}

/// Handle a new submission: score, triage, commit (merging any orphaned
/// evidence), then best-effort blockchain registration and DB mirroring.
pub async fn create_project(state: &AppState, sub: Submission) -> Result<CreateResult> {
    let now = Utc::now();
    let id = sub
        .id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(generate_project_id);

    let inline = sub.inline_evidence(now);
    let orphaned = state.registry.orphan_counts(&id).await;
    let inline_counts = inline.counts();
    let media = MediaCounts {
        photos: inline_counts.photos + orphaned.photos,
        videos: inline_counts.videos + orphaned.videos,
        documents: inline_counts.documents + orphaned.documents,
    };

    let report = state.engine.score(&scoring_input_from_submission(&sub, media));
    let status = lifecycle::initial_status(report.overall);

    let project = Project {
        id: id.clone(),
        name: sub.project_name.clone().unwrap_or_default(),
        description: sub.description.clone().unwrap_or_default(),
        ecosystem: sub.ecosystem_type.unwrap_or(crate::model::EcosystemType::Unknown),
        location: sub.location,
        area_hectares: sub.effective_area(),
        field_measurements: sub.field_measurements.clone().unwrap_or_default(),
        verification_score: report.overall,
        score_breakdown: report.breakdown.clone(),
        score_category: report.category.clone(),
        status,
        evidence: inline,
        blockchain: Default::default(),
        third_party: Default::default(),
        admin_review: None,
        carbon_credits: 0.0,
        created_by: sub.created_by.clone().unwrap_or_else(|| "user".to_string()),
        extra: sub.extra.clone(),
        created_at: now,
        updated_at: now,
    };

    // Commit to the registry (authoritative) with the orphan merge; the
    // per-id lock inside guarantees no concurrent attach is dropped.
    let mut project = evidence::commit_with_orphans(&state.registry, project).await;

    // Post-commit registration, attempted without holding the per-id lock.
    let mut registration_error = None;
    match state.chain.register_if_eligible(&project).await {
        Ok(Some(receipt)) => {
            let _guard = state.registry.lock_id(&id).await;
            state
                .registry
                .with_project_mut(&id, |p| {
                    p.blockchain.registered = true;
                    p.blockchain.tx_hash = Some(receipt.tx_hash.clone());
                    p.blockchain.registration_id = receipt.registration_id.clone();
                    p.updated_at = Utc::now();
                })
                .await;
            if let Some(updated) = state.registry.get(&id).await {
                project = updated;
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!(project_id = %id, "blockchain registration skipped: {e}");
            registration_error = Some(e.to_string());
        }
    }

    mirror(state, &project).await;
    let detail = serde_json::to_value(&report).unwrap_or_default();
    if let Err(e) =
        db::insert_verification_record(&state.pool, &id, "scoring", report.overall, &detail).await
    {
        warn!(project_id = %id, "failed to store verification record: {e}");
    }

    Ok(CreateResult {
        project,
        report,
        registration_error,
    })
}

// ─────────────────────────────────────────────────────────
// Review / verification
// ─────────────────────────────────────────────────────────

/// Apply an admin decision and, on approval, record the approval stage on
/// the blockchain timeline (best-effort).
pub async fn review_project(
    state: &AppState,
    id: &str,
    decision: &str,
    reviewer_id: &str,
    comments: &str,
) -> Result<(Project, ReviewOutcome)> {
    ensure_loaded(state, id).await?;

    let outcome = {
        let _guard = state.registry.lock_id(id).await;
        state
            .registry
            .with_project_mut(id, |p| {
                lifecycle::apply_review(p, decision, reviewer_id, comments, Utc::now())
            })
            .await
            .ok_or_else(|| MrvError::NotFound(id.to_string()))?
    };

    let project = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| MrvError::NotFound(id.to_string()))?;

    if outcome.status == ProjectStatus::Approved {
        if let Err(e) = state
            .chain
            .record_approval(id, reviewer_id, outcome.credits_awarded)
            .await
        {
            warn!(project_id = %id, "approval stage not recorded on chain: {e}");
        }
    }

    mirror(state, &project).await;
    Ok((project, outcome))
}

/// Re-run the scoring chain against an existing project. Updates score and
/// breakdown; the status set at creation is not re-triaged.
pub async fn reverify_project(state: &AppState, id: &str) -> Result<(Project, ScoreReport)> {
    ensure_loaded(state, id).await?;

    let report = {
        let _guard = state.registry.lock_id(id).await;
        state
            .registry
            .with_project_mut(id, |p| {
                let report = state.engine.score(&scoring_input_from_project(p));
                p.verification_score = report.overall;
                p.score_breakdown = report.breakdown.clone();
                p.score_category = report.category.clone();
                p.updated_at = Utc::now();
                report
            })
            .await
            .ok_or_else(|| MrvError::NotFound(id.to_string()))?
    };

    let project = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| MrvError::NotFound(id.to_string()))?;

    mirror(state, &project).await;
    let detail = serde_json::to_value(&report).unwrap_or_default();
    if let Err(e) =
        db::insert_verification_record(&state.pool, id, "rescoring", report.overall, &detail).await
    {
        warn!(project_id = %id, "failed to store verification record: {e}");
    }

    Ok((project, report))
}

/// Record a third-party verification report. Returns whether the score
/// boost was applied (first report only).
pub async fn submit_third_party_report(
    state: &AppState,
    id: &str,
    organization: &str,
    report: serde_json::Value,
) -> Result<(Project, bool)> {
    ensure_loaded(state, id).await?;

    let boosted = {
        let _guard = state.registry.lock_id(id).await;
        state
            .registry
            .with_project_mut(id, |p| {
                lifecycle::apply_third_party_report(p, organization, report, Utc::now())
            })
            .await
            .ok_or_else(|| MrvError::NotFound(id.to_string()))?
    };

    let project = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| MrvError::NotFound(id.to_string()))?;
    mirror(state, &project).await;
    Ok((project, boosted))
}

// ─────────────────────────────────────────────────────────
// Evidence
// ─────────────────────────────────────────────────────────

/// An evidence upload, either raw file bytes (stored first) or a
/// metadata-only reference to content already uploaded upstream.
pub struct EvidenceUpload {
    pub project_id: String,
    pub category: EvidenceCategory,
    pub description: String,
    pub file: Option<(String, Vec<u8>)>,
    pub content_id: Option<String>,
    pub size: Option<u64>,
}

pub struct EvidenceResult {
    pub entry: EvidenceEntry,
    pub outcome: AttachOutcome,
}

/// Store the upload (if it carries bytes) and reconcile it into the project
/// or the orphan registry. Attachment itself never fails the request.
pub async fn upload_evidence(state: &AppState, upload: EvidenceUpload) -> Result<EvidenceResult> {
    let now = Utc::now();

    let entry = match (upload.file, upload.content_id) {
        (Some((filename, bytes)), _) => {
            let stored = state
                .store
                .upload(
                    bytes,
                    &filename,
                    &UploadMetadata {
                        project_id: upload.project_id.clone(),
                        category: upload.category.as_str().to_string(),
                        description: upload.description.clone(),
                    },
                )
                .await?;
            EvidenceEntry {
                filename,
                content_id: stored.content_id,
                gateway_url: stored.gateway_url,
                description: upload.description,
                size: stored.size,
                uploaded_at: now,
                location: None,
            }
        }
        // Evidence-store downtime degrades gracefully: a reference to
        // content already pinned upstream is accepted as-is.
        (None, Some(content_id)) => EvidenceEntry {
            filename: "unknown".to_string(),
            gateway_url: state.store.gateway_url_for(&content_id),
            content_id,
            description: upload.description,
            size: upload.size.unwrap_or(0),
            uploaded_at: now,
            location: None,
        },
        (None, None) => {
            return Err(MrvError::Upload("No file data found".to_string()));
        }
    };

    let outcome = evidence::attach(
        &state.registry,
        &upload.project_id,
        upload.category,
        entry.clone(),
    )
    .await;

    if matches!(outcome, AttachOutcome::Attached { .. }) {
        if let Some(project) = state.registry.get(&upload.project_id).await {
            mirror(state, &project).await;
        }
    }

    Ok(EvidenceResult { entry, outcome })
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

pub async fn get_project(state: &AppState, id: &str) -> Result<Project> {
    ensure_loaded(state, id).await
}

/// All projects, newest first. Registry entries are merged with persisted
/// snapshots, registry winning per id, so projects created before a restart
/// stay visible alongside new ones. An unreachable database degrades the
/// listing to registry contents only.
pub async fn list_projects(state: &AppState, limit: i64) -> Result<Vec<Project>> {
    let mut projects = state.registry.list().await;
    match db::list_projects(&state.pool, limit).await {
        Ok(rows) => {
            let known: HashSet<String> = projects.iter().map(|p| p.id.clone()).collect();
            projects.extend(rows.into_iter().filter(|p| !known.contains(&p.id)));
            projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Err(e) => warn!("failed to read persisted projects for listing: {e}"),
    }
    projects.truncate(limit.max(0) as usize);
    Ok(projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainCoordinator;
    use crate::config::Config;
    use crate::ipfs::EvidenceStore;
    use crate::model::{
        EcosystemType, EvidenceBundle, FieldMeasurements, ProjectStatus as Status,
    };
    use crate::scoring::ScoringEngine;
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config() -> Config {
        Config {
            api_port: 0,
            database_url: String::new(),
            chain_url: "http://localhost:8001".to_string(),
            evidence_api_url: String::new(),
            evidence_gateway_url: String::new(),
            evidence_jwt: String::new(),
            enhanced_scoring: true,
            registration_min_score: 40,
            probe_ttl_secs: 30,
            probe_timeout_secs: 5,
            register_timeout_secs: 60,
        }
    }

    async fn test_state() -> AppState {
        // One connection: an in-memory SQLite database is per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let config = test_config();
        let client = reqwest::Client::new();
        AppState {
            registry: Registry::new(),
            chain: ChainCoordinator::new(client.clone(), &config),
            store: EvidenceStore::new(client, &config),
            engine: ScoringEngine::new(true),
            pool,
        }
    }

    fn persisted_project(id: &str) -> Project {
        let now = Utc::now();
        Project {
            id: id.to_string(),
            name: "Old Lagoon".to_string(),
            description: String::new(),
            ecosystem: EcosystemType::Mangrove,
            location: None,
            area_hectares: 12.0,
            field_measurements: FieldMeasurements::default(),
            verification_score: 30,
            score_breakdown: Default::default(),
            score_category: String::new(),
            status: Status::PendingVerification,
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
    async fn listing_merges_persisted_snapshots_with_registry() {
        let state = test_state().await;
        db::upsert_project(&state.pool, &persisted_project("BC_OLD00001"))
            .await
            .unwrap();

        let before = list_projects(&state, 100).await.unwrap();
        assert_eq!(before.len(), 1);

        // A bare submission scores below the registration floor, so the
        // create path stays fully local.
        let created = create_project(
            &state,
            Submission {
                project_name: Some("New Cove".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let after = list_projects(&state, 100).await.unwrap();
        let ids: Vec<&str> = after.iter().map(|p| p.id.as_str()).collect();
        assert!(ids.contains(&"BC_OLD00001"), "persisted project dropped");
        assert!(ids.contains(&created.project.id.as_str()));
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn listing_prefers_registry_over_stale_snapshot() {
        let state = test_state().await;
        let mut stale = persisted_project("BC_OLD00002");
        stale.verification_score = 10;
        db::upsert_project(&state.pool, &stale).await.unwrap();

        let mut live = stale.clone();
        live.verification_score = 55;
        state.registry.insert(live).await;

        let listed = list_projects(&state, 100).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].verification_score, 55);
    }
}
