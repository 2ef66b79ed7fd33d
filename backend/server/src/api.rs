//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chain::TimelineEntry;
use crate::db;
use crate::errors::{MrvError, Result};
use crate::evidence::AttachOutcome;
use crate::model::{EvidenceCategory, MediaCounts, Project, ProjectStatus, Submission};
use crate::orchestrator::{self, AppState, EvidenceUpload};
use crate::scoring::ScoreReport;

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub projects_tracked: usize,
    pub blockchain_available: bool,
    pub evidence_store_configured: bool,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub media_count: MediaCounts,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        let media_count = project.media_counts();
        ProjectView {
            project,
            media_count,
        }
    }
}

#[derive(Serialize)]
pub struct ListStatistics {
    pub total: usize,
    pub approved: usize,
    pub pending: usize,
    pub rejected: usize,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub status: &'static str,
    pub projects: Vec<ProjectView>,
    pub total: usize,
    pub statistics: ListStatistics,
}

#[derive(Serialize)]
pub struct CreateResponse {
    pub status: &'static str,
    pub project_id: String,
    pub verification_score: u8,
    pub current_status: ProjectStatus,
    pub message: String,
    pub next_steps: Vec<&'static str>,
    pub analysis: ScoreReport,
    pub blockchain: BlockchainSummary,
}

#[derive(Serialize)]
pub struct BlockchainSummary {
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_error: Option<String>,
}

#[derive(Serialize)]
pub struct TimelineResponse {
    pub success: bool,
    pub project_id: String,
    pub timeline: Vec<TimelineEntry>,
    pub total_transactions: usize,
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub decision: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default = "default_reviewer")]
    pub reviewer_id: String,
}

fn default_reviewer() -> String {
    "admin".to_string()
}

#[derive(Deserialize)]
pub struct ThirdPartyRequest {
    pub organization: String,
    #[serde(default)]
    pub report: Value,
}

#[derive(Deserialize)]
pub struct TokenizeRequest {
    pub credits_amount: f64,
    pub recipient: String,
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    #[serde(default = "default_reviewer")]
    pub approver: String,
    #[serde(default)]
    pub credits: f64,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/status`
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "online",
        service: "Blue Carbon MRV System",
        version: env!("CARGO_PKG_VERSION"),
        projects_tracked: state.registry.len().await,
        blockchain_available: state.chain.is_healthy().await,
        evidence_store_configured: state.store.is_configured(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /api/projects`
///
/// Orchestrated creation: score, triage, orphan merge, best-effort
/// blockchain registration, persistence.
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<Submission>,
) -> Result<Json<CreateResponse>> {
    let result = orchestrator::create_project(&state, submission).await?;
    let project = result.project;

    Ok(Json(CreateResponse {
        status: "success",
        project_id: project.id.clone(),
        verification_score: project.verification_score,
        current_status: project.status,
        message: format!(
            "Project created successfully with verification score {}/100",
            project.verification_score
        ),
        next_steps: next_steps_for(project.status),
        analysis: result.report,
        blockchain: BlockchainSummary {
            registered: project.blockchain.registered,
            tx_hash: project.blockchain.tx_hash.clone(),
            registration_id: project.blockchain.registration_id.clone(),
            registration_error: result.registration_error,
        },
    }))
}

/// `GET /api/projects`
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let projects = orchestrator::list_projects(&state, query.limit).await?;

    let approved = projects
        .iter()
        .filter(|p| p.status == ProjectStatus::Approved)
        .count();
    let pending = projects
        .iter()
        .filter(|p| {
            matches!(
                p.status,
                ProjectStatus::PendingVerification | ProjectStatus::RequiresReview
            )
        })
        .count();
    let rejected = projects
        .iter()
        .filter(|p| p.status == ProjectStatus::Rejected)
        .count();

    let total = projects.len();
    Ok(Json(ListResponse {
        status: "success",
        statistics: ListStatistics {
            total,
            approved,
            pending,
            rejected,
        },
        projects: projects.into_iter().map(ProjectView::from).collect(),
        total,
    }))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let project = orchestrator::get_project(&state, &id).await?;
    Ok(Json(json!({
        "status": "success",
        "project": ProjectView::from(project),
    })))
}

/// `POST /api/projects/:id/verify`
pub async fn reverify_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let (project, report) = orchestrator::reverify_project(&state, &id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Verification completed for project {id}"),
        "project_id": id,
        "verification_score": project.verification_score,
        "analysis": report,
        "updated_at": project.updated_at,
    })))
}

/// `GET /api/projects/:id/verification-status`
///
/// Staged verification report with derived next steps.
pub async fn verification_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let project = orchestrator::get_project(&state, &id).await?;

    let scoring_done = !project.score_breakdown.is_empty();
    let review_done = project.status.is_terminal();

    let next_step = if !scoring_done {
        "Verification scoring pending"
    } else if !project.third_party.verified {
        "Awaiting third-party organization verification"
    } else if !review_done {
        "Awaiting admin review and approval"
    } else if !project.blockchain.registered {
        "Blockchain registration pending"
    } else {
        "Project fully verified and registered"
    };

    Ok(Json(json!({
        "success": true,
        "verification_status": {
            "project_id": project.id,
            "overall_status": project.status,
            "verification_score": project.verification_score,
            "third_party_verified": project.third_party.verified,
            "third_party_organization": project.third_party.organization,
            "blockchain_registered": project.blockchain.registered,
            "blockchain_tx": project.blockchain.tx_hash,
            "verification_stages": {
                "scoring": {
                    "completed": scoring_done,
                    "score": project.verification_score,
                    "category": project.score_category,
                    "breakdown": project.score_breakdown,
                },
                "third_party_verification": {
                    "completed": project.third_party.verified,
                    "organization": project.third_party.organization,
                    "report": project.third_party.report,
                },
                "admin_review": {
                    "completed": review_done,
                    "status": project.status,
                    "review": project.admin_review,
                },
                "blockchain_registration": {
                    "completed": project.blockchain.registered,
                    "transaction_hash": project.blockchain.tx_hash,
                    "registration_id": project.blockchain.registration_id,
                },
            },
            "next_steps": [next_step],
        },
    })))
}

/// `POST /api/projects/:id/review`
pub async fn review_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(review): Json<ReviewRequest>,
) -> Result<Json<Value>> {
    let (project, outcome) = orchestrator::review_project(
        &state,
        &id,
        &review.decision,
        &review.reviewer_id,
        &review.comments,
    )
    .await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Project {} successfully", review.decision),
        "project_id": id,
        "new_status": outcome.status,
        "credits_awarded": outcome.credits_awarded,
        "project": ProjectView::from(project),
    })))
}

/// `POST /api/projects/:id/third-party-report`
pub async fn third_party_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ThirdPartyRequest>,
) -> Result<Json<Value>> {
    let (project, boosted) =
        orchestrator::submit_third_party_report(&state, &id, &request.organization, request.report)
            .await?;

    Ok(Json(json!({
        "success": true,
        "project_id": id,
        "score_boosted": boosted,
        "verification_score": project.verification_score,
        "third_party_organization": project.third_party.organization,
    })))
}

/// `POST /api/evidence/upload` (multipart)
///
/// Accepts either a `file` part (stored to the evidence store first) or a
/// `content_id` field referencing content already uploaded upstream.
pub async fn upload_evidence(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    let mut project_id = None;
    let mut category = EvidenceCategory::Documents;
    let mut description = String::new();
    let mut file = None;
    let mut content_id = None;
    let mut size = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| MrvError::Upload(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "project_id" => {
                project_id = Some(read_text(field).await?);
            }
            "file_type" => {
                category = EvidenceCategory::parse(&read_text(field).await?);
            }
            "description" => {
                description = read_text(field).await?;
            }
            "content_id" => {
                content_id = Some(read_text(field).await?);
            }
            "size" => {
                size = read_text(field).await?.parse().ok();
            }
            "file" => {
                let filename = field
                    .file_name()
                    .unwrap_or("unknown")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| MrvError::Upload(e.to_string()))?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let project_id =
        project_id.ok_or_else(|| MrvError::Upload("project_id is required".to_string()))?;

    let result = orchestrator::upload_evidence(
        &state,
        EvidenceUpload {
            project_id: project_id.clone(),
            category,
            description,
            file,
            content_id,
            size,
        },
    )
    .await?;

    let (attached, counts) = match result.outcome {
        AttachOutcome::Attached { counts } => (true, counts),
        AttachOutcome::Parked { counts } => (false, counts),
    };

    Ok(Json(json!({
        "status": "success",
        "project_id": project_id,
        "attached": attached,
        "orphaned": !attached,
        "content_id": result.entry.content_id,
        "gateway_url": result.entry.gateway_url,
        "filename": result.entry.filename,
        "size": result.entry.size,
        "media_count": counts,
    })))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| MrvError::Upload(e.to_string()))
}

#[derive(Deserialize)]
pub struct StoreListQuery {
    #[serde(default)]
    pub project_id: Option<String>,
}

/// `GET /api/evidence/store`
///
/// Lists pinned files straight from the evidence store, bypassing the
/// registry. Useful for auditing content that was never attached.
pub async fn list_store(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreListQuery>,
) -> Result<Json<Value>> {
    let files = state.store.list(query.project_id.as_deref()).await?;
    Ok(Json(json!({
        "status": "success",
        "count": files.len(),
        "files": files,
    })))
}

/// `DELETE /api/evidence/store/:content_id`
pub async fn unpin_store(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
) -> Result<Json<Value>> {
    let unpinned = state.store.unpin(&content_id).await?;
    Ok(Json(json!({
        "status": "success",
        "content_id": content_id,
        "unpinned": unpinned,
    })))
}

/// `GET /api/projects/:id/evidence`
pub async fn list_evidence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let project = orchestrator::get_project(&state, &id).await?;
    let counts = project.media_counts();
    Ok(Json(json!({
        "status": "success",
        "project_id": id,
        "media": project.evidence,
        "media_count": counts,
        "total_files": counts.total(),
    })))
}

/// `GET /api/projects/:id/verification-records`
///
/// Append-only history of scoring runs for one project.
pub async fn verification_records(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    orchestrator::get_project(&state, &id).await?;
    let records = db::get_verification_records(&state.pool, &id).await?;
    Ok(Json(json!({
        "status": "success",
        "project_id": id,
        "count": records.len(),
        "records": records,
    })))
}

/// `POST /api/blockchain/projects/:id/approve`
pub async fn chain_approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<Value>> {
    // The project must exist; the stage call itself is independent of the
    // review flow and can be retried.
    orchestrator::get_project(&state, &id).await?;
    let event = state
        .chain
        .record_approval(&id, &request.approver, request.credits)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Project approval recorded on blockchain",
        "approval_record": event,
    })))
}

/// `POST /api/blockchain/projects/:id/tokenize`
pub async fn chain_tokenize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TokenizeRequest>,
) -> Result<Json<Value>> {
    orchestrator::get_project(&state, &id).await?;
    let event = state
        .chain
        .tokenize(&id, request.credits_amount, &request.recipient)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Carbon credits tokenized successfully",
        "tokenization_record": event,
    })))
}

/// `GET /api/blockchain/projects/:id/timeline`
pub async fn chain_timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TimelineResponse>> {
    let timeline = state.chain.timeline(&id).await;
    if timeline.is_empty() && orchestrator::get_project(&state, &id).await.is_err() {
        return Err(MrvError::NotFound(id));
    }
    let total = timeline.len();
    Ok(Json(TimelineResponse {
        success: true,
        project_id: id,
        timeline,
        total_transactions: total,
    }))
}

fn next_steps_for(status: ProjectStatus) -> Vec<&'static str> {
    match status {
        ProjectStatus::Approved => vec![
            "Project automatically approved",
            "Blockchain registration in progress",
            "Available for credit tokenization",
        ],
        ProjectStatus::RequiresReview => vec![
            "Pending admin review",
            "Manual verification required",
            "Review typically takes 24-48 hours",
        ],
        _ => vec![
            "Project requires improvements",
            "Additional media evidence needed",
            "Please resubmit with corrections",
        ],
    }
}
