//! Blockchain registration coordinator.
//!
//! Best-effort hand-off of projects to the external registration service.
//! A failed call leaves the project unregistered and is reported as
//! informational, never fatal. The coordinator also owns the per-project
//! stage-event timeline: one latest record per stage (registration,
//! approval, tokenization); a retried stage replaces its previous event and
//! the timeline read path orders events chronologically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{MrvError, Result};
use crate::model::Project;

/// Lifecycle stages recorded on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registration,
    Approval,
    Tokenization,
}

impl Stage {
    /// Human-readable label used on the timeline read path.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Registration => "Project Registration",
            Self::Approval => "Project Approval",
            Self::Tokenization => "Carbon Credit Tokenization",
        }
    }
}

/// One recorded stage event. At most one per stage per project; recording a
/// stage again replaces the previous event.
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub tx_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub event: &'static str,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<i64>,
    pub status: &'static str,
}

#[derive(Debug, Clone)]
pub struct RegistrationReceipt {
    pub tx_hash: String,
    pub registration_id: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Service response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "txHash")]
    tx_hash: Option<String>,
    #[serde(rename = "registrationId", alias = "projectId")]
    registration_id: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<i64>,
    #[serde(rename = "gasUsed")]
    gas_used: Option<i64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StageResponse {
    #[serde(rename = "txHash")]
    tx_hash: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<i64>,
    #[serde(rename = "tokenId")]
    token_id: Option<String>,
    error: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────

pub struct ChainCoordinator {
    client: Client,
    base_url: String,
    min_score: u8,
    probe_ttl: Duration,
    probe_timeout: Duration,
    register_timeout: Duration,
    /// Cached liveness probe result.
    health: Mutex<Option<(bool, Instant)>>,
    /// project id → stage → latest event.
    timelines: RwLock<HashMap<String, HashMap<Stage, StageEvent>>>,
}

impl ChainCoordinator {
    pub fn new(client: Client, config: &Config) -> Self {
        ChainCoordinator {
            client,
            base_url: config.chain_url.trim_end_matches('/').to_string(),
            min_score: config.registration_min_score,
            probe_ttl: Duration::from_secs(config.probe_ttl_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            register_timeout: Duration::from_secs(config.register_timeout_secs),
            health: Mutex::new(None),
            timelines: RwLock::new(HashMap::new()),
        }
    }

    /// Liveness probe against the registration service, cached for a short
    /// TTL so every submission does not pay for a round trip. The cache lock
    /// is held across the probe: callers arriving after the TTL lapses
    /// coalesce behind the single in-flight probe (bounded by
    /// `probe_timeout`) instead of each issuing their own.
    pub async fn is_healthy(&self) -> bool {
        let mut cached = self.health.lock().await;
        if let Some((healthy, at)) = *cached {
            if at.elapsed() < self.probe_ttl {
                return healthy;
            }
        }

        let healthy = match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("blockchain liveness probe failed: {e}");
                false
            }
        };
        *cached = Some((healthy, Instant::now()));
        healthy
    }

    /// Register `project` if the service is reachable and the score clears
    /// the eligibility floor. Registration is attempted even for borderline
    /// projects so an immutable record exists early.
    pub async fn register_if_eligible(
        &self,
        project: &Project,
    ) -> Result<Option<RegistrationReceipt>> {
        if project.verification_score < self.min_score {
            debug!(
                project_id = %project.id,
                score = project.verification_score,
                "score below registration eligibility floor"
            );
            return Ok(None);
        }
        if !self.is_healthy().await {
            return Err(MrvError::ServiceUnavailable("blockchain registration"));
        }
        self.register(project).await.map(Some)
    }

    async fn register(&self, project: &Project) -> Result<RegistrationReceipt> {
        let location = project
            .location
            .map(|l| format!("{},{}", l.lat, l.lng))
            .unwrap_or_default();

        let body: RegisterResponse = self
            .client
            .post(format!("{}/blockchain/register-project", self.base_url))
            .timeout(self.register_timeout)
            .json(&json!({
                "title": project.name,
                "description": project.description,
                "location": location,
                "ecosystemType": project.ecosystem.as_str(),
                "area": project.area_hectares,
            }))
            .send()
            .await?
            .json()
            .await?;

        if !body.success {
            warn!(
                project_id = %project.id,
                "blockchain registration rejected: {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
            return Err(MrvError::ServiceUnavailable("blockchain registration"));
        }

        let tx_hash = body
            .tx_hash
            .ok_or(MrvError::ServiceUnavailable("blockchain registration"))?;

        self.record_event(
            &project.id,
            StageEvent {
                stage: Stage::Registration,
                tx_hash: tx_hash.clone(),
                block_number: body.block_number,
                gas_used: body.gas_used,
                timestamp: Utc::now(),
                payload: json!({ "registration_id": body.registration_id }),
            },
        )
        .await;

        Ok(RegistrationReceipt {
            tx_hash,
            registration_id: body.registration_id,
        })
    }

    /// Record an approval stage event. Retrying replaces the previous one.
    pub async fn record_approval(
        &self,
        project_id: &str,
        approver: &str,
        credits_issued: f64,
    ) -> Result<StageEvent> {
        let body: StageResponse = self
            .client
            .post(format!(
                "{}/blockchain/projects/{project_id}/approve",
                self.base_url
            ))
            .timeout(self.register_timeout)
            .json(&json!({ "approver": approver, "credits": credits_issued }))
            .send()
            .await?
            .json()
            .await?;

        let tx_hash = body.tx_hash.ok_or_else(|| {
            warn!(
                project_id,
                "approval recording failed: {}",
                body.error.as_deref().unwrap_or("no transaction hash")
            );
            MrvError::ServiceUnavailable("blockchain approval")
        })?;

        let event = StageEvent {
            stage: Stage::Approval,
            tx_hash,
            block_number: body.block_number,
            gas_used: None,
            timestamp: Utc::now(),
            payload: json!({ "approver": approver, "credits_issued": credits_issued }),
        };
        self.record_event(project_id, event.clone()).await;
        Ok(event)
    }

    /// Issue credit tokens for an approved project.
    pub async fn tokenize(
        &self,
        project_id: &str,
        credits_amount: f64,
        recipient: &str,
    ) -> Result<StageEvent> {
        if credits_amount <= 0.0 {
            return Err(MrvError::Validation("Invalid credits amount".to_string()));
        }

        let body: StageResponse = self
            .client
            .post(format!(
                "{}/blockchain/projects/{project_id}/tokenize",
                self.base_url
            ))
            .timeout(self.register_timeout)
            .json(&json!({ "amount": credits_amount, "recipient": recipient }))
            .send()
            .await?
            .json()
            .await?;

        let tx_hash = body
            .tx_hash
            .ok_or(MrvError::ServiceUnavailable("blockchain tokenization"))?;

        let event = StageEvent {
            stage: Stage::Tokenization,
            tx_hash,
            block_number: body.block_number,
            gas_used: None,
            timestamp: Utc::now(),
            payload: json!({
                "credits_issued": credits_amount,
                "recipient": recipient,
                "token_id": body.token_id,
            }),
        };
        self.record_event(project_id, event.clone()).await;
        Ok(event)
    }

    /// Upsert one stage event: at most one record per stage per project.
    pub async fn record_event(&self, project_id: &str, event: StageEvent) {
        let mut timelines = self.timelines.write().await;
        timelines
            .entry(project_id.to_string())
            .or_default()
            .insert(event.stage, event);
    }

    /// All recorded stage events for a project, ordered by event timestamp
    /// rather than by call order.
    pub async fn timeline(&self, project_id: &str) -> Vec<TimelineEntry> {
        let timelines = self.timelines.read().await;
        let mut entries: Vec<TimelineEntry> = timelines
            .get(project_id)
            .map(|stages| {
                stages
                    .values()
                    .map(|ev| TimelineEntry {
                        event: ev.stage.label(),
                        stage: ev.stage,
                        timestamp: ev.timestamp,
                        transaction_hash: ev.tx_hash.clone(),
                        block_number: ev.block_number,
                        status: "completed",
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coordinator() -> ChainCoordinator {
        let config = Config {
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
        };
        ChainCoordinator::new(Client::new(), &config)
    }

    fn event(stage: Stage, hash: &str, secs: i64) -> StageEvent {
        StageEvent {
            stage,
            tx_hash: hash.to_string(),
            block_number: Some(100),
            gas_used: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn timeline_ordered_by_timestamp_not_call_order() {
        let chain = coordinator();
        // Recorded out of chronological order on purpose.
        chain
            .record_event("P1", event(Stage::Tokenization, "0xc", 30))
            .await;
        chain
            .record_event("P1", event(Stage::Registration, "0xa", 10))
            .await;
        chain
            .record_event("P1", event(Stage::Approval, "0xb", 20))
            .await;

        let timeline = chain.timeline("P1").await;
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].event, "Project Registration");
        assert_eq!(timeline[1].event, "Project Approval");
        assert_eq!(timeline[2].event, "Carbon Credit Tokenization");
    }

    #[tokio::test]
    async fn retried_stage_replaces_previous_event() {
        let chain = coordinator();
        chain
            .record_event("P2", event(Stage::Approval, "0xold", 10))
            .await;
        chain
            .record_event("P2", event(Stage::Approval, "0xnew", 20))
            .await;

        let timeline = chain.timeline("P2").await;
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].transaction_hash, "0xnew");
    }

    #[tokio::test]
    async fn timeline_is_per_project() {
        let chain = coordinator();
        chain
            .record_event("P3", event(Stage::Registration, "0xa", 0))
            .await;
        assert!(chain.timeline("P4").await.is_empty());
    }

    #[tokio::test]
    async fn tokenize_rejects_non_positive_amount() {
        let chain = coordinator();
        let err = chain.tokenize("P5", 0.0, "0xrecipient").await.unwrap_err();
        assert!(matches!(err, MrvError::Validation(_)));
        assert!(chain.timeline("P5").await.is_empty());
    }

    #[tokio::test]
    async fn ineligible_score_skips_registration_without_probe() {
        use crate::model::*;
        let chain = coordinator();
        let now = Utc::now();
        let project = Project {
            id: "P6".to_string(),
            name: "P6".to_string(),
            description: String::new(),
            ecosystem: EcosystemType::Mangrove,
            location: None,
            area_hectares: 1.0,
            field_measurements: FieldMeasurements::default(),
            verification_score: 30,
            score_breakdown: Default::default(),
            score_category: String::new(),
            status: ProjectStatus::PendingVerification,
            evidence: EvidenceBundle::default(),
            blockchain: Default::default(),
            third_party: Default::default(),
            admin_review: None,
            carbon_credits: 0.0,
            created_by: String::new(),
            extra: Default::default(),
            created_at: now,
            updated_at: now,
        };
        let receipt = chain.register_if_eligible(&project).await.unwrap();
        assert!(receipt.is_none());
    }
}
