//! Canonical data model for restoration projects and their evidence.
//!
//! A [`Project`] is created once at submission time and then mutated by
//! scoring, admin review, third-party verification and evidence attachment.
//! Rejection is a terminal status, never a deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Coastal ecosystem types this system issues credits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcosystemType {
    Mangrove,
    Seagrass,
    SaltMarsh,
    CoastalWetland,
    /// Anything we don't recognise; scored and credited at the default rate.
    #[serde(other)]
    Unknown,
}

impl EcosystemType {
    /// Credit factor in tCO2 per hectare per year.
    pub fn credit_factor(&self) -> f64 {
        match self {
            Self::Mangrove => 3.2,
            Self::Seagrass => 2.8,
            Self::SaltMarsh => 2.5,
            Self::CoastalWetland => 2.0,
            Self::Unknown => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mangrove => "mangrove",
            Self::Seagrass => "seagrass",
            Self::SaltMarsh => "salt_marsh",
            Self::CoastalWetland => "coastal_wetland",
            Self::Unknown => "unknown",
        }
    }
}

/// Project lifecycle states (see `lifecycle` for the transition rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Submitted,
    Approved,
    RequiresReview,
    PendingVerification,
    Rejected,
    RequiresRevision,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::RequiresReview => "requires_review",
            Self::PendingVerification => "pending_verification",
            Self::Rejected => "rejected",
            Self::RequiresRevision => "requires_revision",
        }
    }

    /// Terminal for the automated pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn in_range(&self) -> bool {
        self.lat.abs() <= 90.0 && self.lng.abs() <= 180.0
    }
}

/// Free-form field-measurement payloads. Each sub-field contributes
/// independently to the verification score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMeasurements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_quality: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biodiversity: Option<Value>,
}

// ─────────────────────────────────────────────────────────
// Evidence
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCategory {
    Photos,
    Videos,
    Documents,
}

impl EvidenceCategory {
    /// Parse a category name; anything unrecognised files under documents,
    /// matching how uploads without a usable type are bucketed.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "photos" => Self::Photos,
            "videos" => Self::Videos,
            _ => Self::Documents,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photos => "photos",
            Self::Videos => "videos",
            Self::Documents => "documents",
        }
    }
}

/// A single piece of supporting evidence. Immutable once attached to a
/// project's bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub filename: String,
    /// Content identifier assigned by the evidence store.
    pub content_id: String,
    pub gateway_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

/// Per-category evidence counts. Always derived from the sequences, never
/// incremented independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    pub photos: usize,
    pub videos: usize,
    pub documents: usize,
}

impl MediaCounts {
    pub fn total(&self) -> usize {
        self.photos + self.videos + self.documents
    }
}

/// The categorised set of supporting files for one project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceBundle {
    #[serde(default)]
    pub photos: Vec<EvidenceEntry>,
    #[serde(default)]
    pub videos: Vec<EvidenceEntry>,
    #[serde(default)]
    pub documents: Vec<EvidenceEntry>,
}

impl EvidenceBundle {
    pub fn push(&mut self, category: EvidenceCategory, entry: EvidenceEntry) {
        match category {
            EvidenceCategory::Photos => self.photos.push(entry),
            EvidenceCategory::Videos => self.videos.push(entry),
            EvidenceCategory::Documents => self.documents.push(entry),
        }
    }

    /// Append every entry of `other`, preserving per-category order.
    pub fn merge(&mut self, other: EvidenceBundle) {
        self.photos.extend(other.photos);
        self.videos.extend(other.videos);
        self.documents.extend(other.documents);
    }

    pub fn counts(&self) -> MediaCounts {
        MediaCounts {
            photos: self.photos.len(),
            videos: self.videos.len(),
            documents: self.documents.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty() && self.videos.is_empty() && self.documents.is_empty()
    }
}

// ─────────────────────────────────────────────────────────
// Review / verification records
// ─────────────────────────────────────────────────────────

/// One admin review action. Re-reviewing replaces the previous record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminReview {
    pub decision: String,
    pub comments: String,
    pub reviewer_id: String,
    pub review_timestamp: DateTime<Utc>,
    pub credits_awarded: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThirdPartyVerification {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockchainState {
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Project
// ─────────────────────────────────────────────────────────

/// A restoration project as held in the registry and mirrored to the DB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub ecosystem: EcosystemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Hectares; never negative.
    pub area_hectares: f64,
    #[serde(default)]
    pub field_measurements: FieldMeasurements,
    /// Verification score in [0, 100].
    pub verification_score: u8,
    #[serde(default)]
    pub score_breakdown: BTreeMap<String, u8>,
    #[serde(default)]
    pub score_category: String,
    pub status: ProjectStatus,
    #[serde(default)]
    pub evidence: EvidenceBundle,
    #[serde(default)]
    pub blockchain: BlockchainState,
    #[serde(default)]
    pub third_party: ThirdPartyVerification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_review: Option<AdminReview>,
    #[serde(default)]
    pub carbon_credits: f64,
    #[serde(default)]
    pub created_by: String,
    /// Opaque forward-compatibility bag for submission fields we don't model.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn media_counts(&self) -> MediaCounts {
        self.evidence.counts()
    }
}

// ─────────────────────────────────────────────────────────
// Submission
// ─────────────────────────────────────────────────────────

/// Evidence references carried inline on a submission (already uploaded to
/// the evidence store by the client).
#[derive(Debug, Clone, Deserialize)]
pub struct InlineEvidence {
    #[serde(rename = "type", default)]
    pub category: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(alias = "hash")]
    pub content_id: String,
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// Deserialize a submission field leniently: a value of the wrong JSON type
/// degrades to `None` instead of rejecting the whole request.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// An inbound project submission. Every field is optional: missing or
/// malformed fields degrade the score rather than rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submission {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, alias = "title", deserialize_with = "lenient")]
    pub project_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub ecosystem_type: Option<EcosystemType>,
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<GeoPoint>,
    #[serde(default, deserialize_with = "lenient")]
    pub area_hectares: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub field_measurements: Option<FieldMeasurements>,
    #[serde(default, deserialize_with = "lenient")]
    pub evidence_refs: Option<Vec<InlineEvidence>>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Submission {
    /// Area clamped to the `>= 0` invariant; malformed values degrade to 0.
    pub fn effective_area(&self) -> f64 {
        match self.area_hectares {
            Some(a) if a.is_finite() && a > 0.0 => a,
            _ => 0.0,
        }
    }

    /// Build the initial evidence bundle from inline references.
    pub fn inline_evidence(&self, now: DateTime<Utc>) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::default();
        if let Some(refs) = &self.evidence_refs {
            for item in refs {
                let category = EvidenceCategory::parse(item.category.as_deref().unwrap_or(""));
                bundle.push(
                    category,
                    EvidenceEntry {
                        filename: item.filename.clone().unwrap_or_else(|| "unknown".into()),
                        content_id: item.content_id.clone(),
                        gateway_url: item.gateway_url.clone().unwrap_or_default(),
                        description: item.description.clone().unwrap_or_default(),
                        size: item.size.unwrap_or(0),
                        uploaded_at: item.timestamp.unwrap_or(now),
                        location: item.location,
                    },
                );
            }
        }
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecosystem_credit_factors() {
        assert_eq!(EcosystemType::Mangrove.credit_factor(), 3.2);
        assert_eq!(EcosystemType::Seagrass.credit_factor(), 2.8);
        assert_eq!(EcosystemType::SaltMarsh.credit_factor(), 2.5);
        assert_eq!(EcosystemType::CoastalWetland.credit_factor(), 2.0);
        assert_eq!(EcosystemType::Unknown.credit_factor(), 2.0);
    }

    #[test]
    fn unknown_ecosystem_deserializes() {
        let eco: EcosystemType = serde_json::from_str("\"kelp_forest\"").unwrap();
        assert_eq!(eco, EcosystemType::Unknown);
    }

    #[test]
    fn evidence_counts_track_sequences() {
        let mut bundle = EvidenceBundle::default();
        let entry = EvidenceEntry {
            filename: "a.jpg".into(),
            content_id: "Qm1".into(),
            gateway_url: String::new(),
            description: String::new(),
            size: 0,
            uploaded_at: Utc::now(),
            location: None,
        };
        bundle.push(EvidenceCategory::Photos, entry.clone());
        bundle.push(EvidenceCategory::Photos, entry.clone());
        bundle.push(EvidenceCategory::Documents, entry);
        let counts = bundle.counts();
        assert_eq!(counts.photos, 2);
        assert_eq!(counts.videos, 0);
        assert_eq!(counts.documents, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn negative_area_degrades_to_zero() {
        let sub = Submission {
            area_hectares: Some(-4.0),
            ..Default::default()
        };
        assert_eq!(sub.effective_area(), 0.0);
    }

    #[test]
    fn wrong_typed_fields_degrade_instead_of_rejecting() {
        let sub: Submission = serde_json::from_str(
            r#"{
                "project_name": "Delta Restoration",
                "area_hectares": "ten",
                "ecosystem_type": 7,
                "location": "the estuary"
            }"#,
        )
        .unwrap();
        assert_eq!(sub.project_name.as_deref(), Some("Delta Restoration"));
        assert_eq!(sub.effective_area(), 0.0);
        assert!(sub.ecosystem_type.is_none());
        assert!(sub.location.is_none());
    }

    #[test]
    fn unrecognised_evidence_category_files_under_documents() {
        assert_eq!(EvidenceCategory::parse("maps"), EvidenceCategory::Documents);
        assert_eq!(EvidenceCategory::parse("photos"), EvidenceCategory::Photos);
    }
}
