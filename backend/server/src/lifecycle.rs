//! Project status state machine.
//!
//! Automatic triage happens once at creation from the verification score.
//! Admin decisions can move any pre-terminal project to approved, rejected
//! or requires-revision; re-applying a decision is idempotent in effect but
//! replaces the review record. Third-party verification boosts the score
//! without changing status.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{AdminReview, Project, ProjectStatus};
use crate::scoring;

/// Score increment granted by an accepted third-party report.
pub const THIRD_PARTY_BOOST: u8 = 15;

/// Initial transition, applied exactly once when the project is created.
pub fn initial_status(score: u8) -> ProjectStatus {
    if score >= 85 {
        ProjectStatus::Approved
    } else if score >= 65 {
        ProjectStatus::RequiresReview
    } else {
        ProjectStatus::PendingVerification
    }
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub status: ProjectStatus,
    pub credits_awarded: f64,
}

/// Apply an admin decision. `approved` awards credits via the credit
/// calculator, `rejected` is terminal with zero credits, anything else asks
/// for revision. The previous review record, if any, is overwritten.
pub fn apply_review(
    project: &mut Project,
    decision: &str,
    reviewer_id: &str,
    comments: &str,
    now: DateTime<Utc>,
) -> ReviewOutcome {
    let (status, credits) = match decision {
        "approved" => (
            ProjectStatus::Approved,
            scoring::calculate_credits(project.ecosystem, project.area_hectares),
        ),
        "rejected" => (ProjectStatus::Rejected, 0.0),
        _ => (ProjectStatus::RequiresRevision, 0.0),
    };

    project.status = status;
    project.carbon_credits = credits;
    project.admin_review = Some(AdminReview {
        decision: decision.to_string(),
        comments: comments.to_string(),
        reviewer_id: reviewer_id.to_string(),
        review_timestamp: now,
        credits_awarded: credits,
    });
    project.updated_at = now;

    ReviewOutcome {
        status,
        credits_awarded: credits,
    }
}

/// Record a third-party verification report. The score boost is applied only
/// the first time the flag flips; later reports replace the stored
/// organization and report without re-boosting.
pub fn apply_third_party_report(
    project: &mut Project,
    organization: &str,
    report: Value,
    now: DateTime<Utc>,
) -> bool {
    let boosted = if project.third_party.verified {
        false
    } else {
        project.third_party.verified = true;
        project.verification_score =
            project.verification_score.saturating_add(THIRD_PARTY_BOOST).min(100);
        true
    };

    project.third_party.organization = Some(organization.to_string());
    project.third_party.report = Some(report);
    project.updated_at = now;
    boosted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EcosystemType, EvidenceBundle, FieldMeasurements};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn project(score: u8) -> Project {
        let now = Utc::now();
        Project {
            id: "BC_TEST0001".to_string(),
            name: "Test".to_string(),
            description: String::new(),
            ecosystem: EcosystemType::Mangrove,
            location: None,
            area_hectares: 45.8,
            field_measurements: FieldMeasurements::default(),
            verification_score: score,
            score_breakdown: BTreeMap::new(),
            score_category: String::new(),
            status: initial_status(score),
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

    #[test]
    fn triage_boundaries_are_exact() {
        assert_eq!(initial_status(85), ProjectStatus::Approved);
        assert_eq!(initial_status(84), ProjectStatus::RequiresReview);
        assert_eq!(initial_status(65), ProjectStatus::RequiresReview);
        assert_eq!(initial_status(64), ProjectStatus::PendingVerification);
        assert_eq!(initial_status(0), ProjectStatus::PendingVerification);
        assert_eq!(initial_status(100), ProjectStatus::Approved);
    }

    #[test]
    fn approval_awards_calculated_credits() {
        let mut p = project(70);
        let outcome = apply_review(&mut p, "approved", "nccr_admin", "looks good", Utc::now());
        assert_eq!(outcome.status, ProjectStatus::Approved);
        assert_eq!(outcome.credits_awarded, 146.56);
        assert_eq!(p.carbon_credits, 146.56);
        assert!(p.admin_review.is_some());
    }

    #[test]
    fn rejection_zeroes_credits() {
        let mut p = project(70);
        apply_review(&mut p, "approved", "a", "", Utc::now());
        let outcome = apply_review(&mut p, "rejected", "b", "fraudulent", Utc::now());
        assert_eq!(outcome.status, ProjectStatus::Rejected);
        assert_eq!(p.carbon_credits, 0.0);
        // Last review record wins.
        assert_eq!(p.admin_review.as_ref().unwrap().reviewer_id, "b");
    }

    #[test]
    fn unknown_decision_requires_revision() {
        let mut p = project(70);
        let outcome = apply_review(&mut p, "escalate", "a", "", Utc::now());
        assert_eq!(outcome.status, ProjectStatus::RequiresRevision);
        assert_eq!(outcome.credits_awarded, 0.0);
    }

    #[test]
    fn review_is_idempotent_in_outcome() {
        let mut p = project(70);
        let first = apply_review(&mut p, "approved", "a", "", Utc::now());
        let second = apply_review(&mut p, "approved", "a", "", Utc::now());
        assert_eq!(first.status, second.status);
        assert_eq!(first.credits_awarded, second.credits_awarded);
        assert_eq!(p.status, ProjectStatus::Approved);
    }

    #[test]
    fn third_party_boost_applied_once_and_capped() {
        let mut p = project(92);
        let boosted = apply_third_party_report(&mut p, "Ocean Trust", json!({}), Utc::now());
        assert!(boosted);
        assert_eq!(p.verification_score, 100);
        assert!(p.third_party.verified);

        let again = apply_third_party_report(&mut p, "Reef Watch", json!({}), Utc::now());
        assert!(!again);
        assert_eq!(p.verification_score, 100);
        assert_eq!(p.third_party.organization.as_deref(), Some("Reef Watch"));
    }

    #[test]
    fn third_party_report_does_not_change_status() {
        let mut p = project(50);
        apply_third_party_report(&mut p, "Ocean Trust", json!({}), Utc::now());
        assert_eq!(p.verification_score, 65);
        assert_eq!(p.status, ProjectStatus::PendingVerification);
    }
}
