//! Submission scoring: a chain of interchangeable strategies plus the
//! credit calculator.
//!
//! The engine tries each strategy in order and uses the first structurally
//! valid result. The ecosystem-aware analyzer is preferred; the weighted
//! field heuristic is the fallback. If nothing yields a usable result the
//! submission scores 0 and is marked insufficient data.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{EcosystemType, FieldMeasurements, GeoPoint, MediaCounts};

/// Everything a scoring strategy is allowed to look at. Pure data, no I/O.
#[derive(Debug, Clone, Default)]
pub struct ScoringInput {
    pub has_name: bool,
    pub has_description: bool,
    pub ecosystem: Option<EcosystemType>,
    pub area_hectares: f64,
    pub location: Option<GeoPoint>,
    pub measurements: FieldMeasurements,
    pub media: MediaCounts,
}

/// The outcome of one scoring pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub overall: u8,
    pub category: String,
    pub breakdown: BTreeMap<String, u8>,
    pub recommendations: Vec<String>,
    pub warnings: Vec<String>,
}

impl ScoreReport {
    /// A strategy result is usable when the score is in range and the
    /// breakdown carries at least one category.
    fn is_valid(&self) -> bool {
        self.overall <= 100 && !self.breakdown.is_empty()
    }

    fn insufficient() -> Self {
        ScoreReport {
            overall: 0,
            category: "insufficient_data".to_string(),
            breakdown: BTreeMap::new(),
            recommendations: vec!["Resubmit with project details and evidence".to_string()],
            warnings: vec!["No scoring strategy produced a usable result".to_string()],
        }
    }
}

fn categorize(score: u8) -> &'static str {
    match score {
        85..=100 => "verified",
        65..=84 => "requires_review",
        40..=64 => "flagged",
        _ => "insufficient_data",
    }
}

pub trait ScoreStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    /// `None` means the strategy is unavailable for this input.
    fn evaluate(&self, input: &ScoringInput) -> Option<ScoreReport>;
}

// ─────────────────────────────────────────────────────────
// Enhanced (ecosystem-aware) analyzer
// ─────────────────────────────────────────────────────────

/// Richer heuristics: location plausibility, ecosystem suitability, area
/// realism and data completeness, each contributing up to 25 points.
pub struct EnhancedAnalyzer {
    pub enabled: bool,
}

impl ScoreStrategy for EnhancedAnalyzer {
    fn name(&self) -> &'static str {
        "enhanced"
    }

    fn evaluate(&self, input: &ScoringInput) -> Option<ScoreReport> {
        if !self.enabled {
            return None;
        }

        let mut breakdown = BTreeMap::new();
        let mut recommendations = Vec::new();
        let mut warnings = Vec::new();

        // Location accuracy: valid coordinates score fully, out-of-range
        // coordinates are worth nothing.
        let location_score = match input.location {
            Some(loc) if loc.in_range() => 25u32,
            Some(_) => {
                warnings.push("Coordinates are outside valid latitude/longitude range".into());
                0
            }
            None => {
                recommendations.push("Provide GPS coordinates for the restoration site".into());
                0
            }
        };
        breakdown.insert("location_accuracy".to_string(), location_score as u8);

        // Ecosystem suitability: a recognised type plus supporting
        // measurements that make the claim plausible.
        let mut eco_score = 0u32;
        match input.ecosystem {
            Some(eco) if eco != EcosystemType::Unknown => {
                eco_score += 10;
                if input.measurements.water_quality.is_some() {
                    eco_score += 8;
                } else {
                    recommendations.push(format!(
                        "Provide water quality measurements to support the {} claim",
                        eco.as_str()
                    ));
                }
                if input.measurements.biodiversity.is_some() {
                    eco_score += 7;
                } else {
                    recommendations.push("Include a baseline biodiversity assessment".into());
                }
            }
            _ => {
                warnings.push("Ecosystem type missing or unrecognised".into());
            }
        }
        breakdown.insert("ecosystem_suitability".to_string(), eco_score as u8);

        // Area realism: present and within a plausible restoration range.
        let area_score = if input.area_hectares > 0.0 {
            if input.area_hectares <= 10_000.0 {
                25u32
            } else {
                warnings.push("Stated area is implausibly large for a single project".into());
                15
            }
        } else {
            warnings.push("No restoration area specified".into());
            recommendations.push("Estimate the project area in hectares".into());
            0
        };
        breakdown.insert("area_realism".to_string(), area_score as u8);

        // Data completeness: proportion of expected fields present.
        let present = [
            input.has_name,
            input.has_description,
            input.ecosystem.is_some(),
            input.location.is_some(),
            input.area_hectares > 0.0,
            input.measurements.water_quality.is_some(),
            input.measurements.soil_analysis.is_some(),
            input.measurements.biodiversity.is_some(),
            input.media.total() > 0,
        ];
        let filled = present.iter().filter(|p| **p).count() as u32;
        let completeness = filled * 25 / present.len() as u32;
        if input.media.total() == 0 {
            recommendations.push("Upload photo, video or document evidence".into());
        }
        breakdown.insert("data_completeness".to_string(), completeness as u8);

        let overall = (location_score + eco_score + area_score + completeness).min(100) as u8;

        Some(ScoreReport {
            overall,
            category: categorize(overall).to_string(),
            breakdown,
            recommendations,
            warnings,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Manual (weighted field) fallback
// ─────────────────────────────────────────────────────────

/// Fixed-weight presence heuristic. Always available.
pub struct ManualScorer;

impl ScoreStrategy for ManualScorer {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn evaluate(&self, input: &ScoringInput) -> Option<ScoreReport> {
        let mut breakdown = BTreeMap::new();

        // Fixed base grant.
        breakdown.insert("base".to_string(), 15u8);

        let mut info = 0u32;
        if input.has_name {
            info += 12;
        }
        if matches!(input.ecosystem, Some(e) if e != EcosystemType::Unknown) {
            info += 12;
        }
        if input.area_hectares > 0.0 {
            info += 11;
        }
        breakdown.insert("project_info".to_string(), info as u8);

        let location = if input.location.is_some() { 25u32 } else { 0 };
        breakdown.insert("location".to_string(), location as u8);

        // Photos weigh heaviest, then videos, then documents.
        let mut media = 0u32;
        if input.media.photos > 0 {
            media += 12;
        }
        if input.media.videos > 0 {
            media += 8;
        }
        if input.media.documents > 0 {
            media += 5;
        }
        breakdown.insert("media_evidence".to_string(), media as u8);

        let mut measurements = 0u32;
        if input.measurements.water_quality.is_some() {
            measurements += 8;
        }
        if input.measurements.soil_analysis.is_some() {
            measurements += 8;
        }
        if input.measurements.biodiversity.is_some() {
            measurements += 9;
        }
        breakdown.insert("field_measurements".to_string(), measurements as u8);

        let overall = (15 + info + location + media + measurements).min(100) as u8;

        Some(ScoreReport {
            overall,
            category: categorize(overall).to_string(),
            breakdown,
            recommendations: Vec::new(),
            warnings: Vec::new(),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────

pub struct ScoringEngine {
    strategies: Vec<Box<dyn ScoreStrategy>>,
}

impl ScoringEngine {
    /// Standard chain: enhanced analyzer first, manual heuristic as fallback.
    pub fn new(enhanced_enabled: bool) -> Self {
        ScoringEngine {
            strategies: vec![
                Box::new(EnhancedAnalyzer {
                    enabled: enhanced_enabled,
                }),
                Box::new(ManualScorer),
            ],
        }
    }

    #[cfg(test)]
    pub fn with_strategies(strategies: Vec<Box<dyn ScoreStrategy>>) -> Self {
        ScoringEngine { strategies }
    }

    /// Score a submission. Deterministic for identical input.
    pub fn score(&self, input: &ScoringInput) -> ScoreReport {
        for strategy in &self.strategies {
            if let Some(report) = strategy.evaluate(input) {
                if report.is_valid() {
                    tracing::debug!(
                        strategy = strategy.name(),
                        score = report.overall,
                        "scoring strategy accepted"
                    );
                    return report;
                }
                tracing::warn!(
                    strategy = strategy.name(),
                    "scoring strategy returned a malformed result, trying next"
                );
            }
        }
        ScoreReport::insufficient()
    }
}

// ─────────────────────────────────────────────────────────
// Credit calculator
// ─────────────────────────────────────────────────────────

/// Credits awarded on approval: area times the ecosystem factor, rounded to
/// two decimal places.
pub fn calculate_credits(ecosystem: EcosystemType, area_hectares: f64) -> f64 {
    let raw = area_hectares.max(0.0) * ecosystem.credit_factor();
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_input() -> ScoringInput {
        ScoringInput {
            has_name: true,
            has_description: true,
            ecosystem: Some(EcosystemType::Mangrove),
            area_hectares: 120.0,
            location: Some(GeoPoint {
                lat: 22.25,
                lng: 89.94,
            }),
            measurements: FieldMeasurements {
                water_quality: Some(json!({"ph_level": 7.8})),
                soil_analysis: Some(json!({"carbon_content": 3.2})),
                biodiversity: Some(json!({"species_count": 47})),
            },
            media: MediaCounts {
                photos: 4,
                videos: 1,
                documents: 2,
            },
        }
    }

    #[test]
    fn complete_submission_reaches_85() {
        let engine = ScoringEngine::new(true);
        let report = engine.score(&full_input());
        assert!(report.overall >= 85, "got {}", report.overall);
        assert_eq!(report.category, "verified");

        let manual = ScoringEngine::new(false);
        let report = manual.score(&full_input());
        assert!(report.overall >= 85, "got {}", report.overall);
    }

    #[test]
    fn score_is_bounded_and_deterministic() {
        let engine = ScoringEngine::new(true);
        let a = engine.score(&full_input());
        let b = engine.score(&full_input());
        assert_eq!(a.overall, b.overall);
        assert_eq!(a.breakdown, b.breakdown);
        assert!(a.overall <= 100);

        let empty = engine.score(&ScoringInput::default());
        assert!(empty.overall <= 100);
    }

    #[test]
    fn manual_fallback_used_when_enhanced_disabled() {
        let engine = ScoringEngine::new(false);
        let report = engine.score(&ScoringInput {
            has_name: true,
            ..Default::default()
        });
        // Base 15 plus the name weight.
        assert_eq!(report.overall, 27);
        assert_eq!(report.breakdown["base"], 15);
        assert_eq!(report.breakdown["project_info"], 12);
    }

    #[test]
    fn manual_media_weights_favor_photos() {
        let report = ManualScorer
            .evaluate(&ScoringInput {
                media: MediaCounts {
                    photos: 1,
                    videos: 1,
                    documents: 1,
                },
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.breakdown["media_evidence"], 25);
    }

    struct Malformed;
    impl ScoreStrategy for Malformed {
        fn name(&self) -> &'static str {
            "malformed"
        }
        fn evaluate(&self, _input: &ScoringInput) -> Option<ScoreReport> {
            Some(ScoreReport {
                overall: 250,
                category: "broken".into(),
                breakdown: BTreeMap::from([("x".to_string(), 250u8)]),
                recommendations: vec![],
                warnings: vec![],
            })
        }
    }

    #[test]
    fn malformed_result_falls_through_to_next_strategy() {
        let engine =
            ScoringEngine::with_strategies(vec![Box::new(Malformed), Box::new(ManualScorer)]);
        let report = engine.score(&ScoringInput::default());
        assert_eq!(report.overall, 15);
    }

    #[test]
    fn no_usable_strategy_scores_zero() {
        let engine = ScoringEngine::with_strategies(vec![Box::new(EnhancedAnalyzer {
            enabled: false,
        })]);
        let report = engine.score(&full_input());
        assert_eq!(report.overall, 0);
        assert_eq!(report.category, "insufficient_data");
    }

    #[test]
    fn out_of_range_coordinates_score_nothing_for_location() {
        let mut input = full_input();
        input.location = Some(GeoPoint {
            lat: 123.0,
            lng: 400.0,
        });
        let report = EnhancedAnalyzer { enabled: true }.evaluate(&input).unwrap();
        assert_eq!(report.breakdown["location_accuracy"], 0);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn mangrove_credit_example() {
        assert_eq!(calculate_credits(EcosystemType::Mangrove, 45.8), 146.56);
    }

    #[test]
    fn unknown_ecosystem_uses_default_factor() {
        assert_eq!(calculate_credits(EcosystemType::Unknown, 10.0), 20.00);
    }

    #[test]
    fn negative_area_yields_zero_credits() {
        assert_eq!(calculate_credits(EcosystemType::Seagrass, -3.0), 0.0);
    }
}
