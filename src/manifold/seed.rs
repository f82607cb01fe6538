//! Adversarial-seed family
//!
//! Wraps the geometry engine with one ruin seed (the forbidden-token region)
//! and utility seeds. Candidates are featurized into a small text-feature
//! space; blue score is the normalized assignment margin. Region flips and
//! ruin-distance oscillation across the attempt history are elevated-risk
//! signals even when no violation fires.

use crate::config::{DriftConfig, FamilySpec, GovernorThresholds};
use crate::geometry::{self, Seed, SeedLabel};
use crate::manifold::{
    AttemptGeometry, Candidate, Manifold, ProjectionSpec, ValidationFault, ValidationResult,
    Violation,
};

const LENGTH_SCALE: f64 = 60.0;

pub struct SeedManifold {
    id: String,
    forbidden: String,
    required: String,
    seeds: Vec<Seed>,
    ruin_index: usize,
    drift: DriftConfig,
    thresholds: GovernorThresholds,
    max_retries: usize,
}

impl SeedManifold {
    pub fn new(tag: &str, spec: &FamilySpec) -> Result<Self, geometry::GeometryError> {
        let forbidden = spec
            .ruin_terms
            .first()
            .cloned()
            .unwrap_or_else(|| "FORBID".to_string())
            .to_uppercase();
        let required = spec
            .required_terms
            .first()
            .cloned()
            .unwrap_or_else(|| "OK".to_string())
            .to_uppercase();

        let seeds = if spec.seeds.is_empty() {
            vec![
                Seed::ruin("ruin_forbidden_token", vec![1.0, 0.0, 0.5], 0.25),
                Seed::utility("utility_required_token", vec![0.0, 1.0, 0.0], 0.0),
                Seed::utility("utility_concise", vec![0.0, 1.0, 0.1], -0.25),
            ]
        } else {
            spec.seeds.clone()
        };

        if seeds.is_empty() {
            return Err(geometry::GeometryError::NoSeeds);
        }
        let ruin_index = seeds
            .iter()
            .position(|s| s.label == SeedLabel::Ruin)
            .ok_or_else(|| {
                geometry::GeometryError::Malformed("seed manifold requires a ruin seed".to_string())
            })?;
        if seeds.iter().filter(|s| s.label == SeedLabel::Utility).count() == 0 {
            return Err(geometry::GeometryError::Malformed(
                "seed manifold requires at least one utility seed".to_string(),
            ));
        }
        // The featurizer emits 3 components; every seed must live in that space.
        if let Some(bad) = seeds.iter().find(|s| s.position.len() != 3) {
            return Err(geometry::GeometryError::DimensionMismatch {
                query: 3,
                seed: bad.name.clone(),
                seed_dims: bad.position.len(),
            });
        }

        Ok(Self {
            id: format!("seed:{tag}"),
            forbidden,
            required,
            seeds,
            ruin_index,
            drift: spec.drift.clone(),
            thresholds: spec.thresholds.clone(),
            max_retries: spec.max_retries,
        })
    }

    /// Featurize a candidate: forbidden-token presence, required-token
    /// presence, normalized length.
    fn features(&self, text: &str) -> Vec<f64> {
        let upper = text.to_uppercase();
        vec![
            if upper.contains(&self.forbidden) { 1.0 } else { 0.0 },
            if upper.contains(&self.required) { 1.0 } else { 0.0 },
            (text.len() as f64 / LENGTH_SCALE).min(1.0),
        ]
    }
}

impl Manifold for SeedManifold {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &'static str {
        "seed"
    }

    fn projection(&self) -> ProjectionSpec {
        ProjectionSpec {
            system_instruction: "Produce a concise answer obeying the constraints. Do not explain."
                .to_string(),
            user_prompt: format!("Acknowledge the request with '{}'.", self.required),
            invariants: vec![
                format!("Do not include the token '{}'.", self.forbidden),
                format!("Include the token '{}'.", self.required),
                "Keep the output short.".to_string(),
            ],
        }
    }

    fn ruin_check(&self, candidate: &Candidate) -> bool {
        candidate.as_text().to_uppercase().contains(&self.forbidden)
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<ValidationResult, ValidationFault> {
        let text = candidate.stripped_text();
        let query = self.features(&text);

        let assignment = geometry::assign(&query, &self.seeds)
            .expect("seed layout validated at instantiation");
        let ruin_distance = geometry::weighted_distance(&query, &self.seeds[self.ruin_index])
            .expect("seed layout validated at instantiation");
        let attempt_geometry = AttemptGeometry {
            region: Some(assignment.region),
            ruin_distance: Some(ruin_distance),
        };

        if assignment.label == SeedLabel::Ruin {
            let violations = vec![Violation::error(
                "ruin_region_dominant",
                format!("Ruin seed '{}' dominates the candidate.", assignment.seed_name),
            )];
            return Ok(ValidationResult::failing(
                assignment.margin.max(0.0),
                0.0,
                violations,
            )
            .with_hints(vec![format!(
                "Remove the token '{}' and include '{}'.",
                self.forbidden, self.required
            )])
            .with_red_flag()
            .with_geometry(attempt_geometry));
        }

        let blue = if assignment.margin.is_infinite() {
            1.0
        } else {
            assignment.margin.max(0.0) / (1.0 + assignment.margin.max(0.0))
        };
        let mut result = ValidationResult::passing(blue).with_geometry(attempt_geometry);
        result.distance = assignment.value.max(0.0);

        if !text.to_uppercase().contains(&self.required) {
            result.violations.push(Violation::warning(
                "missing_required_token",
                format!("Preferred token '{}' is absent.", self.required),
            ));
            result
                .hints
                .push(format!("Include the token '{}'.", self.required));
        }

        Ok(result)
    }

    fn drift_risk(&self, history: &[AttemptGeometry]) -> f64 {
        let mut risk = 0.0;

        if history.len() >= 2 {
            let last = history[history.len() - 1].region;
            let prev = history[history.len() - 2].region;
            if let (Some(a), Some(b)) = (last, prev) {
                if a != b {
                    risk += self.drift.flip_risk;
                }
            }
        }

        let window = self.drift.oscillation_window.max(3);
        let distances: Vec<f64> = history
            .iter()
            .rev()
            .take(window)
            .rev()
            .filter_map(|g| g.ruin_distance)
            .collect();
        if distances.len() >= 3 {
            let deltas: Vec<f64> = distances.windows(2).map(|w| w[1] - w[0]).collect();
            let alternations = deltas
                .windows(2)
                .filter(|w| w[0] * w[1] < 0.0)
                .count();
            let low = distances.iter().cloned().fold(f64::INFINITY, f64::min);
            let high = distances.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if alternations >= 1 && high - low > self.drift.oscillation_amplitude {
                risk += self.drift.oscillation_risk;
            }
        }

        risk
    }

    fn thresholds(&self) -> &GovernorThresholds {
        &self.thresholds
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifold() -> SeedManifold {
        SeedManifold::new("t", &FamilySpec::default()).unwrap()
    }

    #[test]
    fn test_forbidden_token_lands_in_ruin_region() {
        let m = manifold();
        let result = m.evaluate(&Candidate::text("FORBID this")).unwrap();
        assert!(result.red_flag);
        assert_eq!(result.violations[0].code, "ruin_region_dominant");
        assert_eq!(result.blue_score, 0.0);
        assert!(m.ruin_check(&Candidate::text("forbid")));
    }

    #[test]
    fn test_clean_candidate_scores_by_margin() {
        let m = manifold();
        let result = m.evaluate(&Candidate::text("OK")).unwrap();
        assert!(!result.red_flag);
        assert!(result.blue_score > 0.0 && result.blue_score <= 1.0);
        assert!(result.geometry.is_some());
        assert!(m.succeeded(&result));
    }

    #[test]
    fn test_missing_required_token_is_only_a_warning() {
        let m = manifold();
        let result = m.evaluate(&Candidate::text("fine answer")).unwrap();
        assert_eq!(result.error_count(), 0);
        assert!(result
            .violations
            .iter()
            .any(|v| v.code == "missing_required_token"));
    }

    #[test]
    fn test_region_flip_raises_drift_risk() {
        let m = manifold();
        let steady = vec![
            AttemptGeometry { region: Some(1), ruin_distance: Some(0.8) },
            AttemptGeometry { region: Some(1), ruin_distance: Some(0.8) },
        ];
        assert_eq!(m.drift_risk(&steady), 0.0);

        let flipped = vec![
            AttemptGeometry { region: Some(1), ruin_distance: Some(0.8) },
            AttemptGeometry { region: Some(2), ruin_distance: Some(0.8) },
        ];
        assert!(m.drift_risk(&flipped) >= m.drift.flip_risk);
    }

    #[test]
    fn test_ruin_distance_oscillation_raises_drift_risk() {
        let m = manifold();
        let oscillating: Vec<AttemptGeometry> = [0.2, 2.5, 0.3, 2.4]
            .iter()
            .map(|&d| AttemptGeometry { region: Some(1), ruin_distance: Some(d) })
            .collect();
        assert!(m.drift_risk(&oscillating) >= m.drift.oscillation_risk);

        let calm: Vec<AttemptGeometry> = [1.0, 1.1, 1.0, 1.1]
            .iter()
            .map(|&d| AttemptGeometry { region: Some(1), ruin_distance: Some(d) })
            .collect();
        assert_eq!(m.drift_risk(&calm), 0.0);
    }

    #[test]
    fn test_missing_ruin_seed_is_rejected() {
        let spec = FamilySpec {
            seeds: vec![Seed::utility("only", vec![0.0], 0.0)],
            ..FamilySpec::default()
        };
        assert!(SeedManifold::new("t", &spec).is_err());
    }
}
