//! Hidden-marker family
//!
//! Valid iff a zero-width marker sequence appears immediately after the
//! target phrase and nowhere else. Each failure mode carries a distinct
//! violation code so repair hints can be precise.

use crate::config::{FamilySpec, GovernorThresholds};
use crate::manifold::{
    Candidate, Manifold, ProjectionSpec, ValidationFault, ValidationResult, Violation,
};

pub const DEFAULT_MARKER: &str = "\u{200b}";

pub struct HiddenMarkerManifold {
    id: String,
    target: String,
    marker: String,
    thresholds: GovernorThresholds,
    max_retries: usize,
}

impl HiddenMarkerManifold {
    pub fn new(tag: &str, target: &str, spec: &FamilySpec) -> Self {
        let target = spec
            .target_phrase
            .clone()
            .unwrap_or_else(|| target.trim().to_uppercase());
        Self {
            id: format!("hidden_marker:{tag}"),
            target,
            marker: spec.marker.clone().unwrap_or_else(|| DEFAULT_MARKER.to_string()),
            thresholds: spec.thresholds.clone(),
            max_retries: spec.max_retries,
        }
    }

    fn marker_offsets(&self, text: &str) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut start = 0;
        while let Some(pos) = text[start..].find(&self.marker) {
            offsets.push(start + pos);
            start += pos + self.marker.len();
        }
        offsets
    }
}

impl Manifold for HiddenMarkerManifold {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &'static str {
        "hidden_marker"
    }

    fn projection(&self) -> ProjectionSpec {
        ProjectionSpec {
            system_instruction:
                "Produce exactly one line of text respecting the hidden formatting contract. Do not explain."
                    .to_string(),
            user_prompt: format!("Write the phrase '{}' with its hidden marker.", self.target),
            invariants: vec![
                format!("Include the exact phrase '{}'.", self.target),
                "Place the zero-width marker U+200B immediately after the phrase.".to_string(),
                "Do not place the marker anywhere else.".to_string(),
                "One line, no explanations.".to_string(),
            ],
        }
    }

    fn ruin_check(&self, _candidate: &Candidate) -> bool {
        false
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<ValidationResult, ValidationFault> {
        let text = candidate.stripped_text();
        let mut violations = Vec::new();
        let mut hints = Vec::new();

        let phrase_at = text.find(&self.target);
        if phrase_at.is_none() {
            violations.push(Violation::error(
                "phrase_missing",
                format!("Target phrase '{}' not found.", self.target),
            ));
            hints.push(format!("Include the exact phrase '{}'.", self.target));
        }

        let offsets = self.marker_offsets(&text);
        let expected_at = phrase_at.map(|p| p + self.target.len());

        match (offsets.len(), expected_at) {
            (0, _) => {
                violations.push(Violation::error(
                    "marker_missing",
                    "Hidden marker is absent.",
                ));
                hints.push("Insert U+200B immediately after the target phrase.".to_string());
            }
            (1, Some(at)) if offsets[0] == at => {}
            (1, _) => {
                violations.push(
                    Violation::error("marker_misplaced", "Hidden marker is not immediately after the target phrase.")
                        .with_metadata(serde_json::json!({ "offset": offsets[0] })),
                );
                hints.push(
                    "Move the marker so it directly follows the target phrase.".to_string(),
                );
            }
            (n, _) => {
                violations.push(
                    Violation::error("marker_duplicated", "Hidden marker appears more than once.")
                        .with_metadata(serde_json::json!({ "count": n })),
                );
                hints.push("Emit the marker exactly once.".to_string());
            }
        }

        if violations.is_empty() {
            Ok(ValidationResult::passing(1.0))
        } else {
            let distance = violations.len() as f64;
            Ok(ValidationResult::failing(distance, 0.0, violations).with_hints(hints))
        }
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

    fn manifold() -> HiddenMarkerManifold {
        HiddenMarkerManifold::new("t", "NEPSIS", &FamilySpec::default())
    }

    #[test]
    fn test_marker_after_phrase_validates() {
        let m = manifold();
        let result = m.evaluate(&Candidate::text("NEPSIS\u{200b}")).unwrap();
        assert!(result.violations.is_empty());
        assert_eq!(result.blue_score, 1.0);
        assert!(m.succeeded(&result));
    }

    #[test]
    fn test_marker_before_phrase_is_misplaced() {
        let m = manifold();
        let result = m.evaluate(&Candidate::text("\u{200b}NEPSIS")).unwrap();
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].code, "marker_misplaced");
    }

    #[test]
    fn test_missing_marker_has_distinct_code() {
        let m = manifold();
        let result = m.evaluate(&Candidate::text("NEPSIS")).unwrap();
        assert_eq!(result.violations[0].code, "marker_missing");
    }

    #[test]
    fn test_duplicated_marker_has_distinct_code() {
        let m = manifold();
        let result = m
            .evaluate(&Candidate::text("NEPSIS\u{200b} and again\u{200b}"))
            .unwrap();
        assert_eq!(result.violations[0].code, "marker_duplicated");
    }

    #[test]
    fn test_missing_phrase_reported_alongside_marker() {
        let m = manifold();
        let result = m.evaluate(&Candidate::text("nothing here")).unwrap();
        let codes: Vec<&str> = result.violations.iter().map(|v| v.code.as_str()).collect();
        assert!(codes.contains(&"phrase_missing"));
        assert!(codes.contains(&"marker_missing"));
    }

    #[test]
    fn test_marker_elsewhere_plus_correct_is_duplicated() {
        let m = manifold();
        let result = m
            .evaluate(&Candidate::text("\u{200b}NEPSIS\u{200b}"))
            .unwrap();
        assert_eq!(result.violations[0].code, "marker_duplicated");
    }
}
