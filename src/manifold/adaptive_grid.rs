//! Adaptive-grid family
//!
//! Infers a shape constraint from the sign's train/test bundle, then enforces
//! it on the candidate. Candidates must arrive wrapped in a single-field
//! envelope `{"grid": [[...]]}`; a fallback heuristic recovers a grid from
//! unstructured output before the attempt is failed.

use serde::{Deserialize, Serialize};

use crate::config::{FamilySpec, GovernorThresholds};
use crate::manifold::grid::{self, Grid};
use crate::manifold::{
    Candidate, Manifold, ProjectionSpec, ValidationFault, ValidationResult, Violation,
};
use crate::sign::GridBundle;

/// How the output shape is constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeMode {
    /// Output shape must equal the test input shape.
    Isometric,
    /// Output shape is a fixed known shape shared by every train output.
    Fixed,
    /// Shape is derived from content; only structural checks apply.
    Dynamic,
}

pub struct AdaptiveGridManifold {
    id: String,
    bundle: GridBundle,
    mode: ShapeMode,
    expected_shape: Option<(usize, usize)>,
    thresholds: GovernorThresholds,
    max_retries: usize,
}

impl AdaptiveGridManifold {
    pub fn new(tag: &str, bundle: GridBundle, spec: &FamilySpec) -> Self {
        let (mode, expected_shape) = infer_mode(&bundle);
        Self {
            id: format!("adaptive_grid:{tag}"),
            bundle,
            mode,
            expected_shape,
            thresholds: spec.thresholds.clone(),
            max_retries: spec.max_retries,
        }
    }

    pub fn mode(&self) -> ShapeMode {
        self.mode
    }

    pub fn expected_shape(&self) -> Option<(usize, usize)> {
        self.expected_shape
    }

    /// Envelope first; fall back to scanning for any JSON block. The
    /// fallback degrades to a warning rather than failing outright.
    fn recover_grid(&self, text: &str) -> Result<(Grid, bool), ValidationFault> {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
            if let Some(inner) = value.get("grid") {
                return grid::grid_from_value(inner)
                    .map(|g| (g, false))
                    .ok_or_else(|| {
                        ValidationFault::MalformedGrid("'grid' is not a 2D integer array".into())
                    });
            }
            if let Some(g) = grid::grid_from_value(&value) {
                return Ok((g, true));
            }
        }

        let block = grid::extract_first_json_block(text).ok_or_else(|| {
            ValidationFault::MalformedEnvelope("no JSON value found in output".into())
        })?;
        let inner = block.get("grid").unwrap_or(&block);
        grid::grid_from_value(inner)
            .map(|g| (g, true))
            .ok_or_else(|| ValidationFault::MalformedEnvelope("no recoverable grid".into()))
    }
}

fn infer_mode(bundle: &GridBundle) -> (ShapeMode, Option<(usize, usize)>) {
    if bundle.train.is_empty() {
        return (ShapeMode::Isometric, Some(grid::shape(&bundle.test_input)));
    }

    let isometric = bundle
        .train
        .iter()
        .all(|pair| grid::shape(&pair.input) == grid::shape(&pair.output));
    if isometric {
        return (ShapeMode::Isometric, Some(grid::shape(&bundle.test_input)));
    }

    let first = grid::shape(&bundle.train[0].output);
    let fixed = bundle
        .train
        .iter()
        .all(|pair| grid::shape(&pair.output) == first);
    if fixed {
        return (ShapeMode::Fixed, Some(first));
    }

    (ShapeMode::Dynamic, None)
}

impl Manifold for AdaptiveGridManifold {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &'static str {
        "adaptive_grid"
    }

    fn projection(&self) -> ProjectionSpec {
        let mut prompt_parts: Vec<String> = vec![
            "Training examples map INPUT grids to OUTPUT grids.".to_string(),
            "Infer the transformation and apply it to the TEST INPUT.".to_string(),
            String::new(),
        ];
        for (idx, pair) in self.bundle.train.iter().enumerate() {
            prompt_parts.push(format!("--- EXAMPLE {} ---", idx + 1));
            prompt_parts.push(format!(
                "INPUT: {}",
                serde_json::to_string(&pair.input).unwrap_or_default()
            ));
            prompt_parts.push(format!(
                "OUTPUT: {}",
                serde_json::to_string(&pair.output).unwrap_or_default()
            ));
        }
        prompt_parts.push("--- TEST INPUT ---".to_string());
        prompt_parts.push(
            serde_json::to_string(&self.bundle.test_input).unwrap_or_default(),
        );

        ProjectionSpec {
            system_instruction:
                "You solve abstract grid-reasoning puzzles. Respond with a JSON object of the form \
                 {\"grid\": [[...],[...]]} and nothing else; any other response is discarded."
                    .to_string(),
            user_prompt: prompt_parts.join("\n"),
            invariants: vec![
                "Output must be a JSON object with exactly one key 'grid'.".to_string(),
                "'grid' must be a rectangular 2D array of integers.".to_string(),
                "No Markdown, no explanations.".to_string(),
            ],
        }
    }

    fn ruin_check(&self, _candidate: &Candidate) -> bool {
        false
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<ValidationResult, ValidationFault> {
        let text = candidate.stripped_text();
        let (grid, recovered) = self.recover_grid(&text)?;

        let mut violations = Vec::new();
        let mut hints = Vec::new();

        if recovered {
            violations.push(Violation::warning(
                "envelope_missing",
                "Grid was recovered outside the {\"grid\": ...} envelope.",
            ));
            hints.push("Wrap the grid in {\"grid\": [[...]]}.".to_string());
        }

        if grid.is_empty() || !grid::is_rectangular(&grid) {
            violations.push(Violation::error(
                "not_rectangular",
                "Output grid must be a non-empty rectangular 2D array.",
            ));
            hints.push("Emit rows of equal length.".to_string());
        } else if let Some(expected) = self.expected_shape {
            let got = grid::shape(&grid);
            if got != expected {
                violations.push(
                    Violation::error(
                        "shape_mismatch",
                        format!(
                            "Expected a {}x{} grid ({:?} mode), got {}x{}.",
                            expected.0, expected.1, self.mode, got.0, got.1
                        ),
                    )
                    .with_metadata(serde_json::json!({
                        "expected": [expected.0, expected.1],
                        "got": [got.0, got.1],
                    })),
                );
                hints.push(format!(
                    "Produce exactly {} row(s) of {} cell(s).",
                    expected.0, expected.1
                ));
            }
        }

        if grid.iter().flatten().any(|&c| !(0..=9).contains(&c)) {
            violations.push(Violation::warning(
                "cell_range",
                "Cells outside the 0-9 palette.",
            ));
        }

        let errors = violations
            .iter()
            .filter(|v| v.severity == crate::manifold::Severity::Error)
            .count();
        if errors == 0 {
            let blue = if recovered { 0.9 } else { 1.0 };
            let mut result = ValidationResult::passing(blue);
            result.violations = violations;
            result.hints = hints;
            Ok(result)
        } else {
            Ok(ValidationResult::failing(errors as f64, 0.0, violations).with_hints(hints))
        }
    }

    fn thresholds(&self) -> &GovernorThresholds {
        &self.thresholds
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}
