//! Manifolds
//!
//! A manifold is the instantiated constraint geometry and scoring rules for
//! one domain family. Every family implements the same contract: evaluate a
//! candidate, check the ruin predicate, and turn a failing result into a
//! correction delta for the next projection. Seeds and transforms are fixed
//! at instantiation; evaluation never mutates the manifold.

pub mod adaptive_grid;
pub mod grid;
pub mod grid_physics;
pub mod hidden_marker;
pub mod multiset;
pub mod seed;
pub mod stream;

pub use adaptive_grid::{AdaptiveGridManifold, ShapeMode};
pub use grid_physics::GridPhysicsManifold;
pub use hidden_marker::HiddenMarkerManifold;
pub use multiset::MultisetManifold;
pub use seed::SeedManifold;
pub use stream::StreamManifold;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GovernorThresholds;

/// A candidate artifact produced by the generation capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Candidate {
    Text(String),
    Bytes(Vec<u8>),
}

impl Candidate {
    pub fn text(value: impl Into<String>) -> Self {
        Candidate::Text(value.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Candidate::Text(t) => t.as_bytes(),
            Candidate::Bytes(b) => b,
        }
    }

    /// Text view; lossy for byte candidates.
    pub fn as_text(&self) -> String {
        match self {
            Candidate::Text(t) => t.clone(),
            Candidate::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Strip markdown fences models like to add around structured output.
    pub fn stripped_text(&self) -> String {
        let text = self.as_text();
        let trimmed = text.trim();
        if let Some(rest) = trimmed.strip_prefix("```") {
            let rest = rest
                .split_once('\n')
                .map(|(_, body)| body)
                .unwrap_or(rest);
            return rest.trim_end_matches('`').trim().to_string();
        }
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Contribution to the governor's tension signal.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Info => 0.1,
            Severity::Warning => 0.5,
            Severity::Error => 1.0,
        }
    }
}

/// A single constraint violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Violation {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Error,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Warning,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Geometry telemetry attached to an attempt, consumed by drift detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptGeometry {
    /// Assigned region index, for region-flip detection.
    pub region: Option<usize>,
    /// Weighted distance to the ruin seed, for oscillation detection.
    pub ruin_distance: Option<f64>,
}

/// Outcome of validating one projection attempt. Produced fresh per attempt
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Non-negative, domain-defined distance from the success region.
    pub distance: f64,
    /// Graded quality in [0, 1].
    pub blue_score: f64,
    /// Hard safety flag; set when the ruin predicate or a ruin region fired.
    pub red_flag: bool,
    pub violations: Vec<Violation>,
    /// Human-readable repair suggestions, ordered by priority.
    pub hints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<AttemptGeometry>,
}

impl ValidationResult {
    pub fn passing(blue_score: f64) -> Self {
        Self {
            distance: 0.0,
            blue_score: blue_score.clamp(0.0, 1.0),
            red_flag: false,
            violations: Vec::new(),
            hints: Vec::new(),
            geometry: None,
        }
    }

    pub fn failing(distance: f64, blue_score: f64, violations: Vec<Violation>) -> Self {
        Self {
            distance: distance.max(0.0),
            blue_score: blue_score.clamp(0.0, 1.0),
            red_flag: false,
            violations,
            hints: Vec::new(),
            geometry: None,
        }
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_red_flag(mut self) -> Self {
        self.red_flag = true;
        self
    }

    pub fn with_geometry(mut self, geometry: AttemptGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn error_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .count()
    }

    /// Degrade a validation fault into a hard violation so it consumes a
    /// retry instead of crashing the run.
    pub fn from_fault(fault: &ValidationFault) -> Self {
        ValidationResult::failing(
            1.0,
            0.0,
            vec![Violation::error("validation_fault", fault.to_string())],
        )
        .with_hints(vec![fault.hint()])
    }
}

/// The manifold threw on a malformed candidate structure. Treated as a
/// validation failure, never surfaced to the caller as a crash.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationFault {
    #[error("candidate envelope is malformed: {0}")]
    MalformedEnvelope(String),
    #[error("candidate grid is malformed: {0}")]
    MalformedGrid(String),
}

impl ValidationFault {
    pub fn hint(&self) -> String {
        match self {
            ValidationFault::MalformedEnvelope(_) => {
                "Return a JSON object with a single 'grid' key, e.g. {\"grid\": [[0,1],[2,3]]}."
                    .to_string()
            }
            ValidationFault::MalformedGrid(_) => {
                "Return a rectangular 2D array of integers.".to_string()
            }
        }
    }
}

/// The repair hint injected into the next projection prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionDelta {
    pub text: String,
}

impl CorrectionDelta {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl std::fmt::Display for CorrectionDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// The constraint frame handed to the generation capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSpec {
    pub system_instruction: String,
    pub user_prompt: String,
    pub invariants: Vec<String>,
}

impl ProjectionSpec {
    /// Render the user-facing prompt, appending the correction delta from the
    /// previous failed attempt when present.
    pub fn render_user_prompt(&self, delta: Option<&CorrectionDelta>) -> String {
        let mut prompt = self.user_prompt.clone();
        if !self.invariants.is_empty() {
            prompt.push_str("\n\nINVARIANTS:");
            for invariant in &self.invariants {
                prompt.push_str("\n- ");
                prompt.push_str(invariant);
            }
        }
        if let Some(delta) = delta {
            prompt.push_str("\n\nCORRECTION: ");
            prompt.push_str(&delta.text);
        }
        prompt
    }
}

/// The contract every manifold family implements.
pub trait Manifold: Send + Sync {
    /// Instance identifier, unique to this run.
    fn id(&self) -> &str;

    /// Family identifier, stable across runs.
    fn family(&self) -> &'static str;

    /// The constraint frame for the generation capability.
    fn projection(&self) -> ProjectionSpec;

    /// Fail-closed predicate, evaluated before full scoring. Once true the
    /// run terminates in RUIN with no further projection attempts.
    fn ruin_check(&self, candidate: &Candidate) -> bool;

    /// Deterministic scoring of a candidate. Must not mutate manifold state.
    fn evaluate(&self, candidate: &Candidate) -> Result<ValidationResult, ValidationFault>;

    /// Produce the correction delta for the next attempt. A pure function of
    /// the previous failing result, so repair is reproducible.
    fn repair_hint(&self, previous: &ValidationResult) -> CorrectionDelta {
        if previous.hints.is_empty() {
            CorrectionDelta::new("PREVIOUS ATTEMPT REJECTED. Fix the reported violations and retry.")
        } else {
            CorrectionDelta::new(format!(
                "PREVIOUS ATTEMPT REJECTED. {} RETRY and obey every invariant.",
                previous.hints.join(" | ")
            ))
        }
    }

    /// Success-signature matcher. Default: no red flag and no error-severity
    /// violations.
    fn succeeded(&self, result: &ValidationResult) -> bool {
        !result.red_flag && result.error_count() == 0
    }

    /// Family-specific elevated-risk signal from the run's attempt history.
    /// Fed into the governor's tension even absent an outright violation.
    fn drift_risk(&self, _history: &[AttemptGeometry]) -> f64 {
        0.0
    }

    fn thresholds(&self) -> &GovernorThresholds;

    /// ZeroBack budget for this manifold; attempt indices run 0..=max_retries.
    fn max_retries(&self) -> usize;
}
