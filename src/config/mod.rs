//! Configuration
//!
//! Structured configuration for manifold families and governor thresholds.
//! The manifest *document* is parsed by an external loader; this module only
//! defines the already-parsed shape it must deliver, plus a YAML convenience
//! deserializer for callers that keep manifests on disk.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::Seed;

/// Governor bounds for one manifold family. All bounds act on the tension
/// window described in [`crate::governor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorThresholds {
    /// Tension above this is logged as WARN (non-terminal).
    pub warn_tension: f64,
    /// Tension above this terminates the run with COLLAPSE.
    pub collapse_tension: f64,
    /// Tension above this terminates the run with RUIN.
    pub ruin_tension: f64,
    /// Acceleration above this is an acute spike: terminal RUIN.
    pub accel_spike: f64,
    /// Mean velocity over the window above this is sustained drift: COLLAPSE.
    pub velocity_drift: f64,
    /// Sliding-window capacity for tension samples.
    pub window: usize,
}

impl Default for GovernorThresholds {
    fn default() -> Self {
        Self {
            warn_tension: 1.0,
            collapse_tension: 6.0,
            ruin_tension: 10.0,
            accel_spike: 6.0,
            velocity_drift: 3.0,
            window: 8,
        }
    }
}

/// Drift-detection parameters for the adversarial-seed family. The flip and
/// oscillation bounds are deliberately configuration, not constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Risk added when the assigned region changes between consecutive attempts.
    pub flip_risk: f64,
    /// Minimum peak-to-peak ruin-distance swing that counts as oscillation.
    pub oscillation_amplitude: f64,
    /// Number of trailing attempts inspected for oscillation.
    pub oscillation_window: usize,
    /// Risk added when oscillation is detected.
    pub oscillation_risk: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            flip_risk: 0.75,
            oscillation_amplitude: 1.5,
            oscillation_window: 4,
            oscillation_risk: 0.5,
        }
    }
}

/// Per-family template: seeds, transforms, ruin parameters and governor
/// thresholds. Unused fields are simply ignored by families that do not
/// consume them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilySpec {
    pub thresholds: GovernorThresholds,
    /// ZeroBack budget: attempt indices run 0..=max_retries.
    pub max_retries: usize,
    pub drift: DriftConfig,
    /// Tokens whose presence fires the ruin predicate.
    pub ruin_terms: Vec<String>,
    /// Tokens the utility seeds reward.
    pub required_terms: Vec<String>,
    /// Named built-in transforms to activate (e.g. "i_j_interchange").
    pub transforms: Vec<String>,
    /// Explicit seed points; when empty, seed-based families synthesize their
    /// default layout.
    pub seeds: Vec<Seed>,
    /// Target phrase override for the hidden-marker family.
    pub target_phrase: Option<String>,
    /// Marker override for the hidden-marker family (defaults to U+200B).
    pub marker: Option<String>,
    /// Optional lexicon for the multiset family; absent means no word check.
    pub lexicon: Option<Vec<String>>,
    /// Grid ids treated as static terrain in addition to the bottom row.
    pub static_ids: Vec<i64>,
}

impl Default for FamilySpec {
    fn default() -> Self {
        Self {
            thresholds: GovernorThresholds::default(),
            max_retries: 3,
            drift: DriftConfig::default(),
            ruin_terms: Vec::new(),
            required_terms: Vec::new(),
            transforms: Vec::new(),
            seeds: Vec::new(),
            target_phrase: None,
            marker: None,
            lexicon: None,
            static_ids: Vec::new(),
        }
    }
}

/// Likelihood boost applied when a keyword appears in the sign's surface text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodSpec {
    pub keyword: String,
    pub boost: f64,
}

/// One interpretant hypothesis: a prior over a family plus an optional
/// keyword likelihood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretantSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub family: String,
    #[serde(default = "default_prior")]
    pub prior: f64,
    #[serde(default)]
    pub likelihood: Option<LikelihoodSpec>,
}

fn default_prior() -> f64 {
    1.0
}

/// The full already-parsed manifest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSpec {
    pub interpretants: Vec<InterpretantSpec>,
    pub families: BTreeMap<String, FamilySpec>,
}

impl ManifestSpec {
    /// Deserialize a manifest from YAML text already read by the caller.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("failed to deserialize manifest")
    }

    /// Family template by id, falling back to defaults for unlisted families.
    pub fn family(&self, id: &str) -> FamilySpec {
        self.families.get(id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_ordered() {
        let t = GovernorThresholds::default();
        assert!(t.warn_tension < t.collapse_tension);
        assert!(t.collapse_tension < t.ruin_tension);
        assert!(t.window >= 3);
    }

    #[test]
    fn test_manifest_from_yaml() {
        let yaml = r#"
interpretants:
  - id: strict
    family: multiset
    prior: 0.6
  - id: marker
    family: hidden_marker
    prior: 0.4
    likelihood:
      keyword: marker
      boost: 2.0
families:
  multiset:
    max_retries: 2
    thresholds:
      warn_tension: 0.5
"#;
        let spec = ManifestSpec::from_yaml_str(yaml).unwrap();
        assert_eq!(spec.interpretants.len(), 2);
        assert_eq!(spec.family("multiset").max_retries, 2);
        assert_eq!(spec.family("multiset").thresholds.warn_tension, 0.5);
        // Unlisted families fall back to defaults.
        assert_eq!(spec.family("stream").max_retries, 3);
        assert_eq!(
            spec.interpretants[1].likelihood.as_ref().unwrap().keyword,
            "marker"
        );
    }
}
