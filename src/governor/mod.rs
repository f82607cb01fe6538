//! Manifold Governor
//!
//! Per-run collapse governor with temporal awareness of tension. Each
//! attempt's tension is folded into a bounded sliding window; velocity and
//! acceleration are first and second differences over that window. Rules are
//! evaluated in severity order, first match wins, and every transition emits
//! a trace snapshot so non-terminal WARN decisions remain observable.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GovernorThresholds;
use crate::manifold::{ValidationResult, Violation};

/// Governor output per attempt. WARN is non-terminal; COLLAPSE and RUIN end
/// the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorSignal {
    Continue,
    Warn,
    Collapse,
    Ruin,
}

impl GovernorSignal {
    pub fn is_terminal(self) -> bool {
        matches!(self, GovernorSignal::Collapse | GovernorSignal::Ruin)
    }
}

/// One tension observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TensionSample {
    pub step: usize,
    pub tension: f64,
}

/// Snapshot emitted on every governor transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub manifold_id: String,
    pub decision: GovernorSignal,
    pub distance: f64,
    pub blue_score: f64,
    pub red_flag: bool,
    pub violations: Vec<Violation>,
    pub tension: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub cause: Option<String>,
    pub posterior_snapshot: BTreeMap<String, f64>,
    pub step: usize,
    pub at: DateTime<Utc>,
}

/// Map one attempt's validation into scalar tension: distance, quality
/// shortfall, severity-weighted violations, and the family's drift risk.
pub fn tension_of(result: &ValidationResult, drift_risk: f64) -> f64 {
    let severity_mass: f64 = result.violations.iter().map(|v| v.severity.weight()).sum();
    result.distance + (1.0 - result.blue_score) + severity_mass + drift_risk
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensionMetrics {
    pub tension: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub mean_velocity: f64,
}

pub struct Governor {
    thresholds: GovernorThresholds,
    window: VecDeque<TensionSample>,
    step: usize,
}

impl Governor {
    pub fn new(thresholds: GovernorThresholds) -> Self {
        Self {
            thresholds,
            window: VecDeque::new(),
            step: 0,
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &TensionSample> {
        self.window.iter()
    }

    fn push(&mut self, tension: f64) {
        if self.window.len() == self.thresholds.window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(TensionSample {
            step: self.step,
            tension,
        });
        self.step += 1;
    }

    fn metrics(&self) -> TensionMetrics {
        let values: Vec<f64> = self.window.iter().map(|s| s.tension).collect();
        let n = values.len();
        let tension = values.last().copied().unwrap_or(0.0);
        let velocity = if n >= 2 {
            values[n - 1] - values[n - 2]
        } else {
            0.0
        };
        let acceleration = if n >= 3 {
            (values[n - 1] - values[n - 2]) - (values[n - 2] - values[n - 3])
        } else {
            0.0
        };
        let mean_velocity = if n >= 2 {
            (values[n - 1] - values[0]) / (n - 1) as f64
        } else {
            0.0
        };
        TensionMetrics {
            tension,
            velocity,
            acceleration,
            mean_velocity,
        }
    }

    /// Fold one attempt into the window and decide. `ruin_fired` reports the
    /// manifold's ruin predicate for this attempt.
    pub fn observe(&mut self, tension: f64, ruin_fired: bool) -> (GovernorSignal, TensionMetrics, Option<String>) {
        self.push(tension);
        let metrics = self.metrics();
        let t = &self.thresholds;

        let (signal, cause) = if ruin_fired {
            (GovernorSignal::Ruin, Some("RUIN_PREDICATE".to_string()))
        } else if metrics.tension > t.ruin_tension {
            (GovernorSignal::Ruin, Some("ABS_TENSION".to_string()))
        } else if metrics.acceleration > t.accel_spike {
            (GovernorSignal::Ruin, Some("ACCEL_SPIKE".to_string()))
        } else if metrics.tension > t.collapse_tension {
            (GovernorSignal::Collapse, Some("ABS_TENSION".to_string()))
        } else if metrics.mean_velocity > t.velocity_drift {
            (GovernorSignal::Collapse, Some("VELOCITY_DRIFT".to_string()))
        } else if metrics.tension > t.warn_tension {
            (GovernorSignal::Warn, Some("ABS_TENSION".to_string()))
        } else {
            (GovernorSignal::Continue, None)
        };

        match signal {
            GovernorSignal::Ruin | GovernorSignal::Collapse => warn!(
                ?signal,
                tension = metrics.tension,
                cause = cause.as_deref().unwrap_or(""),
                "governor terminal transition"
            ),
            _ => debug!(?signal, tension = metrics.tension, "governor transition"),
        }

        (signal, metrics, cause)
    }
}

/// Assemble the per-transition trace snapshot.
#[allow(clippy::too_many_arguments)]
pub fn trace_snapshot(
    manifold_id: &str,
    decision: GovernorSignal,
    result: &ValidationResult,
    metrics: TensionMetrics,
    cause: Option<String>,
    posterior: &BTreeMap<String, f64>,
    step: usize,
) -> DecisionTrace {
    DecisionTrace {
        manifold_id: manifold_id.to_string(),
        decision,
        distance: result.distance,
        blue_score: result.blue_score,
        red_flag: result.red_flag,
        violations: result.violations.clone(),
        tension: metrics.tension,
        velocity: metrics.velocity,
        acceleration: metrics.acceleration,
        cause,
        posterior_snapshot: posterior.clone(),
        step,
        at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> GovernorThresholds {
        GovernorThresholds {
            warn_tension: 1.0,
            collapse_tension: 4.0,
            ruin_tension: 8.0,
            accel_spike: 5.0,
            velocity_drift: 2.0,
            window: 4,
        }
    }

    #[test]
    fn test_calm_tension_continues() {
        let mut g = Governor::new(thresholds());
        let (signal, metrics, cause) = g.observe(0.2, false);
        assert_eq!(signal, GovernorSignal::Continue);
        assert_eq!(metrics.velocity, 0.0);
        assert!(cause.is_none());
    }

    #[test]
    fn test_warn_band_is_non_terminal() {
        let mut g = Governor::new(thresholds());
        let (signal, _, cause) = g.observe(1.5, false);
        assert_eq!(signal, GovernorSignal::Warn);
        assert!(!signal.is_terminal());
        assert_eq!(cause.as_deref(), Some("ABS_TENSION"));
    }

    #[test]
    fn test_collapse_and_ruin_bands() {
        let mut g = Governor::new(thresholds());
        let (signal, _, _) = g.observe(5.0, false);
        assert_eq!(signal, GovernorSignal::Collapse);

        let mut g = Governor::new(thresholds());
        let (signal, _, _) = g.observe(9.0, false);
        assert_eq!(signal, GovernorSignal::Ruin);
    }

    #[test]
    fn test_ruin_predicate_outranks_everything() {
        let mut g = Governor::new(thresholds());
        let (signal, _, cause) = g.observe(0.0, true);
        assert_eq!(signal, GovernorSignal::Ruin);
        assert_eq!(cause.as_deref(), Some("RUIN_PREDICATE"));
    }

    #[test]
    fn test_acceleration_spike_ruins() {
        let mut g = Governor::new(thresholds());
        g.observe(0.5, false);
        g.observe(0.6, false);
        // 0.6 -> 0.6 velocity 0; jump to 6.7 gives accel ~6.0 > 5.0 while
        // tension stays under the ruin band.
        g.observe(0.6, false);
        let (signal, metrics, cause) = g.observe(6.7, false);
        assert!(metrics.acceleration > 5.0);
        assert_eq!(signal, GovernorSignal::Ruin);
        assert_eq!(cause.as_deref(), Some("ACCEL_SPIKE"));
    }

    #[test]
    fn test_sustained_velocity_collapses() {
        let t = GovernorThresholds {
            velocity_drift: 0.5,
            collapse_tension: 100.0,
            ruin_tension: 200.0,
            accel_spike: 100.0,
            ..thresholds()
        };
        let mut g = Governor::new(t);
        g.observe(0.0, false);
        g.observe(0.8, false);
        let (signal, metrics, cause) = g.observe(1.6, false);
        assert!(metrics.mean_velocity > 0.5);
        assert_eq!(signal, GovernorSignal::Collapse);
        assert_eq!(cause.as_deref(), Some("VELOCITY_DRIFT"));
    }

    #[test]
    fn test_window_eviction() {
        let mut g = Governor::new(thresholds());
        for i in 0..10 {
            g.observe(0.1 * i as f64, false);
        }
        assert_eq!(g.samples().count(), 4);
        assert_eq!(g.samples().next().unwrap().step, 6);
    }

    #[test]
    fn test_tension_of_composition() {
        let result = ValidationResult::failing(
            0.5,
            0.25,
            vec![
                Violation::error("a", "x"),
                Violation::warning("b", "y"),
            ],
        );
        let tension = tension_of(&result, 0.25);
        // 0.5 + 0.75 + (1.0 + 0.5) + 0.25
        assert!((tension - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_trace_field_names_are_stable() {
        let result = ValidationResult::passing(1.0);
        let mut g = Governor::new(thresholds());
        let (signal, metrics, cause) = g.observe(0.0, false);
        let trace = trace_snapshot("m:test", signal, &result, metrics, cause, &BTreeMap::new(), 0);
        let json = serde_json::to_value(&trace).unwrap();
        for field in [
            "manifold_id",
            "decision",
            "distance",
            "blue_score",
            "red_flag",
            "violations",
            "tension",
            "velocity",
            "acceleration",
            "cause",
            "posterior_snapshot",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["decision"], "continue");
    }
}
