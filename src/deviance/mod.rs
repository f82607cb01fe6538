//! Deviance Monitor
//!
//! Process-wide rolling history of run outcomes and the adaptive ruin
//! threshold `tau_R` derived from it. The ratchet is asymmetric: tightening
//! takes one bad window, loosening takes an unbroken SAFE streak and never
//! passes the default.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Bucketed terminal outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeLabel {
    Safe,
    NearMiss,
    Crash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevianceConfig {
    /// History capacity and tightening window W.
    pub window: usize,
    /// Fraction of NEAR_MISS entries in the window that triggers tightening.
    pub near_miss_fraction: f64,
    /// Step subtracted from tau_R on tightening.
    pub tighten_step: f64,
    /// Step added toward the default on relaxation.
    pub relax_step: f64,
    /// Required unbroken SAFE streak M before relaxing.
    pub safe_streak: usize,
    /// Default (and maximum) tau_R.
    pub default_tau: f64,
    /// Hard floor for tau_R.
    pub floor: f64,
    /// Blue score under which an accepted run counts as a near miss.
    pub near_miss_blue: f64,
}

impl Default for DevianceConfig {
    fn default() -> Self {
        Self {
            window: 50,
            near_miss_fraction: 0.5,
            tighten_step: 0.05,
            relax_step: 0.05,
            safe_streak: 10,
            default_tau: 0.2,
            floor: 0.05,
            near_miss_blue: 0.5,
        }
    }
}

/// Rolling outcome log with the derived tau_R. One instance per process,
/// shared across runs behind a mutex; tau_R changes only through `record`.
#[derive(Debug, Clone)]
pub struct DevianceMonitor {
    config: DevianceConfig,
    history: VecDeque<OutcomeLabel>,
    tau_r: f64,
}

impl DevianceMonitor {
    pub fn new(config: DevianceConfig) -> Self {
        let tau_r = config.default_tau;
        Self {
            config,
            history: VecDeque::new(),
            tau_r,
        }
    }

    pub fn tau_r(&self) -> f64 {
        self.tau_r
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Bucket a finished run. Accepted runs with drift or low blue are near
    /// misses; terminal collapse/ruin are crashes.
    pub fn classify(&self, accepted: bool, blue_score: f64, drifted: bool) -> OutcomeLabel {
        if !accepted {
            OutcomeLabel::Crash
        } else if drifted || blue_score < self.config.near_miss_blue {
            OutcomeLabel::NearMiss
        } else {
            OutcomeLabel::Safe
        }
    }

    /// Append an outcome and recompute tau_R. Returns the new tau_R.
    pub fn record(&mut self, label: OutcomeLabel) -> f64 {
        if self.history.len() == self.config.window {
            self.history.pop_front();
        }
        self.history.push_back(label);

        let near_misses = self
            .history
            .iter()
            .filter(|l| **l == OutcomeLabel::NearMiss)
            .count();
        let fraction = near_misses as f64 / self.history.len() as f64;

        if fraction > self.config.near_miss_fraction {
            let next = (self.tau_r - self.config.tighten_step).max(self.config.floor);
            if next < self.tau_r {
                info!(tau_r = next, "deviance monitor tightened tau_R");
            }
            self.tau_r = next;
        } else if self.safe_tail() >= self.config.safe_streak {
            let next = (self.tau_r + self.config.relax_step).min(self.config.default_tau);
            if next > self.tau_r {
                debug!(tau_r = next, "deviance monitor relaxed tau_R");
            }
            self.tau_r = next;
        }

        self.tau_r
    }

    fn safe_tail(&self) -> usize {
        self.history
            .iter()
            .rev()
            .take_while(|l| **l == OutcomeLabel::Safe)
            .count()
    }
}

impl Default for DevianceMonitor {
    fn default() -> Self {
        Self::new(DevianceConfig::default())
    }
}
