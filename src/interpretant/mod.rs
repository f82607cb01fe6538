//! Interpretant
//!
//! Maintains a posterior over manifold families given observed signs and
//! instantiates the selected manifold for a run. Selection is a Bayes update
//! (posterior ∝ prior × likelihood, renormalized); after each run the
//! selected family's weight is nudged toward or away from 1 depending on the
//! outcome, clamped so no family ever becomes unreachable.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ManifestSpec;
use crate::deviance::OutcomeLabel;
use crate::geometry::GeometryError;
use crate::manifold::{
    AdaptiveGridManifold, GridPhysicsManifold, HiddenMarkerManifold, Manifold, MultisetManifold,
    SeedManifold, StreamManifold,
};
use crate::scoring;
use crate::sign::{Sign, SignBody};

const WEIGHT_FLOOR: f64 = 0.01;
const WEIGHT_CEILING: f64 = 0.99;
const NUDGE: f64 = 0.1;

type Factory = Arc<dyn Fn(&Sign) -> Result<Box<dyn Manifold>, GeometryError> + Send + Sync>;
type Likelihood = Arc<dyn Fn(&Sign) -> f64 + Send + Sync>;

pub struct Hypothesis {
    pub id: String,
    pub family: String,
    weight: f64,
    likelihood: Likelihood,
    factory: Factory,
}

impl Hypothesis {
    /// Register a custom family implementing the manifold contract.
    pub fn new(
        id: impl Into<String>,
        family: impl Into<String>,
        prior: f64,
        likelihood: impl Fn(&Sign) -> f64 + Send + Sync + 'static,
        factory: impl Fn(&Sign) -> Result<Box<dyn Manifold>, GeometryError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            family: family.into(),
            weight: prior.max(WEIGHT_FLOOR),
            likelihood: Arc::new(likelihood),
            factory: Arc::new(factory),
        }
    }
}

/// Result of a triage selection.
pub struct Selection {
    pub hypothesis_id: String,
    pub manifold: Box<dyn Manifold>,
    pub posterior: BTreeMap<String, f64>,
}

pub struct Interpretant {
    hypotheses: Vec<Hypothesis>,
}

impl Interpretant {
    pub fn new(hypotheses: Vec<Hypothesis>) -> Result<Self, GeometryError> {
        if hypotheses.is_empty() {
            return Err(GeometryError::Malformed(
                "interpretant requires at least one hypothesis".to_string(),
            ));
        }
        let mut it = Self { hypotheses };
        it.normalize();
        Ok(it)
    }

    /// Wire the six built-in families from a manifest. Manifest interpretant
    /// entries override priors and add keyword likelihoods; unlisted families
    /// are registered with defaults so every sign has a reachable family.
    pub fn with_default_families(manifest: &ManifestSpec) -> Self {
        let mut hypotheses = Vec::new();
        for family in [
            "multiset",
            "hidden_marker",
            "stream",
            "seed",
            "grid_physics",
            "adaptive_grid",
        ] {
            let spec = manifest.family(family);
            let entry = manifest
                .interpretants
                .iter()
                .find(|i| i.family == family);
            let prior = entry.map(|e| e.prior).unwrap_or(1.0);
            let keyword = entry.and_then(|e| e.likelihood.clone());
            let id = entry
                .map(|e| e.id.clone())
                .unwrap_or_else(|| family.to_string());

            let structural: Likelihood = match family {
                "multiset" => Arc::new(|sign: &Sign| match &sign.body {
                    SignBody::Letters(_) => 8.0,
                    SignBody::Text(t) => {
                        let bag = scoring::extract_letter_bag(t);
                        if !bag.is_empty() && bag.len() == t.trim().len() {
                            4.0
                        } else {
                            1.0
                        }
                    }
                    _ => 1e-6,
                }),
                "hidden_marker" => Arc::new(|sign: &Sign| match &sign.body {
                    SignBody::Text(t) if t.to_lowercase().contains("marker") => 6.0,
                    SignBody::Text(_) => 0.5,
                    _ => 1e-6,
                }),
                "stream" => Arc::new(|sign: &Sign| match &sign.body {
                    SignBody::Text(t)
                        if t.to_lowercase().contains("utf") || t.to_lowercase().contains("byte") =>
                    {
                        6.0
                    }
                    SignBody::Text(_) => 0.25,
                    _ => 1e-6,
                }),
                "seed" => Arc::new(|sign: &Sign| match &sign.body {
                    SignBody::Text(_) => 0.5,
                    _ => 1e-6,
                }),
                "grid_physics" => Arc::new(|sign: &Sign| match &sign.body {
                    SignBody::Grid(_) => 8.0,
                    _ => 1e-6,
                }),
                "adaptive_grid" => Arc::new(|sign: &Sign| match &sign.body {
                    SignBody::TaskBundle(_) => 10.0,
                    _ => 1e-6,
                }),
                _ => unreachable!("closed family registry"),
            };

            let likelihood: Likelihood = match keyword {
                Some(rule) => {
                    let keyword = rule.keyword.to_lowercase();
                    let boost = rule.boost;
                    Arc::new(move |sign: &Sign| {
                        let base = structural(sign);
                        if sign.surface_text().to_lowercase().contains(&keyword) {
                            base * boost
                        } else {
                            base
                        }
                    })
                }
                None => structural,
            };

            let family_name = family.to_string();
            let spec_clone = spec.clone();
            let factory: Factory = match family {
                "multiset" => Arc::new(move |sign: &Sign| {
                    let letters = match &sign.body {
                        SignBody::Letters(l) => l.clone(),
                        SignBody::Text(t) => scoring::extract_letter_bag(t),
                        _ => {
                            return Err(GeometryError::Malformed(
                                "multiset manifold needs a letter bag".to_string(),
                            ))
                        }
                    };
                    if letters.is_empty() {
                        return Err(GeometryError::Malformed(
                            "sign carries no letters".to_string(),
                        ));
                    }
                    Ok(Box::new(MultisetManifold::new(&sign.tag, &letters, &spec_clone)) as _)
                }),
                "hidden_marker" => Arc::new(move |sign: &Sign| {
                    let target = match &sign.body {
                        SignBody::Text(t) => t.clone(),
                        _ => String::new(),
                    };
                    Ok(Box::new(HiddenMarkerManifold::new(&sign.tag, &target, &spec_clone)) as _)
                }),
                "stream" => Arc::new(move |sign: &Sign| {
                    Ok(Box::new(StreamManifold::new(&sign.tag, &spec_clone)) as _)
                }),
                "seed" => Arc::new(move |sign: &Sign| {
                    SeedManifold::new(&sign.tag, &spec_clone).map(|m| Box::new(m) as _)
                }),
                "grid_physics" => Arc::new(move |sign: &Sign| match &sign.body {
                    SignBody::Grid(grid) => Ok(Box::new(GridPhysicsManifold::new(
                        &sign.tag,
                        grid.clone(),
                        &spec_clone,
                    )) as _),
                    _ => Err(GeometryError::Malformed(
                        "grid-physics manifold needs a grid sign".to_string(),
                    )),
                }),
                "adaptive_grid" => Arc::new(move |sign: &Sign| match &sign.body {
                    SignBody::TaskBundle(bundle) => Ok(Box::new(AdaptiveGridManifold::new(
                        &sign.tag,
                        bundle.clone(),
                        &spec_clone,
                    )) as _),
                    _ => Err(GeometryError::Malformed(
                        "adaptive-grid manifold needs a task bundle".to_string(),
                    )),
                }),
                _ => unreachable!("closed family registry"),
            };

            hypotheses.push(Hypothesis {
                id,
                family: family_name,
                weight: prior.max(WEIGHT_FLOOR),
                likelihood,
                factory,
            });
        }

        let mut it = Self { hypotheses };
        it.normalize();
        it
    }

    fn normalize(&mut self) {
        let total: f64 = self.hypotheses.iter().map(|h| h.weight).sum();
        if total <= 0.0 {
            let uniform = 1.0 / self.hypotheses.len() as f64;
            for h in &mut self.hypotheses {
                h.weight = uniform;
            }
        } else {
            for h in &mut self.hypotheses {
                h.weight /= total;
            }
        }
    }

    pub fn posterior(&self) -> BTreeMap<String, f64> {
        self.hypotheses
            .iter()
            .map(|h| (h.id.clone(), h.weight))
            .collect()
    }

    /// Bayes update for a sign, then instantiate the maximum-posterior
    /// family. Ties break toward registry order.
    pub fn select(&mut self, sign: &Sign) -> Result<Selection, GeometryError> {
        let mut weights: Vec<f64> = self
            .hypotheses
            .iter()
            .map(|h| h.weight.max(1e-9) * (h.likelihood)(sign).max(1e-9))
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            let uniform = 1.0 / weights.len() as f64;
            weights.iter_mut().for_each(|w| *w = uniform);
        } else {
            weights.iter_mut().for_each(|w| *w /= total);
        }
        for (h, w) in self.hypotheses.iter_mut().zip(&weights) {
            h.weight = *w;
        }

        let mut best = 0usize;
        for (i, w) in weights.iter().enumerate() {
            if *w > weights[best] {
                best = i;
            }
        }

        let chosen = &self.hypotheses[best];
        debug!(hypothesis = %chosen.id, weight = weights[best], "triage selection");
        let manifold = (chosen.factory)(sign)?;
        info!(manifold = manifold.id(), family = %chosen.family, "manifold instantiated");

        Ok(Selection {
            hypothesis_id: chosen.id.clone(),
            manifold,
            posterior: self.posterior(),
        })
    }

    /// Post-run reinforcement: SAFE pulls the selected weight toward 1, CRASH
    /// pushes it toward 0, near misses leave it alone. Clamped to keep every
    /// family reachable, then renormalized.
    pub fn reinforce(&mut self, hypothesis_id: &str, outcome: OutcomeLabel) {
        let Some(h) = self.hypotheses.iter_mut().find(|h| h.id == hypothesis_id) else {
            return;
        };
        match outcome {
            OutcomeLabel::Safe => h.weight += (1.0 - h.weight) * NUDGE,
            OutcomeLabel::Crash => h.weight -= h.weight * NUDGE,
            OutcomeLabel::NearMiss => {}
        }
        h.weight = h.weight.clamp(WEIGHT_FLOOR, WEIGHT_CEILING);
        self.normalize();
    }
}
