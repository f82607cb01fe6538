//! Supervisor
//!
//! Orchestrates one governed run: TRIAGE selects and instantiates the
//! manifold, PROJECTION requests a candidate from the generation capability,
//! VALIDATION scores it and consults the governor, and the ZeroBack loop
//! converts failures into correction deltas until success, a terminal
//! decision, or the retry budget is spent. The retry bound is structural:
//! the machine has no recursive path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ManifestSpec;
use crate::deviance::{DevianceMonitor, OutcomeLabel};
use crate::geometry::GeometryError;
use crate::governor::{self, DecisionTrace, Governor, GovernorSignal};
use crate::interpretant::Interpretant;
use crate::manifold::{AttemptGeometry, Candidate, CorrectionDelta, ValidationResult, Violation};
use crate::provider::{GenerationProvider, ProviderFault};
use crate::scoring;
use crate::sign::Sign;

/// Terminal decision of a governed run. Ruin is an intentional fail-closed
/// decision, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDecision {
    Safe,
    Collapse,
    Ruin,
}

/// Faults that abort a run without a decision.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("provider fault: {0}")]
    Provider(#[from] ProviderFault),
    #[error("run aborted between attempts")]
    Aborted,
}

/// Cooperative abort flag, honored between attempts only. An aborted run
/// leaves the posterior and the deviance history untouched.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The externally observable record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub sign_tag: String,
    pub manifold_id: String,
    pub family: String,
    pub decision: RunDecision,
    pub cause: Option<String>,
    /// Projection attempts performed (attempt indices are 0-based).
    pub attempts: usize,
    pub final_artifact: Option<String>,
    pub blue_score: f64,
    pub outcome_label: OutcomeLabel,
    pub tau_r: f64,
    pub trace_log: Vec<DecisionTrace>,
    pub posterior_snapshot: BTreeMap<String, f64>,
}

impl RunReport {
    pub fn final_trace(&self) -> Option<&DecisionTrace> {
        self.trace_log.last()
    }
}

enum Phase {
    Projection,
    Validation(Candidate),
    Halt(RunDecision, Option<String>),
}

pub struct Supervisor {
    provider: Arc<dyn GenerationProvider>,
    model: String,
    interpretant: Arc<Mutex<Interpretant>>,
    deviance: Arc<Mutex<DevianceMonitor>>,
    timeout: Duration,
}

impl Supervisor {
    pub fn new(provider: Arc<dyn GenerationProvider>, manifest: &ManifestSpec) -> Self {
        Self {
            provider,
            model: "sim".to_string(),
            interpretant: Arc::new(Mutex::new(Interpretant::with_default_families(manifest))),
            deviance: Arc::new(Mutex::new(DevianceMonitor::default())),
            timeout: Duration::from_secs(30),
        }
    }

    /// Resolve the provider from a model-identifier string.
    pub fn from_selector(selector: &str, manifest: &ManifestSpec) -> Result<Self, ProviderFault> {
        let selected = crate::provider::provider_for_selector(selector)?;
        Ok(Self::new(selected.provider, manifest).with_model(selected.model))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share adaptive state with other pipeline instances.
    pub fn with_interpretant(mut self, interpretant: Arc<Mutex<Interpretant>>) -> Self {
        self.interpretant = interpretant;
        self
    }

    pub fn with_deviance(mut self, deviance: Arc<Mutex<DevianceMonitor>>) -> Self {
        self.deviance = deviance;
        self
    }

    pub fn interpretant(&self) -> Arc<Mutex<Interpretant>> {
        self.interpretant.clone()
    }

    pub fn deviance(&self) -> Arc<Mutex<DevianceMonitor>> {
        self.deviance.clone()
    }

    pub async fn govern(&self, sign: &Sign) -> Result<RunReport, RunError> {
        self.govern_with_abort(sign, &AbortFlag::new()).await
    }

    #[tracing::instrument(skip(self, sign, abort), fields(sign_tag = %sign.tag))]
    pub async fn govern_with_abort(
        &self,
        sign: &Sign,
        abort: &AbortFlag,
    ) -> Result<RunReport, RunError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, "run started");

        // TRIAGE: one selection per run, one atomic posterior update.
        let selection = {
            let mut interpretant = self.interpretant.lock().await;
            interpretant.select(sign)?
        };
        let manifold = selection.manifold;
        let posterior = selection.posterior;
        let tau_r = self.deviance.lock().await.tau_r();

        let mut governor = Governor::new(manifold.thresholds().clone());
        let mut trace_log: Vec<DecisionTrace> = Vec::new();

        // Fail-closed risk gate: a sign riskier than tau_R never reaches the
        // generation capability.
        let risk = scoring::risk_score(&sign.surface_text());
        if risk > tau_r {
            warn!(risk, tau_r, "triage risk gate closed");
            let result = ValidationResult::failing(
                risk,
                0.0,
                vec![Violation::error(
                    "triage_risk_gate",
                    format!("Sign risk {risk:.2} exceeds tau_R {tau_r:.2}."),
                )],
            )
            .with_red_flag();
            let tension = governor::tension_of(&result, 0.0);
            let (signal, metrics, _) = governor.observe(tension, true);
            trace_log.push(governor::trace_snapshot(
                manifold.id(),
                signal,
                &result,
                metrics,
                Some("TRIAGE_RISK_GATE".to_string()),
                &posterior,
                0,
            ));
            return self
                .conclude(
                    run_id,
                    sign,
                    manifold.id(),
                    manifold.family(),
                    &selection.hypothesis_id,
                    RunDecision::Ruin,
                    Some("TRIAGE_RISK_GATE".to_string()),
                    0,
                    None,
                    0.0,
                    false,
                    tau_r,
                    trace_log,
                    posterior,
                )
                .await;
        }

        let spec = manifold.projection();
        let max_retries = manifold.max_retries();
        let mut delta: Option<CorrectionDelta> = None;
        let mut geometry_history: Vec<AttemptGeometry> = Vec::new();
        let mut attempt: usize = 0;
        let mut drifted = false;
        let mut last_blue = 0.0;
        let mut final_artifact: Option<String> = None;
        let mut phase = Phase::Projection;

        let (decision, cause) = loop {
            match phase {
                Phase::Projection => {
                    if abort.is_aborted() {
                        info!(run_id = %run_id, "run aborted between attempts");
                        return Err(RunError::Aborted);
                    }
                    let generated = tokio::time::timeout(
                        self.timeout,
                        self.provider.generate(&self.model, &spec, delta.as_ref()),
                    )
                    .await
                    .map_err(|_| ProviderFault::Timeout(self.timeout.as_millis() as u64))??;
                    phase = Phase::Validation(Candidate::text(generated));
                }
                Phase::Validation(candidate) => {
                    // Ruin predicate runs before full scoring and is sticky.
                    let ruin_fired = manifold.ruin_check(&candidate);
                    let result = if ruin_fired {
                        ValidationResult::failing(
                            1.0,
                            0.0,
                            vec![Violation::error(
                                "ruin_predicate",
                                "Manifold ruin predicate fired.",
                            )],
                        )
                        .with_red_flag()
                    } else {
                        match manifold.evaluate(&candidate) {
                            Ok(result) => result,
                            Err(fault) => {
                                warn!(run_id = %run_id, %fault, "validation fault degraded");
                                ValidationResult::from_fault(&fault)
                            }
                        }
                    };

                    if let Some(geometry) = result.geometry {
                        geometry_history.push(geometry);
                    }
                    let drift_risk = manifold.drift_risk(&geometry_history);
                    drifted |= drift_risk > 0.0;
                    last_blue = result.blue_score;

                    let tension = governor::tension_of(&result, drift_risk);
                    let (signal, metrics, signal_cause) =
                        governor.observe(tension, ruin_fired || result.red_flag);
                    trace_log.push(governor::trace_snapshot(
                        manifold.id(),
                        signal,
                        &result,
                        metrics,
                        signal_cause.clone(),
                        &posterior,
                        attempt,
                    ));

                    if !signal.is_terminal() && manifold.succeeded(&result) {
                        final_artifact = Some(candidate.as_text());
                        phase = Phase::Halt(RunDecision::Safe, None);
                    } else if signal == GovernorSignal::Ruin {
                        phase = Phase::Halt(RunDecision::Ruin, signal_cause);
                    } else if signal == GovernorSignal::Collapse {
                        phase = Phase::Halt(RunDecision::Collapse, signal_cause);
                    } else if attempt == max_retries {
                        phase = Phase::Halt(
                            RunDecision::Collapse,
                            Some("RETRIES_EXHAUSTED".to_string()),
                        );
                    } else {
                        delta = Some(manifold.repair_hint(&result));
                        attempt += 1;
                        phase = Phase::Projection;
                    }
                }
                Phase::Halt(decision, cause) => break (decision, cause),
            }
        };

        self.conclude(
            run_id,
            sign,
            manifold.id(),
            manifold.family(),
            &selection.hypothesis_id,
            decision,
            cause,
            attempt + 1,
            final_artifact,
            last_blue,
            drifted,
            tau_r,
            trace_log,
            posterior,
        )
        .await
    }

    /// Fold the finished run into the shared adaptive state and assemble the
    /// report. Never called for aborted runs.
    #[allow(clippy::too_many_arguments)]
    async fn conclude(
        &self,
        run_id: String,
        sign: &Sign,
        manifold_id: &str,
        family: &str,
        hypothesis_id: &str,
        decision: RunDecision,
        cause: Option<String>,
        attempts: usize,
        final_artifact: Option<String>,
        blue_score: f64,
        drifted: bool,
        tau_r: f64,
        trace_log: Vec<DecisionTrace>,
        posterior: BTreeMap<String, f64>,
    ) -> Result<RunReport, RunError> {
        let accepted = decision == RunDecision::Safe;
        let outcome_label = {
            let mut deviance = self.deviance.lock().await;
            let label = deviance.classify(accepted, blue_score, drifted);
            deviance.record(label);
            label
        };
        {
            let mut interpretant = self.interpretant.lock().await;
            interpretant.reinforce(hypothesis_id, outcome_label);
        }

        info!(
            run_id = %run_id,
            ?decision,
            ?outcome_label,
            attempts,
            "run concluded"
        );

        Ok(RunReport {
            run_id,
            sign_tag: sign.tag.clone(),
            manifold_id: manifold_id.to_string(),
            family: family.to_string(),
            decision,
            cause,
            attempts,
            final_artifact,
            blue_score,
            outcome_label,
            tau_r,
            trace_log,
            posterior_snapshot: posterior,
        })
    }
}
