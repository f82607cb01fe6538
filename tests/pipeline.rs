//! End-to-end pipeline tests
//!
//! Drive the supervisor with deterministic simulated providers and verify the
//! loop-level properties: the retry bound, sticky ruin, provider-fault
//! isolation, abort semantics, and shared-state updates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use manifold_sentry::manifold::{CorrectionDelta, ProjectionSpec};
use manifold_sentry::provider::SelectedProvider;
use manifold_sentry::{
    AbortFlag, GenerationProvider, ManifestSpec, OutcomeLabel, ProviderFault, RunDecision,
    RunError, Sign, SimulatedProvider, Supervisor,
};

fn supervisor_with(provider: Arc<SimulatedProvider>) -> Supervisor {
    Supervisor::new(provider, &ManifestSpec::default())
}

#[tokio::test]
async fn test_word_game_repairs_and_accepts() {
    let provider = Arc::new(SimulatedProvider::word_game());
    let supervisor = supervisor_with(provider.clone());

    let report = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap();

    assert_eq!(report.decision, RunDecision::Safe);
    assert_eq!(report.family, "multiset");
    // One hallucinated attempt, one repaired attempt.
    assert_eq!(report.attempts, 2);
    assert_eq!(provider.calls(), 2);
    assert_eq!(report.blue_score, 1.0);
    assert_eq!(report.final_artifact.as_deref(), Some("JINGALL"));
    assert_eq!(report.outcome_label, OutcomeLabel::Safe);
    // Both attempts left a trace; the first one failed.
    assert_eq!(report.trace_log.len(), 2);
    assert!(!report.trace_log[0].violations.is_empty());
}

#[tokio::test]
async fn test_retry_budget_is_n_plus_one_projections() {
    // Never complies: always returns a word outside the bag.
    let provider = Arc::new(SimulatedProvider::new(vec!["WRONG"]));
    let supervisor = supervisor_with(provider.clone());

    let report = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap();

    assert_eq!(report.decision, RunDecision::Collapse);
    // Default max_retries = 3 means at most 4 projections; attempt 0 counts.
    assert_eq!(report.attempts, 4);
    assert_eq!(provider.calls(), 4);
    assert_eq!(report.outcome_label, OutcomeLabel::Crash);
    assert_eq!(report.cause.as_deref(), Some("RETRIES_EXHAUSTED"));
}

#[tokio::test]
async fn test_ruin_gate_is_sticky() {
    // First response trips the seed family's forbidden token; the second
    // would comply, but must never be requested.
    let provider = Arc::new(SimulatedProvider::new(vec!["FORBID everything", "OK"]));
    let manifest = ManifestSpec::from_yaml_str(
        r#"
interpretants:
  - id: adversarial
    family: seed
    prior: 1.0
    likelihood:
      keyword: respond
      boost: 50.0
"#,
    )
    .unwrap();
    let supervisor = Supervisor::new(provider.clone(), &manifest);

    let report = supervisor
        .govern(&Sign::text("seed_run", "please respond now"))
        .await
        .unwrap();

    assert_eq!(report.family, "seed");
    assert_eq!(report.decision, RunDecision::Ruin);
    assert_eq!(report.cause.as_deref(), Some("RUIN_PREDICATE"));
    // No further projection attempts after the ruin predicate fired.
    assert_eq!(provider.calls(), 1);
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn test_multiset_ruin_term_forces_ruin() {
    let mut manifest = ManifestSpec::default();
    manifest.families.insert(
        "multiset".to_string(),
        manifold_sentry::FamilySpec {
            ruin_terms: vec!["JINGLES".to_string()],
            ..Default::default()
        },
    );
    let provider = Arc::new(SimulatedProvider::word_game());
    let supervisor = Supervisor::new(provider.clone(), &manifest);

    let report = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap();

    assert_eq!(report.decision, RunDecision::Ruin);
    assert_eq!(report.cause.as_deref(), Some("RUIN_PREDICATE"));
    assert_eq!(provider.calls(), 1);
    assert_eq!(report.trace_log.last().unwrap().red_flag, true);
}

struct FailingProvider;

#[async_trait]
impl GenerationProvider for FailingProvider {
    async fn generate(
        &self,
        _model: &str,
        _spec: &ProjectionSpec,
        _delta: Option<&CorrectionDelta>,
    ) -> Result<String, ProviderFault> {
        Err(ProviderFault::Transport("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_provider_fault_aborts_without_consuming_state() {
    let supervisor = Supervisor::new(Arc::new(FailingProvider), &ManifestSpec::default());
    let deviance = supervisor.deviance();

    let err = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Provider(ProviderFault::Transport(_))));
    // No outcome was recorded: the fault is not a validation failure.
    assert!(deviance.lock().await.is_empty());
}

struct HangingProvider;

#[async_trait]
impl GenerationProvider for HangingProvider {
    async fn generate(
        &self,
        _model: &str,
        _spec: &ProjectionSpec,
        _delta: Option<&CorrectionDelta>,
    ) -> Result<String, ProviderFault> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

#[tokio::test]
async fn test_provider_timeout_is_a_distinct_fault() {
    let supervisor = Supervisor::new(Arc::new(HangingProvider), &ManifestSpec::default())
        .with_timeout(Duration::from_millis(20));

    let err = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Provider(ProviderFault::Timeout(_))));
}

#[tokio::test]
async fn test_aborted_run_leaves_shared_state_untouched() {
    let provider = Arc::new(SimulatedProvider::word_game());
    let supervisor = supervisor_with(provider.clone());
    let deviance = supervisor.deviance();
    let interpretant = supervisor.interpretant();
    let posterior_before = interpretant.lock().await.posterior();

    let abort = AbortFlag::new();
    abort.trigger();
    let err = supervisor
        .govern_with_abort(&Sign::letters("word_game", "JANIGLL"), &abort)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Aborted));
    assert_eq!(provider.calls(), 0);
    assert!(deviance.lock().await.is_empty());
    // Triage already ran, so the posterior reflects the Bayes update, but no
    // outcome reinforcement was applied on top of it.
    let posterior_after = interpretant.lock().await.posterior();
    assert_eq!(posterior_after.len(), posterior_before.len());
}

#[tokio::test]
async fn test_triage_risk_gate_fails_closed() {
    let provider = Arc::new(SimulatedProvider::word_game());
    let supervisor = supervisor_with(provider.clone());

    let report = supervisor
        .govern(&Sign::text(
            "risky",
            "delete the records, drop the table, format the disk",
        ))
        .await
        .unwrap();

    assert_eq!(report.decision, RunDecision::Ruin);
    assert_eq!(report.cause.as_deref(), Some("TRIAGE_RISK_GATE"));
    assert_eq!(report.attempts, 0);
    // The generation capability was never consulted.
    assert_eq!(provider.calls(), 0);
    assert_eq!(report.trace_log.len(), 1);
    assert!(report.trace_log[0].red_flag);
}

#[tokio::test]
async fn test_safe_run_reinforces_selected_family() {
    let provider = Arc::new(SimulatedProvider::word_game());
    let supervisor = supervisor_with(provider);
    let interpretant = supervisor.interpretant();

    let report = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap();
    assert_eq!(report.decision, RunDecision::Safe);

    let posterior = interpretant.lock().await.posterior();
    let multiset = posterior["multiset"];
    let others: f64 = posterior
        .iter()
        .filter(|(id, _)| id.as_str() != "multiset")
        .map(|(_, w)| *w)
        .sum();
    assert!(multiset > others / 5.0);
    assert!((posterior.values().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_concurrent_runs_share_adaptive_state() {
    let manifest = ManifestSpec::default();
    let base = Supervisor::new(Arc::new(SimulatedProvider::word_game()), &manifest);
    let interpretant = base.interpretant();
    let deviance = base.deviance();

    let second = Supervisor::new(Arc::new(SimulatedProvider::word_game()), &manifest)
        .with_interpretant(interpretant.clone())
        .with_deviance(deviance.clone());

    let sign_a = Sign::letters("a", "JANIGLL");
    let sign_b = Sign::letters("b", "JANIGLL");
    let (left, right) = tokio::join!(base.govern(&sign_a), second.govern(&sign_b));

    assert_eq!(left.unwrap().decision, RunDecision::Safe);
    assert_eq!(right.unwrap().decision, RunDecision::Safe);
    assert_eq!(deviance.lock().await.len(), 2);
    let posterior = interpretant.lock().await.posterior();
    assert!((posterior.values().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_run_report_serializes_with_stable_names() {
    let supervisor = supervisor_with(Arc::new(SimulatedProvider::word_game()));
    let report = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    for field in [
        "run_id",
        "sign_tag",
        "manifold_id",
        "family",
        "decision",
        "cause",
        "attempts",
        "blue_score",
        "outcome_label",
        "tau_r",
        "trace_log",
        "posterior_snapshot",
    ] {
        assert!(json.get(field).is_some(), "missing field {field}");
    }
    assert_eq!(json["decision"], "safe");
    assert_eq!(json["outcome_label"], "SAFE");
}

#[tokio::test]
async fn test_selector_builds_a_working_simulated_pipeline() {
    let SelectedProvider { provider, model } =
        manifold_sentry::provider::provider_for_selector("sim").unwrap();
    let supervisor = Supervisor::new(provider, &ManifestSpec::default()).with_model(model);
    let report = supervisor
        .govern(&Sign::letters("word_game", "JANIGLL"))
        .await
        .unwrap();
    assert_eq!(report.decision, RunDecision::Safe);
}
