//! Manifold Sentry
//!
//! A governance layer between a caller and a generative model:
//! - Triage: a Bayesian interpretant selects the constraint manifold for a sign
//! - Projection: the generation capability produces a candidate inside that manifold
//! - Validation: the manifold scores the candidate; a tension governor grades it
//! - ZeroBack: failed validations become correction deltas for a bounded retry loop
//!
//! Terminal decisions are SAFE, COLLAPSE, or RUIN, each carrying a full trace.

pub mod config;
pub mod deviance;
pub mod geometry;
pub mod governor;
pub mod interpretant;
pub mod manifold;
pub mod provider;
pub mod scoring;
pub mod sign;
pub mod supervisor;

// Re-exports for convenience
pub use config::{DriftConfig, FamilySpec, GovernorThresholds, ManifestSpec};
pub use deviance::{DevianceMonitor, OutcomeLabel};
pub use geometry::{GeometryError, RegionAssignment, Seed, SeedLabel};
pub use governor::{DecisionTrace, Governor, GovernorSignal};
pub use interpretant::Interpretant;
pub use manifold::{
    Candidate, CorrectionDelta, Manifold, ProjectionSpec, Severity, ValidationFault,
    ValidationResult, Violation,
};
pub use provider::{GenerationProvider, ProviderFault, SimulatedProvider};
pub use sign::{GridBundle, GridPair, Sign, SignBody};
pub use supervisor::{AbortFlag, RunDecision, RunError, RunReport, Supervisor};
