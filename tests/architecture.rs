//! Architecture Verification Suite
//!
//! Ensures the pipeline's shared components stay thread-safe and the public
//! surface keeps the injection points the supervisor depends on.

#[cfg(test)]
mod architecture_tests {
    use manifold_sentry::manifold::Manifold;
    use manifold_sentry::{
        DevianceMonitor, GenerationProvider, Interpretant, ManifestSpec, Supervisor,
    };
    use std::sync::Arc;

    // 1. Shared adaptive state must be usable from concurrent runs.
    #[test]
    fn test_shared_state_is_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<DevianceMonitor>();
        assert_send_sync::<Interpretant>();
        assert_send_sync::<Supervisor>();
        assert_send_sync::<manifold_sentry::AbortFlag>();
    }

    // 2. The seams are trait objects: providers and manifolds must be
    // injectable behind Arc/Box.
    #[test]
    fn test_trait_object_seams() {
        fn assert_object_safe_provider(_: Option<Arc<dyn GenerationProvider>>) {}
        fn assert_object_safe_manifold(_: Option<Box<dyn Manifold>>) {}

        assert_object_safe_provider(None);
        assert_object_safe_manifold(None);
    }

    // 3. Every built-in family is reachable from a default manifest.
    #[test]
    fn test_default_registry_covers_all_families() {
        let interpretant = Interpretant::with_default_families(&ManifestSpec::default());
        let posterior = interpretant.posterior();
        for family in [
            "multiset",
            "hidden_marker",
            "stream",
            "seed",
            "grid_physics",
            "adaptive_grid",
        ] {
            assert!(posterior.contains_key(family), "missing family {family}");
            assert!(posterior[family] > 0.0);
        }
    }
}
