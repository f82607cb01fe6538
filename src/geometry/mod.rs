//! Geometry Engine
//!
//! Additive-weighted region partitioning over labeled seed points. A query
//! point is assigned to the seed minimizing `euclidean(query, seed) - weight`;
//! the margin to the runner-up is the confidence signal surfaced to callers.
//!
//! Pure and stateless: the engine holds no data between calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("no seeds")]
    NoSeeds,
    #[error("dimension mismatch: query has {query} components, seed '{seed}' has {seed_dims}")]
    DimensionMismatch {
        query: usize,
        seed: String,
        seed_dims: usize,
    },
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Region class of a seed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedLabel {
    Utility,
    Ruin,
}

/// A single constraint center. `weight` is additive: higher weight pulls the
/// region boundary outward from the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub name: String,
    pub position: Vec<f64>,
    pub weight: f64,
    pub label: SeedLabel,
}

impl Seed {
    pub fn utility(name: impl Into<String>, position: Vec<f64>, weight: f64) -> Self {
        Self {
            name: name.into(),
            position,
            weight,
            label: SeedLabel::Utility,
        }
    }

    pub fn ruin(name: impl Into<String>, position: Vec<f64>, weight: f64) -> Self {
        Self {
            name: name.into(),
            position,
            weight,
            label: SeedLabel::Ruin,
        }
    }
}

/// Outcome of assigning a query point to a seed region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionAssignment {
    /// Index of the winning seed in the input slice.
    pub region: usize,
    pub seed_name: String,
    pub label: SeedLabel,
    /// Winning weighted distance (may be negative for heavy seeds).
    pub value: f64,
    /// Gap to the runner-up; infinite when only one seed exists.
    pub margin: f64,
    /// Weighted distance per seed, in seed order.
    pub per_seed: Vec<f64>,
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Assign `query` to the seed with minimum additively-weighted distance.
/// Ties resolve to the lowest seed index.
pub fn assign(query: &[f64], seeds: &[Seed]) -> Result<RegionAssignment, GeometryError> {
    if seeds.is_empty() {
        return Err(GeometryError::NoSeeds);
    }
    for seed in seeds {
        if seed.position.len() != query.len() {
            return Err(GeometryError::DimensionMismatch {
                query: query.len(),
                seed: seed.name.clone(),
                seed_dims: seed.position.len(),
            });
        }
    }

    let per_seed: Vec<f64> = seeds
        .iter()
        .map(|seed| euclidean(query, &seed.position) - seed.weight)
        .collect();

    let mut best = 0usize;
    for (i, value) in per_seed.iter().enumerate() {
        if *value < per_seed[best] {
            best = i;
        }
    }

    let mut runner_up = f64::INFINITY;
    for (i, value) in per_seed.iter().enumerate() {
        if i != best && *value < runner_up {
            runner_up = *value;
        }
    }

    Ok(RegionAssignment {
        region: best,
        seed_name: seeds[best].name.clone(),
        label: seeds[best].label,
        value: per_seed[best],
        margin: runner_up - per_seed[best],
        per_seed,
    })
}

/// Weighted distance from `query` to a single seed.
pub fn weighted_distance(query: &[f64], seed: &Seed) -> Result<f64, GeometryError> {
    if seed.position.len() != query.len() {
        return Err(GeometryError::DimensionMismatch {
            query: query.len(),
            seed: seed.name.clone(),
            seed_dims: seed.position.len(),
        });
    }
    Ok(euclidean(query, &seed.position) - seed.weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> Vec<Seed> {
        vec![
            Seed::utility("a", vec![0.0, 0.0], 0.0),
            Seed::utility("b", vec![4.0, 0.0], 0.0),
            Seed::ruin("r", vec![0.0, 4.0], 1.0),
        ]
    }

    #[test]
    fn test_assign_minimum_weighted_distance() {
        let result = assign(&[0.5, 0.0], &seeds()).unwrap();
        assert_eq!(result.region, 0);
        assert_eq!(result.seed_name, "a");
        assert_eq!(result.label, SeedLabel::Utility);
        assert!(result.margin > 0.0);
    }

    #[test]
    fn test_weight_pulls_region() {
        // Midpoint between a and b, but r's weight makes it win from further out.
        let heavy = vec![
            Seed::utility("a", vec![0.0], 0.0),
            Seed::ruin("r", vec![4.0], 3.5),
        ];
        let result = assign(&[1.5], &heavy).unwrap();
        assert_eq!(result.seed_name, "r");
        assert_eq!(result.label, SeedLabel::Ruin);
    }

    #[test]
    fn test_tie_resolves_to_lowest_index() {
        let tied = vec![
            Seed::utility("first", vec![-1.0], 0.0),
            Seed::utility("second", vec![1.0], 0.0),
        ];
        let result = assign(&[0.0], &tied).unwrap();
        assert_eq!(result.region, 0);
        assert_eq!(result.seed_name, "first");
    }

    #[test]
    fn test_assign_is_deterministic() {
        let q = [0.3, 2.7];
        let first = assign(&q, &seeds()).unwrap();
        for _ in 0..10 {
            assert_eq!(assign(&q, &seeds()).unwrap(), first);
        }
    }

    #[test]
    fn test_single_seed_has_infinite_margin() {
        let only = vec![Seed::utility("solo", vec![0.0], 0.5)];
        let result = assign(&[3.0], &only).unwrap();
        assert_eq!(result.region, 0);
        assert!(result.margin.is_infinite());
    }

    #[test]
    fn test_empty_seed_set_is_an_error() {
        assert_eq!(assign(&[0.0], &[]), Err(GeometryError::NoSeeds));
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let err = assign(&[0.0], &seeds()).unwrap_err();
        assert!(matches!(err, GeometryError::DimensionMismatch { .. }));
    }
}
