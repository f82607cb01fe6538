//! Grid-physics family
//!
//! Partitions grid cells into static terrain (bottom row plus explicitly
//! marked ids) and mobile objects, applies exactly one discrete gravity step,
//! and compares the candidate against the single correct post-step grid.
//! Hints distinguish clipping (occupying space that should be empty) from
//! levitation (failing to fall when unobstructed).

use std::collections::HashSet;

use crate::config::{FamilySpec, GovernorThresholds};
use crate::manifold::grid::{self, Grid};
use crate::manifold::{
    Candidate, Manifold, ProjectionSpec, ValidationFault, ValidationResult, Violation,
};

pub struct GridPhysicsManifold {
    id: String,
    input: Grid,
    expected: Grid,
    mobile_cells: usize,
    thresholds: GovernorThresholds,
    max_retries: usize,
}

impl GridPhysicsManifold {
    pub fn new(tag: &str, input: Grid, spec: &FamilySpec) -> Self {
        let mut terrain_ids: HashSet<i64> = spec.static_ids.iter().copied().collect();
        if let Some(bottom) = input.last() {
            for &cell in bottom {
                if cell != 0 {
                    terrain_ids.insert(cell);
                }
            }
        }

        let expected = step_gravity(&input, &terrain_ids);
        let mobile_cells = input
            .iter()
            .flatten()
            .filter(|&&c| c != 0 && !terrain_ids.contains(&c))
            .count();

        Self {
            id: format!("grid_physics:{tag}"),
            input,
            expected,
            mobile_cells,
            thresholds: spec.thresholds.clone(),
            max_retries: spec.max_retries,
        }
    }

    fn parse_candidate(&self, candidate: &Candidate) -> Option<Grid> {
        let text = candidate.stripped_text();
        if let Some(grid) = grid::parse_grid(&text) {
            return Some(grid);
        }
        // Accept the enveloped form too.
        let value: serde_json::Value = serde_json::from_str(&text).ok()?;
        grid::grid_from_value(value.get("grid")?)
    }
}

/// One discrete gravity step: every mobile cell moves one unit down unless
/// blocked by terrain, the floor, or another mobile cell. Cells settle
/// bottom-up so a supported stack falls as a unit.
pub fn step_gravity(input: &Grid, terrain_ids: &HashSet<i64>) -> Grid {
    let height = input.len();
    let width = input.first().map(|r| r.len()).unwrap_or(0);

    let mut next: Grid = vec![vec![0; width]; height];
    for (y, row) in input.iter().enumerate() {
        for (x, &cell) in row.iter().enumerate() {
            if cell != 0 && terrain_ids.contains(&cell) {
                next[y][x] = cell;
            }
        }
    }

    for y in (0..height).rev() {
        for x in 0..width {
            let cell = input[y][x];
            if cell == 0 || terrain_ids.contains(&cell) {
                continue;
            }
            let below_free = y + 1 < height && next[y + 1][x] == 0;
            if below_free {
                next[y + 1][x] = cell;
            } else {
                next[y][x] = cell;
            }
        }
    }

    next
}

impl Manifold for GridPhysicsManifold {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &'static str {
        "grid_physics"
    }

    fn projection(&self) -> ProjectionSpec {
        ProjectionSpec {
            system_instruction:
                "You are a physics engine. The input is a 2D grid where 0 is empty space. \
                 Apply one step of gravity to every mobile object; static terrain does not move. \
                 Output ONLY the resulting 2D grid as a JSON list of lists."
                    .to_string(),
            user_prompt: format!(
                "INPUT GRID: {}",
                serde_json::to_string(&self.input).unwrap_or_default()
            ),
            invariants: vec![
                "Each mobile cell moves down exactly one row unless blocked.".to_string(),
                "Preserve every object's cell count (conservation of mass).".to_string(),
                "Never move a cell into terrain or another object.".to_string(),
            ],
        }
    }

    fn ruin_check(&self, _candidate: &Candidate) -> bool {
        false
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<ValidationResult, ValidationFault> {
        let Some(grid) = self.parse_candidate(candidate) else {
            return Ok(ValidationResult::failing(
                1.0,
                0.0,
                vec![Violation::error(
                    "grid_unparseable",
                    "Output must be a JSON 2D grid of integers.",
                )],
            )
            .with_hints(vec!["Format the output as [[0,1],...].".to_string()]));
        };

        let expected_shape = grid::shape(&self.expected);
        if grid::shape(&grid) != expected_shape || !grid::is_rectangular(&grid) {
            return Ok(ValidationResult::failing(
                1.0,
                0.0,
                vec![Violation::error(
                    "shape_mismatch",
                    format!(
                        "Expected a {}x{} grid, got {}x{}.",
                        expected_shape.0,
                        expected_shape.1,
                        grid.len(),
                        grid.first().map(|r| r.len()).unwrap_or(0)
                    ),
                )],
            )
            .with_hints(vec![
                "Keep the grid dimensions identical to the input.".to_string()
            ]));
        }

        let mut violations = Vec::new();
        let mut hints = Vec::new();

        // Conservation of mass per object id.
        let mass = |g: &Grid, id: i64| g.iter().flatten().filter(|&&c| c == id).count();
        let mut ids: Vec<i64> = self
            .input
            .iter()
            .flatten()
            .copied()
            .filter(|&c| c != 0)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        for id in &ids {
            let before = mass(&self.input, *id);
            let after = mass(&grid, *id);
            if before != after {
                violations.push(
                    Violation::error(
                        "mass_mismatch",
                        format!("Object {id} has {after} cell(s), expected {before}."),
                    )
                    .with_metadata(serde_json::json!({ "object": id })),
                );
                hints.push(format!("Object {id} must keep exactly {before} cell(s)."));
            }
        }

        let mut clipping = 0usize;
        let mut levitation = 0usize;
        let mut mismatches = 0usize;
        for y in 0..self.expected.len() {
            for x in 0..self.expected[y].len() {
                let want = self.expected[y][x];
                let got = grid[y][x];
                if want == got {
                    continue;
                }
                mismatches += 1;
                if want == 0 && got != 0 {
                    clipping += 1;
                } else if want != 0 && got == 0 {
                    levitation += 1;
                }
            }
        }

        if clipping > 0 {
            violations.push(
                Violation::error(
                    "clipping",
                    format!("{clipping} cell(s) moved through terrain or another object."),
                )
                .with_metadata(serde_json::json!({ "cells": clipping })),
            );
            hints.push("Stop objects when the cell below is occupied.".to_string());
        }
        if levitation > 0 {
            violations.push(
                Violation::error(
                    "levitation",
                    format!("{levitation} cell(s) failed to fall while unobstructed."),
                )
                .with_metadata(serde_json::json!({ "cells": levitation })),
            );
            hints.push("Move every unobstructed mobile cell down one row.".to_string());
        }

        let blue = 1.0 - mismatches as f64 / self.mobile_cells.max(1) as f64;
        if violations.is_empty() {
            Ok(ValidationResult::passing(1.0))
        } else {
            Ok(ValidationResult::failing(mismatches as f64, blue, violations).with_hints(hints))
        }
    }

    fn thresholds(&self) -> &GovernorThresholds {
        &self.thresholds
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}
