//! Signs
//!
//! The raw input artifact presented to the pipeline. A sign is immutable once
//! created and is passed by reference through triage, projection and validation.

use serde::{Deserialize, Serialize};

use crate::manifold::grid::Grid;

/// A single train/test grid task, as consumed by the adaptive-grid family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridBundle {
    pub train: Vec<GridPair>,
    pub test_input: Grid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPair {
    pub input: Grid,
    pub output: Grid,
}

/// Payload variants a sign can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignBody {
    /// Free text (word puzzles, marker contracts, seed scenarios).
    Text(String),
    /// An explicit letter bag for the multiset family.
    Letters(String),
    /// A single 2D grid for the grid-physics family.
    Grid(Grid),
    /// A train/test bundle for the adaptive-grid family.
    TaskBundle(GridBundle),
}

/// The input artifact to be governed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sign {
    /// Caller-supplied identifying tag, carried into the run trace.
    pub tag: String,
    pub body: SignBody,
}

impl Sign {
    pub fn text(tag: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            body: SignBody::Text(body.into()),
        }
    }

    pub fn letters(tag: impl Into<String>, letters: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            body: SignBody::Letters(letters.into()),
        }
    }

    pub fn grid(tag: impl Into<String>, grid: Grid) -> Self {
        Self {
            tag: tag.into(),
            body: SignBody::Grid(grid),
        }
    }

    pub fn task_bundle(tag: impl Into<String>, bundle: GridBundle) -> Self {
        Self {
            tag: tag.into(),
            body: SignBody::TaskBundle(bundle),
        }
    }

    /// Flat text rendering used by the triage risk heuristics and keyword
    /// likelihoods; grids render as their tag only.
    pub fn surface_text(&self) -> String {
        match &self.body {
            SignBody::Text(t) => t.clone(),
            SignBody::Letters(l) => l.clone(),
            SignBody::Grid(_) | SignBody::TaskBundle(_) => self.tag.clone(),
        }
    }
}
