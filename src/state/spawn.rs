//! Spawn point allocation.
//!
//! The authority hands every joining participant one of a fixed set of spawn
//! locations. Selection is uniform among points not used in the current cycle;
//! once every point has been handed out the cycle restarts.

use std::collections::HashSet;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// World-space position of a spawn point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    /// Fallback used when no spawn point can be allocated.
    pub const ZERO: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({"x": self.x, "y": self.y, "z": self.z})
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnAllocation {
    pub index: usize,
    pub position: Position,
}

/// The pool has no spawn points defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no spawn points available")]
pub struct NoSpawnPoints;

/// Fixed spawn locations plus the indices used in the current cycle.
#[derive(Debug, Clone)]
pub struct SpawnPointPool {
    points: Vec<Position>,
    used: HashSet<usize>,
    rng: StdRng,
}

impl Default for SpawnPointPool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SpawnPointPool {
    /// Create a pool seeded from OS entropy.
    pub fn new(points: Vec<Position>) -> Self {
        Self::with_rng(points, StdRng::from_entropy())
    }

    /// Create a pool with an explicit generator (deterministic in tests).
    pub fn with_rng(points: Vec<Position>, rng: StdRng) -> Self {
        Self {
            points,
            used: HashSet::new(),
            rng,
        }
    }

    /// Allocate the next spawn point.
    ///
    /// Never repeats an index until every index has been handed out once.
    pub fn allocate(&mut self) -> Result<SpawnAllocation, NoSpawnPoints> {
        if self.points.is_empty() {
            return Err(NoSpawnPoints);
        }

        let mut available = self.available_indices();
        if available.is_empty() {
            tracing::debug!(points = self.points.len(), "spawn cycle exhausted, resetting");
            self.used.clear();
            available = (0..self.points.len()).collect();
        }

        let index = available[self.rng.gen_range(0..available.len())];
        self.used.insert(index);

        let position = self.points[index];
        tracing::debug!(index, %position, "selected spawn point");
        Ok(SpawnAllocation { index, position })
    }

    /// Indices not yet used in the current cycle, in ascending order.
    pub fn available_indices(&self) -> Vec<usize> {
        (0..self.points.len())
            .filter(|i| !self.used.contains(i))
            .collect()
    }

    /// Forget the current cycle.
    pub fn reset(&mut self) {
        self.used.clear();
    }

    pub fn is_used(&self, index: usize) -> bool {
        self.used.contains(&index)
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn position(&self, index: usize) -> Option<Position> {
        self.points.get(index).copied()
    }
}
