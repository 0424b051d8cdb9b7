//! Uniform-grid spatial hash for broad-phase neighbor queries.
//!
//! Results of [`SpatialHash::query_circle`] are a superset of the ids within
//! the radius: every cell touched by the circle's bounding box is returned
//! whole, so callers must re-check exact distance.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Grid coordinates of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub cx: i64,
    pub cy: i64,
}

#[derive(Debug, Clone)]
pub struct SpatialHash<Id> {
    cell_size: f64,
    cells: HashMap<CellKey, HashSet<Id>>,
}

impl<Id: Copy + Eq + Hash> SpatialHash<Id> {
    pub fn new(cell_size: f64) -> Self {
        SpatialHash {
            cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn key(&self, x: f64, y: f64) -> CellKey {
        CellKey {
            cx: (x / self.cell_size).floor() as i64,
            cy: (y / self.cell_size).floor() as i64,
        }
    }

    /// Registers `id` in the bucket containing (x, y). Keep the returned key
    /// to remove the id later.
    pub fn insert(&mut self, id: Id, x: f64, y: f64) -> CellKey {
        let key = self.key(x, y);
        self.cells.entry(key).or_default().insert(id);
        key
    }

    pub fn remove(&mut self, id: Id, key: CellKey) {
        if let Some(bucket) = self.cells.get_mut(&key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.cells.remove(&key);
            }
        }
    }

    pub fn query_circle(&self, x: f64, y: f64, r: f64) -> HashSet<Id> {
        let min = self.key(x - r, y - r);
        let max = self.key(x + r, y + r);
        let mut out = HashSet::new();
        for cx in min.cx..=max.cx {
            for cy in min.cy..=max.cy {
                if let Some(bucket) = self.cells.get(&CellKey { cx, cy }) {
                    out.extend(bucket.iter().copied());
                }
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
