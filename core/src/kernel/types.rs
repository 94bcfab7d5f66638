//! Kernel-agnostic types shared across the kernel boundary.

use serde::{Deserialize, Serialize};

/// A kernel entity address: (dimension, tag). Dimensions are 0 = point,
/// 1 = curve, 2 = surface, 3 = volume.
pub type DimTag = (i32, i32);

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    /// The empty box: union identity, contains nothing.
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn from_point(p: [f64; 3]) -> Self {
        Self { min: p, max: p }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f64; 3]>) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.expand(*p);
        }
        bb
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn expand(&mut self, p: [f64; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        out.expand(other.min);
        out.expand(other.max);
        out
    }

    /// Intersection, or `None` when the boxes are disjoint.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let mut out = Self::empty();
        for i in 0..3 {
            out.min[i] = self.min[i].max(other.min[i]);
            out.max[i] = self.max[i].min(other.max[i]);
            if out.min[i] > out.max[i] {
                return None;
            }
        }
        Some(out)
    }

    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (0..3)
            .map(|i| (self.max[i] - self.min[i]).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    pub fn corners(&self) -> [[f64; 3]; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            [lo[0], lo[1], lo[2]],
            [hi[0], lo[1], lo[2]],
            [hi[0], hi[1], lo[2]],
            [lo[0], hi[1], lo[2]],
            [lo[0], lo[1], hi[2]],
            [hi[0], lo[1], hi[2]],
            [hi[0], hi[1], hi[2]],
            [lo[0], hi[1], hi[2]],
        ]
    }

    /// Rounded signature for best-effort shape identification across a
    /// save/reload round trip.
    pub fn signature(&self) -> [i64; 6] {
        let q = |v: f64| (v * 1e6).round() as i64;
        [
            q(self.min[0]),
            q(self.min[1]),
            q(self.min[2]),
            q(self.max[0]),
            q(self.max[1]),
            q(self.max[2]),
        ]
    }
}

/// Node distribution for a transfinite (fixed-count) curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveDistribution {
    /// Geometric progression from one end; coefficient 1.0 is uniform.
    Progression,
    /// Nodes biased towards both ends.
    Bump,
}

/// Result of a boolean operation: the surviving entities plus, for each
/// input in objects-then-tools order, the entities it mapped to.
#[derive(Debug, Clone, Default)]
pub struct BooleanResult {
    pub entities: Vec<DimTag>,
    pub mapping: Vec<Vec<DimTag>>,
}

/// Preview mesh output: 1D discretization nodes and line elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub nodes: Vec<[f64; 3]>,
    /// Indices into `nodes`, one pair per line element.
    pub lines: Vec<[usize; 2]>,
    /// Owning curve tag per line element.
    pub line_curves: Vec<i32>,
}

impl MeshData {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
