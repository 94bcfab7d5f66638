//! Typed identifiers for kernel entities.
//!
//! Every entity handed across the kernel boundary travels as a (dimension,
//! tag) pair; inside the engine it is wrapped in [`EntityId`] so that points,
//! curves, surfaces and volumes can never be confused with each other. Loop
//! entities (curve loops, surface loops) are construction bookkeeping only
//! and are rejected at the boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::DimTag;

#[cfg(test)]
mod tests_bridge;

/// Errors from the id / dimtag bridge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityError {
    #[error("{0:?} is a loop entity and has no kernel dimension")]
    NotAKernelEntity(EntityId),

    #[error("kernel returned unknown dimension {0}")]
    UnknownDimension(i32),
}

/// A typed kernel entity identifier.
///
/// Equality and hashing are by (variant, tag); the variants are mutually
/// exclusive and never implicitly convertible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Vertex(i32),
    Curve(i32),
    Surface(i32),
    Volume(i32),
    CurveLoop(i32),
    SurfaceLoop(i32),
}

impl EntityId {
    /// The raw kernel tag.
    pub fn tag(&self) -> i32 {
        match *self {
            EntityId::Vertex(t)
            | EntityId::Curve(t)
            | EntityId::Surface(t)
            | EntityId::Volume(t)
            | EntityId::CurveLoop(t)
            | EntityId::SurfaceLoop(t) => t,
        }
    }

    /// The kernel dimension, or `None` for loop entities.
    pub fn dim(&self) -> Option<i32> {
        match self {
            EntityId::Vertex(_) => Some(0),
            EntityId::Curve(_) => Some(1),
            EntityId::Surface(_) => Some(2),
            EntityId::Volume(_) => Some(3),
            EntityId::CurveLoop(_) | EntityId::SurfaceLoop(_) => None,
        }
    }

    /// Convert to the kernel's (dimension, tag) form.
    pub fn to_dimtag(&self) -> Result<DimTag, EntityError> {
        match self.dim() {
            Some(dim) => Ok((dim, self.tag())),
            None => Err(EntityError::NotAKernelEntity(*self)),
        }
    }

    /// Wrap a kernel (dimension, tag) pair.
    pub fn from_dimtag(dimtag: DimTag) -> Result<Self, EntityError> {
        let (dim, tag) = dimtag;
        match dim {
            0 => Ok(EntityId::Vertex(tag)),
            1 => Ok(EntityId::Curve(tag)),
            2 => Ok(EntityId::Surface(tag)),
            3 => Ok(EntityId::Volume(tag)),
            other => Err(EntityError::UnknownDimension(other)),
        }
    }
}

/// Element-wise conversion of ids to dimtags. Preserves order, keeps
/// duplicates; fails on loop entities.
pub fn dimtags(ids: &[EntityId]) -> Result<Vec<DimTag>, EntityError> {
    ids.iter().map(EntityId::to_dimtag).collect()
}

/// Convert kernel dimtags back to typed ids.
///
/// Output is grouped highest dimension first: volumes, then surfaces, then
/// curves, then vertices. Duplicate (dim, tag) pairs are dropped per
/// dimension bucket, first occurrence wins. Every consumer that unpacks
/// boolean results relies on this ordering.
pub fn ids_from_dimtags(pairs: &[DimTag]) -> Result<Vec<EntityId>, EntityError> {
    let mut buckets: [Vec<i32>; 4] = Default::default();
    for &(dim, tag) in pairs {
        if !(0..=3).contains(&dim) {
            return Err(EntityError::UnknownDimension(dim));
        }
        let bucket = &mut buckets[dim as usize];
        if !bucket.contains(&tag) {
            bucket.push(tag);
        }
    }
    let mut out = Vec::with_capacity(pairs.len());
    for dim in (0..=3).rev() {
        for &tag in &buckets[dim as usize] {
            out.push(EntityId::from_dimtag((dim as i32, tag))?);
        }
    }
    Ok(out)
}

/// The outcome of a builder operation as stored in the object table.
///
/// A polygon bundles the surface it created with its bounding loop and the
/// mesh-size hint used at creation, but stands in for its surface wherever
/// one is expected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GeometryResult {
    Entity(EntityId),
    Polygon {
        surface: EntityId,
        boundary: EntityId,
        mesh_size: f64,
    },
}

impl GeometryResult {
    /// The primary entity: itself, or the surface for a polygon.
    pub fn entity_id(&self) -> EntityId {
        match *self {
            GeometryResult::Entity(id) => id,
            GeometryResult::Polygon { surface, .. } => surface,
        }
    }

    /// The surface id if this result can stand in for one.
    pub fn as_surface(&self) -> Option<EntityId> {
        match *self {
            GeometryResult::Entity(id @ EntityId::Surface(_)) => Some(id),
            GeometryResult::Polygon { surface, .. } => Some(surface),
            _ => None,
        }
    }
}

impl From<EntityId> for GeometryResult {
    fn from(id: EntityId) -> Self {
        GeometryResult::Entity(id)
    }
}

/// An ordered list used as a set-with-index.
///
/// `add_shape` reports whether the value was seen before together with a
/// 1-based position: the first occurrence's position for a repeat, the list
/// length for a fresh value. Every call appends, so two enumerations of the
/// same duplicate-free shapes produce matching positions, which is what
/// makes this usable as a remapping table across a save/reload round trip.
#[derive(Debug, Clone, Default)]
pub struct UniqueCounter<T> {
    items: Vec<T>,
}

impl<T: PartialEq> UniqueCounter<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Record `item`. Returns `(was_new, 1-based position)`.
    pub fn add_shape(&mut self, item: T) -> (bool, usize) {
        let existing = self.items.iter().position(|x| *x == item);
        self.items.push(item);
        match existing {
            Some(pos) => (false, pos + 1),
            None => (true, self.items.len()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
