//! Kernel abstraction layer for CAD geometry operations.
//!
//! This module defines the boundary between the construction engine and the
//! native geometry kernel. The engine only ever talks to [`OccKernel`], so
//! backends can be swapped without touching the orchestration layer. The
//! crate ships [`SessionKernel`], an in-process analytic bookkeeping backend
//! that tracks entities, coordinates, topology and bounding boxes and
//! performs 1D discretization; real CSG solving and surface meshing belong
//! to an external kernel behind this same trait.

pub mod types;
mod session;

#[cfg(test)]
mod tests_boolean;

pub use session::SessionKernel;
pub use types::*;

use std::path::Path;
use thiserror::Error;

/// Errors reported by a kernel backend.
#[derive(Debug, Error, Clone)]
pub enum KernelError {
    #[error("unknown entity ({0}, {1})")]
    UnknownEntity(i32, i32),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("file i/o failed: {0}")]
    Io(String),
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Abstract interface to the native geometry kernel.
///
/// The model behind a kernel handle is singular and mutable; exactly one
/// call path may drive it at a time (the worker serializes access). Every
/// mutation is synchronous, never deferred or batched.
pub trait OccKernel: Send {
    // === Model lifecycle ===

    /// Drop all entities and pending state.
    fn clear(&mut self) -> KernelResult<()>;

    /// Start a fresh named model.
    fn new_model(&mut self, name: &str) -> KernelResult<()>;

    /// Commit pending construction so queries see it.
    fn synchronize(&mut self) -> KernelResult<()>;

    // === Entity constructors (return the new kernel tag) ===

    fn add_point(&mut self, xyz: [f64; 3], mesh_size: f64) -> KernelResult<i32>;
    fn add_line(&mut self, start: i32, end: i32) -> KernelResult<i32>;
    fn add_circle_arc(&mut self, start: i32, center: i32, end: i32) -> KernelResult<i32>;
    fn add_ellipse_arc(&mut self, start: i32, center: i32, major: i32, end: i32)
        -> KernelResult<i32>;
    fn add_spline(&mut self, through: &[i32]) -> KernelResult<i32>;
    /// Curve tags may be negative to traverse the curve reversed.
    fn add_curve_loop(&mut self, curves: &[i32]) -> KernelResult<i32>;
    fn add_plane_surface(&mut self, loops: &[i32]) -> KernelResult<i32>;
    fn add_surface_filling(&mut self, boundary: i32) -> KernelResult<i32>;
    fn add_surface_loop(&mut self, surfaces: &[i32]) -> KernelResult<i32>;
    fn add_volume(&mut self, shells: &[i32]) -> KernelResult<i32>;
    fn add_disk(&mut self, center: [f64; 3], rx: f64, ry: f64) -> KernelResult<i32>;
    fn add_sphere(&mut self, center: [f64; 3], radius: f64) -> KernelResult<i32>;
    fn add_cone(
        &mut self,
        base: [f64; 3],
        axis: [f64; 3],
        base_radius: f64,
        top_radius: f64,
    ) -> KernelResult<i32>;
    fn add_wedge(&mut self, corner: [f64; 3], extents: [f64; 3], top_dx: f64)
        -> KernelResult<i32>;
    fn add_cylinder(&mut self, base: [f64; 3], axis: [f64; 3], radius: f64) -> KernelResult<i32>;
    fn add_torus(
        &mut self,
        center: [f64; 3],
        major_radius: f64,
        minor_radius: f64,
    ) -> KernelResult<i32>;

    // === Boolean operations ===

    fn fuse(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult>;
    fn intersect(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult>;
    fn cut(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult>;
    fn fragment(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult>;

    /// Merge entities that have become geometrically identical.
    fn remove_duplicates(&mut self) -> KernelResult<()>;

    // === Transformations ===

    fn translate(&mut self, entities: &[DimTag], offset: [f64; 3]) -> KernelResult<()>;
    fn rotate(
        &mut self,
        entities: &[DimTag],
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    ) -> KernelResult<()>;
    fn dilate(
        &mut self,
        entities: &[DimTag],
        center: [f64; 3],
        factors: [f64; 3],
    ) -> KernelResult<()>;
    /// Mirror across the plane ax + by + cz + d = 0.
    fn symmetrize(&mut self, entities: &[DimTag], plane: [f64; 4]) -> KernelResult<()>;
    /// Duplicate entities (and their sub-topology); returns the new top tags.
    fn copy(&mut self, entities: &[DimTag]) -> KernelResult<Vec<DimTag>>;
    fn remove(&mut self, entities: &[DimTag], recursive: bool) -> KernelResult<()>;

    fn extrude(&mut self, entity: DimTag, offset: [f64; 3]) -> KernelResult<Vec<DimTag>>;
    fn revolve(
        &mut self,
        entity: DimTag,
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    ) -> KernelResult<Vec<DimTag>>;
    fn sweep(&mut self, entity: DimTag, path: i32) -> KernelResult<Vec<DimTag>>;

    // === Topology queries ===

    /// Entities of one dimension (or all), sorted by (dim, tag).
    fn entities(&self, dim: Option<i32>) -> KernelResult<Vec<DimTag>>;
    /// First-order boundary of the given entities. A closed curve has none.
    fn boundary(&self, entities: &[DimTag]) -> KernelResult<Vec<DimTag>>;
    /// Bounding box of one entity, or of the whole model.
    fn bounding_box(&self, entity: Option<DimTag>) -> KernelResult<BoundingBox>;
    fn point_coords(&self, tag: i32) -> KernelResult<[f64; 3]>;
    fn curve_length(&self, tag: i32) -> KernelResult<f64>;

    // === Mesh controls ===

    fn set_option(&mut self, name: &str, value: f64) -> KernelResult<()>;
    fn get_option(&self, name: &str) -> f64;
    /// Target element size at the given points.
    fn set_mesh_size(&mut self, points: &[DimTag], size: f64) -> KernelResult<()>;
    /// Force a fixed node count on a curve.
    fn set_transfinite_curve(
        &mut self,
        curve: i32,
        node_count: usize,
        distribution: CurveDistribution,
        coef: f64,
    ) -> KernelResult<()>;
    fn set_visibility(&mut self, entities: &[DimTag], visible: bool, recursive: bool)
        -> KernelResult<()>;
    /// Discard mesh data from previous generation passes.
    fn clear_mesh(&mut self) -> KernelResult<()>;
    /// Mesh visible entities of the given dimension. Curves already meshed
    /// in an earlier pass keep their discretization.
    fn generate(&mut self, dim: i32) -> KernelResult<()>;
    fn mesh_data(&self) -> KernelResult<MeshData>;

    // === File I/O ===

    fn write(&self, path: &Path) -> KernelResult<()>;
    /// Load entities from a model file; returns the imported top-level
    /// dimtags. Tags are renumbered, not preserved.
    fn import_shapes(&mut self, path: &Path, highest_dim_only: bool) -> KernelResult<Vec<DimTag>>;
    /// Repair imported geometry; returns the surviving top-level dimtags.
    fn heal_shapes(&mut self) -> KernelResult<Vec<DimTag>>;
}
