//! The geometry construction engine.
//!
//! Owns the kernel handle, the point/skin caches and the engine options,
//! and exposes the builder operations the sequence runner dispatches to:
//! construction primitives, boolean operations, transforms, work planes and
//! the preview-mesh heuristics. All side effects are confined to the kernel
//! model and the engine caches.

mod boolean;
mod meshing;
mod primitives;
mod transform;

#[cfg(test)]
mod tests_primitives;
#[cfg(test)]
mod tests_workplane;
#[cfg(test)]
mod tests_meshing;

pub use boolean::BooleanKind;
pub use meshing::PreviewPlan;
pub use transform::{work_plane_frame, ExtrudeSpec, WorkPlaneFrame};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::entity::{dimtags, ids_from_dimtags, EntityError, EntityId, UniqueCounter};
use crate::kernel::{BoundingBox, DimTag, KernelError, OccKernel};

/// Errors from builder operations. The first error aborts the whole run;
/// there is no retry or partial rollback at this layer.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error("no object named {0:?}")]
    UnknownObject(String),

    #[error("selection mixes dimensions {0} and {1}")]
    MixedDimensions(i32, i32),

    #[error("no cached coordinates for {0:?}")]
    UnknownCoordinates(EntityId),

    #[error("degenerate input: {0}")]
    Degenerate(String),

    #[error("operand must be a surface")]
    ExpectedSurface,

    #[error("work plane scope error: {0}")]
    Scope(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("i/o failed: {0}")]
    Io(String),
}

/// Engine configuration. Later worker tasks may adjust these without
/// rebuilding the kernel model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Divisor of the model diagonal capping the uniform preview size.
    pub preview_resolution: f64,
    /// Toggle curvature-adaptive sizing in the default mesh pass.
    pub curvature_adaptive: bool,
    /// Elements per full turn when curvature-adaptive sizing is on.
    pub curvature_elements: f64,
    /// A curve longer than `max_seg` times its incident vertex size is
    /// refined and meshed first.
    pub max_seg: f64,
    /// Long-edge threshold as a fraction of the model diagonal.
    pub long_edge_factor: f64,
    /// Small-edge threshold as a fraction of the model diagonal.
    pub small_edge_factor: f64,
    /// Closed 1D entities below this fraction of the largest vertex size
    /// are hidden from the preview passes.
    pub tiny_loop_factor: f64,
    /// Where finalized model files land; current directory when unset.
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            preview_resolution: 32.0,
            curvature_adaptive: false,
            curvature_elements: 12.0,
            max_seg: 10.0,
            long_edge_factor: 5e-2,
            small_edge_factor: 1e-3,
            tiny_loop_factor: 1e-5,
            output_dir: None,
        }
    }
}

/// One entry of the best-effort tag remapping across a save/reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapEntry {
    pub dim: i32,
    pub old_tag: i32,
    pub new_tag: i32,
}

pub struct GeomEngine {
    kernel: Box<dyn OccKernel>,
    options: EngineOptions,
    /// Creation-time dedupe hint: quantized coordinate -> vertex. Best
    /// effort only; the kernel stays the source of truth for identity.
    point_lookup: HashMap<[i64; 3], EntityId>,
    /// Resolved coordinates of engine-created vertices.
    point_coords: HashMap<EntityId, [f64; 3]>,
    /// User-visible vertices, in creation order. Internal helper points
    /// (scratch rectangles, loop closures) are kept out of this list.
    masked_vertices: Vec<EntityId>,
}

impl GeomEngine {
    pub fn new(
        mut kernel: Box<dyn OccKernel>,
        options: EngineOptions,
        model_name: &str,
    ) -> Result<Self, BuildError> {
        kernel.new_model(model_name)?;
        info!(model = model_name, "geometry engine ready");
        Ok(Self {
            kernel,
            options,
            point_lookup: HashMap::new(),
            point_coords: HashMap::new(),
            masked_vertices: Vec::new(),
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: EngineOptions) {
        self.options = options;
    }

    /// Wipe the kernel model and every cache.
    pub fn clear(&mut self, model_name: &str) -> Result<(), BuildError> {
        self.kernel.clear()?;
        self.kernel.new_model(model_name)?;
        self.point_lookup.clear();
        self.point_coords.clear();
        self.masked_vertices.clear();
        Ok(())
    }

    pub fn masked_vertices(&self) -> &[EntityId] {
        &self.masked_vertices
    }

    /// Cached coordinates of an engine-created vertex.
    pub fn point_coordinates(&self, id: EntityId) -> Option<[f64; 3]> {
        self.point_coords.get(&id).copied()
    }

    pub fn bounding_box(&self, entity: Option<EntityId>) -> Result<BoundingBox, BuildError> {
        let dt = entity.map(|id| id.to_dimtag()).transpose()?;
        Ok(self.kernel.bounding_box(dt)?)
    }

    pub fn kernel_entities(&self, dim: Option<i32>) -> Result<Vec<EntityId>, BuildError> {
        Ok(ids_from_dimtags(&self.kernel.entities(dim)?)?)
    }

    /// First-order boundary of the given entities, highest dimension first.
    pub fn boundary(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, BuildError> {
        let tags = dimtags(ids)?;
        Ok(ids_from_dimtags(&self.kernel.boundary(&tags)?)?)
    }

    /// Show or hide entities, optionally including their sub-topology.
    pub fn set_visibility(
        &mut self,
        ids: &[EntityId],
        visible: bool,
        recursive: bool,
    ) -> Result<(), BuildError> {
        let tags = dimtags(ids)?;
        Ok(self.kernel.set_visibility(&tags, visible, recursive)?)
    }

    /// Import a CAD file, optionally running the kernel's healing pass, and
    /// return the resulting top-level entities (volumes before surfaces
    /// before curves before points).
    pub fn import_cad(&mut self, path: &Path, heal: bool) -> Result<Vec<EntityId>, BuildError> {
        let mut tops = self.kernel.import_shapes(path, true)?;
        if heal {
            tops = self.kernel.heal_shapes()?;
        }
        self.kernel.synchronize()?;
        debug!(path = %path.display(), entities = tops.len(), heal, "imported cad file");
        Ok(ids_from_dimtags(&tops)?)
    }

    /// Finalization pass: fragment overlapping top-dimension entities,
    /// persist the model, then reload it to obtain meshing-stable tags and
    /// a best-effort old-to-new entity mapping.
    pub fn finalize(&mut self, name: &str) -> Result<(PathBuf, Vec<EntityMapEntry>), BuildError> {
        self.apply_fragments()?;

        let dir = match &self.options.output_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| BuildError::Io(e.to_string()))?,
        };
        let path = dir.join(format!("{}.brep", sanitize_filename(name)));

        let before = self.entity_signatures()?;
        self.kernel.write(&path)?;
        self.kernel.clear()?;
        self.kernel.import_shapes(&path, false)?;
        self.kernel.synchronize()?;
        let after = self.entity_signatures()?;

        let mapping = create_entity_mapping(&before, &after);
        info!(
            path = %path.display(),
            mapped = mapping.len(),
            of = before.len(),
            "finalized model"
        );
        self.remap_caches(&mapping);
        Ok((path, mapping))
    }

    fn entity_signatures(&self) -> Result<Vec<(DimTag, [i64; 6])>, BuildError> {
        let mut out = Vec::new();
        for dt in self.kernel.entities(None)? {
            let sig = self
                .kernel
                .bounding_box(Some(dt))
                .map(|bb| bb.signature())
                .unwrap_or([0; 6]);
            out.push((dt, sig));
        }
        Ok(out)
    }

    /// Rewrite the point caches and masked list after tags were renumbered.
    fn remap_caches(&mut self, mapping: &[EntityMapEntry]) {
        let vertex_map: HashMap<i32, i32> = mapping
            .iter()
            .filter(|m| m.dim == 0)
            .map(|m| (m.old_tag, m.new_tag))
            .collect();
        let remap = |id: &EntityId| match id {
            EntityId::Vertex(t) => vertex_map.get(t).map(|&n| EntityId::Vertex(n)),
            _ => None,
        };
        self.point_coords = self
            .point_coords
            .iter()
            .filter_map(|(id, xyz)| remap(id).map(|n| (n, *xyz)))
            .collect();
        self.point_lookup = self
            .point_lookup
            .iter()
            .filter_map(|(key, id)| remap(id).map(|n| (*key, n)))
            .collect();
        self.masked_vertices = self
            .masked_vertices
            .iter()
            .filter_map(|id| remap(id))
            .collect();
    }

    /// Re-query cached vertex coordinates after an in-place transform.
    /// Vertices the kernel no longer knows fall out of every cache.
    pub(crate) fn refresh_point_cache(&mut self) {
        let mut coords = HashMap::with_capacity(self.point_coords.len());
        for id in self.point_coords.keys() {
            if let Ok(xyz) = self.kernel.point_coords(id.tag()) {
                coords.insert(*id, xyz);
            }
        }
        self.point_coords = coords;
        self.point_lookup = self
            .point_coords
            .iter()
            .map(|(id, xyz)| (coord_key(*xyz), *id))
            .collect();
        self.masked_vertices
            .retain(|id| self.point_coords.contains_key(id));
    }
}

/// Quantized coordinate key for the creation-time point cache.
pub(crate) fn coord_key(xyz: [f64; 3]) -> [i64; 3] {
    xyz.map(|c| (c * 1e9).round() as i64)
}

/// Replace path separators so a model name is safe as a file stem.
pub fn sanitize_filename(name: &str) -> String {
    name.replace(['/', '\\', ':'], "_")
}

/// Pair up entities of two enumerations of the same shapes by geometric
/// signature. Each enumeration is folded through a [`UniqueCounter`]; the
/// counter position identifies a signature group and repeats within a group
/// are matched by occurrence order. Best effort, not a guarantee.
pub fn create_entity_mapping(
    before: &[(DimTag, [i64; 6])],
    after: &[(DimTag, [i64; 6])],
) -> Vec<EntityMapEntry> {
    type Shape = (i32, [i64; 6]);
    let mut before_counter = UniqueCounter::new();
    let mut before_groups: HashMap<usize, (Shape, Vec<i32>)> = HashMap::new();
    for (dt, sig) in before {
        let shape = (dt.0, *sig);
        let (_, pos) = before_counter.add_shape(shape);
        before_groups
            .entry(pos)
            .or_insert_with(|| (shape, Vec::new()))
            .1
            .push(dt.1);
    }
    let mut after_counter = UniqueCounter::new();
    let mut taken: HashMap<usize, usize> = HashMap::new();
    let mut out = Vec::new();
    for (dt, sig) in after {
        let shape = (dt.0, *sig);
        let (_, pos) = after_counter.add_shape(shape);
        let k = taken.entry(pos).or_insert(0);
        if let Some((group_shape, olds)) = before_groups.get(&pos) {
            // Counter positions only line up while the two enumerations
            // agree; a shape mismatch means the order diverged, and that
            // entity simply stays unmapped.
            if *group_shape == shape && *k < olds.len() {
                out.push(EntityMapEntry {
                    dim: dt.0,
                    old_tag: olds[*k],
                    new_tag: dt.1,
                });
                *k += 1;
            }
        }
    }
    out
}
