//! Boolean operations, the fragment finalization pass and entity removal.

use tracing::debug;

use crate::entity::{dimtags, ids_from_dimtags, EntityId, GeometryResult};
use crate::kernel::OccKernel;

use super::{BuildError, GeomEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanKind {
    Intersection,
    Union,
    Difference,
    Fragments,
}

impl GeomEngine {
    /// Shared boolean path: convert both operand lists to dimtags, run the
    /// native primitive, synchronize, and hand the result back in the
    /// volumes-surfaces-curves-vertices order.
    pub fn boolean(
        &mut self,
        kind: BooleanKind,
        objects: &[GeometryResult],
        tools: &[GeometryResult],
        delete_object: bool,
        delete_tool: bool,
    ) -> Result<Vec<EntityId>, BuildError> {
        let object_ids: Vec<EntityId> = objects.iter().map(GeometryResult::entity_id).collect();
        let tool_ids: Vec<EntityId> = tools.iter().map(GeometryResult::entity_id).collect();
        let object_tags = dimtags(&object_ids)?;
        let tool_tags = dimtags(&tool_ids)?;

        let result = match kind {
            BooleanKind::Intersection => {
                self.kernel
                    .intersect(&object_tags, &tool_tags, delete_object, delete_tool)?
            }
            BooleanKind::Union => {
                self.kernel
                    .fuse(&object_tags, &tool_tags, delete_object, delete_tool)?
            }
            BooleanKind::Difference => {
                self.kernel
                    .cut(&object_tags, &tool_tags, delete_object, delete_tool)?
            }
            BooleanKind::Fragments => {
                self.kernel
                    .fragment(&object_tags, &tool_tags, delete_object, delete_tool)?
            }
        };
        self.kernel.synchronize()?;
        if delete_object || delete_tool {
            self.refresh_point_cache();
        }
        debug!(?kind, results = result.entities.len(), "boolean finished");
        Ok(ids_from_dimtags(&result.entities)?)
    }

    /// 2D union. After fusing the two regions the union is carved out of an
    /// oversized enclosing rectangle twice in succession: a single cut can
    /// leave sliver faces behind, so the second cut is required for
    /// correctness, not an optimization.
    pub fn boolean_union2d(
        &mut self,
        a: GeometryResult,
        b: GeometryResult,
    ) -> Result<Vec<EntityId>, BuildError> {
        let sa = a.as_surface().ok_or(BuildError::ExpectedSurface)?;
        let sb = b.as_surface().ok_or(BuildError::ExpectedSurface)?;

        let fused = self.boolean(
            BooleanKind::Union,
            &[GeometryResult::Entity(sa)],
            &[GeometryResult::Entity(sb)],
            true,
            true,
        )?;
        if fused.is_empty() {
            return Err(BuildError::Degenerate("2D union produced nothing".into()));
        }
        let fused: Vec<GeometryResult> =
            fused.into_iter().map(GeometryResult::Entity).collect();

        let bbox = self.bounding_box(Some(fused[0].entity_id()))?;
        let margin = bbox.diagonal().max(1.0);
        let z = bbox.min[2];
        let corner = [bbox.min[0] - margin, bbox.min[1] - margin, z];
        let du = [bbox.max[0] - bbox.min[0] + 2.0 * margin, 0.0, 0.0];
        let dv = [0.0, bbox.max[1] - bbox.min[1] + 2.0 * margin, 0.0];

        let enclosing = self.rect_surface(corner, du, dv, false)?;
        let inverse = self.boolean(
            BooleanKind::Difference,
            &[GeometryResult::Entity(enclosing)],
            &fused,
            true,
            true,
        )?;
        let inverse: Vec<GeometryResult> =
            inverse.into_iter().map(GeometryResult::Entity).collect();

        let enclosing = self.rect_surface(corner, du, dv, false)?;
        self.boolean(
            BooleanKind::Difference,
            &[GeometryResult::Entity(enclosing)],
            &inverse,
            true,
            true,
        )
    }

    /// Finalization helper: when the model holds more than one entity of
    /// its highest dimension, fragment the first against the rest (splitting
    /// at every mutual intersection) and drop duplicate results.
    pub fn apply_fragments(&mut self) -> Result<(), BuildError> {
        let Some(max_dim) = self.highest_dimension()? else {
            return Ok(());
        };
        let entities = self.kernel.entities(Some(max_dim))?;
        if entities.len() > 1 {
            debug!(dim = max_dim, count = entities.len(), "fragmenting model");
            self.kernel
                .fragment(&entities[..1], &entities[1..], true, true)?;
            self.kernel.synchronize()?;
        }
        self.kernel.remove_duplicates()?;
        self.refresh_point_cache();
        Ok(())
    }

    /// Highest dimension that currently has entities.
    pub fn highest_dimension(&self) -> Result<Option<i32>, BuildError> {
        for dim in (0..=3).rev() {
            if !self.kernel.entities(Some(dim))?.is_empty() {
                return Ok(Some(dim));
            }
        }
        Ok(None)
    }

    pub fn remove_entities(
        &mut self,
        ids: &[EntityId],
        recursive: bool,
    ) -> Result<(), BuildError> {
        let tags = dimtags(ids)?;
        self.kernel.remove(&tags, recursive)?;
        self.refresh_point_cache();
        Ok(())
    }

    /// Keep only `keep` at their common dimension: every entity at that
    /// dimension and above that is not kept is removed, walking top-down so
    /// no dangling boundary references are left behind.
    pub fn inverse_remove(&mut self, keep: &[EntityId]) -> Result<(), BuildError> {
        if keep.is_empty() {
            return Err(BuildError::Degenerate(
                "inverse removal with nothing to keep".into(),
            ));
        }
        let kept = dimtags(keep)?;
        let common_dim = kept[0].0;
        for dt in &kept[1..] {
            if dt.0 != common_dim {
                return Err(BuildError::MixedDimensions(common_dim, dt.0));
            }
        }
        for dim in ((common_dim + 1)..=3).rev() {
            let doomed = self.kernel.entities(Some(dim))?;
            if !doomed.is_empty() {
                self.kernel.remove(&doomed, false)?;
            }
        }
        let doomed: Vec<_> = self
            .kernel
            .entities(Some(common_dim))?
            .into_iter()
            .filter(|dt| !kept.contains(dt))
            .collect();
        if !doomed.is_empty() {
            self.kernel.remove(&doomed, false)?;
        }
        self.refresh_point_cache();
        Ok(())
    }
}
