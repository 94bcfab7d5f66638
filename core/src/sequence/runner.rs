//! Replays a recorded operation list against the engine and an evolving
//! named-object table.
//!
//! The runner is a two-state machine: outside or inside a work-plane block.
//! `WorkPlaneStart` swaps in a structurally empty table so that only
//! entities created inside the block are carried through the frame
//! transform; `WorkPlaneEnd` applies the transform and merges the scoped
//! table back (plain assignment, last writer wins). Any other operation
//! dispatches through one match. The first error halts the run: a scripted
//! build is not resumable mid-sequence because later steps assume the exact
//! entity set left by earlier ones.

use std::collections::HashSet;

use tracing::{debug, error};

use crate::engine::{
    work_plane_frame, BooleanKind, BuildError, ExtrudeSpec, GeomEngine, WorkPlaneFrame,
};
use crate::entity::{EntityId, GeometryResult};
use crate::objects::ObjectTable;

use super::Operation;

/// Keys visible after a step, plus the keys the step minted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub all_keys: Vec<String>,
    pub new_keys: Vec<String>,
}

#[derive(Default)]
pub struct SequenceRunner {
    /// Saved parent tables and the frame of each open work-plane block,
    /// innermost last.
    scopes: Vec<(ObjectTable, WorkPlaneFrame)>,
}

/// Replay `steps[start..]`, reporting each step through `progress`.
pub fn run_sequence(
    engine: &mut GeomEngine,
    objects: &mut ObjectTable,
    steps: &[Operation],
    start: usize,
    progress: &mut dyn FnMut(&str),
) -> Result<(), BuildError> {
    SequenceRunner::new().run(engine, objects, steps, start, progress)
}

impl SequenceRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(
        &mut self,
        engine: &mut GeomEngine,
        objects: &mut ObjectTable,
        steps: &[Operation],
        start: usize,
        progress: &mut dyn FnMut(&str),
    ) -> Result<(), BuildError> {
        for (index, op) in steps.iter().enumerate().skip(start) {
            progress(&format!("processing {}", op.label()));
            match self.apply(engine, objects, op) {
                Ok(outcome) => {
                    debug!(
                        step = index,
                        op = op.label(),
                        new = outcome.new_keys.len(),
                        total = outcome.all_keys.len(),
                        "step done"
                    );
                }
                Err(err) => {
                    error!(step = index, op = op.label(), %err, "sequence halted");
                    return Err(err);
                }
            }
        }
        if !self.scopes.is_empty() {
            return Err(BuildError::Scope(format!(
                "{} work plane block(s) left open",
                self.scopes.len()
            )));
        }
        Ok(())
    }

    /// Dispatch a single operation. Every variant is handled here and
    /// nowhere else.
    pub fn apply(
        &mut self,
        engine: &mut GeomEngine,
        objects: &mut ObjectTable,
        op: &Operation,
    ) -> Result<StepOutcome, BuildError> {
        let mut new_keys = Vec::new();
        let mut mint = |objects: &mut ObjectTable, result: GeometryResult, keys: &mut Vec<String>| {
            keys.push(objects.add_object(result, op.mnemonic()));
        };

        match op {
            Operation::Point {
                xyz,
                mesh_size,
                masked,
            } => {
                let id = engine.add_point(*xyz, *mesh_size, *masked)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Line { start, end } => {
                let s = resolve_id(objects, start)?;
                let e = resolve_id(objects, end)?;
                let id = engine.add_line(s, e)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::CircleArc { start, center, end } => {
                let s = resolve_id(objects, start)?;
                let c = resolve_id(objects, center)?;
                let e = resolve_id(objects, end)?;
                let id = engine.add_circle_arc(s, c, e)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::EllipseArc { start, center, end } => {
                let s = resolve_id(objects, start)?;
                let c = resolve_id(objects, center)?;
                let e = resolve_id(objects, end)?;
                let id = engine.add_ellipse_arc(s, c, e)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Spline { through } => {
                let ids = resolve_ids(objects, through)?;
                let id = engine.add_spline(&ids)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::CurveLoop { curves } => {
                // A leading '-' on a key traverses that curve reversed.
                let mut signed = Vec::with_capacity(curves.len());
                for key in curves {
                    let (name, forward) = match key.strip_prefix('-') {
                        Some(stripped) => (stripped, false),
                        None => (key.as_str(), true),
                    };
                    signed.push((resolve_id(objects, name)?, forward));
                }
                let id = engine.add_curve_loop(&signed)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::PlaneSurface { loops } => {
                let ids = resolve_ids(objects, loops)?;
                let id = engine.add_plane_surface(&ids)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::SurfaceFilling { boundary } => {
                let id = engine.add_surface_filling(resolve_id(objects, boundary)?)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::SurfaceLoop { surfaces } => {
                let ids = resolve_ids(objects, surfaces)?;
                let id = engine.add_surface_loop(&ids)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Volume { shells } => {
                let ids = resolve_ids(objects, shells)?;
                let id = engine.add_volume(&ids)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Polygon { points, mesh_size } => {
                let result = engine.add_polygon(points, *mesh_size)?;
                mint(objects, result, &mut new_keys);
            }
            Operation::Rect { corner, u, v } => {
                let id = engine.add_rect(*corner, *u, *v)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Disk { center, rx, ry } => {
                let id = engine.add_disk(*center, *rx, *ry)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Box { corners, mesh_size } => {
                let id = engine.add_box(corners, *mesh_size)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Sphere { center, radius } => {
                let id = engine.add_sphere(*center, *radius)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Cone {
                base,
                axis,
                base_radius,
                top_radius,
            } => {
                let id = engine.add_cone(*base, *axis, *base_radius, *top_radius)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Wedge {
                corner,
                extents,
                top_dx,
            } => {
                let id = engine.add_wedge(*corner, *extents, *top_dx)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Cylinder { base, axis, radius } => {
                let id = engine.add_cylinder(*base, *axis, *radius)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Torus {
                center,
                major_radius,
                minor_radius,
            } => {
                let id = engine.add_torus(*center, *major_radius, *minor_radius)?;
                mint(objects, id.into(), &mut new_keys);
            }
            Operation::Extrude { target, offset } => {
                let target = resolve(objects, target)?;
                let created =
                    engine.extrude(target.entity_id(), ExtrudeSpec::Translation(*offset))?;
                if let Some(primary) = created.first() {
                    mint(objects, (*primary).into(), &mut new_keys);
                }
            }
            Operation::Revolve {
                target,
                origin,
                axis,
                angle,
            } => {
                let target = resolve(objects, target)?;
                let created = engine.extrude(
                    target.entity_id(),
                    ExtrudeSpec::Rotation {
                        origin: *origin,
                        axis: *axis,
                        angle: *angle,
                    },
                )?;
                if let Some(primary) = created.first() {
                    mint(objects, (*primary).into(), &mut new_keys);
                }
            }
            Operation::Sweep { target, path } => {
                let target = resolve(objects, target)?;
                let path = resolve_id(objects, path)?;
                let created = engine.sweep(target.entity_id(), path)?;
                if let Some(primary) = created.first() {
                    mint(objects, (*primary).into(), &mut new_keys);
                }
            }
            Operation::Union {
                objects: object_keys,
                tools,
                delete_object,
                delete_tool,
            }
            | Operation::Intersection {
                objects: object_keys,
                tools,
                delete_object,
                delete_tool,
            }
            | Operation::Difference {
                objects: object_keys,
                tools,
                delete_object,
                delete_tool,
            }
            | Operation::Fragments {
                objects: object_keys,
                tools,
                delete_object,
                delete_tool,
            } => {
                let kind = match op {
                    Operation::Union { .. } => BooleanKind::Union,
                    Operation::Intersection { .. } => BooleanKind::Intersection,
                    Operation::Difference { .. } => BooleanKind::Difference,
                    _ => BooleanKind::Fragments,
                };
                let object_results = resolve_many(objects, object_keys)?;
                let tool_results = resolve_many(objects, tools)?;
                let created = engine.boolean(
                    kind,
                    &object_results,
                    &tool_results,
                    *delete_object,
                    *delete_tool,
                )?;
                // Consumed operands lose their table keys.
                if *delete_object {
                    for key in object_keys {
                        objects.remove(key);
                    }
                }
                if *delete_tool {
                    for key in tools {
                        objects.remove(key);
                    }
                }
                for id in created {
                    mint(objects, id.into(), &mut new_keys);
                }
            }
            Operation::Union2d { object, tool } => {
                let a = resolve(objects, object)?;
                let b = resolve(objects, tool)?;
                let created = engine.boolean_union2d(a, b)?;
                objects.remove(object);
                objects.remove(tool);
                for id in created {
                    mint(objects, id.into(), &mut new_keys);
                }
            }
            Operation::ApplyFragments => {
                engine.apply_fragments()?;
                prune_stale_keys(engine, objects)?;
            }
            Operation::Copy { targets } => {
                let ids = resolve_ids(objects, targets)?;
                for id in engine.copy(&ids)? {
                    mint(objects, id.into(), &mut new_keys);
                }
            }
            Operation::Translate { targets, offset } => {
                let ids = resolve_ids(objects, targets)?;
                engine.translate(&ids, *offset)?;
            }
            Operation::Rotate {
                targets,
                origin,
                axis,
                angle,
            } => {
                let ids = resolve_ids(objects, targets)?;
                engine.rotate(&ids, *origin, *axis, *angle)?;
            }
            Operation::Dilate {
                targets,
                center,
                factors,
            } => {
                let ids = resolve_ids(objects, targets)?;
                engine.dilate(&ids, *center, *factors)?;
            }
            Operation::Symmetrize { targets, plane } => {
                let ids = resolve_ids(objects, targets)?;
                engine.symmetrize(&ids, *plane)?;
            }
            Operation::Remove { targets, recursive } => {
                let ids = resolve_ids(objects, targets)?;
                engine.remove_entities(&ids, *recursive)?;
                for key in targets {
                    objects.remove(key);
                }
            }
            Operation::InverseRemove { keep } => {
                let ids = resolve_ids(objects, keep)?;
                engine.inverse_remove(&ids)?;
                prune_stale_keys(engine, objects)?;
            }
            Operation::ImportCad { path, heal } => {
                for id in engine.import_cad(path, *heal)? {
                    mint(objects, id.into(), &mut new_keys);
                }
            }
            Operation::WorkPlaneStart { origin, u, v } => {
                let frame = work_plane_frame(*origin, *u, *v)?;
                let parent = std::mem::take(objects);
                self.scopes.push((parent, frame));
            }
            Operation::WorkPlaneEnd => {
                let (parent, frame) = self
                    .scopes
                    .pop()
                    .ok_or_else(|| BuildError::Scope("work plane end without start".into()))?;
                let scoped = std::mem::replace(objects, parent);
                let ids: Vec<EntityId> =
                    scoped.iter().map(|(_, r)| r.entity_id()).collect();
                engine.apply_work_plane(&frame, &ids)?;
                objects.merge_from(scoped);
            }
        }

        Ok(StepOutcome {
            all_keys: objects.keys().cloned().collect(),
            new_keys,
        })
    }
}

fn resolve(objects: &ObjectTable, key: &str) -> Result<GeometryResult, BuildError> {
    objects
        .get(key)
        .copied()
        .ok_or_else(|| BuildError::UnknownObject(key.to_string()))
}

fn resolve_id(objects: &ObjectTable, key: &str) -> Result<EntityId, BuildError> {
    resolve(objects, key).map(|r| r.entity_id())
}

fn resolve_ids(objects: &ObjectTable, keys: &[String]) -> Result<Vec<EntityId>, BuildError> {
    keys.iter().map(|k| resolve_id(objects, k)).collect()
}

fn resolve_many(
    objects: &ObjectTable,
    keys: &[String],
) -> Result<Vec<GeometryResult>, BuildError> {
    keys.iter().map(|k| resolve(objects, k)).collect()
}

/// Drop table keys whose backing entity no longer exists in the kernel
/// (consumed by fragmentation or an inverse removal). Loop-backed entries
/// are left alone; they are bookkeeping, not kernel entities.
fn prune_stale_keys(
    engine: &GeomEngine,
    objects: &mut ObjectTable,
) -> Result<(), BuildError> {
    let live: HashSet<EntityId> = engine.kernel_entities(None)?.into_iter().collect();
    let stale: Vec<String> = objects
        .iter()
        .filter(|(_, result)| {
            let id = result.entity_id();
            id.dim().is_some() && !live.contains(&id)
        })
        .map(|(key, _)| key.clone())
        .collect();
    for key in stale {
        objects.remove(&key);
    }
    Ok(())
}
