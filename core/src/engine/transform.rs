//! In-place transforms, extrusion/revolution/sweep, and the work-plane
//! coordinate frame.

use nalgebra::{Rotation3, Unit, Vector3};
use tracing::debug;

use crate::entity::{dimtags, ids_from_dimtags, EntityId};
use crate::kernel::OccKernel;

use super::{BuildError, GeomEngine};

/// Vector norms below this are treated as zero when building rotations.
const AXIS_EPS: f64 = 1e-12;

/// How a single entity is extruded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtrudeSpec {
    /// Straight extrusion along an offset vector.
    Translation([f64; 3]),
    /// Revolution about an axis through `origin` by `angle` radians.
    Rotation {
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    },
}

/// A work-plane frame: up to two rotations about the global origin followed
/// by a translation onto the plane origin.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPlaneFrame {
    pub origin: [f64; 3],
    /// (axis, angle) pairs, applied in order about the global origin.
    pub rotations: Vec<([f64; 3], f64)>,
}

impl GeomEngine {
    /// Duplicate entities; returns the copies in the usual highest-dimension
    /// first order.
    pub fn copy(&mut self, ids: &[EntityId]) -> Result<Vec<EntityId>, BuildError> {
        let tags = dimtags(ids)?;
        let copies = self.kernel.copy(&tags)?;
        Ok(ids_from_dimtags(&copies)?)
    }

    pub fn translate(&mut self, ids: &[EntityId], offset: [f64; 3]) -> Result<(), BuildError> {
        let tags = dimtags(ids)?;
        self.kernel.translate(&tags, offset)?;
        self.refresh_point_cache();
        Ok(())
    }

    pub fn rotate(
        &mut self,
        ids: &[EntityId],
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    ) -> Result<(), BuildError> {
        let tags = dimtags(ids)?;
        self.kernel.rotate(&tags, origin, axis, angle)?;
        self.refresh_point_cache();
        Ok(())
    }

    pub fn dilate(
        &mut self,
        ids: &[EntityId],
        center: [f64; 3],
        factors: [f64; 3],
    ) -> Result<(), BuildError> {
        let tags = dimtags(ids)?;
        self.kernel.dilate(&tags, center, factors)?;
        self.refresh_point_cache();
        Ok(())
    }

    pub fn symmetrize(&mut self, ids: &[EntityId], plane: [f64; 4]) -> Result<(), BuildError> {
        let tags = dimtags(ids)?;
        self.kernel.symmetrize(&tags, plane)?;
        self.refresh_point_cache();
        Ok(())
    }

    /// Extrude a single entity, either along an offset or about an axis.
    /// Returns the created entities, highest dimension first.
    pub fn extrude(
        &mut self,
        target: EntityId,
        spec: ExtrudeSpec,
    ) -> Result<Vec<EntityId>, BuildError> {
        let dt = target.to_dimtag()?;
        let created = match spec {
            ExtrudeSpec::Translation(offset) => self.kernel.extrude(dt, offset)?,
            ExtrudeSpec::Rotation {
                origin,
                axis,
                angle,
            } => self.kernel.revolve(dt, origin, axis, angle)?,
        };
        self.kernel.synchronize()?;
        Ok(ids_from_dimtags(&created)?)
    }

    /// Sweep a single entity along a path curve.
    pub fn sweep(
        &mut self,
        target: EntityId,
        path: EntityId,
    ) -> Result<Vec<EntityId>, BuildError> {
        let dt = target.to_dimtag()?;
        let path_tag = match path {
            EntityId::Curve(t) => t,
            other => {
                return Err(BuildError::Degenerate(format!(
                    "sweep path must be a curve, got {other:?}"
                )))
            }
        };
        let created = self.kernel.sweep(dt, path_tag)?;
        self.kernel.synchronize()?;
        Ok(ids_from_dimtags(&created)?)
    }

    /// Carry every listed entity through a work-plane frame: the rotations
    /// first, then the translation onto the plane origin. Loop entities ride
    /// along implicitly through their curves and are skipped here.
    pub fn apply_work_plane(
        &mut self,
        frame: &WorkPlaneFrame,
        ids: &[EntityId],
    ) -> Result<(), BuildError> {
        let tags: Vec<_> = ids
            .iter()
            .filter_map(|id| id.to_dimtag().ok())
            .collect();
        if tags.is_empty() {
            return Ok(());
        }
        for (axis, angle) in &frame.rotations {
            self.kernel.rotate(&tags, [0.0, 0.0, 0.0], *axis, *angle)?;
        }
        if frame.origin != [0.0, 0.0, 0.0] {
            self.kernel.translate(&tags, frame.origin)?;
        }
        self.refresh_point_cache();
        debug!(entities = tags.len(), "work plane applied");
        Ok(())
    }
}

/// Build the frame that carries the global X axis onto `u` and the rotated
/// "up" direction onto `v`, then translates to `origin`.
///
/// Each step is one rotation about the cross product of the two directions
/// by the angle between them. When the cross product vanishes with the
/// directions anti-parallel the step degenerates to a half turn about a
/// fallback perpendicular axis; a naive atan2 of the vanishing cross
/// product would underflow to zero there and silently skip the rotation.
pub fn work_plane_frame(
    origin: [f64; 3],
    u: [f64; 3],
    v: [f64; 3],
) -> Result<WorkPlaneFrame, BuildError> {
    let u = Vector3::new(u[0], u[1], u[2]);
    let v = Vector3::new(v[0], v[1], v[2]);
    if u.norm() < AXIS_EPS || v.norm() < AXIS_EPS {
        return Err(BuildError::Degenerate(
            "work plane axes must be nonzero".into(),
        ));
    }
    let u = u.normalize();
    let v = v.normalize();

    let mut rotations = Vec::new();
    let first = rotation_carrying(&Vector3::x(), &u, fallback_perpendicular(&Vector3::x()));
    let up = match &first {
        Some((axis, angle)) => {
            let rot = Rotation3::from_axis_angle(&Unit::new_normalize(*axis), *angle);
            rot * Vector3::y()
        }
        None => Vector3::y(),
    };
    if let Some((axis, angle)) = first {
        rotations.push(([axis.x, axis.y, axis.z], angle));
    }
    // The degenerate half turn of the second step must leave u in place,
    // so its axis is u itself (perpendicular to both up and v in a
    // near-orthonormal frame).
    if let Some((axis, angle)) = rotation_carrying(&up, &v, u) {
        rotations.push(([axis.x, axis.y, axis.z], angle));
    }
    Ok(WorkPlaneFrame { origin, rotations })
}

/// The single rotation carrying `from` onto `to`, or `None` when they
/// already coincide. Anti-parallel directions degenerate to a half turn
/// about `fallback`, which the caller picks perpendicular to `from`.
fn rotation_carrying(
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    fallback: Vector3<f64>,
) -> Option<(Vector3<f64>, f64)> {
    let cross = from.cross(to);
    let dot = from.dot(to);
    if cross.norm() > AXIS_EPS {
        Some((cross.normalize(), cross.norm().atan2(dot)))
    } else if dot < 0.0 {
        Some((fallback, std::f64::consts::PI))
    } else {
        None
    }
}

fn fallback_perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let candidate = if v.x.abs() <= v.y.abs().min(v.z.abs()) {
        Vector3::x()
    } else if v.y.abs() <= v.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    v.cross(&candidate).normalize()
}
