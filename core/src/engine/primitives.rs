//! Construction primitives: points, curves, surfaces, loops, volumes and
//! the composed templates (polygon, rectangle, box) plus solid primitives.

use tracing::debug;

use crate::entity::{EntityId, GeometryResult};
use crate::kernel::{BoundingBox, OccKernel};

use super::{coord_key, BuildError, GeomEngine};

/// Minimum spacing between consecutive spline nodes, relative to the node
/// cloud extent.
const SPLINE_MIN_SPACING: f64 = 1e-9;

impl GeomEngine {
    /// Create (or reuse) a point. New vertices land in the point cache and,
    /// unless `masked` is false, in the user-visible vertex list.
    pub fn add_point(
        &mut self,
        xyz: [f64; 3],
        mesh_size: Option<f64>,
        masked: bool,
    ) -> Result<EntityId, BuildError> {
        let key = coord_key(xyz);
        if let Some(&id) = self.point_lookup.get(&key) {
            if masked && !self.masked_vertices.contains(&id) {
                self.masked_vertices.push(id);
            }
            return Ok(id);
        }
        let tag = self.kernel.add_point(xyz, mesh_size.unwrap_or(0.0))?;
        let id = EntityId::Vertex(tag);
        self.point_lookup.insert(key, id);
        self.point_coords.insert(id, xyz);
        if masked {
            self.masked_vertices.push(id);
        }
        Ok(id)
    }

    pub fn add_line(&mut self, start: EntityId, end: EntityId) -> Result<EntityId, BuildError> {
        let (s, e) = (expect_vertex(start)?, expect_vertex(end)?);
        Ok(EntityId::Curve(self.kernel.add_line(s, e)?))
    }

    pub fn add_circle_arc(
        &mut self,
        start: EntityId,
        center: EntityId,
        end: EntityId,
    ) -> Result<EntityId, BuildError> {
        let (s, c, e) = (
            expect_vertex(start)?,
            expect_vertex(center)?,
            expect_vertex(end)?,
        );
        Ok(EntityId::Curve(self.kernel.add_circle_arc(s, c, e)?))
    }

    /// Elliptic arc from `start` to `end` about `center`. The kernel wants
    /// the major-axis point explicitly; it is recovered from the cached
    /// coordinates as the endpoint farther from the center.
    pub fn add_ellipse_arc(
        &mut self,
        start: EntityId,
        center: EntityId,
        end: EntityId,
    ) -> Result<EntityId, BuildError> {
        let sc = self
            .point_coordinates(start)
            .ok_or(BuildError::UnknownCoordinates(start))?;
        let cc = self
            .point_coordinates(center)
            .ok_or(BuildError::UnknownCoordinates(center))?;
        let ec = self
            .point_coordinates(end)
            .ok_or(BuildError::UnknownCoordinates(end))?;
        let r = |p: [f64; 3]| {
            (0..3)
                .map(|i| (p[i] - cc[i]).powi(2))
                .sum::<f64>()
                .sqrt()
        };
        let major = if r(sc) >= r(ec) { start } else { end };
        let (s, c, m, e) = (
            expect_vertex(start)?,
            expect_vertex(center)?,
            expect_vertex(major)?,
            expect_vertex(end)?,
        );
        Ok(EntityId::Curve(self.kernel.add_ellipse_arc(s, c, m, e)?))
    }

    pub fn add_spline(&mut self, through: &[EntityId]) -> Result<EntityId, BuildError> {
        if through.len() < 2 {
            return Err(BuildError::Degenerate(
                "spline needs at least two points".into(),
            ));
        }
        // Duplicate or near-coincident consecutive nodes make the kernel's
        // interpolation blow up; reject them up front when coordinates are
        // known.
        let coords: Vec<Option<[f64; 3]>> = through
            .iter()
            .map(|id| self.point_coordinates(*id))
            .collect();
        let known: Vec<[f64; 3]> = coords.iter().flatten().copied().collect();
        let scale = BoundingBox::from_points(known.iter()).diagonal().max(1.0);
        for pair in coords.windows(2) {
            if let (Some(a), Some(b)) = (pair[0], pair[1]) {
                let d = (0..3).map(|i| (a[i] - b[i]).powi(2)).sum::<f64>().sqrt();
                if d < SPLINE_MIN_SPACING * scale {
                    return Err(BuildError::Degenerate(
                        "spline passes through duplicate or too-close points".into(),
                    ));
                }
            }
        }
        let tags: Vec<i32> = through
            .iter()
            .map(|id| expect_vertex(*id))
            .collect::<Result<_, _>>()?;
        Ok(EntityId::Curve(self.kernel.add_spline(&tags)?))
    }

    /// `curves` may carry a negative sign to traverse a curve reversed.
    pub fn add_curve_loop(&mut self, curves: &[(EntityId, bool)]) -> Result<EntityId, BuildError> {
        let tags: Vec<i32> = curves
            .iter()
            .map(|(id, forward)| {
                expect_curve(*id).map(|t| if *forward { t } else { -t })
            })
            .collect::<Result<_, _>>()?;
        Ok(EntityId::CurveLoop(self.kernel.add_curve_loop(&tags)?))
    }

    pub fn add_plane_surface(&mut self, loops: &[EntityId]) -> Result<EntityId, BuildError> {
        let tags: Vec<i32> = loops
            .iter()
            .map(|id| expect_curve_loop(*id))
            .collect::<Result<_, _>>()?;
        Ok(EntityId::Surface(self.kernel.add_plane_surface(&tags)?))
    }

    /// Fill a (possibly non-planar) closed loop. The bounding wire is
    /// computed from committed geometry, so the model is synchronized first.
    pub fn add_surface_filling(&mut self, boundary: EntityId) -> Result<EntityId, BuildError> {
        self.kernel.synchronize()?;
        let tag = expect_curve_loop(boundary)?;
        Ok(EntityId::Surface(self.kernel.add_surface_filling(tag)?))
    }

    pub fn add_surface_loop(&mut self, surfaces: &[EntityId]) -> Result<EntityId, BuildError> {
        let tags: Vec<i32> = surfaces
            .iter()
            .map(|id| expect_surface(*id))
            .collect::<Result<_, _>>()?;
        Ok(EntityId::SurfaceLoop(self.kernel.add_surface_loop(&tags)?))
    }

    pub fn add_volume(&mut self, shells: &[EntityId]) -> Result<EntityId, BuildError> {
        let tags: Vec<i32> = shells
            .iter()
            .map(|id| expect_surface_loop(*id))
            .collect::<Result<_, _>>()?;
        Ok(EntityId::Volume(self.kernel.add_volume(&tags)?))
    }

    /// Closed polygon through the given corners: points, edges, one curve
    /// loop, one plane surface.
    pub fn add_polygon(
        &mut self,
        corners: &[[f64; 3]],
        mesh_size: Option<f64>,
    ) -> Result<GeometryResult, BuildError> {
        let surface = self.polygon_surface(corners, mesh_size, true)?;
        Ok(GeometryResult::Polygon {
            surface: surface.0,
            boundary: surface.1,
            mesh_size: mesh_size.unwrap_or(0.0),
        })
    }

    /// Rectangle from a corner and two edge vectors.
    pub fn add_rect(
        &mut self,
        corner: [f64; 3],
        u: [f64; 3],
        v: [f64; 3],
    ) -> Result<EntityId, BuildError> {
        self.rect_surface(corner, u, v, true)
    }

    pub(crate) fn rect_surface(
        &mut self,
        corner: [f64; 3],
        u: [f64; 3],
        v: [f64; 3],
        masked: bool,
    ) -> Result<EntityId, BuildError> {
        let cross = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        if cross.iter().map(|c| c * c).sum::<f64>().sqrt() < 1e-12 {
            return Err(BuildError::Degenerate(
                "rectangle edge vectors are parallel or zero".into(),
            ));
        }
        let add = |a: [f64; 3], b: [f64; 3]| [a[0] + b[0], a[1] + b[1], a[2] + b[2]];
        let corners = [corner, add(corner, u), add(add(corner, u), v), add(corner, v)];
        let (surface, _) = self.polygon_surface(&corners, None, masked)?;
        Ok(surface)
    }

    fn polygon_surface(
        &mut self,
        corners: &[[f64; 3]],
        mesh_size: Option<f64>,
        masked: bool,
    ) -> Result<(EntityId, EntityId), BuildError> {
        if corners.len() < 3 {
            return Err(BuildError::Degenerate(
                "polygon needs at least three corners".into(),
            ));
        }
        let points: Vec<EntityId> = corners
            .iter()
            .map(|c| self.add_point(*c, mesh_size, masked))
            .collect::<Result<_, _>>()?;
        let mut edges = Vec::with_capacity(points.len());
        for i in 0..points.len() {
            let next = (i + 1) % points.len();
            edges.push((self.add_line(points[i], points[next])?, true));
        }
        let boundary = self.add_curve_loop(&edges)?;
        let surface = self.add_plane_surface(&[boundary])?;
        Ok((surface, boundary))
    }

    /// Box from 8 corner points in template order: bottom face first
    /// (counter-clockwise seen from below), then the top face directly
    /// above. The 12-edge / 6-loop / 6-face wiring is fixed, not
    /// discovered, so a different corner order silently produces a
    /// degenerate solid.
    pub fn add_box(
        &mut self,
        corners: &[[f64; 3]; 8],
        mesh_size: Option<f64>,
    ) -> Result<EntityId, BuildError> {
        let p: Vec<EntityId> = corners
            .iter()
            .map(|c| self.add_point(*c, mesh_size, true))
            .collect::<Result<_, _>>()?;

        // Edge template: 4 bottom, 4 top, 4 vertical.
        let bottom: Vec<EntityId> = (0..4)
            .map(|i| self.add_line(p[i], p[(i + 1) % 4]))
            .collect::<Result<_, _>>()?;
        let top: Vec<EntityId> = (0..4)
            .map(|i| self.add_line(p[4 + i], p[4 + (i + 1) % 4]))
            .collect::<Result<_, _>>()?;
        let vertical: Vec<EntityId> = (0..4)
            .map(|i| self.add_line(p[i], p[4 + i]))
            .collect::<Result<_, _>>()?;

        let mut faces = Vec::with_capacity(6);
        let bottom_loop = self.add_curve_loop(&[
            (bottom[0], true),
            (bottom[1], true),
            (bottom[2], true),
            (bottom[3], true),
        ])?;
        faces.push(self.add_plane_surface(&[bottom_loop])?);
        let top_loop = self.add_curve_loop(&[
            (top[0], true),
            (top[1], true),
            (top[2], true),
            (top[3], true),
        ])?;
        faces.push(self.add_plane_surface(&[top_loop])?);
        for i in 0..4 {
            let next = (i + 1) % 4;
            let side = self.add_curve_loop(&[
                (bottom[i], true),
                (vertical[next], true),
                (top[i], false),
                (vertical[i], false),
            ])?;
            faces.push(self.add_plane_surface(&[side])?);
        }

        let shell = self.add_surface_loop(&faces)?;
        let volume = self.add_volume(&[shell])?;
        debug!(volume = volume.tag(), "box template built");
        Ok(volume)
    }

    pub fn add_disk(
        &mut self,
        center: [f64; 3],
        rx: f64,
        ry: f64,
    ) -> Result<EntityId, BuildError> {
        Ok(EntityId::Surface(self.kernel.add_disk(center, rx, ry)?))
    }

    pub fn add_sphere(&mut self, center: [f64; 3], radius: f64) -> Result<EntityId, BuildError> {
        Ok(EntityId::Volume(self.kernel.add_sphere(center, radius)?))
    }

    pub fn add_cone(
        &mut self,
        base: [f64; 3],
        axis: [f64; 3],
        base_radius: f64,
        top_radius: f64,
    ) -> Result<EntityId, BuildError> {
        Ok(EntityId::Volume(self.kernel.add_cone(
            base,
            axis,
            base_radius,
            top_radius,
        )?))
    }

    pub fn add_wedge(
        &mut self,
        corner: [f64; 3],
        extents: [f64; 3],
        top_dx: f64,
    ) -> Result<EntityId, BuildError> {
        Ok(EntityId::Volume(self.kernel.add_wedge(corner, extents, top_dx)?))
    }

    pub fn add_cylinder(
        &mut self,
        base: [f64; 3],
        axis: [f64; 3],
        radius: f64,
    ) -> Result<EntityId, BuildError> {
        Ok(EntityId::Volume(self.kernel.add_cylinder(base, axis, radius)?))
    }

    pub fn add_torus(
        &mut self,
        center: [f64; 3],
        major_radius: f64,
        minor_radius: f64,
    ) -> Result<EntityId, BuildError> {
        Ok(EntityId::Volume(self.kernel.add_torus(
            center,
            major_radius,
            minor_radius,
        )?))
    }
}

fn expect_vertex(id: EntityId) -> Result<i32, BuildError> {
    match id {
        EntityId::Vertex(t) => Ok(t),
        other => Err(BuildError::Degenerate(format!(
            "expected a vertex, got {other:?}"
        ))),
    }
}

fn expect_curve(id: EntityId) -> Result<i32, BuildError> {
    match id {
        EntityId::Curve(t) => Ok(t),
        other => Err(BuildError::Degenerate(format!(
            "expected a curve, got {other:?}"
        ))),
    }
}

fn expect_curve_loop(id: EntityId) -> Result<i32, BuildError> {
    match id {
        EntityId::CurveLoop(t) => Ok(t),
        other => Err(BuildError::Degenerate(format!(
            "expected a curve loop, got {other:?}"
        ))),
    }
}

fn expect_surface(id: EntityId) -> Result<i32, BuildError> {
    match id {
        EntityId::Surface(t) => Ok(t),
        other => Err(BuildError::Degenerate(format!(
            "expected a surface, got {other:?}"
        ))),
    }
}

fn expect_surface_loop(id: EntityId) -> Result<i32, BuildError> {
    match id {
        EntityId::SurfaceLoop(t) => Ok(t),
        other => Err(BuildError::Degenerate(format!(
            "expected a surface loop, got {other:?}"
        ))),
    }
}
