//! In-process analytic bookkeeping backend for the kernel boundary.
//!
//! `SessionKernel` tracks every entity as a lightweight analytic record
//! (defining points, topology references, or a bare bounding box for shapes
//! produced by booleans and solid primitives), which is enough to drive the
//! construction engine, its mesh-sizing heuristics and the save/reload
//! round trip. Boolean results carry bounding-box-level geometry only;
//! exact CSG solving belongs to an external kernel behind the same trait.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use nalgebra::{Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{
    BooleanResult, BoundingBox, CurveDistribution, DimTag, KernelError, KernelResult, MeshData,
    OccKernel,
};

/// Tolerance for the planarity check on plane surfaces, scaled by model size.
const PLANAR_TOL: f64 = 1e-6;
/// Segment count used when integrating curved-edge lengths numerically.
const LENGTH_SAMPLES: usize = 16;
/// Hard cap on the segments of a single discretized curve.
const MAX_CURVE_SEGMENTS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointEnt {
    xyz: [f64; 3],
    mesh_size: f64,
    visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum CurveKind {
    Line,
    /// points: [start, center, end]
    CircleArc,
    /// points: [start, center, major, end]
    EllipseArc,
    /// points: interpolation nodes
    Spline,
    /// Full closed ellipse; points: [center, east, north]
    Ellipse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurveEnt {
    kind: CurveKind,
    points: Vec<i32>,
    visible: bool,
}

impl CurveEnt {
    /// Topological endpoints; empty for closed curves.
    fn endpoints(&self) -> Vec<i32> {
        match self.kind {
            CurveKind::Ellipse => Vec::new(),
            CurveKind::CircleArc => vec![self.points[0], self.points[2]],
            CurveKind::EllipseArc => vec![self.points[0], self.points[3]],
            CurveKind::Line | CurveKind::Spline => {
                let first = self.points[0];
                let last = self.points[self.points.len() - 1];
                if first == last {
                    Vec::new()
                } else {
                    vec![first, last]
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SurfaceSource {
    /// Bounded by curve loops; first loop is the outer boundary.
    Planar { loops: Vec<i32> },
    /// Filled from a single (possibly non-planar) curve loop.
    Filled { boundary: i32 },
    /// No explicit sub-topology: boolean result or sweep lateral.
    Free { bbox: BoundingBox },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurfaceEnt {
    source: SurfaceSource,
    visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum VolumeSource {
    Shelled { shells: Vec<i32> },
    Free { bbox: BoundingBox },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeEnt {
    source: VolumeSource,
    visible: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Transfinite {
    nodes: usize,
    distribution: CurveDistribution,
    coef: f64,
}

/// The persisted model state; this is what `write` serializes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Model {
    name: String,
    points: BTreeMap<i32, PointEnt>,
    curves: BTreeMap<i32, CurveEnt>,
    curve_loops: BTreeMap<i32, Vec<i32>>,
    surfaces: BTreeMap<i32, SurfaceEnt>,
    surface_loops: BTreeMap<i32, Vec<i32>>,
    volumes: BTreeMap<i32, VolumeEnt>,
    /// Next free tag per dimension 0..=3.
    next_tag: [i32; 4],
    /// Next free tag for curve loops / surface loops.
    next_loop_tag: [i32; 2],
}

impl Model {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            next_tag: [1; 4],
            next_loop_tag: [1; 2],
            ..Self::default()
        }
    }

    fn alloc(&mut self, dim: usize) -> i32 {
        let tag = self.next_tag[dim];
        self.next_tag[dim] += 1;
        tag
    }

    fn alloc_loop(&mut self, which: usize) -> i32 {
        let tag = self.next_loop_tag[which];
        self.next_loop_tag[which] += 1;
        tag
    }
}

/// One kernel session: a single mutable model plus mesh state and options.
pub struct SessionKernel {
    model: Model,
    options: BTreeMap<String, f64>,
    transfinite: BTreeMap<i32, Transfinite>,
    mesh: MeshData,
    meshed_curves: BTreeSet<i32>,
}

impl SessionKernel {
    pub fn new() -> Self {
        let name = format!("session-{}", Uuid::new_v4());
        Self {
            model: Model::named(&name),
            options: BTreeMap::new(),
            transfinite: BTreeMap::new(),
            mesh: MeshData::default(),
            meshed_curves: BTreeSet::new(),
        }
    }

    fn point(&self, tag: i32) -> KernelResult<&PointEnt> {
        self.model
            .points
            .get(&tag)
            .ok_or(KernelError::UnknownEntity(0, tag))
    }

    fn curve(&self, tag: i32) -> KernelResult<&CurveEnt> {
        self.model
            .curves
            .get(&tag)
            .ok_or(KernelError::UnknownEntity(1, tag))
    }

    fn surface(&self, tag: i32) -> KernelResult<&SurfaceEnt> {
        self.model
            .surfaces
            .get(&tag)
            .ok_or(KernelError::UnknownEntity(2, tag))
    }

    fn volume(&self, tag: i32) -> KernelResult<&VolumeEnt> {
        self.model
            .volumes
            .get(&tag)
            .ok_or(KernelError::UnknownEntity(3, tag))
    }

    fn curve_loop(&self, tag: i32) -> KernelResult<&Vec<i32>> {
        self.model
            .curve_loops
            .get(&tag)
            .ok_or(KernelError::UnknownEntity(1, tag))
    }

    fn surface_loop(&self, tag: i32) -> KernelResult<&Vec<i32>> {
        self.model
            .surface_loops
            .get(&tag)
            .ok_or(KernelError::UnknownEntity(2, tag))
    }

    fn exists(&self, (dim, tag): DimTag) -> bool {
        match dim {
            0 => self.model.points.contains_key(&tag),
            1 => self.model.curves.contains_key(&tag),
            2 => self.model.surfaces.contains_key(&tag),
            3 => self.model.volumes.contains_key(&tag),
            _ => false,
        }
    }

    fn check_exists(&self, dt: DimTag) -> KernelResult<()> {
        if self.exists(dt) {
            Ok(())
        } else {
            Err(KernelError::UnknownEntity(dt.0, dt.1))
        }
    }

    /// Curves referenced by a surface, via its loops.
    fn surface_curves(&self, tag: i32) -> KernelResult<Vec<i32>> {
        let mut out = Vec::new();
        match &self.surface(tag)?.source {
            SurfaceSource::Planar { loops } => {
                for lp in loops {
                    for &c in self.curve_loop(*lp)? {
                        let c = c.abs();
                        if !out.contains(&c) {
                            out.push(c);
                        }
                    }
                }
            }
            SurfaceSource::Filled { boundary } => {
                for &c in self.curve_loop(*boundary)? {
                    let c = c.abs();
                    if !out.contains(&c) {
                        out.push(c);
                    }
                }
            }
            SurfaceSource::Free { .. } => {}
        }
        Ok(out)
    }

    fn volume_surfaces(&self, tag: i32) -> KernelResult<Vec<i32>> {
        let mut out = Vec::new();
        if let VolumeSource::Shelled { shells } = &self.volume(tag)?.source {
            for sl in shells {
                for &s in self.surface_loop(*sl)? {
                    if !out.contains(&s) {
                        out.push(s);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Walk the sub-topology of `dt`, collecting defining point tags and any
    /// Free entities (which carry their own bounding boxes).
    fn collect_closure(
        &self,
        dt: DimTag,
        points: &mut BTreeSet<i32>,
        free: &mut Vec<DimTag>,
    ) -> KernelResult<()> {
        match dt.0 {
            0 => {
                self.check_exists(dt)?;
                points.insert(dt.1);
            }
            1 => {
                for &p in &self.curve(dt.1)?.points {
                    points.insert(p);
                }
            }
            2 => match &self.surface(dt.1)?.source {
                SurfaceSource::Free { .. } => free.push(dt),
                _ => {
                    for c in self.surface_curves(dt.1)? {
                        self.collect_closure((1, c), points, free)?;
                    }
                }
            },
            3 => match &self.volume(dt.1)?.source {
                VolumeSource::Free { .. } => free.push(dt),
                VolumeSource::Shelled { .. } => {
                    for s in self.volume_surfaces(dt.1)? {
                        self.collect_closure((2, s), points, free)?;
                    }
                }
            },
            d => return Err(KernelError::UnknownEntity(d, dt.1)),
        }
        Ok(())
    }

    fn entity_bbox(&self, dt: DimTag) -> KernelResult<BoundingBox> {
        if let (2, t) = dt {
            if let SurfaceSource::Free { bbox } = self.surface(t)?.source {
                return Ok(bbox);
            }
        }
        if let (3, t) = dt {
            if let VolumeSource::Free { bbox } = self.volume(t)?.source {
                return Ok(bbox);
            }
        }
        let mut points = BTreeSet::new();
        let mut free = Vec::new();
        self.collect_closure(dt, &mut points, &mut free)?;
        let mut bb = BoundingBox::empty();
        for p in points {
            bb.expand(self.point(p)?.xyz);
        }
        for f in free {
            bb = bb.union(&self.entity_bbox(f)?);
        }
        if bb.is_empty() {
            return Err(KernelError::InvalidGeometry(format!(
                "entity ({}, {}) has no extent",
                dt.0, dt.1
            )));
        }
        Ok(bb)
    }

    /// Apply an affine point map to the given entities (and their closure).
    /// Each underlying point is transformed exactly once even when shared.
    fn apply_affine<F>(&mut self, entities: &[DimTag], f: F) -> KernelResult<()>
    where
        F: Fn([f64; 3]) -> [f64; 3],
    {
        let mut points = BTreeSet::new();
        let mut free = Vec::new();
        for &dt in entities {
            self.check_exists(dt)?;
            self.collect_closure(dt, &mut points, &mut free)?;
        }
        for tag in points {
            if let Some(p) = self.model.points.get_mut(&tag) {
                p.xyz = f(p.xyz);
            }
        }
        for (dim, tag) in free {
            let old = match dim {
                2 => match &self.model.surfaces[&tag].source {
                    SurfaceSource::Free { bbox } => *bbox,
                    _ => continue,
                },
                3 => match &self.model.volumes[&tag].source {
                    VolumeSource::Free { bbox } => *bbox,
                    _ => continue,
                },
                _ => continue,
            };
            let bbox = BoundingBox::from_points(old.corners().map(&f).iter());
            match dim {
                2 => {
                    if let Some(s) = self.model.surfaces.get_mut(&tag) {
                        s.source = SurfaceSource::Free { bbox };
                    }
                }
                3 => {
                    if let Some(v) = self.model.volumes.get_mut(&tag) {
                        v.source = VolumeSource::Free { bbox };
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn sample_curve(&self, tag: i32, t: f64) -> KernelResult<[f64; 3]> {
        let curve = self.curve(tag)?;
        let coords: Vec<[f64; 3]> = curve
            .points
            .iter()
            .map(|p| self.point(*p).map(|e| e.xyz))
            .collect::<KernelResult<_>>()?;
        let v = |p: [f64; 3]| Vector3::new(p[0], p[1], p[2]);
        let out = match curve.kind {
            CurveKind::Line => {
                let (a, b) = (v(coords[0]), v(coords[1]));
                a + (b - a) * t
            }
            CurveKind::Spline => {
                // Piecewise-linear interpolation through the nodes.
                let segs = coords.len() - 1;
                let s = (t * segs as f64).clamp(0.0, segs as f64);
                let i = (s.floor() as usize).min(segs - 1);
                let local = s - i as f64;
                let (a, b) = (v(coords[i]), v(coords[i + 1]));
                a + (b - a) * local
            }
            CurveKind::CircleArc | CurveKind::EllipseArc => {
                let (start, center, end) = match curve.kind {
                    CurveKind::CircleArc => (v(coords[0]), v(coords[1]), v(coords[2])),
                    _ => (v(coords[0]), v(coords[1]), v(coords[3])),
                };
                let u = start - center;
                let w = end - center;
                let cross = u.cross(&w);
                let angle = cross.norm().atan2(u.dot(&w));
                let axis = if cross.norm() > 1e-12 {
                    Unit::new_normalize(cross)
                } else {
                    // Degenerate half-turn: any axis perpendicular to u.
                    Unit::new_normalize(perpendicular(&u))
                };
                let rot = Rotation3::from_axis_angle(&axis, angle * t);
                // Radius blends between the two endpoint radii so elliptic
                // arcs stay close to their true extent.
                let scale = 1.0 + (w.norm() / u.norm().max(1e-300) - 1.0) * t;
                center + rot * u * scale
            }
            CurveKind::Ellipse => {
                let (c, e, n) = (v(coords[0]), v(coords[1]), v(coords[2]));
                let phi = t * std::f64::consts::TAU;
                c + (e - c) * phi.cos() + (n - c) * phi.sin()
            }
        };
        Ok([out.x, out.y, out.z])
    }

    fn length_of(&self, tag: i32) -> KernelResult<f64> {
        let curve = self.curve(tag)?;
        match curve.kind {
            CurveKind::Line => {
                let a = self.point(curve.points[0])?.xyz;
                let b = self.point(curve.points[1])?.xyz;
                Ok(dist(a, b))
            }
            CurveKind::Spline => {
                let mut len = 0.0;
                for pair in curve.points.windows(2) {
                    len += dist(self.point(pair[0])?.xyz, self.point(pair[1])?.xyz);
                }
                Ok(len)
            }
            _ => {
                let mut len = 0.0;
                let mut prev = self.sample_curve(tag, 0.0)?;
                for i in 1..=LENGTH_SAMPLES {
                    let next = self.sample_curve(tag, i as f64 / LENGTH_SAMPLES as f64)?;
                    len += dist(prev, next);
                    prev = next;
                }
                Ok(len)
            }
        }
    }

    /// Points of the loops of a planar surface, for the planarity check.
    fn loop_points(&self, loops: &[i32]) -> KernelResult<Vec<[f64; 3]>> {
        let mut out = Vec::new();
        for lp in loops {
            for &c in self.curve_loop(*lp)? {
                for &p in &self.curve(c.abs())?.points {
                    out.push(self.point(p)?.xyz);
                }
            }
        }
        Ok(out)
    }

    fn check_planar(&self, loops: &[i32]) -> KernelResult<()> {
        let pts = self.loop_points(loops)?;
        if pts.len() < 3 {
            return Err(KernelError::InvalidGeometry(
                "surface loop has fewer than three points".into(),
            ));
        }
        let v = |p: [f64; 3]| Vector3::new(p[0], p[1], p[2]);
        let origin = v(pts[0]);
        // First pair of non-collinear edges defines the candidate plane.
        let mut normal = None;
        for i in 1..pts.len() {
            for j in (i + 1)..pts.len() {
                let n = (v(pts[i]) - origin).cross(&(v(pts[j]) - origin));
                if n.norm() > 1e-12 {
                    normal = Some(n.normalize());
                    break;
                }
            }
            if normal.is_some() {
                break;
            }
        }
        let normal = normal.ok_or_else(|| {
            KernelError::InvalidGeometry("surface loop points are collinear".into())
        })?;
        let scale = BoundingBox::from_points(pts.iter()).diagonal().max(1.0);
        for p in &pts {
            if normal.dot(&(v(*p) - origin)).abs() > PLANAR_TOL * scale {
                return Err(KernelError::InvalidGeometry(
                    "surface loop is not planar".into(),
                ));
            }
        }
        Ok(())
    }

    fn new_free_entity(&mut self, dim: i32, bbox: BoundingBox) -> DimTag {
        match dim {
            2 => {
                let tag = self.model.alloc(2);
                self.model.surfaces.insert(
                    tag,
                    SurfaceEnt {
                        source: SurfaceSource::Free { bbox },
                        visible: true,
                    },
                );
                (2, tag)
            }
            _ => {
                let tag = self.model.alloc(3);
                self.model.volumes.insert(
                    tag,
                    VolumeEnt {
                        source: VolumeSource::Free { bbox },
                        visible: true,
                    },
                );
                (3, tag)
            }
        }
    }

    /// Shared boolean bookkeeping. Result extents are bounding-box level:
    /// fuse unions, intersect intersects, cut keeps each object's extent
    /// unless a tool swallows it whole, fragment keeps one piece per input.
    fn boolean(
        &mut self,
        op: BooleanOp,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult> {
        if objects.is_empty() {
            return Err(KernelError::InvalidGeometry(
                "boolean operation without object operands".into(),
            ));
        }
        let object_boxes: Vec<BoundingBox> = objects
            .iter()
            .map(|&dt| self.entity_bbox(dt))
            .collect::<KernelResult<_>>()?;
        let tool_boxes: Vec<BoundingBox> = tools
            .iter()
            .map(|&dt| self.entity_bbox(dt))
            .collect::<KernelResult<_>>()?;
        let max_dim = objects
            .iter()
            .chain(tools)
            .map(|dt| dt.0)
            .max()
            .unwrap_or(0);
        if max_dim < 2 {
            return Err(KernelError::InvalidGeometry(
                "boolean operands must be surfaces or volumes".into(),
            ));
        }

        let mut result = BooleanResult::default();
        match op {
            BooleanOp::Fuse => {
                let bbox = object_boxes
                    .iter()
                    .chain(&tool_boxes)
                    .fold(BoundingBox::empty(), |acc, b| acc.union(b));
                let out = self.new_free_entity(max_dim, bbox);
                result.entities.push(out);
                result.mapping = vec![vec![out]; objects.len() + tools.len()];
            }
            BooleanOp::Intersect => {
                let obj_union = object_boxes
                    .iter()
                    .fold(BoundingBox::empty(), |acc, b| acc.union(b));
                let tool_union = tool_boxes
                    .iter()
                    .fold(BoundingBox::empty(), |acc, b| acc.union(b));
                match obj_union.intersection(&tool_union) {
                    Some(bbox) => {
                        let out = self.new_free_entity(max_dim, bbox);
                        result.entities.push(out);
                        result.mapping = vec![vec![out]; objects.len() + tools.len()];
                    }
                    None => {
                        result.mapping = vec![Vec::new(); objects.len() + tools.len()];
                    }
                }
            }
            BooleanOp::Cut => {
                let mut mapping = Vec::new();
                for (dt, bbox) in objects.iter().zip(&object_boxes) {
                    // A tool with the exact same extent is treated as a
                    // partial overlap, not a swallow; extent equality says
                    // nothing about the interiors at this fidelity.
                    let swallowed = tool_boxes
                        .iter()
                        .any(|t| contains(t, bbox) && t != bbox);
                    if swallowed {
                        mapping.push(Vec::new());
                        continue;
                    }
                    let out = self.new_free_entity(dt.0, *bbox);
                    result.entities.push(out);
                    mapping.push(vec![out]);
                }
                mapping.extend(std::iter::repeat(Vec::new()).take(tools.len()));
                result.mapping = mapping;
            }
            BooleanOp::Fragment => {
                for (dt, bbox) in objects.iter().chain(tools).zip(
                    object_boxes.iter().chain(&tool_boxes),
                ) {
                    let out = self.new_free_entity(dt.0, *bbox);
                    result.entities.push(out);
                    result.mapping.push(vec![out]);
                }
            }
        }

        if remove_object {
            self.remove(objects, true)?;
        }
        if remove_tool {
            self.remove(tools, true)?;
        }
        debug!(
            op = ?op,
            objects = objects.len(),
            tools = tools.len(),
            results = result.entities.len(),
            "boolean operation"
        );
        Ok(result)
    }

    /// Entities not referenced by any higher entity or loop.
    fn top_level(&self, highest_dim_only: bool) -> Vec<DimTag> {
        let mut referenced: BTreeSet<DimTag> = BTreeSet::new();
        for curve in self.model.curves.values() {
            for &p in &curve.points {
                referenced.insert((0, p));
            }
        }
        for tag in self.model.surfaces.keys() {
            if let Ok(curves) = self.surface_curves(*tag) {
                for c in curves {
                    referenced.insert((1, c));
                }
            }
        }
        for tag in self.model.volumes.keys() {
            if let Ok(surfaces) = self.volume_surfaces(*tag) {
                for s in surfaces {
                    referenced.insert((2, s));
                }
            }
        }
        let mut tops: Vec<DimTag> = Vec::new();
        for (&tag, _) in &self.model.volumes {
            tops.push((3, tag));
        }
        for (&tag, _) in &self.model.surfaces {
            if !referenced.contains(&(2, tag)) {
                tops.push((2, tag));
            }
        }
        for (&tag, _) in &self.model.curves {
            if !referenced.contains(&(1, tag)) {
                tops.push((1, tag));
            }
        }
        for (&tag, _) in &self.model.points {
            if !referenced.contains(&(0, tag)) {
                tops.push((0, tag));
            }
        }
        if highest_dim_only {
            if let Some(max_dim) = tops.iter().map(|dt| dt.0).max() {
                tops.retain(|dt| dt.0 == max_dim);
            }
        }
        tops.sort();
        tops
    }

    fn distribution_params(n_nodes: usize, distribution: CurveDistribution, coef: f64) -> Vec<f64> {
        let segs = n_nodes.saturating_sub(1).max(1);
        match distribution {
            CurveDistribution::Progression => {
                let r = if coef > 0.0 { coef } else { 1.0 };
                let mut widths = Vec::with_capacity(segs);
                let mut w = 1.0;
                for _ in 0..segs {
                    widths.push(w);
                    w *= r;
                }
                normalize_to_params(&widths)
            }
            CurveDistribution::Bump => {
                // Narrow segments at both ends, widest in the middle.
                let c = coef.clamp(1e-3, 1.0);
                let widths: Vec<f64> = (0..segs)
                    .map(|i| {
                        let x = (i as f64 + 0.5) / segs as f64;
                        c + (1.0 - c) * (std::f64::consts::PI * x).sin()
                    })
                    .collect();
                normalize_to_params(&widths)
            }
        }
    }
}

impl Default for SessionKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum BooleanOp {
    Fuse,
    Intersect,
    Cut,
    Fragment,
}

fn dist(a: [f64; 3], b: [f64; 3]) -> f64 {
    (0..3).map(|i| (a[i] - b[i]).powi(2)).sum::<f64>().sqrt()
}

/// `outer` contains `inner` entirely (closed containment).
fn contains(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    (0..3).all(|i| outer.min[i] <= inner.min[i] && outer.max[i] >= inner.max[i])
}

/// Any unit vector perpendicular to `v`.
fn perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let candidate = if v.x.abs() < v.y.abs().max(v.z.abs()) {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&candidate)
}

fn normalize_to_params(widths: &[f64]) -> Vec<f64> {
    let total: f64 = widths.iter().sum();
    let mut params = Vec::with_capacity(widths.len() + 1);
    let mut acc = 0.0;
    params.push(0.0);
    for w in widths {
        acc += w / total;
        params.push(acc.min(1.0));
    }
    if let Some(last) = params.last_mut() {
        *last = 1.0;
    }
    params
}

impl OccKernel for SessionKernel {
    fn clear(&mut self) -> KernelResult<()> {
        let name = self.model.name.clone();
        self.model = Model::named(&name);
        self.transfinite.clear();
        self.mesh = MeshData::default();
        self.meshed_curves.clear();
        Ok(())
    }

    fn new_model(&mut self, name: &str) -> KernelResult<()> {
        self.model = Model::named(name);
        self.transfinite.clear();
        self.mesh = MeshData::default();
        self.meshed_curves.clear();
        debug!(model = name, "new model");
        Ok(())
    }

    fn synchronize(&mut self) -> KernelResult<()> {
        // Construction is committed eagerly; synchronization is a fence for
        // callers that depend on the committed-geometry contract.
        Ok(())
    }

    fn add_point(&mut self, xyz: [f64; 3], mesh_size: f64) -> KernelResult<i32> {
        let tag = self.model.alloc(0);
        self.model.points.insert(
            tag,
            PointEnt {
                xyz,
                mesh_size,
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_line(&mut self, start: i32, end: i32) -> KernelResult<i32> {
        self.point(start)?;
        self.point(end)?;
        if start == end {
            return Err(KernelError::InvalidGeometry(
                "line endpoints coincide".into(),
            ));
        }
        let tag = self.model.alloc(1);
        self.model.curves.insert(
            tag,
            CurveEnt {
                kind: CurveKind::Line,
                points: vec![start, end],
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_circle_arc(&mut self, start: i32, center: i32, end: i32) -> KernelResult<i32> {
        for p in [start, center, end] {
            self.point(p)?;
        }
        let tag = self.model.alloc(1);
        self.model.curves.insert(
            tag,
            CurveEnt {
                kind: CurveKind::CircleArc,
                points: vec![start, center, end],
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_ellipse_arc(
        &mut self,
        start: i32,
        center: i32,
        major: i32,
        end: i32,
    ) -> KernelResult<i32> {
        for p in [start, center, major, end] {
            self.point(p)?;
        }
        let tag = self.model.alloc(1);
        self.model.curves.insert(
            tag,
            CurveEnt {
                kind: CurveKind::EllipseArc,
                points: vec![start, center, major, end],
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_spline(&mut self, through: &[i32]) -> KernelResult<i32> {
        if through.len() < 2 {
            return Err(KernelError::InvalidGeometry(
                "spline needs at least two points".into(),
            ));
        }
        for p in through {
            self.point(*p)?;
        }
        let tag = self.model.alloc(1);
        self.model.curves.insert(
            tag,
            CurveEnt {
                kind: CurveKind::Spline,
                points: through.to_vec(),
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_curve_loop(&mut self, curves: &[i32]) -> KernelResult<i32> {
        if curves.is_empty() {
            return Err(KernelError::InvalidGeometry("empty curve loop".into()));
        }
        for c in curves {
            self.curve(c.abs())?;
        }
        let tag = self.model.alloc_loop(0);
        self.model.curve_loops.insert(tag, curves.to_vec());
        Ok(tag)
    }

    fn add_plane_surface(&mut self, loops: &[i32]) -> KernelResult<i32> {
        if loops.is_empty() {
            return Err(KernelError::InvalidGeometry(
                "plane surface needs a boundary loop".into(),
            ));
        }
        self.check_planar(loops)?;
        let tag = self.model.alloc(2);
        self.model.surfaces.insert(
            tag,
            SurfaceEnt {
                source: SurfaceSource::Planar {
                    loops: loops.to_vec(),
                },
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_surface_filling(&mut self, boundary: i32) -> KernelResult<i32> {
        self.curve_loop(boundary)?;
        let tag = self.model.alloc(2);
        self.model.surfaces.insert(
            tag,
            SurfaceEnt {
                source: SurfaceSource::Filled { boundary },
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_surface_loop(&mut self, surfaces: &[i32]) -> KernelResult<i32> {
        if surfaces.is_empty() {
            return Err(KernelError::InvalidGeometry("empty surface loop".into()));
        }
        for s in surfaces {
            self.surface(s.abs())?;
        }
        let tag = self.model.alloc_loop(1);
        self.model
            .surface_loops
            .insert(tag, surfaces.iter().map(|s| s.abs()).collect());
        Ok(tag)
    }

    fn add_volume(&mut self, shells: &[i32]) -> KernelResult<i32> {
        if shells.is_empty() {
            return Err(KernelError::InvalidGeometry(
                "volume needs a bounding shell".into(),
            ));
        }
        for s in shells {
            self.surface_loop(*s)?;
        }
        let tag = self.model.alloc(3);
        self.model.volumes.insert(
            tag,
            VolumeEnt {
                source: VolumeSource::Shelled {
                    shells: shells.to_vec(),
                },
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_disk(&mut self, center: [f64; 3], rx: f64, ry: f64) -> KernelResult<i32> {
        if rx <= 0.0 || ry <= 0.0 {
            return Err(KernelError::InvalidGeometry(
                "disk radii must be positive".into(),
            ));
        }
        let c = self.add_point(center, 0.0)?;
        let e = self.add_point([center[0] + rx, center[1], center[2]], 0.0)?;
        let n = self.add_point([center[0], center[1] + ry, center[2]], 0.0)?;
        let curve = self.model.alloc(1);
        self.model.curves.insert(
            curve,
            CurveEnt {
                kind: CurveKind::Ellipse,
                points: vec![c, e, n],
                visible: true,
            },
        );
        let lp = self.model.alloc_loop(0);
        self.model.curve_loops.insert(lp, vec![curve]);
        let tag = self.model.alloc(2);
        self.model.surfaces.insert(
            tag,
            SurfaceEnt {
                source: SurfaceSource::Planar { loops: vec![lp] },
                visible: true,
            },
        );
        Ok(tag)
    }

    fn add_sphere(&mut self, center: [f64; 3], radius: f64) -> KernelResult<i32> {
        if radius <= 0.0 {
            return Err(KernelError::InvalidGeometry(
                "sphere radius must be positive".into(),
            ));
        }
        let bbox = BoundingBox {
            min: [center[0] - radius, center[1] - radius, center[2] - radius],
            max: [center[0] + radius, center[1] + radius, center[2] + radius],
        };
        Ok(self.new_free_entity(3, bbox).1)
    }

    fn add_cone(
        &mut self,
        base: [f64; 3],
        axis: [f64; 3],
        base_radius: f64,
        top_radius: f64,
    ) -> KernelResult<i32> {
        if base_radius <= 0.0 && top_radius <= 0.0 {
            return Err(KernelError::InvalidGeometry(
                "cone needs a positive radius".into(),
            ));
        }
        let r = base_radius.max(top_radius);
        let top = [base[0] + axis[0], base[1] + axis[1], base[2] + axis[2]];
        let mut bbox = BoundingBox::empty();
        for c in [base, top] {
            bbox.expand([c[0] - r, c[1] - r, c[2] - r]);
            bbox.expand([c[0] + r, c[1] + r, c[2] + r]);
        }
        Ok(self.new_free_entity(3, bbox).1)
    }

    fn add_wedge(
        &mut self,
        corner: [f64; 3],
        extents: [f64; 3],
        _top_dx: f64,
    ) -> KernelResult<i32> {
        let mut bbox = BoundingBox::from_point(corner);
        bbox.expand([
            corner[0] + extents[0],
            corner[1] + extents[1],
            corner[2] + extents[2],
        ]);
        Ok(self.new_free_entity(3, bbox).1)
    }

    fn add_cylinder(&mut self, base: [f64; 3], axis: [f64; 3], radius: f64) -> KernelResult<i32> {
        if radius <= 0.0 {
            return Err(KernelError::InvalidGeometry(
                "cylinder radius must be positive".into(),
            ));
        }
        let top = [base[0] + axis[0], base[1] + axis[1], base[2] + axis[2]];
        let mut bbox = BoundingBox::empty();
        for c in [base, top] {
            bbox.expand([c[0] - radius, c[1] - radius, c[2] - radius]);
            bbox.expand([c[0] + radius, c[1] + radius, c[2] + radius]);
        }
        Ok(self.new_free_entity(3, bbox).1)
    }

    fn add_torus(
        &mut self,
        center: [f64; 3],
        major_radius: f64,
        minor_radius: f64,
    ) -> KernelResult<i32> {
        if major_radius <= 0.0 || minor_radius <= 0.0 {
            return Err(KernelError::InvalidGeometry(
                "torus radii must be positive".into(),
            ));
        }
        let r = major_radius + minor_radius;
        let bbox = BoundingBox {
            min: [center[0] - r, center[1] - r, center[2] - minor_radius],
            max: [center[0] + r, center[1] + r, center[2] + minor_radius],
        };
        Ok(self.new_free_entity(3, bbox).1)
    }

    fn fuse(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult> {
        self.boolean(BooleanOp::Fuse, objects, tools, remove_object, remove_tool)
    }

    fn intersect(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult> {
        self.boolean(
            BooleanOp::Intersect,
            objects,
            tools,
            remove_object,
            remove_tool,
        )
    }

    fn cut(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult> {
        self.boolean(BooleanOp::Cut, objects, tools, remove_object, remove_tool)
    }

    fn fragment(
        &mut self,
        objects: &[DimTag],
        tools: &[DimTag],
        remove_object: bool,
        remove_tool: bool,
    ) -> KernelResult<BooleanResult> {
        self.boolean(
            BooleanOp::Fragment,
            objects,
            tools,
            remove_object,
            remove_tool,
        )
    }

    fn remove_duplicates(&mut self) -> KernelResult<()> {
        // Free entities produced by booleans are merged when their extents
        // coincide; topology-backed entities are left alone.
        let mut seen: BTreeMap<[i64; 6], i32> = BTreeMap::new();
        let mut drop_tags = Vec::new();
        for (&tag, vol) in &self.model.volumes {
            if let VolumeSource::Free { bbox } = &vol.source {
                let sig = bbox.signature();
                if seen.contains_key(&sig) {
                    drop_tags.push(tag);
                } else {
                    seen.insert(sig, tag);
                }
            }
        }
        for tag in drop_tags {
            self.model.volumes.remove(&tag);
        }
        let mut seen: BTreeMap<[i64; 6], i32> = BTreeMap::new();
        let mut drop_tags = Vec::new();
        for (&tag, surf) in &self.model.surfaces {
            if let SurfaceSource::Free { bbox } = &surf.source {
                let sig = bbox.signature();
                if seen.contains_key(&sig) {
                    drop_tags.push(tag);
                } else {
                    seen.insert(sig, tag);
                }
            }
        }
        for tag in drop_tags {
            self.model.surfaces.remove(&tag);
        }
        Ok(())
    }

    fn translate(&mut self, entities: &[DimTag], offset: [f64; 3]) -> KernelResult<()> {
        self.apply_affine(entities, |p| {
            [p[0] + offset[0], p[1] + offset[1], p[2] + offset[2]]
        })
    }

    fn rotate(
        &mut self,
        entities: &[DimTag],
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    ) -> KernelResult<()> {
        let axis_v = Vector3::new(axis[0], axis[1], axis[2]);
        if axis_v.norm() < 1e-12 {
            return Err(KernelError::InvalidGeometry(
                "rotation axis is zero".into(),
            ));
        }
        let rot = Rotation3::from_axis_angle(&Unit::new_normalize(axis_v), angle);
        let o = Vector3::new(origin[0], origin[1], origin[2]);
        self.apply_affine(entities, move |p| {
            let q = o + rot * (Vector3::new(p[0], p[1], p[2]) - o);
            [q.x, q.y, q.z]
        })
    }

    fn dilate(
        &mut self,
        entities: &[DimTag],
        center: [f64; 3],
        factors: [f64; 3],
    ) -> KernelResult<()> {
        self.apply_affine(entities, move |p| {
            [
                center[0] + factors[0] * (p[0] - center[0]),
                center[1] + factors[1] * (p[1] - center[1]),
                center[2] + factors[2] * (p[2] - center[2]),
            ]
        })
    }

    fn symmetrize(&mut self, entities: &[DimTag], plane: [f64; 4]) -> KernelResult<()> {
        let n = Vector3::new(plane[0], plane[1], plane[2]);
        let nn = n.dot(&n);
        if nn < 1e-24 {
            return Err(KernelError::InvalidGeometry(
                "mirror plane normal is zero".into(),
            ));
        }
        self.apply_affine(entities, move |p| {
            let pv = Vector3::new(p[0], p[1], p[2]);
            let s = 2.0 * (n.dot(&pv) + plane[3]) / nn;
            let q = pv - n * s;
            [q.x, q.y, q.z]
        })
    }

    fn copy(&mut self, entities: &[DimTag]) -> KernelResult<Vec<DimTag>> {
        // Deep copy with memoized tag remapping so shared sub-topology is
        // duplicated exactly once.
        let mut memo: BTreeMap<(u8, i32), i32> = BTreeMap::new();
        let mut out = Vec::with_capacity(entities.len());
        for &dt in entities {
            self.check_exists(dt)?;
            let tag = self.copy_entity(dt, &mut memo)?;
            out.push((dt.0, tag));
        }
        Ok(out)
    }

    fn remove(&mut self, entities: &[DimTag], recursive: bool) -> KernelResult<()> {
        for &(dim, tag) in entities {
            if !self.exists((dim, tag)) {
                continue;
            }
            match dim {
                0 => self.remove_point(tag),
                1 => self.remove_curve(tag),
                2 => self.remove_surface(tag, recursive),
                3 => self.remove_volume(tag, recursive),
                d => return Err(KernelError::UnknownEntity(d, tag)),
            }
        }
        Ok(())
    }

    fn extrude(&mut self, entity: DimTag, offset: [f64; 3]) -> KernelResult<Vec<DimTag>> {
        self.check_exists(entity)?;
        if entity.0 >= 3 {
            return Err(KernelError::InvalidGeometry(
                "cannot extrude a volume".into(),
            ));
        }
        let copies = self.copy(&[entity])?;
        self.translate(&copies, offset)?;
        let top = copies[0];
        if entity.0 == 0 {
            // A point sweeps into a real line, not a free-form body.
            let line = self.add_line(entity.1, top.1)?;
            return Ok(vec![top, (1, line)]);
        }
        let base_bbox = self.entity_bbox(entity)?;
        let top_bbox = self.entity_bbox(top)?;
        let swept = self.new_free_entity(entity.0 + 1, base_bbox.union(&top_bbox));
        Ok(vec![top, swept])
    }

    fn revolve(
        &mut self,
        entity: DimTag,
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    ) -> KernelResult<Vec<DimTag>> {
        self.check_exists(entity)?;
        if entity.0 >= 3 {
            return Err(KernelError::InvalidGeometry(
                "cannot revolve a volume".into(),
            ));
        }
        let copies = self.copy(&[entity])?;
        self.rotate(&copies, origin, axis, angle)?;
        let top = copies[0];
        if entity.0 == 0 {
            // A revolved point becomes an arc about its projection onto
            // the axis.
            let p = Vector3::from(self.point(entity.1)?.xyz);
            let o = Vector3::from(origin);
            let a = Vector3::new(axis[0], axis[1], axis[2]).normalize();
            let foot = o + a * (p - o).dot(&a);
            let center = self.add_point([foot.x, foot.y, foot.z], 0.0)?;
            let arc = self.add_circle_arc(entity.1, center, top.1)?;
            return Ok(vec![top, (1, arc)]);
        }
        // The swept extent is approximated by the hull of a few stations
        // along the rotation.
        let mut bbox = self.entity_bbox(entity)?.union(&self.entity_bbox(top)?);
        for station in [0.25, 0.5, 0.75] {
            let mid = self.copy(&[entity])?;
            self.rotate(&mid, origin, axis, angle * station)?;
            bbox = bbox.union(&self.entity_bbox(mid[0])?);
            self.remove(&mid, true)?;
        }
        let swept = self.new_free_entity(entity.0 + 1, bbox);
        Ok(vec![top, swept])
    }

    fn sweep(&mut self, entity: DimTag, path: i32) -> KernelResult<Vec<DimTag>> {
        self.check_exists(entity)?;
        self.curve(path)?;
        if entity.0 >= 3 {
            return Err(KernelError::InvalidGeometry("cannot sweep a volume".into()));
        }
        let start = self.sample_curve(path, 0.0)?;
        let end = self.sample_curve(path, 1.0)?;
        let offset = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
        let copies = self.copy(&[entity])?;
        self.translate(&copies, offset)?;
        let top = copies[0];
        if entity.0 == 0 {
            let line = self.add_line(entity.1, top.1)?;
            return Ok(vec![top, (1, line)]);
        }
        let mut bbox = self.entity_bbox(entity)?.union(&self.entity_bbox(top)?);
        // Widen by intermediate path stations so curved paths stay inside.
        let base = self.entity_bbox(entity)?;
        for i in 1..LENGTH_SAMPLES {
            let s = self.sample_curve(path, i as f64 / LENGTH_SAMPLES as f64)?;
            let d = [s[0] - start[0], s[1] - start[1], s[2] - start[2]];
            bbox.expand([base.min[0] + d[0], base.min[1] + d[1], base.min[2] + d[2]]);
            bbox.expand([base.max[0] + d[0], base.max[1] + d[1], base.max[2] + d[2]]);
        }
        let swept = self.new_free_entity(entity.0 + 1, bbox);
        Ok(vec![top, swept])
    }

    fn entities(&self, dim: Option<i32>) -> KernelResult<Vec<DimTag>> {
        let mut out = Vec::new();
        let want = |d: i32| dim.is_none() || dim == Some(d);
        if want(0) {
            out.extend(self.model.points.keys().map(|&t| (0, t)));
        }
        if want(1) {
            out.extend(self.model.curves.keys().map(|&t| (1, t)));
        }
        if want(2) {
            out.extend(self.model.surfaces.keys().map(|&t| (2, t)));
        }
        if want(3) {
            out.extend(self.model.volumes.keys().map(|&t| (3, t)));
        }
        Ok(out)
    }

    fn boundary(&self, entities: &[DimTag]) -> KernelResult<Vec<DimTag>> {
        let mut out: Vec<DimTag> = Vec::new();
        let mut push = |dt: DimTag| {
            if !out.contains(&dt) {
                out.push(dt);
            }
        };
        for &(dim, tag) in entities {
            match dim {
                0 => {
                    self.point(tag)?;
                }
                1 => {
                    for p in self.curve(tag)?.endpoints() {
                        push((0, p));
                    }
                }
                2 => {
                    for c in self.surface_curves(tag)? {
                        push((1, c));
                    }
                }
                3 => {
                    for s in self.volume_surfaces(tag)? {
                        push((2, s));
                    }
                }
                d => return Err(KernelError::UnknownEntity(d, tag)),
            }
        }
        Ok(out)
    }

    fn bounding_box(&self, entity: Option<DimTag>) -> KernelResult<BoundingBox> {
        match entity {
            Some(dt) => {
                self.check_exists(dt)?;
                self.entity_bbox(dt)
            }
            None => {
                let mut bb = BoundingBox::empty();
                for p in self.model.points.values() {
                    bb.expand(p.xyz);
                }
                for s in self.model.surfaces.values() {
                    if let SurfaceSource::Free { bbox } = &s.source {
                        bb = bb.union(bbox);
                    }
                }
                for v in self.model.volumes.values() {
                    if let VolumeSource::Free { bbox } = &v.source {
                        bb = bb.union(bbox);
                    }
                }
                Ok(bb)
            }
        }
    }

    fn point_coords(&self, tag: i32) -> KernelResult<[f64; 3]> {
        Ok(self.point(tag)?.xyz)
    }

    fn curve_length(&self, tag: i32) -> KernelResult<f64> {
        self.length_of(tag)
    }

    fn set_option(&mut self, name: &str, value: f64) -> KernelResult<()> {
        self.options.insert(name.to_string(), value);
        Ok(())
    }

    fn get_option(&self, name: &str) -> f64 {
        self.options.get(name).copied().unwrap_or(0.0)
    }

    fn set_mesh_size(&mut self, points: &[DimTag], size: f64) -> KernelResult<()> {
        for &(dim, tag) in points {
            if dim != 0 {
                return Err(KernelError::InvalidGeometry(format!(
                    "mesh size targets points, got dimension {dim}"
                )));
            }
            self.model
                .points
                .get_mut(&tag)
                .ok_or(KernelError::UnknownEntity(0, tag))?
                .mesh_size = size;
        }
        Ok(())
    }

    fn set_transfinite_curve(
        &mut self,
        curve: i32,
        node_count: usize,
        distribution: CurveDistribution,
        coef: f64,
    ) -> KernelResult<()> {
        self.curve(curve)?;
        self.transfinite.insert(
            curve,
            Transfinite {
                nodes: node_count.max(2),
                distribution,
                coef,
            },
        );
        Ok(())
    }

    fn set_visibility(
        &mut self,
        entities: &[DimTag],
        visible: bool,
        recursive: bool,
    ) -> KernelResult<()> {
        let mut targets: Vec<DimTag> = entities.to_vec();
        if recursive {
            let mut points = BTreeSet::new();
            let mut free = Vec::new();
            for &dt in entities {
                self.check_exists(dt)?;
                self.collect_closure(dt, &mut points, &mut free)?;
                if dt.0 >= 2 {
                    if let Ok(curves) = self.surface_curves(dt.1) {
                        targets.extend(curves.into_iter().map(|c| (1, c)));
                    }
                }
                if dt.0 == 3 {
                    for s in self.volume_surfaces(dt.1)? {
                        targets.push((2, s));
                        for c in self.surface_curves(s)? {
                            targets.push((1, c));
                        }
                    }
                }
            }
            targets.extend(points.into_iter().map(|p| (0, p)));
        }
        for (dim, tag) in targets {
            match dim {
                0 => {
                    if let Some(p) = self.model.points.get_mut(&tag) {
                        p.visible = visible;
                    }
                }
                1 => {
                    if let Some(c) = self.model.curves.get_mut(&tag) {
                        c.visible = visible;
                    }
                }
                2 => {
                    if let Some(s) = self.model.surfaces.get_mut(&tag) {
                        s.visible = visible;
                    }
                }
                3 => {
                    if let Some(v) = self.model.volumes.get_mut(&tag) {
                        v.visible = visible;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn clear_mesh(&mut self) -> KernelResult<()> {
        self.mesh = MeshData::default();
        self.meshed_curves.clear();
        Ok(())
    }

    fn generate(&mut self, dim: i32) -> KernelResult<()> {
        if dim != 1 {
            // Higher-dimensional meshing is delegated to the native kernel;
            // the session backend only discretizes curves.
            debug!(dim, "mesh pass skipped by session backend");
            return Ok(());
        }
        let tags: Vec<i32> = self.model.curves.keys().copied().collect();
        let size_max = self.get_option("Mesh.MeshSizeMax");
        let size_min = self.get_option("Mesh.MeshSizeMin");
        let from_curvature = self.get_option("Mesh.MeshSizeFromCurvature");
        for tag in tags {
            let curve = &self.model.curves[&tag];
            if !curve.visible || self.meshed_curves.contains(&tag) {
                continue;
            }
            let len = self.length_of(tag)?;
            if len <= 0.0 {
                continue;
            }
            let (n_nodes, distribution, coef) = match self.transfinite.get(&tag) {
                Some(tf) => (tf.nodes, tf.distribution, tf.coef),
                None => {
                    let curve = &self.model.curves[&tag];
                    let mut target = f64::INFINITY;
                    for &p in &curve.points {
                        let size = self.point(p)?.mesh_size;
                        if size > 0.0 {
                            target = target.min(size);
                        }
                    }
                    if size_max > 0.0 {
                        target = target.min(size_max);
                    }
                    if size_min > 0.0 && target.is_finite() {
                        target = target.max(size_min);
                    }
                    let mut segs = if target.is_finite() {
                        (len / target).ceil() as usize
                    } else {
                        1
                    };
                    if from_curvature > 0.0 {
                        if let Some(turned) = self.turning_angle(tag) {
                            let curv_segs =
                                (from_curvature * turned / std::f64::consts::TAU).ceil() as usize;
                            segs = segs.max(curv_segs);
                        }
                    }
                    (
                        segs.clamp(1, MAX_CURVE_SEGMENTS) + 1,
                        CurveDistribution::Progression,
                        1.0,
                    )
                }
            };
            let params = Self::distribution_params(n_nodes, distribution, coef);
            let base = self.mesh.nodes.len();
            for t in &params {
                let p = self.sample_curve(tag, *t)?;
                self.mesh.nodes.push(p);
            }
            for i in 0..params.len() - 1 {
                self.mesh.lines.push([base + i, base + i + 1]);
                self.mesh.line_curves.push(tag);
            }
            self.meshed_curves.insert(tag);
        }
        debug!(
            curves = self.meshed_curves.len(),
            nodes = self.mesh.nodes.len(),
            "1D mesh pass"
        );
        Ok(())
    }

    fn mesh_data(&self) -> KernelResult<MeshData> {
        Ok(self.mesh.clone())
    }

    fn write(&self, path: &Path) -> KernelResult<()> {
        let payload = serde_json::to_string_pretty(&self.model)
            .map_err(|e| KernelError::Io(e.to_string()))?;
        std::fs::write(path, payload).map_err(|e| KernelError::Io(e.to_string()))
    }

    fn import_shapes(&mut self, path: &Path, highest_dim_only: bool) -> KernelResult<Vec<DimTag>> {
        let payload =
            std::fs::read_to_string(path).map_err(|e| KernelError::Io(e.to_string()))?;
        let loaded: Model =
            serde_json::from_str(&payload).map_err(|e| KernelError::Io(e.to_string()))?;

        // Tags are renumbered on import; only the mapping built by the
        // caller from geometric signatures survives the round trip.
        fn remap(map: &BTreeMap<i32, i32>, tag: i32) -> KernelResult<i32> {
            map.get(&tag)
                .copied()
                .ok_or_else(|| KernelError::Io(format!("model file references unknown tag {tag}")))
        }

        let mut point_map = BTreeMap::new();
        for (old, ent) in loaded.points {
            let new = self.model.alloc(0);
            self.model.points.insert(new, ent);
            point_map.insert(old, new);
        }
        let mut curve_map = BTreeMap::new();
        for (old, mut ent) in loaded.curves {
            for p in &mut ent.points {
                *p = remap(&point_map, *p)?;
            }
            let new = self.model.alloc(1);
            self.model.curves.insert(new, ent);
            curve_map.insert(old, new);
        }
        let mut curve_loop_map = BTreeMap::new();
        for (old, curves) in loaded.curve_loops {
            let remapped: Vec<i32> = curves
                .iter()
                .map(|c| remap(&curve_map, c.abs()).map(|t| t * c.signum()))
                .collect::<KernelResult<_>>()?;
            let new = self.model.alloc_loop(0);
            self.model.curve_loops.insert(new, remapped);
            curve_loop_map.insert(old, new);
        }
        let mut surface_map = BTreeMap::new();
        for (old, mut ent) in loaded.surfaces {
            match &mut ent.source {
                SurfaceSource::Planar { loops } => {
                    for lp in loops.iter_mut() {
                        *lp = remap(&curve_loop_map, *lp)?;
                    }
                }
                SurfaceSource::Filled { boundary } => {
                    *boundary = remap(&curve_loop_map, *boundary)?;
                }
                SurfaceSource::Free { .. } => {}
            }
            let new = self.model.alloc(2);
            self.model.surfaces.insert(new, ent);
            surface_map.insert(old, new);
        }
        let mut surface_loop_map = BTreeMap::new();
        for (old, surfaces) in loaded.surface_loops {
            let remapped: Vec<i32> = surfaces
                .iter()
                .map(|s| remap(&surface_map, *s))
                .collect::<KernelResult<_>>()?;
            let new = self.model.alloc_loop(1);
            self.model.surface_loops.insert(new, remapped);
            surface_loop_map.insert(old, new);
        }
        let mut imported: Vec<DimTag> = Vec::new();
        for (_, mut ent) in loaded.volumes {
            if let VolumeSource::Shelled { shells } = &mut ent.source {
                for sl in shells.iter_mut() {
                    *sl = remap(&surface_loop_map, *sl)?;
                }
            }
            let new = self.model.alloc(3);
            self.model.volumes.insert(new, ent);
            imported.push((3, new));
        }
        for new in surface_map.values() {
            imported.push((2, *new));
        }
        for new in curve_map.values() {
            imported.push((1, *new));
        }
        for new in point_map.values() {
            imported.push((0, *new));
        }
        imported.sort();

        let tops = self.top_level(highest_dim_only);
        let imported_tops: Vec<DimTag> = tops
            .into_iter()
            .filter(|dt| imported.contains(dt))
            .collect();
        debug!(
            path = %path.display(),
            imported = imported.len(),
            tops = imported_tops.len(),
            "imported shapes"
        );
        Ok(imported_tops)
    }

    fn heal_shapes(&mut self) -> KernelResult<Vec<DimTag>> {
        // The bookkeeping backend has nothing to repair; report the current
        // top-level entities like a healing pass would.
        Ok(self.top_level(false))
    }
}

impl SessionKernel {
    fn copy_entity(&mut self, dt: DimTag, memo: &mut BTreeMap<(u8, i32), i32>) -> KernelResult<i32> {
        let key = (dt.0 as u8, dt.1);
        if let Some(&tag) = memo.get(&key) {
            return Ok(tag);
        }
        let tag = match dt.0 {
            0 => {
                let ent = self.point(dt.1)?.clone();
                let new = self.model.alloc(0);
                self.model.points.insert(new, ent);
                new
            }
            1 => {
                let mut ent = self.curve(dt.1)?.clone();
                let points = ent.points.clone();
                ent.points = points
                    .iter()
                    .map(|p| self.copy_entity((0, *p), memo))
                    .collect::<KernelResult<_>>()?;
                let new = self.model.alloc(1);
                self.model.curves.insert(new, ent);
                new
            }
            2 => {
                let ent = self.surface(dt.1)?.clone();
                let source = match ent.source {
                    SurfaceSource::Planar { ref loops } => {
                        let mut new_loops = Vec::with_capacity(loops.len());
                        for lp in loops.clone() {
                            new_loops.push(self.copy_curve_loop(lp, memo)?);
                        }
                        SurfaceSource::Planar { loops: new_loops }
                    }
                    SurfaceSource::Filled { boundary } => SurfaceSource::Filled {
                        boundary: self.copy_curve_loop(boundary, memo)?,
                    },
                    SurfaceSource::Free { bbox } => SurfaceSource::Free { bbox },
                };
                let new = self.model.alloc(2);
                self.model.surfaces.insert(
                    new,
                    SurfaceEnt {
                        source,
                        visible: ent.visible,
                    },
                );
                new
            }
            3 => {
                let ent = self.volume(dt.1)?.clone();
                let source = match ent.source {
                    VolumeSource::Shelled { ref shells } => {
                        let mut new_shells = Vec::with_capacity(shells.len());
                        for sl in shells.clone() {
                            new_shells.push(self.copy_surface_loop(sl, memo)?);
                        }
                        VolumeSource::Shelled { shells: new_shells }
                    }
                    VolumeSource::Free { bbox } => VolumeSource::Free { bbox },
                };
                let new = self.model.alloc(3);
                self.model.volumes.insert(
                    new,
                    VolumeEnt {
                        source,
                        visible: ent.visible,
                    },
                );
                new
            }
            d => return Err(KernelError::UnknownEntity(d, dt.1)),
        };
        memo.insert(key, tag);
        Ok(tag)
    }

    fn copy_curve_loop(
        &mut self,
        lp: i32,
        memo: &mut BTreeMap<(u8, i32), i32>,
    ) -> KernelResult<i32> {
        let key = (4u8, lp);
        if let Some(&tag) = memo.get(&key) {
            return Ok(tag);
        }
        let curves = self.curve_loop(lp)?.clone();
        let mut new_curves = Vec::with_capacity(curves.len());
        for c in curves {
            let copied = self.copy_entity((1, c.abs()), memo)?;
            new_curves.push(copied * c.signum());
        }
        let new = self.model.alloc_loop(0);
        self.model.curve_loops.insert(new, new_curves);
        memo.insert(key, new);
        Ok(new)
    }

    fn copy_surface_loop(
        &mut self,
        sl: i32,
        memo: &mut BTreeMap<(u8, i32), i32>,
    ) -> KernelResult<i32> {
        let key = (5u8, sl);
        if let Some(&tag) = memo.get(&key) {
            return Ok(tag);
        }
        let surfaces = self.surface_loop(sl)?.clone();
        let mut new_surfaces = Vec::with_capacity(surfaces.len());
        for s in surfaces {
            new_surfaces.push(self.copy_entity((2, s), memo)?);
        }
        let new = self.model.alloc_loop(1);
        self.model.surface_loops.insert(new, new_surfaces);
        memo.insert(key, new);
        Ok(new)
    }

    /// Total turning angle of a curved edge, used for curvature-adaptive
    /// sizing. `None` for straight lines.
    fn turning_angle(&self, tag: i32) -> Option<f64> {
        let curve = self.model.curves.get(&tag)?;
        match curve.kind {
            CurveKind::Line | CurveKind::Spline => None,
            CurveKind::Ellipse => Some(std::f64::consts::TAU),
            CurveKind::CircleArc | CurveKind::EllipseArc => {
                let (s, c, e) = match curve.kind {
                    CurveKind::CircleArc => (curve.points[0], curve.points[1], curve.points[2]),
                    _ => (curve.points[0], curve.points[1], curve.points[3]),
                };
                let sv = self.model.points.get(&s)?.xyz;
                let cv = self.model.points.get(&c)?.xyz;
                let ev = self.model.points.get(&e)?.xyz;
                let u = Vector3::new(sv[0] - cv[0], sv[1] - cv[1], sv[2] - cv[2]);
                let w = Vector3::new(ev[0] - cv[0], ev[1] - cv[1], ev[2] - cv[2]);
                Some(u.cross(&w).norm().atan2(u.dot(&w)).abs())
            }
        }
    }

    /// `true` when another entity still references this one.
    fn is_referenced(&self, (dim, tag): DimTag) -> bool {
        match dim {
            0 => self
                .model
                .curves
                .values()
                .any(|c| c.points.contains(&tag)),
            1 => self
                .model
                .curve_loops
                .values()
                .any(|curves| curves.iter().any(|c| c.abs() == tag)),
            2 => self
                .model
                .surface_loops
                .values()
                .any(|surfaces| surfaces.contains(&tag)),
            _ => false,
        }
    }

    fn remove_point(&mut self, tag: i32) {
        if !self.is_referenced((0, tag)) {
            self.model.points.remove(&tag);
        }
    }

    fn remove_curve(&mut self, tag: i32) {
        if self.is_referenced((1, tag)) {
            return;
        }
        if let Some(curve) = self.model.curves.remove(&tag) {
            self.transfinite.remove(&tag);
            for p in curve.points {
                self.remove_point(p);
            }
        }
    }

    fn remove_surface(&mut self, tag: i32, recursive: bool) {
        if self.is_referenced((2, tag)) {
            return;
        }
        let Some(surface) = self.model.surfaces.remove(&tag) else {
            return;
        };
        let loops = match surface.source {
            SurfaceSource::Planar { loops } => loops,
            SurfaceSource::Filled { boundary } => vec![boundary],
            SurfaceSource::Free { .. } => Vec::new(),
        };
        for lp in loops {
            let still_used = self.model.surfaces.values().any(|s| match &s.source {
                SurfaceSource::Planar { loops } => loops.contains(&lp),
                SurfaceSource::Filled { boundary } => *boundary == lp,
                SurfaceSource::Free { .. } => false,
            });
            if still_used {
                continue;
            }
            let curves = self.model.curve_loops.remove(&lp).unwrap_or_default();
            if recursive {
                for c in curves {
                    self.remove_curve(c.abs());
                }
            }
        }
    }

    fn remove_volume(&mut self, tag: i32, recursive: bool) {
        let Some(volume) = self.model.volumes.remove(&tag) else {
            return;
        };
        let shells = match volume.source {
            VolumeSource::Shelled { shells } => shells,
            VolumeSource::Free { .. } => Vec::new(),
        };
        for sl in shells {
            let still_used = self.model.volumes.values().any(|v| match &v.source {
                VolumeSource::Shelled { shells } => shells.contains(&sl),
                VolumeSource::Free { .. } => false,
            });
            if still_used {
                continue;
            }
            let surfaces = self.model.surface_loops.remove(&sl).unwrap_or_default();
            if recursive {
                for s in surfaces {
                    self.remove_surface(s, true);
                }
            }
        }
    }
}
