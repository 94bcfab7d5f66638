//! Adaptive mesh-resolution heuristics for preview meshes.
//!
//! A single global element-size policy fails on models mixing tiny fillets
//! with large walls. Three sizing strategies are provided; the adaptive
//! two-pass variant is the production path: refine known-problematic edges
//! first in isolation, then fill in the rest with per-vertex sizing.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::kernel::{CurveDistribution, DimTag, MeshData, OccKernel};

use super::{BuildError, GeomEngine};

/// Edge-length buckets of the bucketed strategy, as fractions of the
/// longest edge, with the forced segment count for each bucket.
const LENGTH_BUCKETS: [(f64, usize); 5] =
    [(1e-1, 5), (1e-2, 5), (1e-3, 5), (1e-4, 4), (1e-5, 3)];
/// Segments forced onto edges below the smallest bucket.
const TOO_SMALL_SEGMENTS: usize = 3;
/// Bump coefficient biasing nodes towards the ends of short edges.
const BUMP_COEF: f64 = 0.25;

/// Classification computed by the adaptive strategy before any meshing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewPlan {
    /// Closed 1D entities too small to mesh at all; hidden from both passes.
    pub tiny_loops: Vec<i32>,
    /// Curves much longer than their incident vertex sizing, with the
    /// refined endpoint size (`length / max_seg`) to apply before pass one.
    pub refined: Vec<(i32, f64)>,
    /// Curves below the small-edge threshold, forced onto a fixed biased
    /// segment count and meshed in pass one.
    pub forced_small: Vec<i32>,
    /// Everything else, meshed in the default pass.
    pub default_pass: Vec<i32>,
}

impl PreviewPlan {
    /// Curves meshed in isolation before the default pass.
    pub fn do_first(&self) -> Vec<i32> {
        let mut out: Vec<i32> = self.refined.iter().map(|(tag, _)| *tag).collect();
        out.extend(&self.forced_small);
        out
    }
}

impl GeomEngine {
    /// Per-vertex target element size: half the shortest incident edge
    /// length (the vertex characteristic length).
    pub fn vertex_sizes(&self) -> Result<BTreeMap<i32, f64>, BuildError> {
        let mut shortest: BTreeMap<i32, f64> = BTreeMap::new();
        for (_, tag) in self.kernel.entities(Some(1))? {
            let length = self.kernel.curve_length(tag)?;
            if length <= 0.0 {
                continue;
            }
            for (dim, point) in self.kernel.boundary(&[(1, tag)])? {
                if dim != 0 {
                    continue;
                }
                shortest
                    .entry(point)
                    .and_modify(|l| *l = l.min(length))
                    .or_insert(length);
            }
        }
        Ok(shortest.into_iter().map(|(p, l)| (p, 0.5 * l)).collect())
    }

    fn model_diagonal(&self) -> Result<f64, BuildError> {
        Ok(self.kernel.bounding_box(None)?.diagonal())
    }

    fn apply_vertex_sizes(&mut self, sizes: &BTreeMap<i32, f64>) -> Result<(), BuildError> {
        for (&point, &size) in sizes {
            self.kernel.set_mesh_size(&[(0, point)], size)?;
        }
        Ok(())
    }

    /// Strategy one: per-vertex characteristic lengths with a global cap of
    /// (model diagonal / preview resolution), then a single 1D pass.
    pub fn mesh_preview_uniform(&mut self) -> Result<(), BuildError> {
        let sizes = self.vertex_sizes()?;
        let cap = self.model_diagonal()? / self.options.preview_resolution;
        self.kernel.set_option("Mesh.MeshSizeMax", cap)?;
        self.apply_vertex_sizes(&sizes)?;
        self.kernel.clear_mesh()?;
        self.kernel.generate(1)?;
        debug!(cap, vertices = sizes.len(), "uniform preview pass done");
        Ok(())
    }

    /// Strategy two: per-vertex sizing plus a discrete segment count per
    /// edge, bucketed by the edge's length relative to the single longest
    /// edge. Edges below the smallest bucket are flagged too small and get
    /// a biased three-segment distribution.
    pub fn mesh_preview_bucketed(&mut self) -> Result<(), BuildError> {
        let sizes = self.vertex_sizes()?;
        self.apply_vertex_sizes(&sizes)?;

        let curves = self.kernel.entities(Some(1))?;
        let mut longest = 0.0f64;
        let mut lengths: Vec<(i32, f64)> = Vec::with_capacity(curves.len());
        for (_, tag) in &curves {
            let length = self.kernel.curve_length(*tag)?;
            longest = longest.max(length);
            lengths.push((*tag, length));
        }
        if longest <= 0.0 {
            return Ok(());
        }
        let mut too_small = 0usize;
        for (tag, length) in lengths {
            let ratio = length / longest;
            match LENGTH_BUCKETS.iter().find(|(thr, _)| ratio >= *thr) {
                Some((_, segments)) => {
                    self.kernel.set_transfinite_curve(
                        tag,
                        segments + 1,
                        CurveDistribution::Progression,
                        1.0,
                    )?;
                }
                None => {
                    too_small += 1;
                    self.kernel.set_transfinite_curve(
                        tag,
                        TOO_SMALL_SEGMENTS + 1,
                        CurveDistribution::Bump,
                        BUMP_COEF,
                    )?;
                }
            }
        }
        self.kernel.clear_mesh()?;
        self.kernel.generate(1)?;
        debug!(curves = curves.len(), too_small, "bucketed preview pass done");
        Ok(())
    }

    /// Classify every curve for the adaptive strategy. Pure; the sizing and
    /// visibility changes happen in [`GeomEngine::mesh_preview_adaptive`].
    pub fn plan_preview(&self) -> Result<PreviewPlan, BuildError> {
        let sizes = self.vertex_sizes()?;
        let max_size = sizes.values().cloned().fold(0.0f64, f64::max);
        let diagonal = self.model_diagonal()?;
        let long_threshold = self.options.long_edge_factor * diagonal;
        let small_threshold = self.options.small_edge_factor * diagonal;

        let mut plan = PreviewPlan::default();
        for (_, tag) in self.kernel.entities(Some(1))? {
            let length = self.kernel.curve_length(tag)?;
            let endpoints: Vec<DimTag> = self.kernel.boundary(&[(1, tag)])?;

            // Closed, topologically isolated 1D entities below the sizing
            // noise floor would only produce degenerate elements.
            if endpoints.is_empty() && length < self.options.tiny_loop_factor * max_size {
                plan.tiny_loops.push(tag);
                continue;
            }
            // Largest per-vertex size in this curve's neighborhood; closed
            // curves fall back to the global maximum.
            let incident = endpoints
                .iter()
                .filter_map(|(_, p)| sizes.get(p).copied())
                .fold(0.0f64, f64::max);
            let incident = if incident > 0.0 {
                incident
            } else {
                max_size.max(length)
            };

            if length > long_threshold && length > self.options.max_seg * incident {
                plan.refined.push((tag, length / self.options.max_seg));
            } else if length < small_threshold {
                plan.forced_small.push(tag);
            } else {
                plan.default_pass.push(tag);
            }
        }
        Ok(plan)
    }

    /// Strategy three, the production path: two relative thresholds split
    /// the curves into a refined do-first set (meshed in isolation) and a
    /// default set (meshed afterwards with per-vertex sizing and optional
    /// curvature adaptation); tiny loops are hidden from both passes.
    pub fn mesh_preview_adaptive(&mut self) -> Result<PreviewPlan, BuildError> {
        let plan = self.plan_preview()?;
        let sizes = self.vertex_sizes()?;
        self.kernel.clear_mesh()?;

        for (curve, size) in &plan.refined {
            let endpoints = self.kernel.boundary(&[(1, *curve)])?;
            self.kernel.set_mesh_size(&endpoints, *size)?;
        }
        for curve in &plan.forced_small {
            self.kernel.set_transfinite_curve(
                *curve,
                TOO_SMALL_SEGMENTS + 1,
                CurveDistribution::Bump,
                BUMP_COEF,
            )?;
        }

        let do_first = plan.do_first();
        let all_curves = self.kernel.entities(Some(1))?;
        let as_tags = |tags: &[i32]| tags.iter().map(|&t| (1, t)).collect::<Vec<DimTag>>();

        // Pass one: the do-first set alone.
        let rest: Vec<DimTag> = all_curves
            .iter()
            .copied()
            .filter(|(_, t)| !do_first.contains(t))
            .collect();
        self.kernel.set_visibility(&rest, false, false)?;
        self.kernel.generate(1)?;

        // Pass two: everything except the do-first and tiny-loop sets.
        let second: Vec<DimTag> = all_curves
            .iter()
            .copied()
            .filter(|(_, t)| !do_first.contains(t) && !plan.tiny_loops.contains(t))
            .collect();
        self.kernel.set_visibility(&as_tags(&do_first), false, false)?;
        self.kernel.set_visibility(&second, true, false)?;
        self.apply_vertex_sizes(&sizes)?;
        let curvature = if self.options.curvature_adaptive {
            self.options.curvature_elements
        } else {
            0.0
        };
        self.kernel.set_option("Mesh.MeshSizeFromCurvature", curvature)?;
        self.kernel.generate(1)?;

        // Leave everything visible except the hidden tiny loops.
        let visible: Vec<DimTag> = all_curves
            .iter()
            .copied()
            .filter(|(_, t)| !plan.tiny_loops.contains(t))
            .collect();
        self.kernel.set_visibility(&visible, true, false)?;

        info!(
            do_first = do_first.len(),
            default = plan.default_pass.len(),
            tiny_loops = plan.tiny_loops.len(),
            "adaptive preview meshing done"
        );
        Ok(plan)
    }

    /// Full preview pipeline: adaptive 1D sizing followed by the 2D pass.
    pub fn generate_preview_mesh(&mut self) -> Result<MeshData, BuildError> {
        self.mesh_preview_adaptive()?;
        self.kernel.generate(2)?;
        Ok(self.kernel.mesh_data()?)
    }
}
