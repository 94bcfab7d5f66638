//! The recorded construction sequence.
//!
//! A user-authored script is an ordered list of operations; replaying the
//! full list from an empty model deterministically reproduces the same
//! named-object table (absolute kernel tags are not guaranteed stable
//! across a save/reload, which is what the entity mapping recovers).
//!
//! Entity references between operations travel as object-table keys, so a
//! sequence is self-contained and serializable.

mod runner;

pub use runner::{run_sequence, SequenceRunner, StepOutcome};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::BuildError;

/// Persist a recorded sequence to disk as JSON.
pub fn save_steps(steps: &[Operation], path: &Path) -> Result<(), BuildError> {
    let payload =
        serde_json::to_string_pretty(steps).map_err(|e| BuildError::Io(e.to_string()))?;
    std::fs::write(path, payload).map_err(|e| BuildError::Io(e.to_string()))
}

/// Load a previously recorded sequence.
pub fn load_steps(path: &Path) -> Result<Vec<Operation>, BuildError> {
    let payload = std::fs::read_to_string(path).map_err(|e| BuildError::Io(e.to_string()))?;
    serde_json::from_str(&payload).map_err(|e| BuildError::Io(e.to_string()))
}

/// One recorded operation. This closed enum is the dispatch table: every
/// variant is matched in exactly one place by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Point {
        xyz: [f64; 3],
        #[serde(default)]
        mesh_size: Option<f64>,
        #[serde(default = "default_true")]
        masked: bool,
    },
    Line {
        start: String,
        end: String,
    },
    CircleArc {
        start: String,
        center: String,
        end: String,
    },
    EllipseArc {
        start: String,
        center: String,
        end: String,
    },
    Spline {
        through: Vec<String>,
    },
    CurveLoop {
        curves: Vec<String>,
    },
    PlaneSurface {
        loops: Vec<String>,
    },
    SurfaceFilling {
        boundary: String,
    },
    SurfaceLoop {
        surfaces: Vec<String>,
    },
    Volume {
        shells: Vec<String>,
    },
    Polygon {
        points: Vec<[f64; 3]>,
        #[serde(default)]
        mesh_size: Option<f64>,
    },
    Rect {
        corner: [f64; 3],
        u: [f64; 3],
        v: [f64; 3],
    },
    Disk {
        center: [f64; 3],
        rx: f64,
        ry: f64,
    },
    Box {
        corners: [[f64; 3]; 8],
        #[serde(default)]
        mesh_size: Option<f64>,
    },
    Sphere {
        center: [f64; 3],
        radius: f64,
    },
    Cone {
        base: [f64; 3],
        axis: [f64; 3],
        base_radius: f64,
        top_radius: f64,
    },
    Wedge {
        corner: [f64; 3],
        extents: [f64; 3],
        #[serde(default)]
        top_dx: f64,
    },
    Cylinder {
        base: [f64; 3],
        axis: [f64; 3],
        radius: f64,
    },
    Torus {
        center: [f64; 3],
        major_radius: f64,
        minor_radius: f64,
    },
    Extrude {
        target: String,
        offset: [f64; 3],
    },
    Revolve {
        target: String,
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    },
    Sweep {
        target: String,
        path: String,
    },
    Union {
        objects: Vec<String>,
        tools: Vec<String>,
        #[serde(default = "default_true")]
        delete_object: bool,
        #[serde(default = "default_true")]
        delete_tool: bool,
    },
    Union2d {
        object: String,
        tool: String,
    },
    Intersection {
        objects: Vec<String>,
        tools: Vec<String>,
        #[serde(default = "default_true")]
        delete_object: bool,
        #[serde(default = "default_true")]
        delete_tool: bool,
    },
    Difference {
        objects: Vec<String>,
        tools: Vec<String>,
        #[serde(default = "default_true")]
        delete_object: bool,
        #[serde(default = "default_true")]
        delete_tool: bool,
    },
    Fragments {
        objects: Vec<String>,
        tools: Vec<String>,
        #[serde(default = "default_true")]
        delete_object: bool,
        #[serde(default = "default_true")]
        delete_tool: bool,
    },
    ApplyFragments,
    Copy {
        targets: Vec<String>,
    },
    Translate {
        targets: Vec<String>,
        offset: [f64; 3],
    },
    Rotate {
        targets: Vec<String>,
        origin: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    },
    Dilate {
        targets: Vec<String>,
        center: [f64; 3],
        factors: [f64; 3],
    },
    Symmetrize {
        targets: Vec<String>,
        plane: [f64; 4],
    },
    Remove {
        targets: Vec<String>,
        #[serde(default)]
        recursive: bool,
    },
    InverseRemove {
        keep: Vec<String>,
    },
    ImportCad {
        path: PathBuf,
        #[serde(default)]
        heal: bool,
    },
    WorkPlaneStart {
        origin: [f64; 3],
        u: [f64; 3],
        v: [f64; 3],
    },
    WorkPlaneEnd,
}

fn default_true() -> bool {
    true
}

impl Operation {
    /// Short label used in progress messages and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Point { .. } => "point",
            Operation::Line { .. } => "line",
            Operation::CircleArc { .. } => "circle_arc",
            Operation::EllipseArc { .. } => "ellipse_arc",
            Operation::Spline { .. } => "spline",
            Operation::CurveLoop { .. } => "curve_loop",
            Operation::PlaneSurface { .. } => "plane_surface",
            Operation::SurfaceFilling { .. } => "surface_filling",
            Operation::SurfaceLoop { .. } => "surface_loop",
            Operation::Volume { .. } => "volume",
            Operation::Polygon { .. } => "polygon",
            Operation::Rect { .. } => "rect",
            Operation::Disk { .. } => "disk",
            Operation::Box { .. } => "box",
            Operation::Sphere { .. } => "sphere",
            Operation::Cone { .. } => "cone",
            Operation::Wedge { .. } => "wedge",
            Operation::Cylinder { .. } => "cylinder",
            Operation::Torus { .. } => "torus",
            Operation::Extrude { .. } => "extrude",
            Operation::Revolve { .. } => "revolve",
            Operation::Sweep { .. } => "sweep",
            Operation::Union { .. } => "union",
            Operation::Union2d { .. } => "union2d",
            Operation::Intersection { .. } => "intersection",
            Operation::Difference { .. } => "difference",
            Operation::Fragments { .. } => "fragments",
            Operation::ApplyFragments => "apply_fragments",
            Operation::Copy { .. } => "copy",
            Operation::Translate { .. } => "translate",
            Operation::Rotate { .. } => "rotate",
            Operation::Dilate { .. } => "dilate",
            Operation::Symmetrize { .. } => "symmetrize",
            Operation::Remove { .. } => "remove",
            Operation::InverseRemove { .. } => "inverse_remove",
            Operation::ImportCad { .. } => "import_cad",
            Operation::WorkPlaneStart { .. } => "work_plane_start",
            Operation::WorkPlaneEnd => "work_plane_end",
        }
    }

    /// Mnemonic prefix for keys minted by this operation.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::Point { .. } => "pt",
            Operation::Line { .. } => "ln",
            Operation::CircleArc { .. } | Operation::EllipseArc { .. } => "arc",
            Operation::Spline { .. } => "spl",
            Operation::CurveLoop { .. } => "cl",
            Operation::PlaneSurface { .. }
            | Operation::SurfaceFilling { .. } => "sf",
            Operation::SurfaceLoop { .. } => "shl",
            Operation::Volume { .. } => "vol",
            Operation::Polygon { .. } => "pol",
            Operation::Rect { .. } => "rec",
            Operation::Disk { .. } => "dsk",
            Operation::Box { .. } => "box",
            Operation::Sphere { .. } => "sph",
            Operation::Cone { .. } => "con",
            Operation::Wedge { .. } => "wed",
            Operation::Cylinder { .. } => "cyl",
            Operation::Torus { .. } => "tor",
            Operation::Extrude { .. } => "ext",
            Operation::Revolve { .. } => "rev",
            Operation::Sweep { .. } => "swp",
            Operation::Union { .. } | Operation::Union2d { .. } => "uni",
            Operation::Intersection { .. } => "int",
            Operation::Difference { .. } => "diff",
            Operation::Fragments { .. } => "frag",
            Operation::Copy { .. } => "cpy",
            Operation::ImportCad { .. } => "imp",
            _ => "obj",
        }
    }
}
