use std::collections::HashMap;

use crate::entity::{EntityId, GeometryResult};
use crate::kernel::{OccKernel, SessionKernel};

use super::{BuildError, EngineOptions, GeomEngine};

fn engine() -> GeomEngine {
    GeomEngine::new(
        Box::new(SessionKernel::new()),
        EngineOptions::default(),
        "test-model",
    )
    .expect("engine")
}

const UNIT_CUBE: [[f64; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [0.0, 1.0, 1.0],
];

#[test]
fn point_cache_reuses_coincident_points() {
    let mut eng = engine();
    let a = eng.add_point([1.0, 2.0, 3.0], None, true).unwrap();
    let b = eng.add_point([1.0, 2.0, 3.0], None, true).unwrap();
    assert_eq!(a, b);
    assert_eq!(eng.masked_vertices(), &[a]);
    assert_eq!(eng.point_coordinates(a), Some([1.0, 2.0, 3.0]));
}

#[test]
fn helper_points_stay_out_of_the_masked_list() {
    let mut eng = engine();
    let shown = eng.add_point([0.0, 0.0, 0.0], None, true).unwrap();
    let _hidden = eng.add_point([5.0, 0.0, 0.0], None, false).unwrap();
    assert_eq!(eng.masked_vertices(), &[shown]);
}

#[test]
fn box_template_produces_the_fixed_topology() {
    let mut eng = engine();
    let volume = eng.add_box(&UNIT_CUBE, None).unwrap();
    assert!(matches!(volume, EntityId::Volume(_)));

    assert_eq!(eng.kernel.entities(Some(0)).unwrap().len(), 8);
    assert_eq!(eng.kernel.entities(Some(1)).unwrap().len(), 12);
    assert_eq!(eng.kernel.entities(Some(2)).unwrap().len(), 6);
    assert_eq!(eng.kernel.entities(Some(3)).unwrap().len(), 1);

    // Each face is bounded by 4 lines forming one closed cycle: every
    // vertex of the face appears on exactly two of its edges.
    let volume_dt = volume.to_dimtag().unwrap();
    let faces = eng.kernel.boundary(&[volume_dt]).unwrap();
    assert_eq!(faces.len(), 6);
    for face in faces {
        let edges = eng.kernel.boundary(&[face]).unwrap();
        assert_eq!(edges.len(), 4);
        let mut occurrences: HashMap<i32, usize> = HashMap::new();
        for edge in &edges {
            let ends = eng.kernel.boundary(&[*edge]).unwrap();
            assert_eq!(ends.len(), 2);
            for (_, p) in ends {
                *occurrences.entry(p).or_default() += 1;
            }
        }
        assert_eq!(occurrences.len(), 4);
        assert!(occurrences.values().all(|&n| n == 2));
    }

    let bbox = eng.bounding_box(Some(volume)).unwrap();
    assert_eq!(bbox.min, [0.0, 0.0, 0.0]);
    assert_eq!(bbox.max, [1.0, 1.0, 1.0]);
}

#[test]
fn rect_from_corner_and_edge_vectors() {
    let mut eng = engine();
    let surface = eng
        .add_rect([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0])
        .unwrap();
    assert!(matches!(surface, EntityId::Surface(_)));
    let bbox = eng.bounding_box(Some(surface)).unwrap();
    assert_eq!(bbox.min, [0.0, 0.0, 0.0]);
    assert_eq!(bbox.max, [1.0, 1.0, 0.0]);
}

#[test]
fn rect_rejects_parallel_edge_vectors() {
    let mut eng = engine();
    let err = eng
        .add_rect([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0])
        .unwrap_err();
    assert!(matches!(err, BuildError::Degenerate(_)));
}

#[test]
fn polygon_result_carries_surface_loop_and_size() {
    let mut eng = engine();
    let result = eng
        .add_polygon(
            &[
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [2.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            Some(0.25),
        )
        .unwrap();
    let GeometryResult::Polygon {
        surface,
        boundary,
        mesh_size,
    } = result
    else {
        panic!("expected a polygon result");
    };
    assert!(matches!(surface, EntityId::Surface(_)));
    assert!(matches!(boundary, EntityId::CurveLoop(_)));
    assert_eq!(mesh_size, 0.25);
    assert_eq!(result.as_surface(), Some(surface));
}

#[test]
fn spline_through_coincident_points_is_rejected() {
    let mut eng = engine();
    let a = eng.add_point([0.0, 0.0, 0.0], None, true).unwrap();
    let b = eng.add_point([0.0, 0.0, 0.0], None, true).unwrap();
    let c = eng.add_point([1.0, 0.0, 0.0], None, true).unwrap();
    let err = eng.add_spline(&[a, b, c]).unwrap_err();
    assert!(matches!(err, BuildError::Degenerate(_)));
}

#[test]
fn ellipse_arc_resolves_its_extent_from_cached_coordinates() {
    let mut eng = engine();
    let start = eng.add_point([2.0, 0.0, 0.0], None, true).unwrap();
    let center = eng.add_point([0.0, 0.0, 0.0], None, true).unwrap();
    let end = eng.add_point([0.0, 1.0, 0.0], None, true).unwrap();
    let arc = eng.add_ellipse_arc(start, center, end).unwrap();
    let bbox = eng.bounding_box(Some(arc)).unwrap();
    assert_eq!(bbox.max[0], 2.0);
    assert_eq!(bbox.max[1], 1.0);
}

#[test]
fn solid_primitives_report_their_extents() {
    let mut eng = engine();
    let sphere = eng.add_sphere([1.0, 1.0, 1.0], 0.5).unwrap();
    let bbox = eng.bounding_box(Some(sphere)).unwrap();
    assert_eq!(bbox.min, [0.5, 0.5, 0.5]);
    assert_eq!(bbox.max, [1.5, 1.5, 1.5]);

    let cylinder = eng
        .add_cylinder([0.0, 0.0, 0.0], [0.0, 0.0, 2.0], 1.0)
        .unwrap();
    let bbox = eng.bounding_box(Some(cylinder)).unwrap();
    assert_eq!(bbox.min[2], -1.0);
    assert_eq!(bbox.max[2], 3.0);
}

#[test]
fn volume_from_explicit_shell() {
    let mut eng = engine();
    let volume = eng.add_box(&UNIT_CUBE, None).unwrap();
    // The shell route was exercised by the box; inverse removal with a
    // mixed-dimension keep set must fail cleanly.
    let surface = eng.kernel_entities(Some(2)).unwrap()[0];
    let err = eng.inverse_remove(&[volume, surface]).unwrap_err();
    assert!(matches!(err, BuildError::MixedDimensions(3, 2)));
}
