use approx::assert_abs_diff_eq;

use crate::kernel::SessionKernel;

use super::transform::work_plane_frame;
use super::{EngineOptions, GeomEngine};

fn engine() -> GeomEngine {
    GeomEngine::new(
        Box::new(SessionKernel::new()),
        EngineOptions::default(),
        "test-model",
    )
    .expect("engine")
}

#[test]
fn identity_frame_has_no_rotations() {
    let frame = work_plane_frame([0.0, 0.0, 3.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]).unwrap();
    assert!(frame.rotations.is_empty());
    assert_eq!(frame.origin, [0.0, 0.0, 3.0]);
}

#[test]
fn quarter_turn_frame_carries_x_onto_u() {
    // u = +Y: one rotation about +Z by 90 degrees; the rotated up vector
    // (-X) already matches v, so no second rotation appears.
    let frame = work_plane_frame([0.0, 0.0, 5.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]).unwrap();
    assert_eq!(frame.rotations.len(), 1);
    let (axis, angle) = frame.rotations[0];
    assert_abs_diff_eq!(axis[2], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(angle, std::f64::consts::FRAC_PI_2, epsilon = 1e-12);

    let mut eng = engine();
    let p = eng.add_point([1.0, 0.0, 0.0], None, true).unwrap();
    eng.apply_work_plane(&frame, &[p]).unwrap();
    let xyz = eng.point_coordinates(p).unwrap();
    assert_abs_diff_eq!(xyz[0], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(xyz[1], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(xyz[2], 5.0, epsilon = 1e-12);
}

#[test]
fn anti_parallel_axis_degenerates_to_a_half_turn() {
    // u = -X: the cross product with X vanishes while the directions
    // oppose, which must become a 180-degree rotation, not a skipped one.
    let frame = work_plane_frame([0.0, 0.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]).unwrap();
    assert!(!frame.rotations.is_empty());
    let (_, angle) = frame.rotations[0];
    assert_abs_diff_eq!(angle, std::f64::consts::PI, epsilon = 1e-12);

    let mut eng = engine();
    let p = eng.add_point([1.0, 0.0, 0.0], None, true).unwrap();
    eng.apply_work_plane(&frame, &[p]).unwrap();
    let xyz = eng.point_coordinates(p).unwrap();
    assert_abs_diff_eq!(xyz[0], -1.0, epsilon = 1e-12);
}

#[test]
fn zero_axes_are_rejected() {
    assert!(work_plane_frame([0.0; 3], [0.0; 3], [0.0, 1.0, 0.0]).is_err());
    assert!(work_plane_frame([0.0; 3], [1.0, 0.0, 0.0], [0.0; 3]).is_err());
}

#[test]
fn tilted_frame_lands_in_plane_coordinates() {
    // Plane spanned by u = +Z, v = +Y at origin (1, 1, 1): the in-plane
    // point (1, 0) must land at origin + 1 * u.
    let frame = work_plane_frame([1.0, 1.0, 1.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]).unwrap();
    let mut eng = engine();
    let p = eng.add_point([1.0, 0.0, 0.0], None, true).unwrap();
    eng.apply_work_plane(&frame, &[p]).unwrap();
    let xyz = eng.point_coordinates(p).unwrap();
    assert_abs_diff_eq!(xyz[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(xyz[1], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(xyz[2], 2.0, epsilon = 1e-12);
}

#[test]
fn transforms_refresh_the_coordinate_cache() {
    let mut eng = engine();
    let p = eng.add_point([1.0, 0.0, 0.0], None, true).unwrap();
    eng.translate(&[p], [0.0, 2.0, 0.0]).unwrap();
    assert_eq!(eng.point_coordinates(p), Some([1.0, 2.0, 0.0]));

    eng.dilate(&[p], [0.0, 0.0, 0.0], [2.0, 2.0, 2.0]).unwrap();
    assert_eq!(eng.point_coordinates(p), Some([2.0, 4.0, 0.0]));

    eng.symmetrize(&[p], [1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(eng.point_coordinates(p), Some([-2.0, 4.0, 0.0]));
}

#[test]
fn copies_are_independent_of_their_source() {
    let mut eng = engine();
    let a = eng.add_point([0.0, 0.0, 0.0], None, true).unwrap();
    let b = eng.add_point([1.0, 0.0, 0.0], None, true).unwrap();
    let line = eng.add_line(a, b).unwrap();

    let copies = eng.copy(&[line]).unwrap();
    assert_eq!(copies.len(), 1);
    eng.translate(&copies, [0.0, 5.0, 0.0]).unwrap();
    assert_eq!(eng.point_coordinates(a), Some([0.0, 0.0, 0.0]));
}

#[test]
fn extrude_of_a_surface_yields_a_volume_first() {
    use super::ExtrudeSpec;
    use crate::entity::EntityId;

    let mut eng = engine();
    let surface = eng
        .add_rect([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0])
        .unwrap();
    let created = eng
        .extrude(surface, ExtrudeSpec::Translation([0.0, 0.0, 2.0]))
        .unwrap();
    assert!(matches!(created[0], EntityId::Volume(_)));
    let bbox = eng.bounding_box(Some(created[0])).unwrap();
    assert_eq!(bbox.max[2], 2.0);
}
