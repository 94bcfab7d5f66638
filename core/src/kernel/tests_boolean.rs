use std::path::Path;

use super::*;

fn unit_cube_at(kernel: &mut SessionKernel, origin: [f64; 3], size: f64) -> i32 {
    // A bare volume with the right extent is enough for extent-level
    // boolean bookkeeping.
    kernel
        .add_wedge(origin, [size, size, size], 0.0)
        .expect("wedge")
}

#[test]
fn fuse_of_disjoint_volumes_unions_their_extents() {
    let mut kernel = SessionKernel::new();
    let a = unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 1.0);
    let b = unit_cube_at(&mut kernel, [5.0, 0.0, 0.0], 1.0);
    let box_a = kernel.bounding_box(Some((3, a))).unwrap();
    let box_b = kernel.bounding_box(Some((3, b))).unwrap();

    let result = kernel.fuse(&[(3, a)], &[(3, b)], true, true).unwrap();
    assert_eq!(result.entities.len(), 1);

    let fused = kernel.bounding_box(Some(result.entities[0])).unwrap();
    assert_eq!(fused, box_a.union(&box_b));
    // Operands were consumed.
    assert!(kernel.bounding_box(Some((3, a))).is_err());
    assert!(kernel.bounding_box(Some((3, b))).is_err());
}

#[test]
fn cut_with_interior_tool_keeps_the_object_extent() {
    let mut kernel = SessionKernel::new();
    let outer = unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 4.0);
    let inner = unit_cube_at(&mut kernel, [1.0, 1.0, 1.0], 1.0);
    let before = kernel.bounding_box(Some((3, outer))).unwrap();

    let result = kernel
        .cut(&[(3, outer)], &[(3, inner)], true, true)
        .unwrap();
    assert_eq!(result.entities.len(), 1);
    assert_eq!(kernel.bounding_box(Some(result.entities[0])).unwrap(), before);
}

#[test]
fn cut_with_swallowing_tool_consumes_the_object() {
    let mut kernel = SessionKernel::new();
    let small = unit_cube_at(&mut kernel, [1.0, 1.0, 1.0], 1.0);
    let big = unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 4.0);

    let result = kernel.cut(&[(3, small)], &[(3, big)], true, true).unwrap();
    assert!(result.entities.is_empty());
    assert!(result.mapping[0].is_empty());
}

#[test]
fn intersect_of_disjoint_volumes_is_empty() {
    let mut kernel = SessionKernel::new();
    let a = unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 1.0);
    let b = unit_cube_at(&mut kernel, [5.0, 5.0, 5.0], 1.0);

    let result = kernel.intersect(&[(3, a)], &[(3, b)], false, false).unwrap();
    assert!(result.entities.is_empty());
    // Non-consuming call leaves the operands alone.
    assert!(kernel.bounding_box(Some((3, a))).is_ok());
    assert!(kernel.bounding_box(Some((3, b))).is_ok());
}

#[test]
fn fragment_keeps_one_piece_per_input() {
    let mut kernel = SessionKernel::new();
    let a = unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 2.0);
    let b = unit_cube_at(&mut kernel, [1.0, 0.0, 0.0], 2.0);
    let c = unit_cube_at(&mut kernel, [2.0, 0.0, 0.0], 2.0);

    let result = kernel
        .fragment(&[(3, a)], &[(3, b), (3, c)], true, true)
        .unwrap();
    assert_eq!(result.entities.len(), 3);
    assert_eq!(result.mapping.len(), 3);
    for m in &result.mapping {
        assert_eq!(m.len(), 1);
    }
}

#[test]
fn duplicate_removal_merges_identical_extents() {
    let mut kernel = SessionKernel::new();
    let a = unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 2.0);
    let b = unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 2.0);
    let result = kernel
        .fragment(&[(3, a)], &[(3, b)], true, true)
        .unwrap();
    assert_eq!(result.entities.len(), 2);

    kernel.remove_duplicates().unwrap();
    assert_eq!(kernel.entities(Some(3)).unwrap().len(), 1);
}

#[test]
fn model_write_and_reload_renumbers_but_preserves_extents() {
    let dir = tempfile::tempdir().unwrap();
    let path: std::path::PathBuf = dir.path().join("model.brep");

    let mut kernel = SessionKernel::new();
    let p1 = kernel.add_point([0.0, 0.0, 0.0], 0.1).unwrap();
    let p2 = kernel.add_point([2.0, 0.0, 0.0], 0.1).unwrap();
    kernel.add_line(p1, p2).unwrap();
    unit_cube_at(&mut kernel, [0.0, 0.0, 0.0], 3.0);
    let before = kernel.bounding_box(None).unwrap();
    kernel.write(Path::new(&path)).unwrap();

    kernel.clear().unwrap();
    assert!(kernel.entities(None).unwrap().is_empty());

    let imported = kernel.import_shapes(Path::new(&path), false).unwrap();
    assert!(!imported.is_empty());
    assert_eq!(kernel.bounding_box(None).unwrap(), before);
    assert_eq!(kernel.entities(Some(1)).unwrap().len(), 1);
}

#[test]
fn plane_surface_rejects_non_planar_loops() {
    let mut kernel = SessionKernel::new();
    let p1 = kernel.add_point([0.0, 0.0, 0.0], 0.0).unwrap();
    let p2 = kernel.add_point([1.0, 0.0, 0.0], 0.0).unwrap();
    let p3 = kernel.add_point([1.0, 1.0, 0.5], 0.0).unwrap();
    let p4 = kernel.add_point([0.0, 1.0, 0.0], 0.0).unwrap();
    let l1 = kernel.add_line(p1, p2).unwrap();
    let l2 = kernel.add_line(p2, p3).unwrap();
    let l3 = kernel.add_line(p3, p4).unwrap();
    let l4 = kernel.add_line(p4, p1).unwrap();
    let lp = kernel.add_curve_loop(&[l1, l2, l3, l4]).unwrap();

    let err = kernel.add_plane_surface(&[lp]).unwrap_err();
    assert!(matches!(err, KernelError::InvalidGeometry(_)));
}

#[test]
fn transforms_move_the_whole_point_closure_once() {
    let mut kernel = SessionKernel::new();
    let p1 = kernel.add_point([0.0, 0.0, 0.0], 0.0).unwrap();
    let p2 = kernel.add_point([1.0, 0.0, 0.0], 0.0).unwrap();
    let p3 = kernel.add_point([1.0, 1.0, 0.0], 0.0).unwrap();
    let l1 = kernel.add_line(p1, p2).unwrap();
    let l2 = kernel.add_line(p2, p3).unwrap();

    // p2 is shared between both curves; a double application would land it
    // at x = 3 instead of 2.
    kernel
        .translate(&[(1, l1), (1, l2)], [1.0, 0.0, 0.0])
        .unwrap();
    assert_eq!(kernel.point_coords(p2).unwrap(), [2.0, 0.0, 0.0]);

    kernel
        .rotate(
            &[(1, l1)],
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            std::f64::consts::FRAC_PI_2,
        )
        .unwrap();
    let p = kernel.point_coords(p1).unwrap();
    approx::assert_abs_diff_eq!(p[0], 0.0, epsilon = 1e-12);
    approx::assert_abs_diff_eq!(p[1], 1.0, epsilon = 1e-12);
}

#[test]
fn copy_detaches_shared_topology() {
    let mut kernel = SessionKernel::new();
    let p1 = kernel.add_point([0.0, 0.0, 0.0], 0.0).unwrap();
    let p2 = kernel.add_point([1.0, 0.0, 0.0], 0.0).unwrap();
    let line = kernel.add_line(p1, p2).unwrap();

    let copies = kernel.copy(&[(1, line)]).unwrap();
    assert_eq!(copies.len(), 1);
    kernel.translate(&copies, [0.0, 1.0, 0.0]).unwrap();

    // The original endpoints are untouched.
    assert_eq!(kernel.point_coords(p1).unwrap(), [0.0, 0.0, 0.0]);
    assert_eq!(kernel.point_coords(p2).unwrap(), [1.0, 0.0, 0.0]);
}

#[test]
fn transfinite_curves_override_size_driven_meshing() {
    let mut kernel = SessionKernel::new();
    let p1 = kernel.add_point([0.0, 0.0, 0.0], 0.0).unwrap();
    let p2 = kernel.add_point([10.0, 0.0, 0.0], 0.0).unwrap();
    let line = kernel.add_line(p1, p2).unwrap();
    kernel
        .set_transfinite_curve(line, 4, CurveDistribution::Bump, 0.25)
        .unwrap();

    kernel.generate(1).unwrap();
    let mesh = kernel.mesh_data().unwrap();
    assert_eq!(mesh.nodes.len(), 4);
    assert_eq!(mesh.lines.len(), 3);
    assert_eq!(mesh.line_curves, vec![line; 3]);

    // Bump: end segments are shorter than the middle one.
    let seg = |i: usize| {
        let [a, b] = mesh.lines[i];
        (mesh.nodes[b][0] - mesh.nodes[a][0]).abs()
    };
    assert!(seg(0) < seg(1));
    assert!(seg(2) < seg(1));
}

#[test]
fn hidden_curves_are_skipped_by_the_mesh_pass() {
    let mut kernel = SessionKernel::new();
    let p1 = kernel.add_point([0.0, 0.0, 0.0], 1.0).unwrap();
    let p2 = kernel.add_point([4.0, 0.0, 0.0], 1.0).unwrap();
    let p3 = kernel.add_point([4.0, 4.0, 0.0], 1.0).unwrap();
    let visible = kernel.add_line(p1, p2).unwrap();
    let hidden = kernel.add_line(p2, p3).unwrap();

    kernel.set_visibility(&[(1, hidden)], false, false).unwrap();
    kernel.generate(1).unwrap();
    let mesh = kernel.mesh_data().unwrap();
    assert!(mesh.line_curves.contains(&visible));
    assert!(!mesh.line_curves.contains(&hidden));
}
