use approx::assert_abs_diff_eq;

use crate::kernel::{OccKernel, SessionKernel};

use super::{EngineOptions, GeomEngine};

fn engine() -> GeomEngine {
    GeomEngine::new(
        Box::new(SessionKernel::new()),
        EngineOptions::default(),
        "test-model",
    )
    .expect("engine")
}

fn line(eng: &mut GeomEngine, a: [f64; 3], b: [f64; 3]) -> i32 {
    let pa = eng.add_point(a, None, true).unwrap();
    let pb = eng.add_point(b, None, true).unwrap();
    eng.add_line(pa, pb).unwrap().tag()
}

#[test]
fn vertex_size_is_half_the_shortest_incident_edge() {
    let mut eng = engine();
    line(&mut eng, [0.0, 0.0, 0.0], [2.0, 0.0, 0.0]);
    line(&mut eng, [0.0, 0.0, 0.0], [0.0, 8.0, 0.0]);

    let sizes = eng.vertex_sizes().unwrap();
    // Shared corner: min(2, 8) / 2; far ends see only their own edge.
    let mut values: Vec<f64> = sizes.values().copied().collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![1.0, 1.0, 4.0]);
}

#[test]
fn uniform_pass_caps_size_at_diagonal_over_resolution() {
    let mut eng = engine();
    let tag = line(&mut eng, [0.0, 0.0, 0.0], [100.0, 0.0, 0.0]);

    eng.mesh_preview_uniform().unwrap();
    let mesh = eng.kernel.mesh_data().unwrap();
    // diagonal 100, resolution 32: cap 3.125, so 32 segments.
    assert_eq!(mesh.lines.len(), 32);
    assert!(mesh.line_curves.iter().all(|&c| c == tag));
}

#[test]
fn bucketed_pass_forces_discrete_segment_counts() {
    let mut eng = engine();
    let long = line(&mut eng, [0.0, 0.0, 0.0], [100.0, 0.0, 0.0]);
    let mid = line(&mut eng, [0.0, 10.0, 0.0], [0.05, 10.0, 0.0]); // ratio 5e-4
    let tiny = line(&mut eng, [0.0, 20.0, 0.0], [5e-5, 20.0, 0.0]); // below 1e-5

    eng.mesh_preview_bucketed().unwrap();
    let mesh = eng.kernel.mesh_data().unwrap();
    let count = |tag: i32| mesh.line_curves.iter().filter(|&&c| c == tag).count();
    assert_eq!(count(long), 5);
    assert_eq!(count(mid), 4);
    // Too small: forced onto 3 biased segments.
    assert_eq!(count(tiny), 3);
}

#[test]
fn adaptive_plan_separates_do_first_from_default() {
    let mut eng = engine();
    // A dominant edge with tiny neighbors at both ends: its incident
    // vertex sizing collapses, so it exceeds max_seg times its
    // neighborhood and must be refined first.
    let long = line(&mut eng, [0.0, 0.0, 0.0], [100.0, 0.0, 0.0]);
    let tiny_a = line(&mut eng, [0.0, 0.0, 0.0], [0.0, 0.01, 0.0]);
    let tiny_b = line(&mut eng, [100.0, 0.0, 0.0], [100.0, 0.01, 0.0]);

    let plan = eng.plan_preview().unwrap();
    let refined: Vec<i32> = plan.refined.iter().map(|(t, _)| *t).collect();
    assert_eq!(refined, vec![long]);
    // length / max_seg.
    assert_abs_diff_eq!(plan.refined[0].1, 10.0, epsilon = 1e-9);

    // Both tiny edges sit far below small_edge_factor * diagonal and go
    // into the forced-small do-first set, never the default pass.
    assert!(plan.forced_small.contains(&tiny_a));
    assert!(plan.forced_small.contains(&tiny_b));
    assert!(plan.default_pass.is_empty());

    let do_first = plan.do_first();
    assert!(do_first.contains(&long));
    assert!(do_first.contains(&tiny_a));
    assert!(do_first.contains(&tiny_b));
}

#[test]
fn moderate_edges_stay_in_the_default_pass() {
    let mut eng = engine();
    let a = line(&mut eng, [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]);
    let b = line(&mut eng, [0.0, 0.0, 0.0], [0.0, 8.0, 0.0]);

    let plan = eng.plan_preview().unwrap();
    assert!(plan.refined.is_empty());
    assert!(plan.forced_small.is_empty());
    assert!(plan.default_pass.contains(&a));
    assert!(plan.default_pass.contains(&b));
}

#[test]
fn tiny_closed_loops_are_hidden_from_both_passes() {
    let mut eng = engine();
    line(&mut eng, [0.0, 0.0, 0.0], [100.0, 0.0, 0.0]);
    // A closed loop far below the sizing noise floor (max vertex size is
    // 50, threshold 50e-5): circumference ~6e-5.
    let disk = eng.add_disk([50.0, 10.0, 0.0], 1e-5, 1e-5).unwrap();
    let disk_curves = eng.kernel.boundary(&[disk.to_dimtag().unwrap()]).unwrap();
    let loop_tag = disk_curves[0].1;

    let plan = eng.mesh_preview_adaptive().unwrap();
    assert_eq!(plan.tiny_loops, vec![loop_tag]);

    let mesh = eng.kernel.mesh_data().unwrap();
    assert!(!mesh.line_curves.contains(&loop_tag));
}

#[test]
fn adaptive_meshing_refines_do_first_and_meshes_the_rest() {
    let mut eng = engine();
    let long = line(&mut eng, [0.0, 0.0, 0.0], [100.0, 0.0, 0.0]);
    let tiny = line(&mut eng, [0.0, 0.0, 0.0], [0.0, 0.01, 0.0]);
    let moderate = line(&mut eng, [100.0, 0.0, 0.0], [100.0, 30.0, 0.0]);

    eng.mesh_preview_adaptive().unwrap();
    let mesh = eng.kernel.mesh_data().unwrap();
    let count = |tag: i32| mesh.line_curves.iter().filter(|&&c| c == tag).count();

    // The forced-small edge carries the fixed biased segment count.
    assert_eq!(count(tiny), 3);
    // The long edge was meshed; all three edges appear in the output.
    assert!(count(long) >= 1);
    assert!(count(moderate) >= 1);
}

#[test]
fn preview_pipeline_returns_mesh_data() {
    let mut eng = engine();
    let surface = eng
        .add_rect([0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [0.0, 4.0, 0.0])
        .unwrap();
    let _ = surface;
    let mesh = eng.generate_preview_mesh().unwrap();
    assert!(!mesh.is_empty());
    assert_eq!(mesh.lines.len(), mesh.line_curves.len());
}
