//! Full pipeline through the thread worker: replay, finalize, preview mesh.

use geom_core::engine::EngineOptions;
use geom_core::kernel::{OccKernel, SessionKernel};
use geom_core::sequence::Operation;
use geom_core::worker::{GenerateTask, Task, ThreadWorker, WorkerMessage};

fn session_factory() -> Box<dyn OccKernel> {
    Box::new(SessionKernel::new())
}

#[test]
fn finalize_and_preview_mesh_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        output_dir: Some(dir.path().to_path_buf()),
        ..EngineOptions::default()
    };

    let steps = vec![
        Operation::Rect {
            corner: [0.0, 0.0, 0.0],
            u: [4.0, 0.0, 0.0],
            v: [0.0, 4.0, 0.0],
        },
        Operation::Extrude {
            target: "rec1".to_string(),
            offset: [0.0, 0.0, 2.0],
        },
    ];

    let worker = ThreadWorker::spawn(session_factory).unwrap();
    worker
        .submit(Task::Generate(Box::new(GenerateTask {
            model_name: "pipeline/model:a".to_string(),
            steps,
            start_index: 0,
            objects: Default::default(),
            finalize: true,
            preview_mesh: true,
            options: Some(options),
        })))
        .unwrap();

    let mut progress = Vec::new();
    let output = loop {
        match worker.recv().unwrap() {
            WorkerMessage::Progress(text) => progress.push(text),
            WorkerMessage::Done(output) => break output,
            WorkerMessage::Failed(trace) => panic!("pipeline failed: {trace}"),
        }
    };
    worker.shutdown();

    // Progress covered each step and the extra pipeline stages, in order.
    assert!(progress.iter().any(|p| p.contains("rect")));
    assert!(progress.iter().any(|p| p.contains("extrude")));
    assert!(progress.iter().any(|p| p.contains("finalizing")));
    assert!(progress.iter().any(|p| p.contains("preview")));

    // The persisted model landed in the output directory with separators
    // sanitized out of the name.
    let brep = output.brep_path.as_ref().expect("brep path");
    assert!(brep.ends_with("pipeline_model_a.brep"));
    assert!(brep.exists());

    // The reload renumbered tags; the mapping covers the model and the
    // table was rewritten through it.
    let mapping = output.entity_map.as_ref().expect("entity mapping");
    assert!(!mapping.is_empty());
    assert!(output.objects.contains_key("rec1"));
    assert!(output.objects.contains_key("ext1"));

    let mesh = output.mesh.as_ref().expect("mesh data");
    assert!(!mesh.is_empty());
    assert_eq!(mesh.lines.len(), mesh.line_curves.len());
}
