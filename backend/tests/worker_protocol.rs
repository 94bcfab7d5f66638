//! Protocol smoke test against the real worker process.

use std::path::Path;

use geom_core::sequence::Operation;
use geom_core::worker::{GenerateTask, ProcessWorker, Task, WorkerMessage};

#[test]
fn process_worker_round_trip() {
    let binary = env!("CARGO_BIN_EXE_backend");
    let mut worker = ProcessWorker::spawn(Path::new(binary)).expect("spawn backend");

    worker
        .submit(&Task::Generate(Box::new(GenerateTask {
            model_name: "protocol-test".to_string(),
            steps: vec![Operation::Rect {
                corner: [0.0, 0.0, 0.0],
                u: [1.0, 0.0, 0.0],
                v: [0.0, 1.0, 0.0],
            }],
            start_index: 0,
            objects: Default::default(),
            finalize: false,
            preview_mesh: false,
            options: None,
        })))
        .expect("submit");

    let mut saw_progress = false;
    loop {
        match worker.recv().expect("recv") {
            WorkerMessage::Progress(text) => {
                assert!(text.contains("rect"));
                saw_progress = true;
            }
            WorkerMessage::Done(output) => {
                assert!(saw_progress);
                assert!(output.objects.contains_key("rec1"));
                break;
            }
            WorkerMessage::Failed(trace) => panic!("worker failed: {trace}"),
        }
    }

    worker.shutdown().expect("shutdown");
}

#[test]
fn process_worker_reports_failures_as_free_text() {
    let binary = env!("CARGO_BIN_EXE_backend");
    let mut worker = ProcessWorker::spawn(Path::new(binary)).expect("spawn backend");

    worker
        .submit(&Task::Generate(Box::new(GenerateTask {
            model_name: "protocol-test".to_string(),
            steps: vec![Operation::Line {
                start: "ghost1".to_string(),
                end: "ghost2".to_string(),
            }],
            start_index: 0,
            objects: Default::default(),
            finalize: false,
            preview_mesh: false,
            options: None,
        })))
        .expect("submit");

    loop {
        match worker.recv().expect("recv") {
            WorkerMessage::Progress(_) => continue,
            WorkerMessage::Failed(trace) => {
                assert!(trace.contains("ghost1"));
                break;
            }
            WorkerMessage::Done(_) => panic!("expected a failure payload"),
        }
    }
    // After a failure the child's loop exits on its own.
}
