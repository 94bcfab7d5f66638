use crate::kernel::{OccKernel, SessionKernel};
use crate::sequence::Operation;

use super::{GenerateTask, Task, ThreadWorker, WorkerMessage};

fn session_factory() -> Box<dyn OccKernel> {
    Box::new(SessionKernel::new())
}

fn rect_op() -> Operation {
    Operation::Rect {
        corner: [0.0, 0.0, 0.0],
        u: [1.0, 0.0, 0.0],
        v: [0.0, 1.0, 0.0],
    }
}

fn generate(steps: Vec<Operation>) -> Task {
    Task::Generate(Box::new(GenerateTask {
        model_name: "worker-test".to_string(),
        steps,
        start_index: 0,
        objects: Default::default(),
        finalize: false,
        preview_mesh: false,
        options: None,
    }))
}

#[test]
fn progress_messages_precede_the_terminal_payload() {
    let worker = ThreadWorker::spawn(session_factory).unwrap();
    worker.submit(generate(vec![rect_op()])).unwrap();

    let mut saw_progress = false;
    loop {
        match worker.recv().unwrap() {
            WorkerMessage::Progress(text) => {
                assert!(text.contains("rect"));
                saw_progress = true;
            }
            WorkerMessage::Done(output) => {
                assert!(saw_progress, "terminal payload arrived before progress");
                assert!(output.objects.contains_key("rec1"));
                assert_eq!(output.masked_vertices.len(), 4);
                break;
            }
            WorkerMessage::Failed(trace) => panic!("unexpected failure: {trace}"),
        }
    }
    worker.shutdown();
}

#[test]
fn kernel_state_persists_across_tasks() {
    let worker = ThreadWorker::spawn(session_factory).unwrap();

    worker.submit(generate(vec![rect_op()])).unwrap();
    let first = match worker.recv_until_done().unwrap() {
        WorkerMessage::Done(output) => output,
        other => panic!("unexpected message: {other:?}"),
    };

    // The second task replays only the new step against the persisted
    // table; the surface from the first task must still exist.
    worker
        .submit(Task::Generate(Box::new(GenerateTask {
            model_name: "worker-test".to_string(),
            steps: vec![Operation::Extrude {
                target: "rec1".to_string(),
                offset: [0.0, 0.0, 2.0],
            }],
            start_index: 0,
            objects: first.objects,
            finalize: false,
            preview_mesh: false,
            options: None,
        })))
        .unwrap();
    match worker.recv_until_done().unwrap() {
        WorkerMessage::Done(output) => {
            assert!(output.objects.contains_key("rec1"));
            assert!(output.objects.contains_key("ext1"));
        }
        other => panic!("unexpected message: {other:?}"),
    }
    worker.shutdown();
}

#[test]
fn a_failing_task_posts_failure_and_stops_the_worker() {
    let worker = ThreadWorker::spawn(session_factory).unwrap();
    worker
        .submit(generate(vec![Operation::Line {
            start: "nope1".to_string(),
            end: "nope2".to_string(),
        }]))
        .unwrap();

    match worker.recv_until_done().unwrap() {
        WorkerMessage::Failed(trace) => assert!(trace.contains("nope1")),
        other => panic!("unexpected message: {other:?}"),
    }

    // Fail-stop: the loop has exited, later tasks are never answered.
    let _ = worker.submit(generate(vec![rect_op()]));
    assert!(worker.recv().is_err());
}

#[test]
fn shutdown_sentinel_ends_an_idle_worker() {
    let worker = ThreadWorker::spawn(session_factory).unwrap();
    worker.shutdown();
}

#[test]
fn task_and_message_serde_round_trip() {
    let task = generate(vec![rect_op()]);
    let json = serde_json::to_string(&task).unwrap();
    let back: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(task, back);

    let msg = WorkerMessage::Progress("processing rect".to_string());
    let json = serde_json::to_string(&msg).unwrap();
    assert_eq!(json, r#"{"progress":"processing rect"}"#);

    let shutdown = serde_json::to_string(&Task::Shutdown).unwrap();
    assert_eq!(shutdown, r#""shutdown""#);
}
