//! Worker process entry point.
//!
//! Reads one JSON task per line on stdin and writes one JSON message per
//! line on stdout (progress messages first, then the terminal payload of
//! each task). Stdout is the protocol channel, so all logging goes to
//! stderr. The process exits on the shutdown sentinel, on end of input, or
//! after a failed task (fail-stop).

use std::io::{self, BufRead, Write};

use geom_core::kernel::{OccKernel, SessionKernel};
use geom_core::worker::{error_chain, process_generate, Task, WorkerMessage};
use tracing::{info, warn};

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut engine = None;
    let mut factory = || Box::new(SessionKernel::new()) as Box<dyn OccKernel>;

    info!(version = geom_core::version(), "worker backend ready");
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let task: Task = match serde_json::from_str(&line) {
            Ok(task) => task,
            Err(err) => {
                warn!(%err, "unparseable task");
                emit(&stdout, &WorkerMessage::Failed(format!("bad task: {err}")));
                break;
            }
        };
        match task {
            Task::Shutdown => {
                info!("shutdown sentinel received");
                break;
            }
            Task::Generate(task) => {
                info!(model = %task.model_name, steps = task.steps.len(), "task received");
                let mut forward = |msg: WorkerMessage| emit(&stdout, &msg);
                match process_generate(&mut engine, &mut factory, *task, &mut forward) {
                    Ok(output) => {
                        emit(&stdout, &WorkerMessage::Done(Box::new(output)));
                    }
                    Err(err) => {
                        warn!(%err, "task failed");
                        emit(&stdout, &WorkerMessage::Failed(error_chain(&err)));
                        // No further tasks are processed after a failure.
                        break;
                    }
                }
            }
        }
    }
}

fn emit(stdout: &io::Stdout, msg: &WorkerMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let mut lock = stdout.lock();
            let _ = writeln!(lock, "{json}");
            let _ = lock.flush();
        }
        Err(err) => warn!(%err, "failed to encode message"),
    }
}
