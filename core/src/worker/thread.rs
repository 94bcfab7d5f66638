//! Thread-backed worker: same control flow as the process variant, weaker
//! isolation (a kernel crash takes the whole process down with it).

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::JoinHandle;

use tracing::debug;

use crate::kernel::OccKernel;

use super::{error_chain, process_generate, Task, WorkerError, WorkerMessage};

pub struct ThreadWorker {
    tasks: Sender<Task>,
    results: Receiver<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    /// Start the worker thread. The kernel is built on first use, inside
    /// the worker, so the caller thread never touches it.
    pub fn spawn<F>(mut kernel_factory: F) -> Result<Self, WorkerError>
    where
        F: FnMut() -> Box<dyn OccKernel> + Send + 'static,
    {
        let (task_tx, task_rx) = channel();
        let (result_tx, result_rx) = channel();
        let handle = std::thread::Builder::new()
            .name("geom-worker".to_string())
            .spawn(move || worker_loop(&mut kernel_factory, &task_rx, &result_tx))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        Ok(Self {
            tasks: task_tx,
            results: result_rx,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, task: Task) -> Result<(), WorkerError> {
        self.tasks.send(task).map_err(|_| WorkerError::Disconnected)
    }

    /// Block for the next progress or terminal message.
    pub fn recv(&self) -> Result<WorkerMessage, WorkerError> {
        self.results.recv().map_err(|_| WorkerError::Disconnected)
    }

    /// Drain messages until the terminal one for the current task.
    pub fn recv_until_done(&self) -> Result<WorkerMessage, WorkerError> {
        loop {
            match self.recv()? {
                WorkerMessage::Progress(_) => continue,
                terminal => return Ok(terminal),
            }
        }
    }

    /// Request shutdown and wait for the thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.tasks.send(Task::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        let _ = self.tasks.send(Task::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    kernel_factory: &mut dyn FnMut() -> Box<dyn OccKernel>,
    tasks: &Receiver<Task>,
    results: &Sender<WorkerMessage>,
) {
    let mut engine = None;
    while let Ok(task) = tasks.recv() {
        match task {
            Task::Shutdown => break,
            Task::Generate(task) => {
                let mut emit = |msg: WorkerMessage| {
                    let _ = results.send(msg);
                };
                match process_generate(&mut engine, kernel_factory, *task, &mut emit) {
                    Ok(output) => {
                        let _ = results.send(WorkerMessage::Done(Box::new(output)));
                    }
                    Err(err) => {
                        let _ = results.send(WorkerMessage::Failed(error_chain(&err)));
                        // Fail-stop: no further tasks after a failure.
                        break;
                    }
                }
            }
        }
    }
    debug!("worker loop ended");
}
